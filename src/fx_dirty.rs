//! Dirty-region tracking for incremental repaint.
//!
//! A dirty region is the part of the output that must be repainted because an
//! upstream input changed. Containers hold a small list of device-space
//! rectangles; the pool recycles containers across render passes so the
//! per-frame hot path does not allocate.

use smallvec::SmallVec;

use crate::core::Rect;

/// A set of dirty rectangles in device space.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DirtyRegionContainer {
    regions: SmallVec<[Rect; 4]>,
}

impl DirtyRegionContainer {
    pub fn new() -> DirtyRegionContainer {
        DirtyRegionContainer {
            regions: SmallVec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    pub fn regions(&self) -> &[Rect] {
        &self.regions
    }

    /// Add a rectangle, merging it into an existing one when they overlap so
    /// the list stays small. Degenerate rectangles are dropped.
    pub fn add(&mut self, rect: Rect) {
        if rect.width() <= 0.0 || rect.height() <= 0.0 {
            return;
        }
        for existing in &mut self.regions {
            if overlaps(*existing, rect) {
                *existing = existing.union(rect);
                return;
            }
        }
        self.regions.push(rect);
    }

    pub fn add_all(&mut self, other: &DirtyRegionContainer) {
        for &rect in other.regions() {
            self.add(rect);
        }
    }

    /// Grow every rectangle by the given horizontal/vertical padding, for
    /// effects whose kernels paint outside their input footprint.
    pub fn grow(&mut self, h_pad: f64, v_pad: f64) {
        for rect in &mut self.regions {
            *rect = rect.inflate(h_pad, v_pad);
        }
    }

    /// Bounding rectangle of the whole set, or `None` when empty.
    pub fn bounds(&self) -> Option<Rect> {
        let mut it = self.regions.iter();
        let first = *it.next()?;
        Some(it.fold(first, |acc, r| acc.union(*r)))
    }

    pub fn clear(&mut self) {
        self.regions.clear();
    }
}

fn overlaps(a: Rect, b: Rect) -> bool {
    a.x0 < b.x1 && b.x0 < a.x1 && a.y0 < b.y1 && b.y0 < a.y1
}

/// Allocation statistics, observable for tests and diagnostics.
#[derive(Clone, Copy, Debug, Default)]
pub struct DirtyRegionPoolStats {
    pub checked_out: u64,
    pub reused: u64,
    pub dropped_on_checkin: u64,
}

/// Bounded free-list of [`DirtyRegionContainer`]s.
#[derive(Debug)]
pub struct DirtyRegionPool {
    free: Vec<DirtyRegionContainer>,
    max_retained: usize,
    stats: DirtyRegionPoolStats,
}

impl Default for DirtyRegionPool {
    fn default() -> Self {
        Self::with_capacity(32)
    }
}

impl DirtyRegionPool {
    pub fn with_capacity(max_retained: usize) -> DirtyRegionPool {
        DirtyRegionPool {
            free: Vec::new(),
            max_retained,
            stats: DirtyRegionPoolStats::default(),
        }
    }

    pub fn stats(&self) -> DirtyRegionPoolStats {
        self.stats
    }

    pub fn checkout(&mut self) -> DirtyRegionContainer {
        self.stats.checked_out = self.stats.checked_out.saturating_add(1);
        match self.free.pop() {
            Some(container) => {
                self.stats.reused = self.stats.reused.saturating_add(1);
                container
            }
            None => DirtyRegionContainer::new(),
        }
    }

    pub fn checkin(&mut self, mut container: DirtyRegionContainer) {
        if self.free.len() >= self.max_retained {
            self.stats.dropped_on_checkin = self.stats.dropped_on_checkin.saturating_add(1);
            return;
        }
        container.clear();
        self.free.push(container);
    }
}
