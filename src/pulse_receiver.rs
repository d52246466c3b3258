//! Per-animation pulse receiver.
//!
//! Converts the clock's absolute tick stream into animation-relative elapsed
//! ticks: an origin captured at start (offset by the configured delay),
//! shifted forward across pause gaps so elapsed time is continuous, with
//! optional folding of sub-resolution pulses for low-frame-rate animations.

use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use crate::core::Tick;
use crate::error::{CadenzaError, CadenzaResult};
use crate::pulse::{PulseClock, PulseTarget};

type PulseFn = Box<dyn Fn(Tick)>;

struct ReceiverInner {
    clock: Rc<PulseClock>,
    resolution: Tick,
    origin: Cell<Tick>,
    pause_tick: Cell<Tick>,
    paused: Cell<bool>,
    last_interval: Cell<Option<i64>>,
    on_pulse: RefCell<Option<PulseFn>>,
}

impl PulseTarget for ReceiverInner {
    fn time_pulse(&self, now: Tick) {
        let relative = Tick(now.0 - self.origin.get().0);
        if relative.0 < 0 {
            // Still inside the delay window; consumed silently.
            return;
        }

        // A pulse is forwarded only when it lands in a new resolution-sized
        // interval; sub-resolution pulses in the same interval are dropped so
        // coarse-resolution animations skip needless interpolation work.
        let interval = relative.0 / self.resolution.0;
        if let Some(last) = self.last_interval.get()
            && interval <= last
        {
            return;
        }
        self.last_interval.set(Some(interval));

        if let Some(on_pulse) = self.on_pulse.borrow().as_ref() {
            on_pulse(relative);
        }
    }
}

/// Cheap handle to a receiver; clones share the same registration state.
#[derive(Clone)]
pub struct PulseReceiver {
    inner: Rc<ReceiverInner>,
}

/// Non-owning handle, for callbacks that must not keep the receiver alive.
#[derive(Clone)]
pub struct WeakPulseReceiver {
    inner: Weak<ReceiverInner>,
}

impl WeakPulseReceiver {
    pub fn upgrade(&self) -> Option<PulseReceiver> {
        self.inner.upgrade().map(|inner| PulseReceiver { inner })
    }
}

impl std::fmt::Debug for PulseReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseReceiver")
            .field("resolution", &self.inner.resolution)
            .field("origin", &self.inner.origin.get())
            .field("paused", &self.inner.paused.get())
            .finish()
    }
}

impl PulseReceiver {
    /// A receiver ticking at the clock's own granularity.
    pub fn new(clock: Rc<PulseClock>) -> PulseReceiver {
        Self::build(clock, Tick(1))
    }

    /// A receiver that folds pulses to a coarser resolution than the clock's.
    pub fn with_resolution(clock: Rc<PulseClock>, resolution: Tick) -> CadenzaResult<PulseReceiver> {
        if resolution.0 < 1 {
            return Err(CadenzaError::validation(
                "pulse receiver resolution must be >= 1 tick",
            ));
        }
        Ok(Self::build(clock, resolution))
    }

    fn build(clock: Rc<PulseClock>, resolution: Tick) -> PulseReceiver {
        PulseReceiver {
            inner: Rc::new(ReceiverInner {
                clock,
                resolution,
                origin: Cell::new(Tick::ZERO),
                pause_tick: Cell::new(Tick::ZERO),
                paused: Cell::new(false),
                last_interval: Cell::new(None),
                on_pulse: RefCell::new(None),
            }),
        }
    }

    /// Install the downstream consumer of relative ticks.
    pub fn set_on_pulse(&self, on_pulse: impl Fn(Tick) + 'static) {
        *self.inner.on_pulse.borrow_mut() = Some(Box::new(on_pulse));
    }

    pub fn downgrade(&self) -> WeakPulseReceiver {
        WeakPulseReceiver {
            inner: Rc::downgrade(&self.inner),
        }
    }

    fn target(&self) -> Rc<dyn PulseTarget> {
        self.inner.clone()
    }

    /// (Re)base the origin at `now + delay` and register with the clock.
    ///
    /// Starting an already-started receiver resets the origin: elapsed time
    /// observed downstream restarts from zero.
    pub fn start(&self, delay: Tick) {
        self.inner.paused.set(false);
        self.inner
            .origin
            .set(Tick(self.inner.clock.now().0 + delay.0.max(0)));
        self.inner.last_interval.set(None);
        self.inner.clock.add_pulse_receiver(&self.target());
    }

    /// Deregister and remember the pause instant. No-op if not registered.
    pub fn pause(&self) {
        if self.inner.paused.get() || !self.is_registered() {
            return;
        }
        self.inner.paused.set(true);
        self.inner.pause_tick.set(self.inner.clock.now());
        self.inner.clock.remove_pulse_receiver(&self.target());
    }

    /// Re-register, shifting the origin forward by the pause gap so elapsed
    /// time continues seamlessly. No-op if not paused.
    pub fn resume(&self) {
        if !self.inner.paused.get() {
            return;
        }
        self.inner.paused.set(false);
        let gap = self.inner.clock.now().0 - self.inner.pause_tick.get().0;
        self.inner.origin.set(Tick(self.inner.origin.get().0 + gap));
        self.inner.clock.add_pulse_receiver(&self.target());
    }

    /// Deregister unconditionally and clear any pause state.
    pub fn stop(&self) {
        self.inner.paused.set(false);
        self.inner.clock.remove_pulse_receiver(&self.target());
    }

    pub fn is_registered(&self) -> bool {
        self.inner.clock.contains_pulse_receiver(&self.target())
    }

    pub fn is_paused(&self) -> bool {
        self.inner.paused.get()
    }
}
