//! Clip envelope: cycle/rate/auto-reverse/repeat arithmetic.
//!
//! Maps raw elapsed ticks (as delivered by a pulse receiver) to a position
//! inside the possibly repeating, possibly direction-folding animation cycle.
//! All arithmetic is integer ticks; the only floating point is the rate
//! scaling, rounded back to ticks immediately.
//!
//! Internally the envelope always advances a monotonic position `pos` from 0
//! toward the total duration in |rate| space. Reverse playback mirrors the
//! position (`pos ↦ total − pos`) instead of running the arithmetic backwards,
//! so a single code path covers both directions.

use crate::core::{Duration, Tick};
use crate::error::{CadenzaError, CadenzaResult};

/// Number of cycles an animation plays.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum CycleCount {
    Finite(u64),
    Indefinite,
}

impl CycleCount {
    pub const ONE: CycleCount = CycleCount::Finite(1);
}

/// Resolved position for one instant of an animation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EnvelopePosition {
    /// Position folded into a single cycle, fed to the interpolation layer.
    /// At the terminal boundary this is the cycle end, not a wrap to zero.
    pub clip_pos: Tick,
    /// Playback-direction-corrected absolute position, used for cue points.
    pub total_pos: Tick,
    /// Zero-based index of the cycle the position falls in.
    pub cycle_index: u64,
    /// Whether the position is inside an auto-reverse back-swing (odd cycle);
    /// the observable current rate carries the opposite sign there.
    pub reversed_phase: bool,
    /// Whether the position reached the end of the whole animation.
    pub finished: bool,
}

impl EnvelopePosition {
    fn at_origin() -> EnvelopePosition {
        EnvelopePosition {
            clip_pos: Tick::ZERO,
            total_pos: Tick::ZERO,
            cycle_index: 0,
            reversed_phase: false,
            finished: false,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ClipEnvelope {
    cycle_ticks: Tick,
    cycle_count: CycleCount,
    auto_reverse: bool,
    rate: f64,
    /// Sign of the last non-zero rate; rate 0 freezes but keeps direction.
    direction_negative: bool,
    /// Monotonic position in |rate| space, `0..=total` (unbounded above for
    /// an indefinite cycle count).
    pos: i64,
    /// Rebase offset: `pos = delta_ticks + round(elapsed × |rate|)`.
    delta_ticks: i64,
    /// Raw elapsed ticks at the most recent pulse, cached for rebasing.
    last_elapsed: i64,
}

impl ClipEnvelope {
    pub fn new(cycle_duration: Duration, cycle_count: CycleCount) -> CadenzaResult<ClipEnvelope> {
        let mut envelope = ClipEnvelope {
            cycle_ticks: Tick::ZERO,
            cycle_count: CycleCount::ONE,
            auto_reverse: false,
            rate: 1.0,
            direction_negative: false,
            pos: 0,
            delta_ticks: 0,
            last_elapsed: 0,
        };
        envelope.set_cycle_duration(cycle_duration)?;
        envelope.set_cycle_count(cycle_count)?;
        Ok(envelope)
    }

    pub fn cycle_ticks(&self) -> Tick {
        self.cycle_ticks
    }

    pub fn cycle_count(&self) -> CycleCount {
        self.cycle_count
    }

    pub fn auto_reverse(&self) -> bool {
        self.auto_reverse
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// Whether the configuration admits playback at all. A cycle duration
    /// that rounds to zero ticks makes the animation non-startable, though it
    /// remains seekable (seeks just report zero).
    pub fn is_startable(&self) -> bool {
        self.cycle_ticks.0 > 0
    }

    /// Total duration in ticks; `None` for an indefinite cycle count.
    pub fn total_ticks(&self) -> Option<i64> {
        match self.cycle_count {
            CycleCount::Finite(n) => Some((n as i64).saturating_mul(self.cycle_ticks.0)),
            CycleCount::Indefinite => None,
        }
    }

    pub fn total_duration(&self) -> Duration {
        match self.total_ticks() {
            Some(total) => Tick(total).to_duration(),
            None => Duration::INDEFINITE,
        }
    }

    /// Current position without advancing time.
    pub fn position(&self) -> EnvelopePosition {
        self.position_at(self.pos)
    }

    /// Arm the envelope for a fresh run: pulses restart at elapsed zero and
    /// continue from the current position.
    pub fn start(&mut self) {
        self.last_elapsed = 0;
        self.delta_ticks = self.pos;
    }

    /// Advance to the position implied by `elapsed` raw ticks since start.
    pub fn time_pulse(&mut self, elapsed: Tick) -> EnvelopePosition {
        self.last_elapsed = elapsed.0;
        if self.cycle_ticks.0 == 0 {
            return EnvelopePosition::at_origin();
        }

        let scaled = (elapsed.0 as f64 * self.rate.abs()).round() as i64;
        let mut p = self.delta_ticks.saturating_add(scaled).max(0);
        if let Some(total) = self.total_ticks() {
            p = p.min(total);
        }
        self.pos = p;
        self.position_at(p)
    }

    /// Direct seek to an observed position; clamps into `[0, total]`, rebases
    /// so subsequent pulses continue from there, and never reports finished.
    pub fn jump_to(&mut self, target: Tick) -> EnvelopePosition {
        if self.cycle_ticks.0 == 0 {
            self.pos = 0;
            self.delta_ticks = 0;
            return EnvelopePosition::at_origin();
        }

        let mut observed = target.0.max(0);
        let total = self.total_ticks();
        if let Some(total) = total {
            observed = observed.min(total);
        }

        self.pos = match total {
            Some(total) if self.direction_negative => total - observed,
            _ => observed,
        };
        self.rebase();

        let mut position = self.position_at(self.pos);
        position.finished = false;
        position
    }

    /// Change the playback rate. A sign change mirrors the internal position
    /// so the observed position is preserved while the direction flips.
    pub fn set_rate(&mut self, rate: f64) {
        let new_negative = if rate < 0.0 {
            true
        } else if rate > 0.0 {
            false
        } else {
            self.direction_negative
        };

        if new_negative != self.direction_negative && self.cycle_ticks.0 > 0 {
            match self.total_ticks() {
                Some(total) => self.pos = total - self.pos,
                None => {
                    // No finite total to mirror against; mirror within the
                    // current cycle instead.
                    let d = self.cycle_ticks.0;
                    let base = (self.pos / d) * d;
                    self.pos = base + (d - self.pos % d);
                }
            }
        }

        self.rate = rate;
        self.direction_negative = new_negative;
        self.rebase();
    }

    pub fn set_cycle_duration(&mut self, cycle_duration: Duration) -> CadenzaResult<()> {
        if cycle_duration.is_unknown() {
            return Err(CadenzaError::validation(
                "cycle duration must not be UNKNOWN",
            ));
        }
        if cycle_duration.is_indefinite() {
            return Err(CadenzaError::validation("cycle duration must be finite"));
        }
        if cycle_duration < Duration::ZERO {
            return Err(CadenzaError::validation("cycle duration must be >= 0"));
        }

        self.cycle_ticks = Tick::from_duration(cycle_duration);
        self.clamp_pos();
        self.rebase();
        Ok(())
    }

    pub fn set_cycle_count(&mut self, cycle_count: CycleCount) -> CadenzaResult<()> {
        if cycle_count == CycleCount::Finite(0) {
            return Err(CadenzaError::validation("cycle count must be >= 1"));
        }
        self.cycle_count = cycle_count;
        self.clamp_pos();
        self.rebase();
        Ok(())
    }

    pub fn set_auto_reverse(&mut self, auto_reverse: bool) {
        self.auto_reverse = auto_reverse;
    }

    fn rebase(&mut self) {
        let scaled = (self.last_elapsed as f64 * self.rate.abs()).round() as i64;
        self.delta_ticks = self.pos - scaled;
    }

    fn clamp_pos(&mut self) {
        if self.cycle_ticks.0 == 0 {
            self.pos = 0;
            return;
        }
        if let Some(total) = self.total_ticks() {
            self.pos = self.pos.min(total);
        }
        self.pos = self.pos.max(0);
    }

    fn position_at(&self, p: i64) -> EnvelopePosition {
        let d = self.cycle_ticks.0;
        if d == 0 {
            return EnvelopePosition::at_origin();
        }

        let total = self.total_ticks();
        let effective = match total {
            Some(total) if self.direction_negative => total - p,
            _ => p,
        };

        // The terminal boundary belongs to the end of the last cycle; every
        // interior boundary belongs to the start of the next.
        let (cycle, within) = match (self.cycle_count, total) {
            (CycleCount::Finite(n), Some(total)) if effective >= total => (n as i64 - 1, d),
            _ => (effective / d, effective % d),
        };

        let reversed_phase = self.auto_reverse && cycle % 2 == 1;
        let mut clip = if reversed_phase { d - within } else { within };
        if self.direction_negative && total.is_none() {
            clip = d - clip;
        }

        EnvelopePosition {
            clip_pos: Tick(clip),
            total_pos: Tick(effective),
            cycle_index: cycle.max(0) as u64,
            reversed_phase,
            finished: total.is_some_and(|total| p >= total),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seconds(s: f64) -> Tick {
        Tick::from_duration(Duration::seconds(s))
    }

    fn envelope(cycle_secs: f64, count: CycleCount) -> ClipEnvelope {
        ClipEnvelope::new(Duration::seconds(cycle_secs), count).unwrap()
    }

    #[test]
    fn single_cycle_clamps_at_end() {
        let mut e = envelope(2.0, CycleCount::ONE);
        e.start();

        let mid = e.time_pulse(seconds(1.0));
        assert_eq!(mid.clip_pos, seconds(1.0));
        assert!(!mid.finished);

        let end = e.time_pulse(seconds(5.0));
        assert_eq!(end.clip_pos, seconds(2.0));
        assert!(end.finished);
    }

    #[test]
    fn finite_repeat_wraps_then_clamps() {
        let mut e = envelope(2.0, CycleCount::Finite(2));
        e.start();

        let second_cycle = e.time_pulse(seconds(3.0));
        assert_eq!(second_cycle.clip_pos, seconds(1.0));
        assert_eq!(second_cycle.cycle_index, 1);
        assert!(!second_cycle.finished);

        let end = e.time_pulse(seconds(9.0));
        assert_eq!(end.clip_pos, seconds(2.0));
        assert_eq!(end.cycle_index, 1);
        assert!(end.finished);
    }

    #[test]
    fn indefinite_wraps_forever() {
        let mut e = envelope(1.0, CycleCount::Indefinite);
        e.start();

        let p = e.time_pulse(seconds(1_000.5));
        assert_eq!(p.clip_pos, seconds(0.5));
        assert_eq!(p.cycle_index, 1_000);
        assert!(!p.finished);
    }

    #[test]
    fn auto_reverse_folds_odd_cycles() {
        let mut e = envelope(2.0, CycleCount::Finite(2));
        e.set_auto_reverse(true);
        e.start();

        let forward = e.time_pulse(seconds(1.5));
        assert_eq!(forward.clip_pos, seconds(1.5));
        assert!(!forward.reversed_phase);

        let backward = e.time_pulse(seconds(2.5));
        assert_eq!(backward.clip_pos, seconds(1.5));
        assert!(backward.reversed_phase);

        let end = e.time_pulse(seconds(4.0));
        assert_eq!(end.clip_pos, Tick::ZERO);
        assert!(end.finished);
    }

    #[test]
    fn jump_to_clamps_never_wraps_past_total() {
        let mut e = envelope(2.0, CycleCount::ONE);
        assert_eq!(e.jump_to(seconds(2.000001)).clip_pos, seconds(2.0));
        assert_eq!(e.jump_to(Tick(seconds(0.0).0 - 1)).clip_pos, Tick::ZERO);

        let mut e = envelope(2.0, CycleCount::Finite(2));
        let wrapped = e.jump_to(seconds(3.0));
        assert_eq!(wrapped.clip_pos, seconds(1.0));
        assert_eq!(wrapped.cycle_index, 1);

        let clamped = e.jump_to(seconds(4.000001));
        assert_eq!(clamped.clip_pos, seconds(2.0));
        assert_eq!(clamped.cycle_index, 1);
        assert!(!clamped.finished);
    }

    #[test]
    fn jump_rebases_future_pulses() {
        let mut e = envelope(10.0, CycleCount::ONE);
        e.start();
        e.time_pulse(seconds(2.0));
        e.jump_to(seconds(7.0));

        let p = e.time_pulse(seconds(3.0));
        assert_eq!(p.clip_pos, seconds(8.0));
    }

    #[test]
    fn rate_scales_elapsed_ticks() {
        let mut e = envelope(10.0, CycleCount::ONE);
        e.set_rate(2.0);
        e.start();

        let p = e.time_pulse(seconds(3.0));
        assert_eq!(p.clip_pos, seconds(6.0));
    }

    #[test]
    fn negative_rate_runs_toward_zero() {
        let mut e = envelope(10.0, CycleCount::ONE);
        e.set_rate(-1.0);
        e.jump_to(seconds(10.0));
        e.start();

        let p = e.time_pulse(seconds(4.0));
        assert_eq!(p.clip_pos, seconds(6.0));
        assert_eq!(p.total_pos, seconds(6.0));
        assert!(!p.finished);

        let end = e.time_pulse(seconds(10.0));
        assert_eq!(end.clip_pos, Tick::ZERO);
        assert!(end.finished);
    }

    #[test]
    fn direction_flip_preserves_observed_position() {
        let mut e = envelope(10.0, CycleCount::ONE);
        e.start();
        let before = e.time_pulse(seconds(6.0));
        assert_eq!(before.clip_pos, seconds(6.0));

        e.set_rate(-1.0);
        assert_eq!(e.position().clip_pos, seconds(6.0));

        // Two more seconds of playback now move backwards.
        let after = e.time_pulse(seconds(8.0));
        assert_eq!(after.clip_pos, seconds(4.0));
    }

    #[test]
    fn shrinking_cycle_duration_clamps_position() {
        let mut e = envelope(2.0, CycleCount::ONE);
        e.jump_to(Tick::from_duration(Duration::millis(1000.0)));

        e.set_cycle_duration(Duration::millis(500.0)).unwrap();
        assert_eq!(
            e.position().clip_pos,
            Tick::from_duration(Duration::millis(500.0))
        );

        e.set_cycle_duration(Duration::ZERO).unwrap();
        assert_eq!(e.position().clip_pos, Tick::ZERO);
    }

    #[test]
    fn zero_length_envelope_is_seekable_but_not_startable() {
        let mut e = envelope(0.0, CycleCount::Finite(5));
        assert!(!e.is_startable());

        assert_eq!(e.jump_to(seconds(3.0)).clip_pos, Tick::ZERO);
        assert_eq!(e.jump_to(seconds(-1.0)).clip_pos, Tick::ZERO);
    }

    #[test]
    fn sub_resolution_duration_is_not_startable() {
        let e = ClipEnvelope::new(Duration::millis(0.01), CycleCount::ONE).unwrap();
        assert!(!e.is_startable());
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        assert!(ClipEnvelope::new(Duration::millis(-1.0), CycleCount::ONE).is_err());
        assert!(ClipEnvelope::new(Duration::UNKNOWN, CycleCount::ONE).is_err());
        assert!(ClipEnvelope::new(Duration::INDEFINITE, CycleCount::ONE).is_err());
        assert!(ClipEnvelope::new(Duration::ONE, CycleCount::Finite(0)).is_err());
    }
}
