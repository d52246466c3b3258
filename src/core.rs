use crate::error::{CadenzaError, CadenzaResult};

pub use kurbo::{Affine, Point, Rect, Vec2};

/// Clock units per second. All timing arithmetic runs on integer ticks at this
/// resolution to stay free of floating-point drift; 6000 divides evenly into
/// the common frame rates (24, 25, 30, 60, 120).
pub const TICKS_PER_SECOND: i64 = 6_000;

/// Ticks per millisecond at [`TICKS_PER_SECOND`].
pub const TICKS_PER_MILLI: f64 = TICKS_PER_SECOND as f64 / 1_000.0;

/// Wall-clock nanoseconds per tick, as a conversion factor for frame timers.
pub const TICKS_2_NANOS: f64 = 1.0e9 / TICKS_PER_SECOND as f64;

/// Number of ticks in one pulse of a 60 Hz frame clock.
pub const DEFAULT_PULSE_RESOLUTION: i64 = TICKS_PER_SECOND / 60;

/// Integer count of clock units. Absolute ticks count from clock start;
/// relative ticks count from an animation's logical origin and may be negative
/// while a start delay is still being consumed.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct Tick(pub i64);

impl Tick {
    pub const ZERO: Tick = Tick(0);

    /// Convert a finite duration to ticks, rounding to nearest.
    ///
    /// Sub-tick durations round to zero: `Duration::millis(0.01)` is zero
    /// ticks at the default resolution, which is what makes such an animation
    /// non-startable while remaining seekable. `INDEFINITE` saturates to
    /// `i64::MAX`; callers reject `UNKNOWN` before converting.
    pub fn from_duration(d: Duration) -> Tick {
        if d.is_unknown() {
            return Tick::ZERO;
        }
        // f64-to-int `as` casts saturate, which is exactly the behavior wanted
        // for INDEFINITE and for absurdly large finite values.
        Tick((d.to_millis() * TICKS_PER_MILLI).round() as i64)
    }

    pub fn to_duration(self) -> Duration {
        Duration::millis(self.0 as f64 / TICKS_PER_MILLI)
    }

    pub fn to_nanos(self) -> i64 {
        (self.0 as f64 * TICKS_2_NANOS).round() as i64
    }

    pub fn from_nanos(nanos: i64) -> Tick {
        Tick((nanos as f64 / TICKS_2_NANOS).round() as i64)
    }
}

/// A span of time denominated in milliseconds.
///
/// Two sentinel values exist besides ordinary finite spans: [`INDEFINITE`]
/// (positive infinity, "runs forever") and [`UNKNOWN`] (NaN, "no meaningful
/// value yet"). Negative finite durations are representable; operations that
/// need a non-negative time clamp at their own boundary.
///
/// [`INDEFINITE`]: Duration::INDEFINITE
/// [`UNKNOWN`]: Duration::UNKNOWN
#[derive(Clone, Copy, Debug, serde::Serialize, serde::Deserialize)]
pub struct Duration {
    millis: f64,
}

impl Duration {
    pub const ZERO: Duration = Duration { millis: 0.0 };
    pub const ONE: Duration = Duration { millis: 1.0 };
    pub const INDEFINITE: Duration = Duration {
        millis: f64::INFINITY,
    };
    pub const UNKNOWN: Duration = Duration { millis: f64::NAN };

    pub fn millis(millis: f64) -> Duration {
        Duration { millis }
    }

    pub fn seconds(seconds: f64) -> Duration {
        Duration {
            millis: seconds * 1_000.0,
        }
    }

    pub fn to_millis(self) -> f64 {
        self.millis
    }

    pub fn to_seconds(self) -> f64 {
        self.millis / 1_000.0
    }

    pub fn is_indefinite(self) -> bool {
        self.millis == f64::INFINITY
    }

    pub fn is_unknown(self) -> bool {
        self.millis.is_nan()
    }

    /// Multiply by a cycle count. `INDEFINITE` stays indefinite.
    pub fn times(self, n: u64) -> Duration {
        Duration {
            millis: self.millis * n as f64,
        }
    }

    pub fn add(self, other: Duration) -> Duration {
        Duration {
            millis: self.millis + other.millis,
        }
    }
}

impl PartialEq for Duration {
    /// `UNKNOWN` compares unequal to everything, itself included (NaN
    /// semantics); change listeners therefore re-fire when a property leaves
    /// or re-enters the unknown state.
    fn eq(&self, other: &Self) -> bool {
        self.millis == other.millis
    }
}

impl PartialOrd for Duration {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.millis.partial_cmp(&other.millis)
    }
}

impl Duration {
    /// Validated constructor for configuration slots that require a concrete,
    /// non-negative time (delays, cycle durations).
    pub fn non_negative(millis: f64) -> CadenzaResult<Duration> {
        if millis.is_nan() {
            return Err(CadenzaError::validation("duration must not be UNKNOWN"));
        }
        if millis < 0.0 {
            return Err(CadenzaError::validation("duration must be >= 0"));
        }
        Ok(Duration { millis })
    }
}
