//! The animation state machine.
//!
//! An [`Animation`] composes a [`PulseReceiver`] (absolute→relative tick
//! conversion) and a [`ClipEnvelope`] (cycle/rate/fold arithmetic) and owns
//! the observable playback state: status, current time, current rate, cue
//! points and the finished handler. All state lives on the single logical
//! application thread; handles are `Rc`-backed and `!Send`.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::rc::Rc;

use crate::anim_envelope::{ClipEnvelope, CycleCount, EnvelopePosition};
use crate::core::{Duration, Tick};
use crate::error::{CadenzaError, CadenzaResult};
use crate::observe::{ListenerId, ObservableValue};
use crate::pulse::PulseClock;
use crate::pulse_receiver::PulseReceiver;

/// Playback status. `Stopped` is both the initial and every run's terminal
/// state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Status {
    Stopped,
    Paused,
    Running,
}

type FinishedHandler = Box<dyn FnMut()>;

struct AnimInner {
    status: ObservableValue<Status>,
    current_time: ObservableValue<Duration>,
    current_rate: ObservableValue<f64>,
    cycle_duration: ObservableValue<Duration>,
    total_duration: ObservableValue<Duration>,
    rate: f64,
    delay: Duration,
    cue_points: BTreeMap<String, Duration>,
    envelope: ClipEnvelope,
    on_finished: Option<FinishedHandler>,
}

impl AnimInner {
    /// Reflect an envelope position into the observable properties.
    fn apply_position(&mut self, position: EnvelopePosition) {
        self.current_time.set(position.clip_pos.to_duration());
        if self.status.get() == Status::Running && self.rate != 0.0 {
            let sign = if position.reversed_phase { -1.0 } else { 1.0 };
            self.current_rate.set(self.rate * sign);
        }
    }

    /// Refresh the tick-derived observables after a configuration change.
    /// The cycle-duration observable keeps the nominal value as set, which
    /// may be positive even when it rounds to zero ticks.
    fn refresh_durations(&mut self) {
        self.total_duration.set(self.envelope.total_duration());
        let position = self.envelope.position();
        self.current_time.set(position.clip_pos.to_duration());
    }
}

/// Run the finished handler outside any interior borrow, catching panics so a
/// misbehaving callback cannot corrupt the state machine or the pulse loop.
/// The handler is restored afterwards unless the callback installed a new one.
fn run_finished_handler(inner: &Rc<RefCell<AnimInner>>) {
    let handler = inner.borrow_mut().on_finished.take();
    let Some(mut handler) = handler else { return };

    if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler())) {
        tracing::error!(
            payload = crate::error::panic_message(&*panic),
            "onFinished handler panicked"
        );
    }

    let mut a = inner.borrow_mut();
    if a.on_finished.is_none() {
        a.on_finished = Some(handler);
    }
}

fn deliver_pulse(inner: &Rc<RefCell<AnimInner>>, receiver: &PulseReceiver, elapsed: Tick) {
    let finished = {
        let mut a = inner.borrow_mut();
        if a.status.get() != Status::Running {
            return;
        }
        let position = a.envelope.time_pulse(elapsed);
        a.apply_position(position);
        if position.finished {
            // The completed transition is fully observable before the
            // finished handler runs.
            receiver.stop();
            a.status.set(Status::Stopped);
            a.current_rate.set(0.0);
        }
        position.finished
    };

    if finished {
        run_finished_handler(inner);
    }
}

/// A pulse-driven animation.
pub struct Animation {
    inner: Rc<RefCell<AnimInner>>,
    receiver: PulseReceiver,
}

impl std::fmt::Debug for Animation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let a = self.inner.borrow();
        f.debug_struct("Animation")
            .field("status", &a.status.get())
            .field("rate", &a.rate)
            .field("current_rate", &a.current_rate.get())
            .finish()
    }
}

impl Drop for Animation {
    /// A dropped animation must not stay registered with the clock.
    fn drop(&mut self) {
        self.receiver.stop();
    }
}

impl Animation {
    /// An animation ticking at the clock's native granularity.
    pub fn new(clock: &Rc<PulseClock>, cycle_duration: Duration) -> CadenzaResult<Animation> {
        Self::with_resolution(clock, cycle_duration, Tick(1))
    }

    /// An animation whose pulses fold to a coarser resolution, for
    /// low-frame-rate content that should skip sub-resolution interpolation.
    pub fn with_resolution(
        clock: &Rc<PulseClock>,
        cycle_duration: Duration,
        resolution: Tick,
    ) -> CadenzaResult<Animation> {
        let envelope = ClipEnvelope::new(cycle_duration, CycleCount::ONE)?;
        let total = envelope.total_duration();
        let inner = Rc::new(RefCell::new(AnimInner {
            status: ObservableValue::new("status", Status::Stopped),
            current_time: ObservableValue::new("currentTime", Duration::ZERO),
            current_rate: ObservableValue::new("currentRate", 0.0),
            cycle_duration: ObservableValue::new("cycleDuration", cycle_duration),
            total_duration: ObservableValue::new("totalDuration", total),
            rate: 1.0,
            delay: Duration::ZERO,
            cue_points: BTreeMap::new(),
            envelope,
            on_finished: None,
        }));

        let receiver = PulseReceiver::with_resolution(clock.clone(), resolution)?;
        let weak_inner = Rc::downgrade(&inner);
        let weak_receiver = receiver.downgrade();
        receiver.set_on_pulse(move |elapsed| {
            if let (Some(inner), Some(receiver)) = (weak_inner.upgrade(), weak_receiver.upgrade()) {
                deliver_pulse(&inner, &receiver, elapsed);
            }
        });

        Ok(Animation { inner, receiver })
    }

    pub fn status(&self) -> Status {
        self.inner.borrow().status.get()
    }

    pub fn current_time(&self) -> Duration {
        self.inner.borrow().current_time.get()
    }

    pub fn current_rate(&self) -> f64 {
        self.inner.borrow().current_rate.get()
    }

    pub fn rate(&self) -> f64 {
        self.inner.borrow().rate
    }

    pub fn cycle_duration(&self) -> Duration {
        self.inner.borrow().cycle_duration.get()
    }

    pub fn total_duration(&self) -> Duration {
        self.inner.borrow().total_duration.get()
    }

    pub fn cycle_count(&self) -> CycleCount {
        self.inner.borrow().envelope.cycle_count()
    }

    pub fn auto_reverse(&self) -> bool {
        self.inner.borrow().envelope.auto_reverse()
    }

    pub fn delay(&self) -> Duration {
        self.inner.borrow().delay
    }

    /// Whether `play()` can actually start playback: false when the cycle
    /// duration rounds to zero ticks. Independent of seekability — `jump_to`
    /// succeeds (and reports zero) even when this is false.
    pub fn is_startable(&self) -> bool {
        self.inner.borrow().envelope.is_startable()
    }

    /// Whether the animation's receiver is currently registered with the
    /// pulse clock. Observable for tests and diagnostics.
    pub fn is_registered_with_clock(&self) -> bool {
        self.receiver.is_registered()
    }

    /// Start or resume playback.
    ///
    /// Idempotent while running. A non-startable (zero-length) animation
    /// "plays" straight through: it re-enters `Stopped` and fires the
    /// finished handler synchronously.
    pub fn play(&self) {
        let finish_now = {
            let mut a = self.inner.borrow_mut();
            match a.status.get() {
                Status::Running => return,
                Status::Paused => {
                    if a.rate != 0.0 {
                        self.receiver.resume();
                    }
                    a.status.set(Status::Running);
                    let position = a.envelope.position();
                    a.apply_position(position);
                    false
                }
                Status::Stopped => {
                    if !a.envelope.is_startable() {
                        a.status.set(Status::Running);
                        a.status.set(Status::Stopped);
                        a.current_rate.set(0.0);
                        a.current_time.set(Duration::ZERO);
                        true
                    } else {
                        a.envelope.start();
                        self.receiver.start(Tick::from_duration(a.delay));
                        a.status.set(Status::Running);
                        if a.rate == 0.0 {
                            // Logically running, but receives no ticks until
                            // a non-zero rate re-registers it.
                            self.receiver.pause();
                            a.current_rate.set(0.0);
                        } else {
                            let position = a.envelope.position();
                            a.apply_position(position);
                        }
                        false
                    }
                }
            }
        };

        if finish_now {
            run_finished_handler(&self.inner);
        }
    }

    /// Pause playback, retaining the current position. Idempotent; a no-op
    /// unless running.
    pub fn pause(&self) {
        let mut a = self.inner.borrow_mut();
        if a.status.get() != Status::Running {
            return;
        }
        self.receiver.pause();
        a.status.set(Status::Paused);
        a.current_rate.set(0.0);
    }

    /// Stop playback and reset the position to zero.
    ///
    /// Safe in any state; stopping an already-stopped animation preserves its
    /// position (a no-op). This is the cancellation primitive: there is no
    /// partial-cancellation state.
    pub fn stop(&self) {
        let mut a = self.inner.borrow_mut();
        if a.status.get() == Status::Stopped {
            return;
        }
        self.receiver.stop();
        a.status.set(Status::Stopped);
        a.current_rate.set(0.0);
        let position = a.envelope.jump_to(Tick::ZERO);
        a.current_time.set(position.clip_pos.to_duration());
    }

    /// Change the target rate. While running, the observable current rate is
    /// recomputed immediately (`rate × bounce sign`); rate zero keeps the
    /// status `Running` but deregisters from the clock until a non-zero rate
    /// re-registers it. While stopped or paused only the target changes.
    pub fn set_rate(&self, rate: f64) -> CadenzaResult<()> {
        if !rate.is_finite() {
            return Err(CadenzaError::validation("rate must be finite"));
        }

        let mut a = self.inner.borrow_mut();
        let old = a.rate;
        a.rate = rate;
        a.envelope.set_rate(rate);

        if a.status.get() == Status::Running {
            if rate == 0.0 {
                if old != 0.0 {
                    self.receiver.pause();
                }
                a.current_rate.set(0.0);
            } else {
                if old == 0.0 {
                    self.receiver.resume();
                }
                let sign = if a.envelope.position().reversed_phase {
                    -1.0
                } else {
                    1.0
                };
                a.current_rate.set(rate * sign);
            }
        }
        Ok(())
    }

    pub fn set_cycle_duration(&self, cycle_duration: Duration) -> CadenzaResult<()> {
        let mut a = self.inner.borrow_mut();
        a.envelope.set_cycle_duration(cycle_duration)?;
        a.cycle_duration.set(cycle_duration);
        a.refresh_durations();
        Ok(())
    }

    pub fn set_cycle_count(&self, cycle_count: CycleCount) -> CadenzaResult<()> {
        let mut a = self.inner.borrow_mut();
        a.envelope.set_cycle_count(cycle_count)?;
        a.refresh_durations();
        Ok(())
    }

    pub fn set_auto_reverse(&self, auto_reverse: bool) {
        self.inner
            .borrow_mut()
            .envelope
            .set_auto_reverse(auto_reverse);
    }

    /// Delay consumed before the first cycle when playback starts.
    pub fn set_delay(&self, delay: Duration) -> CadenzaResult<()> {
        if delay.is_unknown() || delay.is_indefinite() {
            return Err(CadenzaError::validation("delay must be finite"));
        }
        if delay < Duration::ZERO {
            return Err(CadenzaError::validation("delay must be >= 0"));
        }
        self.inner.borrow_mut().delay = delay;
        Ok(())
    }

    /// Seek to an absolute time, clamped into the animation's valid range.
    ///
    /// `Duration::UNKNOWN` is rejected; `Duration::INDEFINITE` seeks to the
    /// end. The status is not affected, and no finished or cycle-boundary
    /// callbacks fire.
    pub fn jump_to(&self, time: Duration) -> CadenzaResult<()> {
        if time.is_unknown() {
            return Err(CadenzaError::validation(
                "jump target must not be Duration::UNKNOWN",
            ));
        }

        let mut a = self.inner.borrow_mut();
        let target = if time.is_indefinite() {
            match a.envelope.total_ticks() {
                Some(total) => Tick(total),
                // Indefinite repetition has no overall end; treat the current
                // cycle's end as the seek target.
                None => a.envelope.cycle_ticks(),
            }
        } else {
            Tick::from_duration(time)
        };
        let position = a.envelope.jump_to(target);
        a.current_time.set(position.clip_pos.to_duration());
        Ok(())
    }

    /// Seek to a named cue point. `"start"` and `"end"` are always implicitly
    /// defined; any other undefined name leaves the position unchanged.
    pub fn jump_to_cue(&self, name: &str) -> CadenzaResult<()> {
        match name {
            "start" => self.jump_to(Duration::ZERO),
            "end" => self.jump_to(Duration::INDEFINITE),
            _ => {
                let cue = self.inner.borrow().cue_points.get(name).copied();
                match cue {
                    Some(time) => self.jump_to(time),
                    None => Ok(()),
                }
            }
        }
    }

    /// Seek then play.
    pub fn play_from(&self, time: Duration) -> CadenzaResult<()> {
        self.jump_to(time)?;
        self.play();
        Ok(())
    }

    /// Seek to a cue point then play.
    pub fn play_from_cue(&self, name: &str) -> CadenzaResult<()> {
        self.jump_to_cue(name)?;
        self.play();
        Ok(())
    }

    /// Register a named cue point. The implicit names `"start"` and `"end"`
    /// are reserved and never stored in the table.
    pub fn add_cue_point(&self, name: impl Into<String>, time: Duration) -> CadenzaResult<()> {
        let name = name.into();
        if name == "start" || name == "end" {
            return Err(CadenzaError::validation(
                "cue-point names \"start\" and \"end\" are reserved",
            ));
        }
        if time.is_unknown() {
            return Err(CadenzaError::validation(
                "cue-point time must not be Duration::UNKNOWN",
            ));
        }
        self.inner.borrow_mut().cue_points.insert(name, time);
        Ok(())
    }

    pub fn remove_cue_point(&self, name: &str) -> Option<Duration> {
        self.inner.borrow_mut().cue_points.remove(name)
    }

    pub fn cue_points(&self) -> BTreeMap<String, Duration> {
        self.inner.borrow().cue_points.clone()
    }

    /// Install the handler fired on natural completion. Panics in the handler
    /// are caught and reported, never propagated into the pulse loop.
    pub fn set_on_finished(&self, handler: impl FnMut() + 'static) {
        self.inner.borrow_mut().on_finished = Some(Box::new(handler));
    }

    pub fn clear_on_finished(&self) {
        self.inner.borrow_mut().on_finished = None;
    }

    pub fn subscribe_status(&self, listener: impl FnMut(&Status) + 'static) -> ListenerId {
        self.inner.borrow_mut().status.subscribe(listener)
    }

    pub fn subscribe_current_time(&self, listener: impl FnMut(&Duration) + 'static) -> ListenerId {
        self.inner.borrow_mut().current_time.subscribe(listener)
    }

    pub fn subscribe_current_rate(&self, listener: impl FnMut(&f64) + 'static) -> ListenerId {
        self.inner.borrow_mut().current_rate.subscribe(listener)
    }

    pub fn subscribe_cycle_duration(
        &self,
        listener: impl FnMut(&Duration) + 'static,
    ) -> ListenerId {
        self.inner.borrow_mut().cycle_duration.subscribe(listener)
    }

    pub fn subscribe_total_duration(
        &self,
        listener: impl FnMut(&Duration) + 'static,
    ) -> ListenerId {
        self.inner.borrow_mut().total_duration.subscribe(listener)
    }
}
