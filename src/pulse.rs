//! The master pulse clock.
//!
//! A single clock instance is the source of time for every animation in the
//! process; nothing in the timing core reads the wall clock. External frame
//! timers (vsync, test harnesses) drive it through [`PulseClock::pulse_at`],
//! which lets tests and alternate timing strategies substitute their own
//! notion of time entirely.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use crate::core::{DEFAULT_PULSE_RESOLUTION, Tick};

/// Receiver notified once per pulse with the clock's absolute tick.
pub trait PulseTarget {
    fn time_pulse(&self, now: Tick);
}

/// Process-wide ticking authority.
///
/// Holds the current absolute tick (monotonically non-decreasing) and an
/// ordered set of registered receivers. Shared by `Rc` on the single logical
/// application thread; interior mutability keeps every operation `&self`.
pub struct PulseClock {
    now: Cell<Tick>,
    resolution: Tick,
    receivers: RefCell<Vec<Rc<dyn PulseTarget>>>,
}

impl std::fmt::Debug for PulseClock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PulseClock")
            .field("now", &self.now.get())
            .field("resolution", &self.resolution)
            .field("receivers", &self.receivers.borrow().len())
            .finish()
    }
}

fn same_target(a: &Rc<dyn PulseTarget>, b: &Rc<dyn PulseTarget>) -> bool {
    std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b))
}

impl PulseClock {
    pub fn new() -> Rc<PulseClock> {
        Self::with_resolution(Tick(DEFAULT_PULSE_RESOLUTION))
    }

    pub fn with_resolution(resolution: Tick) -> Rc<PulseClock> {
        Rc::new(PulseClock {
            now: Cell::new(Tick::ZERO),
            resolution,
            receivers: RefCell::new(Vec::new()),
        })
    }

    /// Current absolute tick.
    pub fn now(&self) -> Tick {
        self.now.get()
    }

    /// Nominal ticks per pulse for receivers that don't configure their own
    /// coarser resolution.
    pub fn default_resolution(&self) -> Tick {
        self.resolution
    }

    /// Idempotent add; a receiver already present keeps its position.
    pub fn add_pulse_receiver(&self, receiver: &Rc<dyn PulseTarget>) {
        let mut receivers = self.receivers.borrow_mut();
        if !receivers.iter().any(|r| same_target(r, receiver)) {
            receivers.push(receiver.clone());
        }
    }

    /// Idempotent remove; removing an unregistered receiver is a silent no-op.
    pub fn remove_pulse_receiver(&self, receiver: &Rc<dyn PulseTarget>) {
        self.receivers
            .borrow_mut()
            .retain(|r| !same_target(r, receiver));
    }

    pub fn contains_pulse_receiver(&self, receiver: &Rc<dyn PulseTarget>) -> bool {
        self.receivers
            .borrow()
            .iter()
            .any(|r| same_target(r, receiver))
    }

    pub fn receiver_count(&self) -> usize {
        self.receivers.borrow().len()
    }

    /// Deliver one pulse at the given absolute tick.
    ///
    /// Time never runs backwards: a tick below the current one is clamped up.
    /// Receivers are notified in registration order over a snapshot of the
    /// set, so a receiver may register or deregister receivers (itself
    /// included) from within its own callback; such mutations take effect for
    /// the next pulse.
    pub fn pulse_at(&self, now: Tick) {
        let now = Tick(now.0.max(self.now.get().0));
        self.now.set(now);

        let snapshot: Vec<Rc<dyn PulseTarget>> = self.receivers.borrow().clone();
        tracing::trace!(tick = now.0, receivers = snapshot.len(), "pulse");
        for receiver in &snapshot {
            receiver.time_pulse(now);
        }
    }

    /// Advance the clock by `delta` ticks and pulse.
    pub fn advance(&self, delta: Tick) {
        self.pulse_at(Tick(self.now.get().0 + delta.0.max(0)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    struct Recorder {
        seen: StdRefCell<Vec<i64>>,
    }

    impl Recorder {
        fn new() -> Rc<Recorder> {
            Rc::new(Recorder {
                seen: StdRefCell::new(Vec::new()),
            })
        }
    }

    impl PulseTarget for Recorder {
        fn time_pulse(&self, now: Tick) {
            self.seen.borrow_mut().push(now.0);
        }
    }

    fn as_target(r: &Rc<Recorder>) -> Rc<dyn PulseTarget> {
        r.clone()
    }

    #[test]
    fn add_is_idempotent() {
        let clock = PulseClock::new();
        let r = Recorder::new();
        let t = as_target(&r);

        clock.add_pulse_receiver(&t);
        clock.add_pulse_receiver(&t);
        assert_eq!(clock.receiver_count(), 1);

        clock.pulse_at(Tick(10));
        assert_eq!(*r.seen.borrow(), vec![10]);
    }

    #[test]
    fn remove_unregistered_is_noop() {
        let clock = PulseClock::new();
        let r = Recorder::new();
        let t = as_target(&r);

        clock.remove_pulse_receiver(&t);
        assert!(!clock.contains_pulse_receiver(&t));

        clock.add_pulse_receiver(&t);
        assert!(clock.contains_pulse_receiver(&t));
        clock.remove_pulse_receiver(&t);
        clock.remove_pulse_receiver(&t);
        assert!(!clock.contains_pulse_receiver(&t));
    }

    #[test]
    fn receivers_notified_in_registration_order() {
        let clock = PulseClock::new();
        let order = Rc::new(StdRefCell::new(Vec::new()));

        struct Tagged {
            tag: u8,
            order: Rc<StdRefCell<Vec<u8>>>,
        }
        impl PulseTarget for Tagged {
            fn time_pulse(&self, _now: Tick) {
                self.order.borrow_mut().push(self.tag);
            }
        }

        let a: Rc<dyn PulseTarget> = Rc::new(Tagged {
            tag: 1,
            order: order.clone(),
        });
        let b: Rc<dyn PulseTarget> = Rc::new(Tagged {
            tag: 2,
            order: order.clone(),
        });
        clock.add_pulse_receiver(&a);
        clock.add_pulse_receiver(&b);

        clock.pulse_at(Tick(5));
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn time_never_runs_backwards() {
        let clock = PulseClock::new();
        clock.pulse_at(Tick(100));
        clock.pulse_at(Tick(50));
        assert_eq!(clock.now(), Tick(100));
    }

    #[test]
    fn receiver_may_remove_itself_during_pulse() {
        let clock = PulseClock::new();

        struct SelfRemover {
            clock: Rc<PulseClock>,
            this: StdRefCell<Option<Rc<dyn PulseTarget>>>,
            pulses: Cell<u32>,
        }
        impl PulseTarget for SelfRemover {
            fn time_pulse(&self, _now: Tick) {
                self.pulses.set(self.pulses.get() + 1);
                if let Some(this) = self.this.borrow().as_ref() {
                    self.clock.remove_pulse_receiver(this);
                }
            }
        }

        let r = Rc::new(SelfRemover {
            clock: clock.clone(),
            this: StdRefCell::new(None),
            pulses: Cell::new(0),
        });
        let t: Rc<dyn PulseTarget> = r.clone();
        *r.this.borrow_mut() = Some(t.clone());

        clock.add_pulse_receiver(&t);
        clock.pulse_at(Tick(1));
        clock.pulse_at(Tick(2));

        assert_eq!(r.pulses.get(), 1);
        assert!(!clock.contains_pulse_receiver(&t));

        // Break the self-reference so the test does not leak.
        *r.this.borrow_mut() = None;
    }
}
