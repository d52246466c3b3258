//! Cadenza is a pulse-driven animation timing and effect compositing engine.
//!
//! The timing core is a master [`PulseClock`] driving per-animation
//! [`PulseReceiver`]s, a [`ClipEnvelope`] doing the cycle/rate/auto-reverse
//! arithmetic in integer ticks, and the [`Animation`] state machine on top.
//! The compositing core is a closed [`Effect`] graph evaluated per render
//! pass through a [`FilterContext`], with peer selection and dirty-region
//! tracking handled by the renderer.
#![forbid(unsafe_code)]

pub mod anim;
pub mod anim_envelope;
pub mod core;
pub mod dispatch;
pub mod error;
pub mod fx;
pub mod fx_blend;
pub mod fx_dirty;
pub mod fx_fingerprint;
pub mod fx_kernels;
pub mod fx_peer;
pub mod observe;
pub mod pulse;
pub mod pulse_receiver;

pub use crate::anim::{Animation, Status};
pub use crate::anim_envelope::{ClipEnvelope, CycleCount, EnvelopePosition};
pub use crate::core::{
    Affine, DEFAULT_PULSE_RESOLUTION, Duration, Point, Rect, TICKS_2_NANOS, TICKS_PER_SECOND,
    Tick, Vec2,
};
pub use crate::dispatch::AppThread;
pub use crate::error::{CadenzaError, CadenzaResult};
pub use crate::fx::{
    Blend, Effect, EffectCoordinateSpace, FilterContext, ImageData, Merge, MotionBlur,
    PhongLighting, RenderState, SepiaTone, ZoomRadialBlur,
};
pub use crate::fx_blend::BlendMode;
pub use crate::fx_dirty::{DirtyRegionContainer, DirtyRegionPool};
pub use crate::fx_fingerprint::EffectFingerprint;
pub use crate::fx_kernels::Light;
pub use crate::fx_peer::{Backend, Renderer};
pub use crate::observe::{ListenerId, ObservableValue};
pub use crate::pulse::{PulseClock, PulseTarget};
pub use crate::pulse_receiver::{PulseReceiver, WeakPulseReceiver};
