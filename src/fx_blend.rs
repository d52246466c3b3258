//! Blend mode algebra.
//!
//! A closed set of compositing modes, each a pure per-pixel formula over
//! premultiplied RGBA. Two tables are keyed by the same enum: the pixel
//! formula ([`BlendMode::blend_premul`]) and the opacity algebra
//! ([`BlendMode::reduces_opaque`]) used by the compositor for occlusion
//! culling.

/// Compositing mode of a [`Blend`](crate::fx::Blend) effect.
///
/// Porter-Duff modes (`SrcOver`, `SrcIn`, `SrcOut`, `SrcAtop`, `Add`) operate
/// directly on premultiplied pixels. The separable modes (`Multiply` through
/// `Exclusion`) apply the standard blend function to unpremultiplied color and
/// recombine with `alpha = ta + ba − ta·ba`. The channel modes (`Red`,
/// `Green`, `Blue`) replace one of the bottom's color channels with the top's,
/// composited over it; the bottom's other channels and alpha pass through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BlendMode {
    SrcOver,
    SrcIn,
    SrcOut,
    SrcAtop,
    Add,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
    ColorDodge,
    ColorBurn,
    HardLight,
    SoftLight,
    Difference,
    Exclusion,
    Red,
    Green,
    Blue,
}

impl BlendMode {
    /// Stable name used in peer cache keys.
    pub fn key_name(self) -> &'static str {
        match self {
            Self::SrcOver => "SRC_OVER",
            Self::SrcIn => "SRC_IN",
            Self::SrcOut => "SRC_OUT",
            Self::SrcAtop => "SRC_ATOP",
            Self::Add => "ADD",
            Self::Multiply => "MULTIPLY",
            Self::Screen => "SCREEN",
            Self::Overlay => "OVERLAY",
            Self::Darken => "DARKEN",
            Self::Lighten => "LIGHTEN",
            Self::ColorDodge => "COLOR_DODGE",
            Self::ColorBurn => "COLOR_BURN",
            Self::HardLight => "HARD_LIGHT",
            Self::SoftLight => "SOFT_LIGHT",
            Self::Difference => "DIFFERENCE",
            Self::Exclusion => "EXCLUSION",
            Self::Red => "RED",
            Self::Green => "GREEN",
            Self::Blue => "BLUE",
        }
    }

    /// Opacity algebra: whether the composite can turn opaque bottom-region
    /// pixels non-opaque, given each input's own answer.
    ///
    /// `SrcIn`/`SrcOut` unconditionally reduce opacity; `SrcAtop` keeps the
    /// bottom's alpha so it inherits the bottom's answer; every remaining
    /// mode reduces only when both inputs already do.
    pub fn reduces_opaque(self, bottom: bool, top: bool) -> bool {
        match self {
            Self::SrcIn | Self::SrcOut => true,
            Self::SrcAtop => bottom,
            _ => bottom && top,
        }
    }

    /// Combine two premultiplied pixels (components in `[0, 1]`, alpha last).
    pub fn blend_premul(self, bot: [f32; 4], top: [f32; 4]) -> [f32; 4] {
        let ba = bot[3];
        let ta = top[3];
        match self {
            Self::SrcOver => per_component(|i| top[i] + bot[i] * (1.0 - ta)),
            Self::SrcIn => per_component(|i| top[i] * ba),
            Self::SrcOut => per_component(|i| top[i] * (1.0 - ba)),
            Self::SrcAtop => per_component(|i| top[i] * ba + bot[i] * (1.0 - ta)),
            Self::Add => per_component(|i| (top[i] + bot[i]).min(1.0)),
            Self::Red => channel_replace(bot, top, 0),
            Self::Green => channel_replace(bot, top, 1),
            Self::Blue => channel_replace(bot, top, 2),
            _ => separable(self, bot, top),
        }
    }

    /// Convenience entry over 8-bit premultiplied pixels, with an extra
    /// opacity factor applied to the top input.
    pub fn blend_rgba8(self, bot: [u8; 4], top: [u8; 4], opacity: f32) -> [u8; 4] {
        let opacity = opacity.clamp(0.0, 1.0);
        let bot_f = to_f32(bot);
        let mut top_f = to_f32(top);
        for c in &mut top_f {
            *c *= opacity;
        }
        to_u8(self.blend_premul(bot_f, top_f))
    }
}

fn per_component(f: impl Fn(usize) -> f32) -> [f32; 4] {
    [f(0), f(1), f(2), f(3)]
}

fn channel_replace(bot: [f32; 4], top: [f32; 4], channel: usize) -> [f32; 4] {
    let mut out = bot;
    out[channel] = (top[channel] + bot[channel] * (1.0 - top[3])).min(bot[3]);
    out
}

fn separable(mode: BlendMode, bot: [f32; 4], top: [f32; 4]) -> [f32; 4] {
    let ba = bot[3];
    let ta = top[3];
    let alpha = ta + ba - ta * ba;

    let mut out = [0.0f32; 4];
    out[3] = alpha;
    for i in 0..3 {
        let cb = if ba > 0.0 { bot[i] / ba } else { 0.0 };
        let cs = if ta > 0.0 { top[i] / ta } else { 0.0 };
        let blended = blend_fn(mode, cb, cs);
        out[i] = (1.0 - ba) * top[i] + (1.0 - ta) * bot[i] + ta * ba * blended;
    }
    out
}

fn blend_fn(mode: BlendMode, cb: f32, cs: f32) -> f32 {
    match mode {
        BlendMode::Multiply => cb * cs,
        BlendMode::Screen => cb + cs - cb * cs,
        BlendMode::Overlay => hard_light(cs, cb),
        BlendMode::Darken => cb.min(cs),
        BlendMode::Lighten => cb.max(cs),
        BlendMode::ColorDodge => {
            if cb <= 0.0 {
                0.0
            } else if cs >= 1.0 {
                1.0
            } else {
                (cb / (1.0 - cs)).min(1.0)
            }
        }
        BlendMode::ColorBurn => {
            if cb >= 1.0 {
                1.0
            } else if cs <= 0.0 {
                0.0
            } else {
                1.0 - ((1.0 - cb) / cs).min(1.0)
            }
        }
        BlendMode::HardLight => hard_light(cb, cs),
        BlendMode::SoftLight => soft_light(cb, cs),
        BlendMode::Difference => (cb - cs).abs(),
        BlendMode::Exclusion => cb + cs - 2.0 * cb * cs,
        _ => cs,
    }
}

fn hard_light(cb: f32, cs: f32) -> f32 {
    if cs <= 0.5 {
        2.0 * cb * cs
    } else {
        1.0 - 2.0 * (1.0 - cb) * (1.0 - cs)
    }
}

fn soft_light(cb: f32, cs: f32) -> f32 {
    if cs <= 0.5 {
        cb - (1.0 - 2.0 * cs) * cb * (1.0 - cb)
    } else {
        let d = if cb <= 0.25 {
            ((16.0 * cb - 12.0) * cb + 4.0) * cb
        } else {
            cb.sqrt()
        };
        cb + (2.0 * cs - 1.0) * (d - cb)
    }
}

fn to_f32(px: [u8; 4]) -> [f32; 4] {
    [
        f32::from(px[0]) / 255.0,
        f32::from(px[1]) / 255.0,
        f32::from(px[2]) / 255.0,
        f32::from(px[3]) / 255.0,
    ]
}

fn to_u8(px: [f32; 4]) -> [u8; 4] {
    let q = |v: f32| (v.clamp(0.0, 1.0) * 255.0).round() as u8;
    [q(px[0]), q(px[1]), q(px[2]), q(px[3])]
}
