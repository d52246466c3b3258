//! Stable fingerprints over effect graphs.
//!
//! Used by [`FilterContext::render`](crate::fx::FilterContext::render) to
//! skip re-filtering when the graph, its parameters, the transform and the
//! default input are all unchanged from the previous pass.

use xxhash_rust::xxh3::Xxh3;

use crate::core::Affine;
use crate::fx::{Effect, ImageData};
use crate::fx_kernels::Light;

const XXH3_SEED: u64 = 0x3f6a_92d1_58c4_e07b;

/// 128-bit stable digest of an effect render configuration.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct EffectFingerprint {
    pub hi: u64,
    pub lo: u64,
}

struct StableHasher {
    inner: Xxh3,
}

impl StableHasher {
    fn new() -> Self {
        Self {
            inner: Xxh3::with_seed(XXH3_SEED),
        }
    }

    fn write_bytes(&mut self, b: &[u8]) {
        self.inner.update(b);
    }

    fn write_u8(&mut self, v: u8) {
        self.write_bytes(&[v]);
    }

    fn write_bool(&mut self, v: bool) {
        self.write_u8(u8::from(v));
    }

    fn write_u32(&mut self, v: u32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_i32(&mut self, v: i32) {
        self.write_bytes(&v.to_le_bytes());
    }

    fn write_f32(&mut self, v: f32) {
        self.write_u32(v.to_bits());
    }

    fn write_f64(&mut self, v: f64) {
        self.write_bytes(&v.to_bits().to_le_bytes());
    }

    fn write_str(&mut self, s: &str) {
        self.write_u32(s.len() as u32);
        self.write_bytes(s.as_bytes());
    }

    fn finish(self) -> EffectFingerprint {
        let v = self.inner.digest128();
        EffectFingerprint {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }
}

/// Fingerprint one render configuration: effect graph, transform and default
/// input content.
pub(crate) fn fingerprint_render(
    effect: &Effect,
    transform: &Affine,
    default_input: &ImageData,
) -> EffectFingerprint {
    let mut h = StableHasher::new();
    write_effect(&mut h, effect);
    for c in transform.as_coeffs() {
        h.write_f64(c);
    }
    write_image(&mut h, default_input);
    h.finish()
}

fn write_image(h: &mut StableHasher, image: &ImageData) {
    h.write_i32(image.x());
    h.write_i32(image.y());
    h.write_u32(image.width());
    h.write_u32(image.height());
    h.write_bytes(image.pixels());
}

fn write_light(h: &mut StableHasher, light: &Light) {
    h.write_str(light.kind_name());
    match light {
        Light::Distant {
            azimuth,
            elevation,
            color,
        } => {
            h.write_f64(*azimuth);
            h.write_f64(*elevation);
            for c in color {
                h.write_f32(*c);
            }
        }
        Light::Point { x, y, z, color } => {
            h.write_f64(*x);
            h.write_f64(*y);
            h.write_f64(*z);
            for c in color {
                h.write_f32(*c);
            }
        }
        Light::Spot {
            x,
            y,
            z,
            points_at,
            focus,
            color,
        } => {
            h.write_f64(*x);
            h.write_f64(*y);
            h.write_f64(*z);
            h.write_f64(points_at.0);
            h.write_f64(points_at.1);
            h.write_f64(points_at.2);
            h.write_f64(*focus);
            for c in color {
                h.write_f32(*c);
            }
        }
    }
}

fn write_effect(h: &mut StableHasher, effect: &Effect) {
    h.write_str(effect.kind_name());
    match effect {
        Effect::Blend(b) => {
            h.write_str(b.mode().key_name());
            h.write_f64(b.opacity());
        }
        Effect::Merge(_) => {}
        Effect::MotionBlur(e) => {
            h.write_u32(e.radius());
            h.write_f64(e.angle());
        }
        Effect::PhongLighting(e) => {
            write_light(h, e.light());
            h.write_f32(e.surface_scale());
            h.write_f32(e.diffuse_constant());
            h.write_f32(e.specular_constant());
            h.write_f32(e.specular_exponent());
        }
        Effect::SepiaTone(e) => {
            h.write_f32(e.level());
        }
        Effect::ZoomRadialBlur(e) => {
            h.write_u32(e.radius());
            h.write_f64(e.center().x);
            h.write_f64(e.center().y);
        }
    }

    for slot in effect.input_slots() {
        match slot {
            Some(child) => {
                h.write_bool(true);
                write_effect(h, child);
            }
            None => h.write_bool(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::{Blend, MotionBlur, SepiaTone};
    use crate::fx_blend::BlendMode;

    fn default_input() -> ImageData {
        let mut img = ImageData::new(0, 0, 2, 2);
        img.set_pixel(0, 0, [255, 0, 0, 255]);
        img
    }

    #[test]
    fn identical_configurations_agree() {
        let a = Effect::SepiaTone(SepiaTone::new());
        let b = Effect::SepiaTone(SepiaTone::new());
        let input = default_input();
        assert_eq!(
            fingerprint_render(&a, &Affine::IDENTITY, &input),
            fingerprint_render(&b, &Affine::IDENTITY, &input),
        );
    }

    #[test]
    fn parameter_changes_change_the_fingerprint() {
        let input = default_input();
        let mut blur = MotionBlur::new();
        let before = fingerprint_render(&Effect::MotionBlur(blur.clone()), &Affine::IDENTITY, &input);
        blur.set_radius(3).unwrap();
        let after = fingerprint_render(&Effect::MotionBlur(blur), &Affine::IDENTITY, &input);
        assert_ne!(before, after);
    }

    #[test]
    fn graph_shape_changes_change_the_fingerprint() {
        let input = default_input();
        let mut blend = Blend::new(BlendMode::SrcOver);
        let before = fingerprint_render(&Effect::Blend(blend.clone()), &Affine::IDENTITY, &input);
        blend.set_top_input(Some(Effect::SepiaTone(SepiaTone::new())));
        let after = fingerprint_render(&Effect::Blend(blend), &Affine::IDENTITY, &input);
        assert_ne!(before, after);
    }

    #[test]
    fn transform_and_input_content_are_hashed() {
        let effect = Effect::SepiaTone(SepiaTone::new());
        let input = default_input();

        let identity = fingerprint_render(&effect, &Affine::IDENTITY, &input);
        let scaled = fingerprint_render(&effect, &Affine::scale(2.0), &input);
        assert_ne!(identity, scaled);

        let mut other = input.clone();
        other.set_pixel(1, 1, [0, 255, 0, 255]);
        let changed = fingerprint_render(&effect, &Affine::IDENTITY, &other);
        assert_ne!(identity, changed);
    }
}
