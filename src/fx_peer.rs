//! Effect peers and the renderer that selects them.
//!
//! A peer is the concrete implementation executing one effect kind; peers are
//! cached per key string (derived from mode-like parameters) so numeric
//! parameter changes reuse the existing peer with new arguments. Per
//! operation the renderer picks the scalar software backend or the
//! data-parallel backend based on output area and accelerator availability.

use std::collections::HashMap;

use smallvec::SmallVec;

use crate::core::Rect;
use crate::error::{CadenzaError, CadenzaResult};
use crate::fx::{Effect, ImageData};
use crate::fx_blend::BlendMode;
use crate::fx_kernels::{
    blend_images, merge_into, motion_blur, phong_lighting, sepia_tone, zoom_radial_blur,
};

/// Execution backend for one peer application.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Backend {
    /// Scalar loop; cheap to enter, right for small operations.
    Software,
    /// Rayon row-parallel loop; wins once the output area is large enough to
    /// amortize the fork/join overhead.
    Parallel,
}

pub(crate) trait EffectPeer {
    fn key(&self) -> &str;
    fn apply(
        &self,
        effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        clip: Rect,
        backend: Backend,
    ) -> CadenzaResult<ImageData>;
}

fn rect_contains(outer: Rect, inner: Rect) -> bool {
    inner.x0 >= outer.x0 && inner.y0 >= outer.y0 && inner.x1 <= outer.x1 && inner.y1 <= outer.y1
}

fn two_inputs(
    mut inputs: SmallVec<[ImageData; 2]>,
    kind: &str,
) -> CadenzaResult<(ImageData, ImageData)> {
    if inputs.len() != 2 {
        return Err(CadenzaError::evaluation(format!(
            "{kind} expects exactly two inputs"
        )));
    }
    let top = inputs.pop().ok_or_else(|| {
        CadenzaError::evaluation(format!("{kind} is missing its top input"))
    })?;
    let bottom = inputs.pop().ok_or_else(|| {
        CadenzaError::evaluation(format!("{kind} is missing its bottom input"))
    })?;
    Ok((bottom, top))
}

fn one_input(mut inputs: SmallVec<[ImageData; 2]>, kind: &str) -> CadenzaResult<ImageData> {
    inputs
        .pop()
        .ok_or_else(|| CadenzaError::evaluation(format!("{kind} is missing its input")))
}

struct BlendPeer {
    key: String,
}

impl EffectPeer for BlendPeer {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(
        &self,
        effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        clip: Rect,
        backend: Backend,
    ) -> CadenzaResult<ImageData> {
        let params = effect
            .blend_params()
            .ok_or_else(|| CadenzaError::evaluation("Blend peer applied to a non-blend effect"))?;
        let (bottom, top) = two_inputs(inputs, "Blend")?;
        Ok(blend_images(
            params.mode,
            params.opacity,
            &bottom,
            &top,
            clip,
            backend == Backend::Parallel,
        ))
    }
}

struct MergePeer {
    key: String,
}

impl EffectPeer for MergePeer {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(
        &self,
        _effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        clip: Rect,
        _backend: Backend,
    ) -> CadenzaResult<ImageData> {
        let (bottom, top) = two_inputs(inputs, "Merge")?;

        // Stream the top input straight onto the bottom buffer when the
        // bottom footprint covers the composite region; otherwise a general
        // SRC_OVER composite is needed after all.
        let region = bottom.bounds().union(top.bounds()).intersect(clip);
        if rect_contains(bottom.bounds(), region) {
            Ok(merge_into(bottom, &top, clip))
        } else {
            Ok(blend_images(
                BlendMode::SrcOver,
                1.0,
                &bottom,
                &top,
                clip,
                false,
            ))
        }
    }
}

struct MotionBlurPeer {
    key: String,
}

impl EffectPeer for MotionBlurPeer {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(
        &self,
        effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        _clip: Rect,
        backend: Backend,
    ) -> CadenzaResult<ImageData> {
        let e = effect.as_motion_blur().ok_or_else(|| {
            CadenzaError::evaluation("MotionBlur peer applied to a different effect")
        })?;
        let src = one_input(inputs, "MotionBlur")?;
        Ok(motion_blur(
            &src,
            e.radius(),
            e.angle(),
            backend == Backend::Parallel,
        ))
    }
}

struct PhongLightingPeer {
    key: String,
}

impl EffectPeer for PhongLightingPeer {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(
        &self,
        effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        _clip: Rect,
        backend: Backend,
    ) -> CadenzaResult<ImageData> {
        let e = effect.as_phong().ok_or_else(|| {
            CadenzaError::evaluation("PhongLighting peer applied to a different effect")
        })?;
        let src = one_input(inputs, "PhongLighting")?;
        Ok(phong_lighting(
            &src,
            &e.kernel_params(),
            backend == Backend::Parallel,
        ))
    }
}

struct SepiaTonePeer {
    key: String,
}

impl EffectPeer for SepiaTonePeer {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(
        &self,
        effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        _clip: Rect,
        backend: Backend,
    ) -> CadenzaResult<ImageData> {
        let e = effect.as_sepia().ok_or_else(|| {
            CadenzaError::evaluation("SepiaTone peer applied to a different effect")
        })?;
        let src = one_input(inputs, "SepiaTone")?;
        Ok(sepia_tone(&src, e.level(), backend == Backend::Parallel))
    }
}

struct ZoomRadialBlurPeer {
    key: String,
}

impl EffectPeer for ZoomRadialBlurPeer {
    fn key(&self) -> &str {
        &self.key
    }

    fn apply(
        &self,
        effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        _clip: Rect,
        backend: Backend,
    ) -> CadenzaResult<ImageData> {
        let e = effect.as_zoom().ok_or_else(|| {
            CadenzaError::evaluation("ZoomRadialBlur peer applied to a different effect")
        })?;
        let src = one_input(inputs, "ZoomRadialBlur")?;
        Ok(zoom_radial_blur(
            &src,
            e.radius(),
            e.center(),
            backend == Backend::Parallel,
        ))
    }
}

fn make_peer(effect: &Effect, key: String) -> Box<dyn EffectPeer> {
    match effect {
        Effect::Blend(_) => Box::new(BlendPeer { key }),
        Effect::Merge(_) => Box::new(MergePeer { key }),
        Effect::MotionBlur(_) => Box::new(MotionBlurPeer { key }),
        Effect::PhongLighting(_) => Box::new(PhongLightingPeer { key }),
        Effect::SepiaTone(_) => Box::new(SepiaTonePeer { key }),
        Effect::ZoomRadialBlur(_) => Box::new(ZoomRadialBlurPeer { key }),
    }
}

/// Peer cache plus backend selection policy for one render target.
pub struct Renderer {
    accelerated: bool,
    parallel_threshold_px: u64,
    peers: HashMap<String, Box<dyn EffectPeer>>,
}

impl std::fmt::Debug for Renderer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Renderer")
            .field("accelerated", &self.accelerated)
            .field("parallel_threshold_px", &self.parallel_threshold_px)
            .field("peers", &self.peers.len())
            .finish()
    }
}

impl Renderer {
    pub fn new(accelerated: bool) -> Renderer {
        Self::with_threshold(accelerated, 1 << 16)
    }

    pub fn with_threshold(accelerated: bool, parallel_threshold_px: u64) -> Renderer {
        Renderer {
            accelerated,
            parallel_threshold_px,
            peers: HashMap::new(),
        }
    }

    pub fn is_accelerated(&self) -> bool {
        self.accelerated
    }

    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    pub fn has_peer(&self, key: &str) -> bool {
        self.peers.contains_key(key)
    }

    /// Backend choice for an operation of the given output area.
    pub fn backend_for_area(&self, area_px: u64) -> Backend {
        if self.accelerated && area_px >= self.parallel_threshold_px {
            Backend::Parallel
        } else {
            Backend::Software
        }
    }

    pub(crate) fn apply(
        &mut self,
        effect: &Effect,
        inputs: SmallVec<[ImageData; 2]>,
        clip: Rect,
    ) -> CadenzaResult<ImageData> {
        let area = clip_area_px(clip);
        let backend = self.backend_for_area(area);

        let key = effect.peer_key();
        let peer = self
            .peers
            .entry(key)
            .or_insert_with_key(|k| make_peer(effect, k.clone()));
        tracing::trace!(key = peer.key(), ?backend, "applying effect peer");

        let result = peer.apply(effect, inputs, clip, backend)?;
        if rect_contains(clip, result.bounds()) {
            Ok(result)
        } else {
            Ok(result.crop(clip))
        }
    }
}

fn clip_area_px(clip: Rect) -> u64 {
    let w = (clip.x1 - clip.x0).max(0.0);
    let h = (clip.y1 - clip.y0).max(0.0);
    (w * h) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fx::{Blend, Merge, SepiaTone};
    use smallvec::smallvec;

    fn solid(x: i32, y: i32, w: u32, h: u32, px: [u8; 4]) -> ImageData {
        let mut img = ImageData::new(x, y, w, h);
        for dy in 0..h {
            for dx in 0..w {
                img.set_pixel(dx, dy, px);
            }
        }
        img
    }

    fn clip(w: f64, h: f64) -> Rect {
        Rect::new(0.0, 0.0, w, h)
    }

    #[test]
    fn backend_selection_follows_area_and_acceleration() {
        let accelerated = Renderer::with_threshold(true, 1_000);
        assert_eq!(accelerated.backend_for_area(999), Backend::Software);
        assert_eq!(accelerated.backend_for_area(1_000), Backend::Parallel);

        let software_only = Renderer::with_threshold(false, 1_000);
        assert_eq!(software_only.backend_for_area(1 << 30), Backend::Software);
    }

    #[test]
    fn peers_are_cached_by_key() {
        let mut renderer = Renderer::new(false);
        let effect = Effect::Blend(Blend::new(BlendMode::SrcOver));
        let inputs = || -> SmallVec<[ImageData; 2]> {
            smallvec![
                solid(0, 0, 2, 2, [0, 0, 0, 255]),
                solid(0, 0, 2, 2, [255, 0, 0, 255]),
            ]
        };

        renderer.apply(&effect, inputs(), clip(2.0, 2.0)).unwrap();
        renderer.apply(&effect, inputs(), clip(2.0, 2.0)).unwrap();
        assert_eq!(renderer.peer_count(), 1);
        assert!(renderer.has_peer("Blend_SRC_OVER"));

        let multiply = Effect::Blend(Blend::new(BlendMode::Multiply));
        renderer.apply(&multiply, inputs(), clip(2.0, 2.0)).unwrap();
        assert_eq!(renderer.peer_count(), 2);
        assert!(renderer.has_peer("Blend_MULTIPLY"));
    }

    #[test]
    fn merge_streams_and_matches_blend_src_over() {
        let mut renderer = Renderer::new(false);

        let bottom = solid(0, 0, 4, 4, [0, 0, 200, 200]);
        let top = solid(1, 1, 2, 2, [100, 0, 0, 100]);

        let merge = Effect::Merge(Merge::new());
        let merged = renderer
            .apply(
                &merge,
                smallvec![bottom.clone(), top.clone()],
                clip(4.0, 4.0),
            )
            .unwrap();

        let blend = Effect::Blend(Blend::new(BlendMode::SrcOver));
        let blended = renderer
            .apply(&blend, smallvec![bottom, top], clip(4.0, 4.0))
            .unwrap();

        for y in 0..4 {
            for x in 0..4 {
                assert_eq!(
                    merged.sample_device(x, y),
                    blended.sample_device(x, y),
                    "pixel ({x},{y})"
                );
            }
        }
    }

    #[test]
    fn results_are_clipped_to_the_output_clip() {
        let mut renderer = Renderer::new(false);
        let mut sepia = SepiaTone::new();
        sepia.set_level(1.0).unwrap();
        let effect = Effect::SepiaTone(sepia);

        let src = solid(0, 0, 8, 8, [100, 100, 100, 255]);
        let out = renderer
            .apply(&effect, smallvec![src], clip(4.0, 4.0))
            .unwrap();
        assert_eq!(out.bounds(), Rect::new(0.0, 0.0, 4.0, 4.0));
    }
}
