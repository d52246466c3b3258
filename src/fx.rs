//! The effect graph.
//!
//! Effects form a tree: each node owns its input slots, a `None` slot meaning
//! "use the default input" (the content the effect is attached to). A render
//! pass resolves the tree bottom-up through [`Effect::filter`], with peer
//! lookup and backend selection delegated to the [`Renderer`] inside the
//! per-pass [`FilterContext`].
//!
//! The set of effect kinds is closed, so mode/kind dispatch is exhaustively
//! checked at compile time.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::core::{Affine, Point, Rect};
use crate::error::{CadenzaError, CadenzaResult};
use crate::fx_blend::BlendMode;
use crate::fx_dirty::{DirtyRegionContainer, DirtyRegionPool};
use crate::fx_fingerprint::{EffectFingerprint, fingerprint_render};
use crate::fx_kernels::{Light, motion_blur_padding};
use crate::fx_peer::Renderer;

/// Premultiplied RGBA8 pixel buffer positioned in device space.
#[derive(Clone, Debug, PartialEq)]
pub struct ImageData {
    x: i32,
    y: i32,
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageData {
    /// A transparent buffer at the given device-space origin.
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> ImageData {
        ImageData {
            x,
            y,
            width,
            height,
            pixels: vec![0u8; (width as usize) * (height as usize) * 4],
        }
    }

    pub fn from_pixels(
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        pixels: Vec<u8>,
    ) -> CadenzaResult<ImageData> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(4))
            .ok_or_else(|| CadenzaError::evaluation("image buffer size overflow"))?;
        if pixels.len() != expected {
            return Err(CadenzaError::evaluation(
                "ImageData expects pixels matching width*height*4",
            ));
        }
        Ok(ImageData {
            x,
            y,
            width,
            height,
            pixels,
        })
    }

    pub fn x(&self) -> i32 {
        self.x
    }

    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Device-space footprint.
    pub fn bounds(&self) -> Rect {
        Rect::new(
            f64::from(self.x),
            f64::from(self.y),
            f64::from(self.x) + f64::from(self.width),
            f64::from(self.y) + f64::from(self.height),
        )
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixels_mut(&mut self) -> &mut [u8] {
        &mut self.pixels
    }

    /// Buffer-local read; callers must stay in range.
    pub fn pixel(&self, dx: u32, dy: u32) -> [u8; 4] {
        let idx = ((dy as usize) * (self.width as usize) + dx as usize) * 4;
        [
            self.pixels[idx],
            self.pixels[idx + 1],
            self.pixels[idx + 2],
            self.pixels[idx + 3],
        ]
    }

    pub fn set_pixel(&mut self, dx: u32, dy: u32, px: [u8; 4]) {
        let idx = ((dy as usize) * (self.width as usize) + dx as usize) * 4;
        self.pixels[idx..idx + 4].copy_from_slice(&px);
    }

    /// Device-space read; transparent outside the buffer.
    pub fn sample_device(&self, x: i32, y: i32) -> [u8; 4] {
        let dx = x - self.x;
        let dy = y - self.y;
        if dx < 0 || dy < 0 || dx >= self.width as i32 || dy >= self.height as i32 {
            return [0; 4];
        }
        self.pixel(dx as u32, dy as u32)
    }

    /// Copy the intersection with `clip` into a new buffer.
    pub fn crop(&self, clip: Rect) -> ImageData {
        let (cx, cy, cw, ch) = device_rect(clip.intersect(self.bounds()));
        let mut out = ImageData::new(cx, cy, cw, ch);
        for dy in 0..ch {
            for dx in 0..cw {
                let px = self.sample_device(cx + dx as i32, cy + dy as i32);
                out.set_pixel(dx, dy, px);
            }
        }
        out
    }
}

/// Snap a device-space rect outward to integer pixels.
pub(crate) fn device_rect(r: Rect) -> (i32, i32, u32, u32) {
    let x0 = r.x0.floor() as i32;
    let y0 = r.y0.floor() as i32;
    let x1 = r.x1.ceil() as i32;
    let y1 = r.y1.ceil() as i32;
    let w = (x1 - x0).max(0) as u32;
    let h = (y1 - y0).max(0) as u32;
    (x0, y0, w, h)
}

/// Coordinate space an effect's kernel runs in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum EffectCoordinateSpace {
    /// Aligned to the final output pixel grid.
    RenderSpace,
    /// The content's own pre-transform space; the effect must be evaluated
    /// before the final transform is applied.
    UserSpace,
}

/// Per-pass descriptor: which space the effect evaluates in, and the input
/// region required to produce a given output clip.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RenderState {
    pub space: EffectCoordinateSpace,
    pub input_clip: Rect,
}

/// Per-render-pass token owning the renderer and the dirty-region pool.
///
/// Stands in for the opaque filter-context/render-helper pair handed down by
/// the windowing layer; the effect graph passes it through without
/// interpreting it further.
#[derive(Debug)]
pub struct FilterContext {
    renderer: Renderer,
    pool: DirtyRegionPool,
    cache: Option<CachedRender>,
}

#[derive(Debug)]
struct CachedRender {
    fingerprint: EffectFingerprint,
    clip: Rect,
    result: ImageData,
}

impl FilterContext {
    pub fn new(renderer: Renderer) -> FilterContext {
        FilterContext {
            renderer,
            pool: DirtyRegionPool::default(),
            cache: None,
        }
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn pool_mut(&mut self) -> &mut DirtyRegionPool {
        &mut self.pool
    }

    /// Top-level render entry with result reuse: when the effect graph, its
    /// parameters, the transform and the default input are all unchanged from
    /// the previous pass over the same clip, the prior output is returned
    /// without re-filtering.
    #[tracing::instrument(skip_all, fields(kind = effect.kind_name()))]
    pub fn render(
        &mut self,
        effect: &Effect,
        transform: &Affine,
        output_clip: Rect,
        default_input: &ImageData,
    ) -> CadenzaResult<ImageData> {
        let fingerprint = fingerprint_render(effect, transform, default_input);
        if let Some(cache) = &self.cache
            && cache.fingerprint == fingerprint
            && cache.clip == output_clip
        {
            tracing::trace!("render cache hit");
            return Ok(cache.result.clone());
        }

        let result = effect.filter(self, transform, output_clip, default_input)?;
        self.cache = Some(CachedRender {
            fingerprint,
            clip: output_clip,
            result: result.clone(),
        });
        Ok(result)
    }
}

/// An image-processing effect node.
#[derive(Clone, Debug)]
pub enum Effect {
    Blend(Blend),
    Merge(Merge),
    MotionBlur(MotionBlur),
    PhongLighting(PhongLighting),
    SepiaTone(SepiaTone),
    ZoomRadialBlur(ZoomRadialBlur),
}

impl Effect {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Blend(_) => "Blend",
            Self::Merge(_) => "Merge",
            Self::MotionBlur(_) => "MotionBlur",
            Self::PhongLighting(_) => "PhongLighting",
            Self::SepiaTone(_) => "SepiaTone",
            Self::ZoomRadialBlur(_) => "ZoomRadialBlur",
        }
    }

    /// Key selecting the peer implementation; derived from mode-like
    /// parameters only, so numeric tweaks keep the same peer.
    pub fn peer_key(&self) -> String {
        match self {
            Self::Blend(b) => b.peer_key(),
            Self::Merge(_) => "Merge".to_owned(),
            Self::MotionBlur(_) => "MotionBlur".to_owned(),
            Self::PhongLighting(p) => p.peer_key(),
            Self::SepiaTone(_) => "SepiaTone".to_owned(),
            Self::ZoomRadialBlur(_) => "ZoomRadialBlur".to_owned(),
        }
    }

    /// Positional input slots; `None` means "use the default input".
    pub fn input_slots(&self) -> SmallVec<[Option<&Effect>; 2]> {
        fn deref(slot: &Option<Box<Effect>>) -> Option<&Effect> {
            slot.as_deref()
        }
        match self {
            Self::Blend(b) => SmallVec::from_buf([deref(&b.bottom_input), deref(&b.top_input)]),
            Self::Merge(m) => SmallVec::from_buf([deref(&m.bottom_input), deref(&m.top_input)]),
            Self::MotionBlur(e) => SmallVec::from_slice(&[deref(&e.input)]),
            Self::PhongLighting(e) => SmallVec::from_slice(&[deref(&e.input)]),
            Self::SepiaTone(e) => SmallVec::from_slice(&[deref(&e.input)]),
            Self::ZoomRadialBlur(e) => SmallVec::from_slice(&[deref(&e.input)]),
        }
    }

    /// Kernel padding: how far outside its input footprint the effect paints.
    pub fn padding(&self) -> (f64, f64) {
        match self {
            Self::Blend(_) | Self::Merge(_) | Self::SepiaTone(_) => (0.0, 0.0),
            Self::MotionBlur(e) => motion_blur_padding(e.radius, e.angle),
            Self::PhongLighting(_) => (1.0, 1.0),
            Self::ZoomRadialBlur(e) => (f64::from(e.radius), f64::from(e.radius)),
        }
    }

    /// Static opacity predicate used by the compositor for occlusion culling:
    /// whether this effect can turn opaque pixels non-opaque. Never samples
    /// pixels; composites derive their answer from their inputs' answers. An
    /// unconnected slot (the default input) never reduces opacity.
    pub fn reduces_opaque_pixels(&self) -> bool {
        fn slot(input: &Option<Box<Effect>>) -> bool {
            input.as_deref().is_some_and(Effect::reduces_opaque_pixels)
        }

        match self {
            Self::Blend(b) => b.mode.reduces_opaque(slot(&b.bottom_input), slot(&b.top_input)),
            Self::Merge(m) => slot(&m.bottom_input) && slot(&m.top_input),
            Self::MotionBlur(e) => e.radius > 0 || slot(&e.input),
            Self::PhongLighting(e) => slot(&e.input),
            Self::SepiaTone(e) => slot(&e.input),
            Self::ZoomRadialBlur(_) => true,
        }
    }

    /// Coordinate-space descriptor plus the input region needed for a given
    /// output clip (the clip grown by the kernel padding).
    pub fn render_state(&self, output_clip: Rect) -> RenderState {
        let space = match self {
            // Zoom-radial blur does not expand bounds and must run before the
            // final transform.
            Self::ZoomRadialBlur(_) => EffectCoordinateSpace::UserSpace,
            _ => EffectCoordinateSpace::RenderSpace,
        };
        let (h_pad, v_pad) = self.padding();
        RenderState {
            space,
            input_clip: output_clip.inflate(h_pad, v_pad),
        }
    }

    /// Propagate dirty regions through the graph, growing them by each
    /// spatially-expanding effect's padding so a localized change invalidates
    /// the full footprint the effect can paint into.
    pub fn dirty_regions(
        &self,
        default_input: &DirtyRegionContainer,
        pool: &mut DirtyRegionPool,
    ) -> DirtyRegionContainer {
        let mut out = pool.checkout();
        for slot in self.input_slots() {
            match slot {
                Some(child) => {
                    let child_regions = child.dirty_regions(default_input, pool);
                    out.add_all(&child_regions);
                    pool.checkin(child_regions);
                }
                None => out.add_all(default_input),
            }
        }

        let (h_pad, v_pad) = self.padding();
        if h_pad > 0.0 || v_pad > 0.0 {
            out.grow(h_pad, v_pad);
        }
        out
    }

    /// Evaluate the effect for one render pass.
    ///
    /// Inputs are resolved recursively (with `default_input` substituted for
    /// unconnected slots), then the renderer selects a peer and applies the
    /// kernel clipped to `output_clip`.
    pub fn filter(
        &self,
        fctx: &mut FilterContext,
        transform: &Affine,
        output_clip: Rect,
        default_input: &ImageData,
    ) -> CadenzaResult<ImageData> {
        let input_clip = self.render_state(output_clip).input_clip;

        let mut inputs: SmallVec<[ImageData; 2]> = SmallVec::new();
        for slot in self.input_slots() {
            let image = match slot {
                Some(child) => child.filter(fctx, transform, input_clip, default_input)?,
                None => default_input.clone(),
            };
            inputs.push(image);
        }

        fctx.renderer.apply(self, inputs, output_clip)
    }
}

/// Composite of two inputs under a [`BlendMode`].
#[derive(Clone, Debug)]
pub struct Blend {
    mode: BlendMode,
    opacity: f64,
    bottom_input: Option<Box<Effect>>,
    top_input: Option<Box<Effect>>,
    cached_key: RefCell<Option<String>>,
}

impl Blend {
    pub fn new(mode: BlendMode) -> Blend {
        Blend {
            mode,
            opacity: 1.0,
            bottom_input: None,
            top_input: None,
            cached_key: RefCell::new(None),
        }
    }

    pub fn mode(&self) -> BlendMode {
        self.mode
    }

    /// Mode is a peer-selecting parameter: changing it drops the cached key.
    pub fn set_mode(&mut self, mode: BlendMode) {
        if self.mode != mode {
            self.mode = mode;
            self.cached_key.replace(None);
        }
    }

    pub fn opacity(&self) -> f64 {
        self.opacity
    }

    /// Opacity of the top input, in `[0, 1]`. Purely numeric: the cached peer
    /// stays valid.
    pub fn set_opacity(&mut self, opacity: f64) -> CadenzaResult<()> {
        if !(0.0..=1.0).contains(&opacity) {
            return Err(CadenzaError::validation(
                "Blend.opacity must be in [0.0, 1.0]",
            ));
        }
        self.opacity = opacity;
        Ok(())
    }

    pub fn set_bottom_input(&mut self, input: Option<Effect>) {
        self.bottom_input = input.map(Box::new);
    }

    pub fn set_top_input(&mut self, input: Option<Effect>) {
        self.top_input = input.map(Box::new);
    }

    pub fn peer_key(&self) -> String {
        let mut cached = self.cached_key.borrow_mut();
        cached
            .get_or_insert_with(|| format!("Blend_{}", self.mode.key_name()))
            .clone()
    }

    /// Whether a peer key is currently cached; diagnostic.
    pub fn peer_key_cached(&self) -> bool {
        self.cached_key.borrow().is_some()
    }
}

/// `SrcOver` composite specialized to stream the top input directly onto the
/// bottom input's buffer, skipping the intermediate buffer a general
/// [`Blend`] would allocate. Pixel results equal `Blend(SrcOver, opacity 1)`.
#[derive(Clone, Debug, Default)]
pub struct Merge {
    bottom_input: Option<Box<Effect>>,
    top_input: Option<Box<Effect>>,
}

impl Merge {
    pub fn new() -> Merge {
        Merge::default()
    }

    pub fn set_bottom_input(&mut self, input: Option<Effect>) {
        self.bottom_input = input.map(Box::new);
    }

    pub fn set_top_input(&mut self, input: Option<Effect>) {
        self.top_input = input.map(Box::new);
    }
}

/// Directional blur along a line.
#[derive(Clone, Debug)]
pub struct MotionBlur {
    radius: u32,
    angle: f64,
    input: Option<Box<Effect>>,
}

impl MotionBlur {
    pub fn new() -> MotionBlur {
        MotionBlur {
            radius: 10,
            angle: 0.0,
            input: None,
        }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Blur radius in pixels, in `[0, 63]`.
    pub fn set_radius(&mut self, radius: u32) -> CadenzaResult<()> {
        if radius > 63 {
            return Err(CadenzaError::validation(
                "MotionBlur.radius must be in [0, 63]",
            ));
        }
        self.radius = radius;
        Ok(())
    }

    pub fn angle(&self) -> f64 {
        self.angle
    }

    /// Blur direction in radians.
    pub fn set_angle(&mut self, angle: f64) -> CadenzaResult<()> {
        if !angle.is_finite() {
            return Err(CadenzaError::validation("MotionBlur.angle must be finite"));
        }
        self.angle = angle;
        Ok(())
    }

    pub fn set_input(&mut self, input: Option<Effect>) {
        self.input = input.map(Box::new);
    }
}

impl Default for MotionBlur {
    fn default() -> Self {
        Self::new()
    }
}

/// Diffuse/specular lighting with the alpha channel as a height map.
#[derive(Clone, Debug)]
pub struct PhongLighting {
    light: Light,
    surface_scale: f32,
    diffuse_constant: f32,
    specular_constant: f32,
    specular_exponent: f32,
    input: Option<Box<Effect>>,
    cached_key: RefCell<Option<String>>,
}

impl PhongLighting {
    pub fn new(light: Light) -> PhongLighting {
        PhongLighting {
            light,
            surface_scale: 1.5,
            diffuse_constant: 1.0,
            specular_constant: 0.3,
            specular_exponent: 20.0,
            input: None,
            cached_key: RefCell::new(None),
        }
    }

    pub fn light(&self) -> &Light {
        &self.light
    }

    /// The light's kind selects the peer: switching kind drops the cached
    /// key, repositioning the same kind of light does not.
    pub fn set_light(&mut self, light: Light) {
        if self.light.kind_name() != light.kind_name() {
            self.cached_key.replace(None);
        }
        self.light = light;
    }

    pub fn surface_scale(&self) -> f32 {
        self.surface_scale
    }

    /// Height-map scale, in `[0, 10]`.
    pub fn set_surface_scale(&mut self, surface_scale: f32) -> CadenzaResult<()> {
        if !(0.0..=10.0).contains(&surface_scale) {
            return Err(CadenzaError::validation(
                "PhongLighting.surface_scale must be in [0.0, 10.0]",
            ));
        }
        self.surface_scale = surface_scale;
        Ok(())
    }

    pub fn diffuse_constant(&self) -> f32 {
        self.diffuse_constant
    }

    /// Diffuse reflection constant, in `[0, 2]`.
    pub fn set_diffuse_constant(&mut self, diffuse_constant: f32) -> CadenzaResult<()> {
        if !(0.0..=2.0).contains(&diffuse_constant) {
            return Err(CadenzaError::validation(
                "PhongLighting.diffuse_constant must be in [0.0, 2.0]",
            ));
        }
        self.diffuse_constant = diffuse_constant;
        Ok(())
    }

    pub fn specular_constant(&self) -> f32 {
        self.specular_constant
    }

    /// Specular reflection constant, in `[0, 2]`.
    pub fn set_specular_constant(&mut self, specular_constant: f32) -> CadenzaResult<()> {
        if !(0.0..=2.0).contains(&specular_constant) {
            return Err(CadenzaError::validation(
                "PhongLighting.specular_constant must be in [0.0, 2.0]",
            ));
        }
        self.specular_constant = specular_constant;
        Ok(())
    }

    pub fn specular_exponent(&self) -> f32 {
        self.specular_exponent
    }

    /// Specular exponent, in `[0, 40]`.
    pub fn set_specular_exponent(&mut self, specular_exponent: f32) -> CadenzaResult<()> {
        if !(0.0..=40.0).contains(&specular_exponent) {
            return Err(CadenzaError::validation(
                "PhongLighting.specular_exponent must be in [0.0, 40.0]",
            ));
        }
        self.specular_exponent = specular_exponent;
        Ok(())
    }

    pub fn set_input(&mut self, input: Option<Effect>) {
        self.input = input.map(Box::new);
    }

    pub fn peer_key(&self) -> String {
        let mut cached = self.cached_key.borrow_mut();
        cached
            .get_or_insert_with(|| format!("PhongLighting_{}", self.light.kind_name()))
            .clone()
    }

    /// Whether a peer key is currently cached; diagnostic.
    pub fn peer_key_cached(&self) -> bool {
        self.cached_key.borrow().is_some()
    }
}

/// Sepia color grading.
#[derive(Clone, Debug)]
pub struct SepiaTone {
    level: f32,
    input: Option<Box<Effect>>,
}

impl SepiaTone {
    pub fn new() -> SepiaTone {
        SepiaTone {
            level: 1.0,
            input: None,
        }
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    /// Mix level between the original and the sepia matrix, in `[0, 1]`.
    pub fn set_level(&mut self, level: f32) -> CadenzaResult<()> {
        if !(0.0..=1.0).contains(&level) {
            return Err(CadenzaError::validation(
                "SepiaTone.level must be in [0.0, 1.0]",
            ));
        }
        self.level = level;
        Ok(())
    }

    pub fn set_input(&mut self, input: Option<Effect>) {
        self.input = input.map(Box::new);
    }
}

impl Default for SepiaTone {
    fn default() -> Self {
        Self::new()
    }
}

/// Radial smear toward a center point; evaluated in user space because it
/// does not expand bounds.
#[derive(Clone, Debug)]
pub struct ZoomRadialBlur {
    radius: u32,
    center: Point,
    input: Option<Box<Effect>>,
}

impl ZoomRadialBlur {
    pub fn new(center: Point) -> ZoomRadialBlur {
        ZoomRadialBlur {
            radius: 8,
            center,
            input: None,
        }
    }

    pub fn radius(&self) -> u32 {
        self.radius
    }

    /// Blur radius in pixels, in `[1, 64]`.
    pub fn set_radius(&mut self, radius: u32) -> CadenzaResult<()> {
        if !(1..=64).contains(&radius) {
            return Err(CadenzaError::validation(
                "ZoomRadialBlur.radius must be in [1, 64]",
            ));
        }
        self.radius = radius;
        Ok(())
    }

    pub fn center(&self) -> Point {
        self.center
    }

    pub fn set_center(&mut self, center: Point) -> CadenzaResult<()> {
        if !center.x.is_finite() || !center.y.is_finite() {
            return Err(CadenzaError::validation(
                "ZoomRadialBlur.center must be finite",
            ));
        }
        self.center = center;
        Ok(())
    }

    pub fn set_input(&mut self, input: Option<Effect>) {
        self.input = input.map(Box::new);
    }
}

// Parameter accessors used by peers at apply time.
pub(crate) struct BlendParams {
    pub(crate) mode: BlendMode,
    pub(crate) opacity: f32,
}

impl Effect {
    pub(crate) fn blend_params(&self) -> Option<BlendParams> {
        match self {
            Self::Blend(b) => Some(BlendParams {
                mode: b.mode,
                opacity: b.opacity as f32,
            }),
            Self::Merge(_) => Some(BlendParams {
                mode: BlendMode::SrcOver,
                opacity: 1.0,
            }),
            _ => None,
        }
    }

    pub(crate) fn as_motion_blur(&self) -> Option<&MotionBlur> {
        match self {
            Self::MotionBlur(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn as_phong(&self) -> Option<&PhongLighting> {
        match self {
            Self::PhongLighting(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn as_sepia(&self) -> Option<&SepiaTone> {
        match self {
            Self::SepiaTone(e) => Some(e),
            _ => None,
        }
    }

    pub(crate) fn as_zoom(&self) -> Option<&ZoomRadialBlur> {
        match self {
            Self::ZoomRadialBlur(e) => Some(e),
            _ => None,
        }
    }
}

impl PhongLighting {
    pub(crate) fn kernel_params(&self) -> crate::fx_kernels::PhongParams {
        crate::fx_kernels::PhongParams {
            light: self.light.clone(),
            surface_scale: self.surface_scale,
            diffuse_constant: self.diffuse_constant,
            specular_constant: self.specular_constant,
            specular_exponent: self.specular_exponent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_range_parameters_leave_state_unchanged() {
        let mut blur = MotionBlur::new();
        assert!(blur.set_radius(64).is_err());
        assert_eq!(blur.radius(), 10);

        let mut blend = Blend::new(BlendMode::SrcOver);
        assert!(blend.set_opacity(1.5).is_err());
        assert_eq!(blend.opacity(), 1.0);

        let mut sepia = SepiaTone::new();
        assert!(sepia.set_level(-0.1).is_err());
        assert_eq!(sepia.level(), 1.0);

        let mut zoom = ZoomRadialBlur::new(Point::new(0.0, 0.0));
        assert!(zoom.set_radius(0).is_err());
        assert!(zoom.set_radius(65).is_err());
        assert_eq!(zoom.radius(), 8);
    }

    #[test]
    fn blend_mode_change_invalidates_cached_peer_key() {
        let mut blend = Blend::new(BlendMode::SrcOver);
        assert_eq!(blend.peer_key(), "Blend_SRC_OVER");
        assert!(blend.peer_key_cached());

        blend.set_opacity(0.5).unwrap();
        assert!(blend.peer_key_cached());

        blend.set_mode(BlendMode::Multiply);
        assert!(!blend.peer_key_cached());
        assert_eq!(blend.peer_key(), "Blend_MULTIPLY");
    }

    #[test]
    fn light_kind_change_invalidates_cached_peer_key() {
        let mut phong = PhongLighting::new(Light::distant(45.0, 45.0));
        assert_eq!(phong.peer_key(), "PhongLighting_DISTANT");

        // Same kind, new position: peer survives.
        phong.set_light(Light::distant(90.0, 30.0));
        assert!(phong.peer_key_cached());

        phong.set_light(Light::point(0.0, 0.0, 50.0));
        assert!(!phong.peer_key_cached());
        assert_eq!(phong.peer_key(), "PhongLighting_POINT");
    }

    #[test]
    fn zoom_radial_blur_is_a_user_space_effect() {
        let zoom = Effect::ZoomRadialBlur(ZoomRadialBlur::new(Point::new(16.0, 16.0)));
        let state = zoom.render_state(Rect::new(0.0, 0.0, 32.0, 32.0));
        assert_eq!(state.space, EffectCoordinateSpace::UserSpace);
        assert_eq!(state.input_clip, Rect::new(-8.0, -8.0, 40.0, 40.0));

        let blend = Effect::Blend(Blend::new(BlendMode::SrcOver));
        assert_eq!(
            blend.render_state(Rect::new(0.0, 0.0, 32.0, 32.0)).space,
            EffectCoordinateSpace::RenderSpace
        );
    }

    #[test]
    fn dirty_regions_grow_by_kernel_padding() {
        let mut pool = DirtyRegionPool::default();
        let mut dirty = DirtyRegionContainer::new();
        dirty.add(Rect::new(10.0, 10.0, 20.0, 20.0));

        // Horizontal blur: grows horizontally only.
        let mut blur = MotionBlur::new();
        blur.set_radius(5).unwrap();
        blur.set_angle(0.0).unwrap();
        let blur = Effect::MotionBlur(blur);

        let grown = blur.dirty_regions(&dirty, &mut pool);
        assert_eq!(grown.regions()[0], Rect::new(5.0, 10.0, 25.0, 20.0));

        let mut zoom = ZoomRadialBlur::new(Point::new(0.0, 0.0));
        zoom.set_radius(4).unwrap();
        let zoom = Effect::ZoomRadialBlur(zoom);
        let grown = zoom.dirty_regions(&dirty, &mut pool);
        assert_eq!(grown.regions()[0], Rect::new(6.0, 6.0, 24.0, 24.0));
    }

    #[test]
    fn dirty_regions_union_composite_inputs() {
        let mut pool = DirtyRegionPool::default();
        let mut dirty = DirtyRegionContainer::new();
        dirty.add(Rect::new(0.0, 0.0, 8.0, 8.0));

        let mut inner = MotionBlur::new();
        inner.set_radius(2).unwrap();
        inner.set_angle(0.0).unwrap();

        let mut blend = Blend::new(BlendMode::SrcOver);
        blend.set_top_input(Some(Effect::MotionBlur(inner)));
        let blend = Effect::Blend(blend);

        let out = blend.dirty_regions(&dirty, &mut pool);
        // Bottom slot contributes the raw region, top slot the grown one;
        // they overlap, so they merge into the union.
        assert_eq!(out.regions()[0], Rect::new(-2.0, 0.0, 10.0, 8.0));
    }

    #[test]
    fn reduces_opaque_pixels_composes_through_the_graph() {
        // Leaf that reduces: a zoom blur.
        let reducing = Effect::ZoomRadialBlur(ZoomRadialBlur::new(Point::new(0.0, 0.0)));
        assert!(reducing.reduces_opaque_pixels());

        // SRC_IN reduces regardless of inputs.
        let blend = Effect::Blend(Blend::new(BlendMode::SrcIn));
        assert!(blend.reduces_opaque_pixels());

        // SRC_ATOP follows the bottom input only.
        let mut atop = Blend::new(BlendMode::SrcAtop);
        atop.set_bottom_input(Some(reducing.clone()));
        assert!(Effect::Blend(atop.clone()).reduces_opaque_pixels());
        atop.set_bottom_input(None);
        atop.set_top_input(Some(reducing.clone()));
        assert!(!Effect::Blend(atop).reduces_opaque_pixels());

        // Commutative mode needs both.
        let mut multiply = Blend::new(BlendMode::Multiply);
        multiply.set_top_input(Some(reducing.clone()));
        assert!(!Effect::Blend(multiply.clone()).reduces_opaque_pixels());
        multiply.set_bottom_input(Some(reducing));
        assert!(Effect::Blend(multiply).reduces_opaque_pixels());

        // Zero-radius motion blur is an identity: follows its input.
        let mut identity_blur = MotionBlur::new();
        identity_blur.set_radius(0).unwrap();
        assert!(!Effect::MotionBlur(identity_blur).reduces_opaque_pixels());
    }
}
