//! Software kernels for the effect peers.
//!
//! Every kernel has a scalar path and a rayon row-parallel path behind the
//! same per-pixel function; the renderer picks one per operation. Pixels are
//! premultiplied RGBA8 throughout; sampling outside an input's footprint
//! reads transparent.

use rayon::prelude::*;

use crate::core::{Point, Rect};
use crate::fx::{ImageData, device_rect};
use crate::fx_blend::BlendMode;

/// Light source for phong lighting.
///
/// The light's kind (distant/point/spot) selects the peer; its numeric
/// parameters are plain kernel arguments. Angles are degrees, positions are
/// device-space pixels with z pointing out of the screen, color channels are
/// `[0, 1]`.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Light {
    Distant {
        azimuth: f64,
        elevation: f64,
        color: [f32; 3],
    },
    Point {
        x: f64,
        y: f64,
        z: f64,
        color: [f32; 3],
    },
    Spot {
        x: f64,
        y: f64,
        z: f64,
        points_at: (f64, f64, f64),
        focus: f64,
        color: [f32; 3],
    },
}

impl Light {
    pub fn distant(azimuth: f64, elevation: f64) -> Light {
        Light::Distant {
            azimuth,
            elevation,
            color: [1.0, 1.0, 1.0],
        }
    }

    pub fn point(x: f64, y: f64, z: f64) -> Light {
        Light::Point {
            x,
            y,
            z,
            color: [1.0, 1.0, 1.0],
        }
    }

    pub fn spot(x: f64, y: f64, z: f64, points_at: (f64, f64, f64), focus: f64) -> Light {
        Light::Spot {
            x,
            y,
            z,
            points_at,
            focus,
            color: [1.0, 1.0, 1.0],
        }
    }

    /// Stable kind name used in peer cache keys.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Light::Distant { .. } => "DISTANT",
            Light::Point { .. } => "POINT",
            Light::Spot { .. } => "SPOT",
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct PhongParams {
    pub(crate) light: Light,
    pub(crate) surface_scale: f32,
    pub(crate) diffuse_constant: f32,
    pub(crate) specular_constant: f32,
    pub(crate) specular_exponent: f32,
}

/// Kernel padding of a motion blur: how far the smear reaches along each
/// axis. Axis-aligned angles must not leak a stray pixel of padding from
/// floating-point residue in sin/cos.
pub(crate) fn motion_blur_padding(radius: u32, angle: f64) -> (f64, f64) {
    fn pad(reach: f64) -> f64 {
        if reach < 1e-9 { 0.0 } else { reach.ceil() }
    }

    let r = f64::from(radius);
    (pad(angle.cos().abs() * r), pad(angle.sin().abs() * r))
}

/// Fill `out` row by row from a per-pixel function over device coordinates.
fn render_rows(out: &mut ImageData, parallel: bool, f: impl Fn(i32, i32) -> [u8; 4] + Sync) {
    let w = out.width() as usize;
    if w == 0 || out.height() == 0 {
        return;
    }
    let (ox, oy) = (out.x(), out.y());
    let row_bytes = w * 4;

    let fill = |dy: usize, row: &mut [u8]| {
        let y = oy + dy as i32;
        for dx in 0..w {
            let px = f(ox + dx as i32, y);
            row[dx * 4..dx * 4 + 4].copy_from_slice(&px);
        }
    };

    if parallel {
        out.pixels_mut()
            .par_chunks_exact_mut(row_bytes)
            .enumerate()
            .for_each(|(dy, row)| fill(dy, row));
    } else {
        for (dy, row) in out.pixels_mut().chunks_exact_mut(row_bytes).enumerate() {
            fill(dy, row);
        }
    }
}

fn quantize(acc: [f32; 4]) -> [u8; 4] {
    acc.map(|v| v.round().clamp(0.0, 255.0) as u8)
}

fn gaussian_line_weights(radius: u32) -> Vec<f32> {
    let r = radius as i32;
    let sigma = (f64::from(radius) / 3.0).max(0.5);
    let denom = 2.0 * sigma * sigma;

    let mut weights = Vec::with_capacity((2 * r + 1) as usize);
    let mut sum = 0.0f64;
    for i in -r..=r {
        let x = f64::from(i);
        let w = (-x * x / denom).exp();
        weights.push(w);
        sum += w;
    }
    weights.iter().map(|w| (w / sum) as f32).collect()
}

/// Gaussian-weighted smear along a line at `angle`. The output grows by the
/// kernel padding on each side; radius 0 is the identity.
pub(crate) fn motion_blur(src: &ImageData, radius: u32, angle: f64, parallel: bool) -> ImageData {
    if radius == 0 {
        return src.clone();
    }

    let (h_pad, v_pad) = motion_blur_padding(radius, angle);
    let mut out = ImageData::new(
        src.x() - h_pad as i32,
        src.y() - v_pad as i32,
        src.width() + 2 * h_pad as u32,
        src.height() + 2 * v_pad as u32,
    );

    let weights = gaussian_line_weights(radius);
    let (dir_x, dir_y) = (angle.cos(), angle.sin());

    render_rows(&mut out, parallel, |x, y| {
        let mut acc = [0.0f32; 4];
        for (i, &w) in weights.iter().enumerate() {
            let offset = i as f64 - f64::from(radius);
            let sx = (f64::from(x) + offset * dir_x).round() as i32;
            let sy = (f64::from(y) + offset * dir_y).round() as i32;
            let px = src.sample_device(sx, sy);
            for c in 0..4 {
                acc[c] += w * f32::from(px[c]);
            }
        }
        quantize(acc)
    });
    out
}

/// Radial smear toward `center`, reaching at most `radius` pixels along each
/// ray. Bounds are not expanded.
pub(crate) fn zoom_radial_blur(
    src: &ImageData,
    radius: u32,
    center: Point,
    parallel: bool,
) -> ImageData {
    let mut out = ImageData::new(src.x(), src.y(), src.width(), src.height());
    let taps = radius.max(1);

    render_rows(&mut out, parallel, |x, y| {
        let vx = f64::from(x) - center.x;
        let vy = f64::from(y) - center.y;
        let len = (vx * vx + vy * vy).sqrt();
        if len < 1.0 {
            return src.sample_device(x, y);
        }
        let (ux, uy) = (vx / len, vy / len);

        let mut acc = [0.0f32; 4];
        for i in 0..=taps {
            // Samples slide toward the center, never across it.
            let d = (f64::from(radius) * f64::from(i) / f64::from(taps)).min(len);
            let sx = (f64::from(x) - ux * d).round() as i32;
            let sy = (f64::from(y) - uy * d).round() as i32;
            let px = src.sample_device(sx, sy);
            for c in 0..4 {
                acc[c] += f32::from(px[c]);
            }
        }
        let n = (taps + 1) as f32;
        quantize(acc.map(|v| v / n))
    });
    out
}

/// Mix toward the sepia color matrix by `level`.
pub(crate) fn sepia_tone(src: &ImageData, level: f32, parallel: bool) -> ImageData {
    let mut out = ImageData::new(src.x(), src.y(), src.width(), src.height());
    let level = level.clamp(0.0, 1.0);

    render_rows(&mut out, parallel, |x, y| {
        let px = src.sample_device(x, y);
        let a = f32::from(px[3]);
        if a == 0.0 {
            return [0; 4];
        }

        // Unpremultiply into [0, 255].
        let r = f32::from(px[0]) * 255.0 / a;
        let g = f32::from(px[1]) * 255.0 / a;
        let b = f32::from(px[2]) * 255.0 / a;

        let sr = (0.393 * r + 0.769 * g + 0.189 * b).min(255.0);
        let sg = (0.349 * r + 0.686 * g + 0.168 * b).min(255.0);
        let sb = (0.272 * r + 0.534 * g + 0.131 * b).min(255.0);

        let mix = |orig: f32, sep: f32| orig + (sep - orig) * level;
        let premul = |v: f32| v * a / 255.0;
        quantize([
            premul(mix(r, sr)),
            premul(mix(g, sg)),
            premul(mix(b, sb)),
            a,
        ])
    });
    out
}

/// Phong lighting with the input's alpha channel as a height map. The output
/// grows by one pixel of kernel padding for the normal estimation.
pub(crate) fn phong_lighting(src: &ImageData, params: &PhongParams, parallel: bool) -> ImageData {
    let mut out = ImageData::new(
        src.x() - 1,
        src.y() - 1,
        src.width() + 2,
        src.height() + 2,
    );

    let surface_scale = params.surface_scale;
    let height = |x: i32, y: i32| -> f32 {
        surface_scale * f32::from(src.sample_device(x, y)[3]) / 255.0
    };

    render_rows(&mut out, parallel, |x, y| {
        let px = src.sample_device(x, y);
        let a = f32::from(px[3]);

        // Surface normal from the height-map gradient.
        let nx = -(height(x + 1, y) - height(x - 1, y)) * 0.5;
        let ny = -(height(x, y + 1) - height(x, y - 1)) * 0.5;
        let n = normalize3([nx, ny, 1.0]);

        let surface = (f64::from(x), f64::from(y), f64::from(height(x, y)));
        let (l, light_color) = light_at(&params.light, surface);

        let n_dot_l = dot3(n, l).max(0.0);
        let halfway = normalize3([l[0], l[1], l[2] + 1.0]);
        let n_dot_h = dot3(n, halfway).max(0.0);
        let spec_term =
            params.specular_constant * n_dot_h.powf(params.specular_exponent);

        let mut result = [0.0f32; 4];
        result[3] = a;
        for c in 0..3 {
            let diffuse = params.diffuse_constant * n_dot_l * light_color[c];
            let specular = spec_term * light_color[c] * a;
            // Keep the premultiplied invariant: channels never exceed alpha.
            result[c] = (f32::from(px[c]) * diffuse + specular).min(a);
        }
        quantize(result)
    });
    out
}

fn light_at(light: &Light, surface: (f64, f64, f64)) -> ([f32; 3], [f32; 3]) {
    match light {
        Light::Distant {
            azimuth,
            elevation,
            color,
        } => {
            let az = azimuth.to_radians();
            let el = elevation.to_radians();
            let l = [
                (az.cos() * el.cos()) as f32,
                (az.sin() * el.cos()) as f32,
                el.sin() as f32,
            ];
            (normalize3(l), *color)
        }
        Light::Point { x, y, z, color } => {
            let l = [
                (x - surface.0) as f32,
                (y - surface.1) as f32,
                (z - surface.2) as f32,
            ];
            (normalize3(l), *color)
        }
        Light::Spot {
            x,
            y,
            z,
            points_at,
            focus,
            color,
        } => {
            let l = normalize3([
                (x - surface.0) as f32,
                (y - surface.1) as f32,
                (z - surface.2) as f32,
            ]);
            let axis = normalize3([
                (points_at.0 - x) as f32,
                (points_at.1 - y) as f32,
                (points_at.2 - z) as f32,
            ]);
            // Attenuate by how far the surface sits off the spot axis.
            let falloff = (-dot3(l, axis)).max(0.0).powf(*focus as f32);
            let color = [color[0] * falloff, color[1] * falloff, color[2] * falloff];
            (l, color)
        }
    }
}

fn dot3(a: [f32; 3], b: [f32; 3]) -> f32 {
    a[0] * b[0] + a[1] * b[1] + a[2] * b[2]
}

fn normalize3(v: [f32; 3]) -> [f32; 3] {
    let len = dot3(v, v).sqrt();
    if len <= 0.0 {
        return [0.0, 0.0, 1.0];
    }
    [v[0] / len, v[1] / len, v[2] / len]
}

/// General two-input composite over the union of both footprints, clipped.
pub(crate) fn blend_images(
    mode: BlendMode,
    opacity: f32,
    bottom: &ImageData,
    top: &ImageData,
    clip: Rect,
    parallel: bool,
) -> ImageData {
    let bounds = bottom.bounds().union(top.bounds()).intersect(clip);
    let (x, y, w, h) = device_rect(bounds);
    let mut out = ImageData::new(x, y, w, h);

    render_rows(&mut out, parallel, |px, py| {
        mode.blend_rgba8(
            bottom.sample_device(px, py),
            top.sample_device(px, py),
            opacity,
        )
    });
    out
}

/// Stream `top` over `bottom` in place (`SrcOver`, opacity 1), reusing the
/// bottom buffer instead of allocating a composited intermediate. The caller
/// guarantees the bottom footprint covers the composite region.
pub(crate) fn merge_into(mut bottom: ImageData, top: &ImageData, clip: Rect) -> ImageData {
    let region = bottom.bounds().intersect(top.bounds()).intersect(clip);
    let (x0, y0, w, h) = device_rect(region);
    if w == 0 || h == 0 {
        return bottom;
    }

    for dy in 0..h {
        for dx in 0..w {
            let gx = x0 + dx as i32;
            let gy = y0 + dy as i32;
            let t = top.sample_device(gx, gy);
            if t == [0; 4] {
                continue;
            }
            let b = bottom.sample_device(gx, gy);
            let merged = BlendMode::SrcOver.blend_rgba8(b, t, 1.0);
            bottom.set_pixel((gx - bottom.x()) as u32, (gy - bottom.y()) as u32, merged);
        }
    }
    bottom
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(x: i32, y: i32, w: u32, h: u32, px: [u8; 4]) -> ImageData {
        let mut img = ImageData::new(x, y, w, h);
        for dy in 0..h {
            for dx in 0..w {
                img.set_pixel(dx, dy, px);
            }
        }
        img
    }

    #[test]
    fn motion_blur_padding_follows_the_angle() {
        assert_eq!(motion_blur_padding(10, 0.0), (10.0, 0.0));
        assert_eq!(motion_blur_padding(10, std::f64::consts::FRAC_PI_2), (0.0, 10.0));
        let (h, v) = motion_blur_padding(10, std::f64::consts::FRAC_PI_4);
        assert_eq!((h, v), (8.0, 8.0));
    }

    #[test]
    fn motion_blur_radius_0_is_identity() {
        let src = solid(0, 0, 4, 4, [10, 20, 30, 40]);
        let out = motion_blur(&src, 0, 0.0, false);
        assert_eq!(out, src);
    }

    #[test]
    fn motion_blur_expands_bounds_by_padding() {
        let src = solid(0, 0, 4, 4, [0, 0, 0, 255]);
        let out = motion_blur(&src, 3, 0.0, false);
        assert_eq!(out.x(), -3);
        assert_eq!(out.y(), 0);
        assert_eq!(out.width(), 10);
        assert_eq!(out.height(), 4);
    }

    #[test]
    fn motion_blur_interior_of_constant_image_is_unchanged() {
        let px = [40, 80, 120, 200];
        let src = solid(0, 0, 16, 16, px);
        let out = motion_blur(&src, 2, 0.0, false);
        // Far from the edges every tap lands on the same color.
        assert_eq!(out.sample_device(8, 8), px);
    }

    #[test]
    fn zoom_blur_keeps_bounds_and_center_pixel() {
        let px = [10, 20, 30, 255];
        let src = solid(0, 0, 9, 9, px);
        let out = zoom_radial_blur(&src, 4, Point::new(4.0, 4.0), false);
        assert_eq!(out.bounds(), src.bounds());
        assert_eq!(out.sample_device(4, 4), px);
    }

    #[test]
    fn sepia_full_level_tints_grey() {
        let grey = solid(0, 0, 2, 2, [100, 100, 100, 255]);
        let out = sepia_tone(&grey, 1.0, false);
        let px = out.sample_device(0, 0);
        // Sepia of neutral grey is warm: r > g > b.
        assert!(px[0] > px[1] && px[1] > px[2], "{px:?}");
        assert_eq!(px[3], 255);
    }

    #[test]
    fn sepia_zero_level_is_identity() {
        let src = solid(0, 0, 2, 2, [10, 60, 110, 255]);
        let out = sepia_tone(&src, 0.0, false);
        assert_eq!(out, src);
    }

    #[test]
    fn phong_flat_surface_under_overhead_distant_light_keeps_alpha() {
        let src = solid(0, 0, 6, 6, [100, 100, 100, 255]);
        let params = PhongParams {
            light: Light::distant(0.0, 90.0),
            surface_scale: 1.5,
            diffuse_constant: 1.0,
            specular_constant: 0.0,
            specular_exponent: 20.0,
        };
        let out = phong_lighting(&src, &params, false);
        assert_eq!(out.x(), -1);
        assert_eq!(out.width(), 8);

        // Interior of a flat opaque surface: N = (0,0,1), L = (0,0,1), so
        // the diffuse term is exactly kd and the color passes through.
        let px = out.sample_device(3, 3);
        assert_eq!(px[3], 255);
        assert!((i32::from(px[0]) - 100).abs() <= 1, "{px:?}");
    }

    #[test]
    fn blend_images_covers_the_union_clipped() {
        let bottom = solid(0, 0, 4, 4, [0, 0, 255, 255]);
        let top = solid(2, 0, 4, 4, [255, 0, 0, 255]);
        let clip = Rect::new(0.0, 0.0, 100.0, 100.0);

        let out = blend_images(BlendMode::SrcOver, 1.0, &bottom, &top, clip, false);
        assert_eq!(out.bounds(), Rect::new(0.0, 0.0, 6.0, 4.0));
        assert_eq!(out.sample_device(1, 1), [0, 0, 255, 255]);
        assert_eq!(out.sample_device(3, 1), [255, 0, 0, 255]);
        assert_eq!(out.sample_device(5, 1), [255, 0, 0, 255]);
    }

    #[test]
    fn merge_into_matches_src_over_blend() {
        let bottom = solid(0, 0, 4, 4, [0, 0, 200, 200]);
        let mut top = solid(0, 0, 4, 4, [0, 0, 0, 0]);
        top.set_pixel(1, 1, [128, 0, 0, 128]);
        let clip = Rect::new(0.0, 0.0, 4.0, 4.0);

        let blended = blend_images(BlendMode::SrcOver, 1.0, &bottom, &top, clip, false);
        let merged = merge_into(bottom.clone(), &top, clip);

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
}
