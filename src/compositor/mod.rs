mod multiband;
mod poisson;

use image::{Rgb, RgbImage};
use imageproc::filter::gaussian_blur_f32;
use nalgebra::Point2;
use ndarray::{Array2, Array3, Zip};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::face::{apply, AffineTransform, FaceDetection, PixelRect};
use crate::frame::Frame;

pub use multiband::multiband_blend;
pub use poisson::poisson_blend;

// fewer skin pixels than this and color stats come from the whole footprint
const MIN_SKIN_PIXELS: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Linear,
    Poisson,
    Multiband,
}

impl BlendMode {
    /// Unknown names fall back to `Linear`.
    pub fn from_name(name: &str) -> BlendMode {
        match name.trim().to_ascii_lowercase().as_str() {
            "poisson" => BlendMode::Poisson,
            "multiband" => BlendMode::Multiband,
            _ => BlendMode::Linear,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            BlendMode::Linear => "linear",
            BlendMode::Poisson => "poisson",
            BlendMode::Multiband => "multiband",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    pub blend_mode: BlendMode,
    /// Width of the alpha ramp at the box edge, in pixels. 0 gives a hard edge.
    pub feather_radius: f32,
    pub color_correction: bool,
    /// Also match channel spread, not only the mean.
    pub match_variance: bool,
    pub detail_strength: f32,
    pub detail_sigma: f32,
    pub poisson_iterations: u32,
    pub pyramid_levels: u32,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        Self {
            blend_mode: BlendMode::Linear,
            feather_radius: 10.0,
            color_correction: false,
            match_variance: true,
            detail_strength: 0.0,
            detail_sigma: 2.0,
            poisson_iterations: 300,
            pyramid_levels: 4,
        }
    }
}

/// Writes synthesized face crops back into frames.
#[derive(Debug, Clone, Default)]
pub struct Compositor {
    config: CompositorConfig,
}

// the region of the frame touched by one face, as float planes
struct Patch {
    rect: PixelRect,
    src: Array3<f32>,
    dst: Array3<f32>,
    alpha: Array2<f32>,
    detail: Option<Array3<f32>>,
}

impl Compositor {
    pub fn new(config: CompositorConfig) -> Compositor {
        Compositor { config }
    }

    pub fn config(&self) -> &CompositorConfig {
        &self.config
    }

    pub fn set_blend_mode(&mut self, name: &str) {
        self.config.blend_mode = BlendMode::from_name(name);
    }

    pub fn set_feather_radius(&mut self, radius: f32) {
        self.config.feather_radius = if radius.is_finite() { radius.max(0.0) } else { 0.0 };
    }

    pub fn enable_color_correction(&mut self, enabled: bool) {
        self.config.color_correction = enabled;
    }

    pub fn set_detail_reinjection_strength(&mut self, strength: f32) {
        self.config.detail_strength = if strength.is_finite() { strength } else { 0.0 };
    }

    /// Composites one synthesized crop into `frame` over `face.bbox`.
    ///
    /// Empty crops, boxes entirely outside the frame and singular transforms
    /// leave the frame untouched.
    pub fn composite_face(&self, frame: &mut Frame, synthesized: &RgbImage, face: &FaceDetection) {
        if synthesized.width() == 0 || synthesized.height() == 0 {
            return;
        }
        let rect = match face.bbox.clip_to(frame.width(), frame.height()) {
            Some(rect) => rect,
            None => return,
        };
        let inverse = match face.frame_to_crop() {
            Some(m) => m,
            None => return,
        };

        let mut patch = self.extract_patch(frame, synthesized, face, rect, &inverse);

        if self.config.color_correction {
            match_colors(&mut patch, self.config.match_variance);
        }

        let blended = match self.config.blend_mode {
            BlendMode::Linear => linear_blend(&patch.src, &patch.dst, &patch.alpha),
            BlendMode::Poisson => {
                let solved = poisson_blend(&patch.src, &patch.dst, &patch.alpha, self.config.poisson_iterations);
                linear_blend(&solved, &patch.dst, &patch.alpha)
            }
            BlendMode::Multiband => multiband_blend(&patch.src, &patch.dst, &patch.alpha, self.config.pyramid_levels),
        };

        write_patch(frame, &patch, blended, self.config.detail_strength);
        trace!(
            "composited face {} into {}x{} at ({}, {}) using {}",
            face.id,
            rect.width(),
            rect.height(),
            rect.x0,
            rect.y0,
            self.config.blend_mode.name()
        );
    }

    /// Composites faces in order; later faces win where boxes overlap.
    pub fn composite_faces(&self, frame: &mut Frame, synthesized: &[RgbImage], faces: &[FaceDetection]) {
        if synthesized.len() != faces.len() {
            debug!(
                "compositing {} of {} faces (mismatched inputs)",
                synthesized.len().min(faces.len()),
                faces.len()
            );
        }
        for (crop, face) in synthesized.iter().zip(faces.iter()) {
            self.composite_face(frame, crop, face);
        }
    }

    fn extract_patch(
        &self,
        frame: &Frame,
        synthesized: &RgbImage,
        face: &FaceDetection,
        rect: PixelRect,
        inverse: &AffineTransform,
    ) -> Patch {
        let (w, h) = (rect.width() as usize, rect.height() as usize);

        // transform is defined over the detection crop; the synthesized crop may differ in size
        let (cw, ch) = if face.crop.width() > 0 && face.crop.height() > 0 {
            face.crop.dimensions()
        } else {
            synthesized.dimensions()
        };
        let rx = synthesized.width() as f32 / cw as f32;
        let ry = synthesized.height() as f32 / ch as f32;

        let residual = self.detail_residual(&face.crop);

        let mut src = Array3::<f32>::zeros((h, w, 3));
        let mut dst = Array3::<f32>::zeros((h, w, 3));
        let mut alpha = Array2::<f32>::zeros((h, w));
        let mut detail = residual.as_ref().map(|_| Array3::<f32>::zeros((h, w, 3)));

        for j in 0..h {
            for i in 0..w {
                let (fx, fy) = (rect.x0 + i as u32, rect.y0 + j as u32);
                let px = frame.get_pixel(fx, fy);
                for c in 0..3 {
                    dst[[j, i, c]] = px[c] as f32;
                }

                let center = Point2::new(fx as f32 + 0.5, fy as f32 + 0.5);
                let q = apply(inverse, center);
                if q.x < 0.0 || q.y < 0.0 || q.x > cw as f32 || q.y > ch as f32 {
                    continue;
                }

                let a = feather_alpha(face, center, self.config.feather_radius);
                if a <= 0.0 {
                    continue;
                }
                alpha[[j, i]] = a;

                let s = sample_bilinear(synthesized, q.x * rx - 0.5, q.y * ry - 0.5);
                for c in 0..3 {
                    src[[j, i, c]] = s[c];
                }
                if let (Some(d), Some(res)) = (detail.as_mut(), residual.as_ref()) {
                    let r = sample_plane(res, q.x - 0.5, q.y - 0.5);
                    for c in 0..3 {
                        d[[j, i, c]] = r[c];
                    }
                }
            }
        }

        Patch {
            rect,
            src,
            dst,
            alpha,
            detail,
        }
    }

    // high frequencies of the original crop
    fn detail_residual(&self, crop: &RgbImage) -> Option<Array3<f32>> {
        if self.config.detail_strength == 0.0
            || self.config.detail_sigma <= 0.0
            || crop.width() == 0
            || crop.height() == 0
        {
            return None;
        }
        let blurred = gaussian_blur_f32(crop, self.config.detail_sigma);
        let (w, h) = crop.dimensions();
        Some(Array3::from_shape_fn((h as usize, w as usize, 3), |(y, x, c)| {
            crop.get_pixel(x as u32, y as u32)[c] as f32 - blurred.get_pixel(x as u32, y as u32)[c] as f32
        }))
    }
}

/// Alpha for a frame point: distance to the nearest box edge over the feather radius.
pub fn feather_alpha(face: &FaceDetection, p: Point2<f32>, radius: f32) -> f32 {
    let b = &face.bbox;
    let d = (p.x - b.x)
        .min(b.right() - p.x)
        .min(p.y - b.y)
        .min(b.bottom() - p.y);
    if d <= 0.0 {
        0.0
    } else if radius <= 0.0 {
        1.0
    } else {
        (d / radius).min(1.0)
    }
}

fn linear_blend(src: &Array3<f32>, dst: &Array3<f32>, alpha: &Array2<f32>) -> Array3<f32> {
    let mut out = dst.clone();
    Zip::indexed(&mut out).and(src).for_each(|(j, i, _), o, &s| {
        let a = alpha[[j, i]];
        *o = s * a + *o * (1.0 - a);
    });
    out
}

fn write_patch(frame: &mut Frame, patch: &Patch, mut blended: Array3<f32>, detail_strength: f32) {
    if let Some(detail) = patch.detail.as_ref() {
        Zip::indexed(&mut blended).and(detail).for_each(|(j, i, _), o, &r| {
            *o += detail_strength * r * patch.alpha[[j, i]];
        });
    }

    let (h, w) = patch.alpha.dim();
    for j in 0..h {
        for i in 0..w {
            if patch.alpha[[j, i]] <= 0.0 {
                continue;
            }
            let px = Rgb([
                to_u8(blended[[j, i, 0]]),
                to_u8(blended[[j, i, 1]]),
                to_u8(blended[[j, i, 2]]),
            ]);
            frame.put_pixel(patch.rect.x0 + i as u32, patch.rect.y0 + j as u32, px);
        }
    }
}

fn to_u8(v: f32) -> u8 {
    if v.is_nan() {
        0
    } else {
        v.round().clamp(0.0, 255.0) as u8
    }
}

/// Bilinear sample at pixel-index coordinates, clamped to the image.
fn sample_bilinear(image: &RgbImage, x: f32, y: f32) -> [f32; 3] {
    let (w, h) = image.dimensions();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let (x0, y0) = (x.floor() as u32, y.floor() as u32);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (tx, ty) = (x - x0 as f32, y - y0 as f32);

    let mut out = [0.0; 3];
    for c in 0..3 {
        let top = image.get_pixel(x0, y0)[c] as f32 * (1.0 - tx) + image.get_pixel(x1, y0)[c] as f32 * tx;
        let bottom = image.get_pixel(x0, y1)[c] as f32 * (1.0 - tx) + image.get_pixel(x1, y1)[c] as f32 * tx;
        out[c] = top * (1.0 - ty) + bottom * ty;
    }
    out
}

fn sample_plane(plane: &Array3<f32>, x: f32, y: f32) -> [f32; 3] {
    let (h, w, _) = plane.dim();
    let x = x.clamp(0.0, (w - 1) as f32);
    let y = y.clamp(0.0, (h - 1) as f32);
    let (x0, y0) = (x.floor() as usize, y.floor() as usize);
    let (x1, y1) = ((x0 + 1).min(w - 1), (y0 + 1).min(h - 1));
    let (tx, ty) = (x - x0 as f32, y - y0 as f32);

    let mut out = [0.0; 3];
    for c in 0..3 {
        let top = plane[[y0, x0, c]] * (1.0 - tx) + plane[[y0, x1, c]] * tx;
        let bottom = plane[[y1, x0, c]] * (1.0 - tx) + plane[[y1, x1, c]] * tx;
        out[c] = top * (1.0 - ty) + bottom * ty;
    }
    out
}

// YCrCb skin test on 0..255 RGB
fn is_skin(r: f32, g: f32, b: f32) -> bool {
    let y = 0.299 * r + 0.587 * g + 0.114 * b;
    let cr = (r - y) * 0.713 + 128.0;
    let cb = (b - y) * 0.564 + 128.0;
    (133.0..=173.0).contains(&cr) && (77.0..=127.0).contains(&cb)
}

#[derive(Debug, Clone, Copy)]
struct ChannelStats {
    mean: [f32; 3],
    std: [f32; 3],
}

fn channel_stats(plane: &Array3<f32>, pixels: &[(usize, usize)]) -> ChannelStats {
    let n = pixels.len().max(1) as f32;
    let mut mean = [0.0; 3];
    let mut std = [0.0; 3];
    for c in 0..3 {
        mean[c] = pixels.iter().map(|&(j, i)| plane[[j, i, c]]).sum::<f32>() / n;
        let var = pixels
            .iter()
            .map(|&(j, i)| (plane[[j, i, c]] - mean[c]).powi(2))
            .sum::<f32>()
            / n;
        std[c] = var.sqrt();
    }
    ChannelStats { mean, std }
}

/// Shifts (and optionally rescales) the source channels toward the skin under the footprint.
fn match_colors(patch: &mut Patch, match_variance: bool) {
    let footprint: Vec<(usize, usize)> = patch
        .alpha
        .indexed_iter()
        .filter(|(_, &a)| a > 0.0)
        .map(|(idx, _)| idx)
        .collect();
    if footprint.is_empty() {
        return;
    }

    let skin: Vec<(usize, usize)> = footprint
        .iter()
        .copied()
        .filter(|&(j, i)| is_skin(patch.dst[[j, i, 0]], patch.dst[[j, i, 1]], patch.dst[[j, i, 2]]))
        .collect();
    let target_pixels = if skin.len() >= MIN_SKIN_PIXELS { &skin } else { &footprint };

    let source = channel_stats(&patch.src, &footprint);
    let target = channel_stats(&patch.dst, target_pixels);

    for &(j, i) in footprint.iter() {
        for c in 0..3 {
            let scale = if match_variance && source.std[c] > 1e-3 {
                target.std[c] / source.std[c]
            } else {
                1.0
            };
            let v = (patch.src[[j, i, c]] - source.mean[c]) * scale + target.mean[c];
            patch.src[[j, i, c]] = v.clamp(0.0, 255.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::face::FaceBox;

    fn face_at(x: f32, y: f32, size: u32) -> FaceDetection {
        FaceDetection::new(FaceBox::new(x, y, size as f32, size as f32), 0.9, 0, RgbImage::new(size, size))
    }

    #[test]
    fn blend_mode_names() {
        assert_eq!(BlendMode::from_name("poisson"), BlendMode::Poisson);
        assert_eq!(BlendMode::from_name("Multiband"), BlendMode::Multiband);
        assert_eq!(BlendMode::from_name("invalid_mode"), BlendMode::Linear);
    }

    #[test]
    fn feather_support_is_independent_of_radius() {
        let face = face_at(0.0, 0.0, 100);
        for x in [0.5, 3.5, 20.5, 50.5] {
            let p = Point2::new(x, 50.5);
            let hard = feather_alpha(&face, p, 0.0);
            let soft = feather_alpha(&face, p, 30.0);
            assert_eq!(hard > 0.0, soft > 0.0);
        }
        assert_eq!(feather_alpha(&face, Point2::new(-1.0, 50.0), 10.0), 0.0);
    }

    #[test]
    fn larger_radius_widens_transition() {
        let face = face_at(0.0, 0.0, 100);
        let p = Point2::new(8.5, 50.5);
        assert_eq!(feather_alpha(&face, p, 5.0), 1.0);
        assert!(feather_alpha(&face, p, 20.0) < 1.0);
    }

    #[test]
    fn skin_test_accepts_typical_skin() {
        assert!(is_skin(200.0, 150.0, 120.0));
        assert!(!is_skin(20.0, 40.0, 220.0));
    }

    #[test]
    fn bilinear_interpolates_between_pixels() {
        let img = RgbImage::from_fn(2, 1, |x, _| Rgb([if x == 0 { 0 } else { 100 }; 3]));
        assert_eq!(sample_bilinear(&img, 0.5, 0.0)[0], 50.0);
        assert_eq!(sample_bilinear(&img, -3.0, 0.0)[0], 0.0);
    }

    #[test]
    fn color_correction_moves_source_toward_frame() {
        let mut frame = Frame::from_pixel(64, 64, Rgb([200, 150, 120]));
        let face = face_at(16.0, 16.0, 32);
        let synth = RgbImage::from_pixel(32, 32, Rgb([100, 100, 100]));
        let mut compositor = Compositor::new(CompositorConfig {
            feather_radius: 0.0,
            ..CompositorConfig::default()
        });
        compositor.enable_color_correction(true);
        compositor.composite_face(&mut frame, &synth, &face);
        assert_eq!(frame.get_pixel(32, 32).0, [200, 150, 120]);
    }
}
