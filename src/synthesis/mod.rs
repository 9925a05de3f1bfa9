pub mod diffusion;
pub mod feedforward;
pub mod stage;

use image::{imageops, Rgb, RgbImage};
use ndarray::Array2;
use tracing::warn;

use crate::controls::{clamp_unit, AgeControls};
use crate::error::InferenceError;
use crate::face_parsing::regions::RegionSegmenter;
use crate::face_parsing::{LabelMap, RegionMask};
use crate::inference::Tensor;

pub use diffusion::{DiffusionConfig, DiffusionSynthesizer};
pub use feedforward::FeedforwardSynthesizer;
pub use stage::SynthesisStage;

/// Aging weight for hair when hair aging is on / off.
pub const HAIR_AGING_WEIGHT: f32 = 0.8;
pub const HAIR_PRESERVE_WEIGHT: f32 = 0.1;
/// Upper bounds on the aging weight of the identity-sensitive regions.
pub const EYES_MAX_WEIGHT: f32 = 0.3;
pub const MOUTH_MAX_WEIGHT: f32 = 0.4;

/// Produces an age-transformed version of a face crop.
pub trait AgeSynthesizer: Send {
    fn name(&self) -> &'static str;

    /// Runs the model and applies identity lock and the regional pass.
    /// The result always has the crop's dimensions.
    fn synthesize(
        &self,
        crop: &RgbImage,
        controls: &AgeControls,
        parsing: Option<&LabelMap>,
    ) -> Result<RgbImage, InferenceError>;

    /// Like `synthesize`, but any failure returns the crop unchanged.
    fn generate(&self, crop: &RgbImage, controls: &AgeControls, parsing: Option<&LabelMap>) -> RgbImage {
        match self.synthesize(crop, controls, parsing) {
            Ok(image) => image,
            Err(InferenceError::ModelNotLoaded) => crop.clone(),
            Err(e) => {
                warn!("{} synthesis failed, passing crop through: {}", self.name(), e);
                crop.clone()
            }
        }
    }

    /// Per-crop `generate`. Missing controls or parsings are taken from the first entry.
    fn generate_batch(
        &self,
        crops: &[RgbImage],
        controls: &[AgeControls],
        parsings: &[LabelMap],
    ) -> Vec<RgbImage> {
        let fallback = controls.first().copied().unwrap_or_default();
        crops
            .iter()
            .enumerate()
            .map(|(i, crop)| {
                let c = controls.get(i).copied().unwrap_or(fallback);
                let p = parsings.get(i).or_else(|| parsings.first());
                self.generate(crop, &c, p)
            })
            .collect()
    }
}

/// Conditioning vector: age, gray density, texture keep, skin clean and the toggles.
pub fn condition_tensor(controls: &AgeControls) -> Tensor {
    let flag = |b: bool| if b { 1.0 } else { 0.0 };
    let values = [
        controls.normalized_age(),
        clamp_unit(controls.gray_density),
        clamp_unit(controls.texture_keep),
        clamp_unit(controls.skin_clean),
        flag(controls.enable_hair_aging),
        flag(controls.enable_beard_aging),
        flag(controls.enable_neck_aging),
    ];
    Array2::from_shape_fn((1, values.len()), |(_, i)| values[i]).into_dyn()
}

fn mix(a: &Rgb<u8>, b: &Rgb<u8>, w: f32) -> Rgb<u8> {
    let mut out = [0u8; 3];
    for c in 0..3 {
        let v = a[c] as f32 * (1.0 - w) + b[c] as f32 * w;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

fn match_size(image: &RgbImage, width: u32, height: u32) -> RgbImage {
    if image.dimensions() == (width, height) {
        image.clone()
    } else {
        imageops::resize(image, width, height, imageops::FilterType::Triangle)
    }
}

/// `crop * lock + synthesized * (1 - lock)`.
pub fn identity_blend(crop: &RgbImage, synthesized: &RgbImage, lock: f32) -> RgbImage {
    let lock = if lock.is_nan() { 1.0 } else { lock.clamp(0.0, 1.0) };
    let synthesized = match_size(synthesized, crop.width(), crop.height());
    RgbImage::from_fn(crop.width(), crop.height(), |x, y| {
        mix(crop.get_pixel(x, y), synthesized.get_pixel(x, y), 1.0 - lock)
    })
}

/// Overrides the aging weight inside the hair, eyes and mouth regions.
/// Label maps that don't match the crop are ignored.
pub fn regional_blend(
    blended: &mut RgbImage,
    crop: &RgbImage,
    synthesized: &RgbImage,
    labels: &LabelMap,
    controls: &AgeControls,
    segmenter: &RegionSegmenter,
) {
    if labels.dimensions() != crop.dimensions() || blended.dimensions() != crop.dimensions() {
        return;
    }
    let synthesized = match_size(synthesized, crop.width(), crop.height());
    let aging = 1.0 - controls.identity_lock();

    let hair_weight = if controls.enable_hair_aging {
        HAIR_AGING_WEIGHT
    } else {
        HAIR_PRESERVE_WEIGHT
    };
    let regions: [(RegionMask, f32); 3] = [
        (segmenter.hair_mask(labels), hair_weight),
        (segmenter.eyes_mask(labels), aging.min(EYES_MAX_WEIGHT)),
        (segmenter.mouth_mask(labels), aging.min(MOUTH_MAX_WEIGHT)),
    ];

    for (mask, weight) in regions.iter() {
        for (x, y, m) in mask.enumerate_pixels() {
            if m[0] > 0 {
                blended.put_pixel(x, y, mix(crop.get_pixel(x, y), synthesized.get_pixel(x, y), *weight));
            }
        }
    }
}

/// Identity blend followed by the regional pass, shared by every variant.
pub fn apply_controls(
    crop: &RgbImage,
    synthesized: &RgbImage,
    controls: &AgeControls,
    parsing: Option<&LabelMap>,
    segmenter: &RegionSegmenter,
) -> RgbImage {
    let mut blended = identity_blend(crop, synthesized, controls.identity_lock());
    if let Some(labels) = parsing {
        regional_blend(&mut blended, crop, synthesized, labels, controls, segmenter);
    }
    blended
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    fn solid(w: u32, h: u32, v: u8) -> RgbImage {
        RgbImage::from_pixel(w, h, Rgb([v, v, v]))
    }

    #[test]
    fn identity_blend_endpoints() {
        let crop = solid(8, 8, 40);
        let synth = solid(8, 8, 200);
        assert_eq!(identity_blend(&crop, &synth, 1.0), crop);
        assert_eq!(identity_blend(&crop, &synth, 0.0), synth);
        assert_eq!(identity_blend(&crop, &synth, 0.5).get_pixel(0, 0)[0], 120);
    }

    #[test]
    fn identity_blend_resizes_synthesized() {
        let crop = solid(8, 8, 0);
        let synth = solid(16, 16, 100);
        let out = identity_blend(&crop, &synth, 0.0);
        assert_eq!(out.dimensions(), (8, 8));
        assert_eq!(out.get_pixel(3, 3)[0], 100);
    }

    #[test]
    fn regional_weights_follow_controls() {
        let crop = solid(4, 1, 0);
        let synth = solid(4, 1, 100);
        // hair, left eye, mouth, skin
        let labels = LabelMap::from_fn(4, 1, |x, _| Luma([[13, 4, 10, 1][x as usize]]));
        let controls = AgeControls::default().with_identity_lock(0.5);

        let out = apply_controls(&crop, &synth, &controls, Some(&labels), &RegionSegmenter::default());
        assert_eq!(out.get_pixel(0, 0)[0], 80);
        assert_eq!(out.get_pixel(1, 0)[0], 30);
        assert_eq!(out.get_pixel(2, 0)[0], 40);
        // skin has no override and keeps the global blend
        assert_eq!(out.get_pixel(3, 0)[0], 50);

        let mut no_hair = controls;
        no_hair.enable_hair_aging = false;
        let out = apply_controls(&crop, &synth, &no_hair, Some(&labels), &RegionSegmenter::default());
        assert_eq!(out.get_pixel(0, 0)[0], 10);
        assert_eq!(out.get_pixel(3, 0)[0], 50);
    }

    #[test]
    fn full_identity_lock_keeps_eyes() {
        let crop = solid(1, 1, 50);
        let synth = solid(1, 1, 250);
        let labels = LabelMap::from_pixel(1, 1, Luma([5]));
        let controls = AgeControls::default().with_identity_lock(1.0);
        let out = apply_controls(&crop, &synth, &controls, Some(&labels), &RegionSegmenter::default());
        assert_eq!(out, crop);
    }

    #[test]
    fn mismatched_labels_are_ignored() {
        let crop = solid(4, 4, 0);
        let synth = solid(4, 4, 100);
        let labels = LabelMap::from_pixel(2, 2, Luma([13]));
        let controls = AgeControls::default().with_identity_lock(0.5);
        let out = apply_controls(&crop, &synth, &controls, Some(&labels), &RegionSegmenter::default());
        assert!(out.pixels().all(|p| p[0] == 50));
    }

    #[test]
    fn condition_vector_layout() {
        let controls = AgeControls {
            target_age: 70.0,
            gray_density: 0.25,
            enable_beard_aging: true,
            enable_hair_aging: false,
            ..AgeControls::default()
        };
        let t = condition_tensor(&controls);
        assert_eq!(t.shape(), &[1, 7]);
        assert!((t[[0, 0]] - 0.7).abs() < 1e-6);
        assert_eq!(t[[0, 1]], 0.25);
        assert_eq!(t[[0, 4]], 0.0);
        assert_eq!(t[[0, 5]], 1.0);
    }
}
