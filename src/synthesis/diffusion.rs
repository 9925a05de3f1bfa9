use image::RgbImage;
use ndarray::{arr2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::controls::AgeControls;
use crate::error::InferenceError;
use crate::face_parsing::regions::RegionSegmenter;
use crate::face_parsing::LabelMap;
use crate::inference::{image_to_square_tensor, shape_error, tensor_to_image, InferenceBackend, Tensor, ValueRange};
use crate::synthesis::{apply_controls, condition_tensor, AgeSynthesizer};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiffusionConfig {
    pub steps: u32,
    pub guidance_scale: f32,
    pub seed: u64,
    /// How far the start latent is pushed toward noise, in (0, 1].
    pub noise_strength: f32,
    pub input_size: u32,
}

impl Default for DiffusionConfig {
    fn default() -> Self {
        Self {
            steps: 20,
            guidance_scale: 7.5,
            seed: 42,
            noise_strength: 0.6,
            input_size: 512,
        }
    }
}

/// Iterative image editor. The backend predicts a clean image from the current
/// latent, the source image, the conditioning vector and `[t, guidance]`.
pub struct DiffusionSynthesizer {
    backend: Box<dyn InferenceBackend>,
    segmenter: RegionSegmenter,
    config: DiffusionConfig,
}

impl DiffusionSynthesizer {
    pub fn new(backend: Box<dyn InferenceBackend>, config: DiffusionConfig) -> DiffusionSynthesizer {
        DiffusionSynthesizer {
            backend,
            segmenter: RegionSegmenter::default(),
            config,
        }
    }

    pub fn with_segmenter(mut self, segmenter: RegionSegmenter) -> DiffusionSynthesizer {
        self.segmenter = segmenter;
        self
    }

    pub fn config(&self) -> &DiffusionConfig {
        &self.config
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_loaded()
    }

    fn denoise(&self, image: &Tensor, condition: &Tensor) -> Result<Tensor, InferenceError> {
        let steps = self.config.steps.max(1);
        let strength = self.config.noise_strength.clamp(0.01, 1.0);

        let mut rng = StdRng::seed_from_u64(self.config.seed);
        let mut latent = image.mapv(|v| {
            let noise = rng.random::<f32>() * 2.0 - 1.0;
            v * (1.0 - strength) + noise * strength
        });

        for k in 0..steps {
            let t = strength * (1.0 - k as f32 / steps as f32);
            let t_next = strength * (1.0 - (k + 1) as f32 / steps as f32);
            let timestep = arr2(&[[t, self.config.guidance_scale]]).into_dyn();

            let prediction = self
                .backend
                .run(&[latent.clone(), image.clone(), condition.clone(), timestep])?;
            if prediction.shape() != latent.shape() {
                return Err(shape_error("same shape as latent", prediction.shape()));
            }

            // move toward the prediction, landing on it at t = 0
            let keep = t_next / t;
            Zip::from(&mut latent)
                .and(&prediction)
                .for_each(|l, &p| *l = p + (*l - p) * keep);
            trace!("diffusion step {}/{} t={:.3}", k + 1, steps, t);
        }
        Ok(latent)
    }
}

impl AgeSynthesizer for DiffusionSynthesizer {
    fn name(&self) -> &'static str {
        "diffusion"
    }

    fn synthesize(
        &self,
        crop: &RgbImage,
        controls: &AgeControls,
        parsing: Option<&LabelMap>,
    ) -> Result<RgbImage, InferenceError> {
        if crop.width() == 0 || crop.height() == 0 {
            return Ok(crop.clone());
        }
        if !self.backend.is_loaded() {
            return Err(InferenceError::ModelNotLoaded);
        }

        let image = image_to_square_tensor(crop, self.config.input_size.max(1), ValueRange::Signed);
        let latent = self.denoise(&image, &condition_tensor(controls))?;
        let raw = tensor_to_image(&latent, ValueRange::Signed, crop.width(), crop.height())?;
        Ok(apply_controls(crop, &raw, controls, parsing, &self.segmenter))
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use image::Rgb;

    use super::*;

    // predicts halfway between the latent and the source image
    struct HalfwayDenoiser {
        calls: Arc<AtomicUsize>,
    }

    impl InferenceBackend for HalfwayDenoiser {
        fn load_model(&mut self, _path: &Path) -> bool {
            true
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn run(&self, inputs: &[Tensor]) -> Result<Tensor, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(inputs.len(), 4);
            assert_eq!(inputs[3].shape(), &[1, 2]);
            Ok((&inputs[0] + &inputs[1]) / 2.0)
        }
    }

    fn synthesizer(calls: Arc<AtomicUsize>, seed: u64) -> DiffusionSynthesizer {
        let config = DiffusionConfig {
            steps: 5,
            seed,
            input_size: 8,
            ..DiffusionConfig::default()
        };
        DiffusionSynthesizer::new(Box::new(HalfwayDenoiser { calls }), config)
    }

    #[test]
    fn runs_one_call_per_step() {
        let calls = Arc::new(AtomicUsize::new(0));
        let synth = synthesizer(calls.clone(), 1);
        let crop = RgbImage::from_pixel(8, 8, Rgb([100, 120, 140]));
        synth
            .synthesize(&crop, &AgeControls::default().with_identity_lock(0.0), None)
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[test]
    fn same_seed_gives_same_output() {
        let crop = RgbImage::from_fn(8, 8, |x, y| Rgb([(x * 30) as u8, (y * 30) as u8, 90]));
        let controls = AgeControls::default().with_identity_lock(0.0);
        let a = synthesizer(Arc::new(AtomicUsize::new(0)), 7).generate(&crop, &controls, None);
        let b = synthesizer(Arc::new(AtomicUsize::new(0)), 7).generate(&crop, &controls, None);
        assert_eq!(a, b);
    }

    #[test]
    fn bad_prediction_shape_is_an_error() {
        struct Wrong;
        impl InferenceBackend for Wrong {
            fn load_model(&mut self, _path: &Path) -> bool {
                true
            }
            fn is_loaded(&self) -> bool {
                true
            }
            fn run(&self, _inputs: &[Tensor]) -> Result<Tensor, InferenceError> {
                Ok(Tensor::zeros(ndarray::IxDyn(&[1, 3, 2, 2])))
            }
        }
        let config = DiffusionConfig {
            input_size: 8,
            ..DiffusionConfig::default()
        };
        let synth = DiffusionSynthesizer::new(Box::new(Wrong), config);
        let crop = RgbImage::new(8, 8);
        assert!(matches!(
            synth.synthesize(&crop, &AgeControls::default(), None),
            Err(InferenceError::Shape { .. })
        ));
        assert_eq!(synth.generate(&crop, &AgeControls::default(), None), crop);
    }
}
