use image::RgbImage;
use tracing::warn;

use crate::inference::{image_to_square_tensor, InferenceBackend, ValueRange};

pub const AGE_INPUT_SIZE: u32 = 224;

/// Apparent-age regressor. Returns 0 whenever the model can't produce an estimate.
pub struct AgeEstimator {
    backend: Box<dyn InferenceBackend>,
}

impl AgeEstimator {
    pub fn new(backend: Box<dyn InferenceBackend>) -> AgeEstimator {
        AgeEstimator { backend }
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_loaded()
    }

    pub fn estimate(&self, crop: &RgbImage) -> f32 {
        if crop.width() == 0 || crop.height() == 0 || !self.backend.is_loaded() {
            return 0.0;
        }
        let input = image_to_square_tensor(crop, AGE_INPUT_SIZE, ValueRange::Unit);
        match self.backend.run(&[input]) {
            Ok(output) => match output.iter().next() {
                Some(age) if age.is_finite() => age.clamp(0.0, 100.0),
                _ => 0.0,
            },
            Err(e) => {
                warn!("age estimation failed: {}", e);
                0.0
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::error::InferenceError;
    use crate::inference::{Tensor, UnavailableBackend};

    struct Fixed(f32);

    impl InferenceBackend for Fixed {
        fn load_model(&mut self, _path: &Path) -> bool {
            true
        }

        fn is_loaded(&self) -> bool {
            true
        }

        fn run(&self, _inputs: &[Tensor]) -> Result<Tensor, InferenceError> {
            Ok(Tensor::from_elem(ndarray::IxDyn(&[1, 1]), self.0))
        }
    }

    #[test]
    fn estimates_are_clamped() {
        let crop = RgbImage::new(32, 32);
        assert_eq!(AgeEstimator::new(Box::new(Fixed(42.0))).estimate(&crop), 42.0);
        assert_eq!(AgeEstimator::new(Box::new(Fixed(130.0))).estimate(&crop), 100.0);
        assert_eq!(AgeEstimator::new(Box::new(Fixed(-3.0))).estimate(&crop), 0.0);
    }

    #[test]
    fn unavailable_model_reports_zero() {
        let crop = RgbImage::new(32, 32);
        assert_eq!(AgeEstimator::new(Box::new(UnavailableBackend)).estimate(&crop), 0.0);
    }
}
