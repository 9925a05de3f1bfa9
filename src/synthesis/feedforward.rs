use image::RgbImage;
use tracing::trace;

use crate::controls::AgeControls;
use crate::error::InferenceError;
use crate::face_parsing::regions::RegionSegmenter;
use crate::face_parsing::LabelMap;
use crate::inference::{image_to_square_tensor, tensor_to_image, InferenceBackend, ValueRange};
use crate::synthesis::{apply_controls, condition_tensor, AgeSynthesizer};

pub const GENERATOR_INPUT_SIZE: u32 = 512;

/// Single-pass conditional generator.
pub struct FeedforwardSynthesizer {
    backend: Box<dyn InferenceBackend>,
    segmenter: RegionSegmenter,
    input_size: u32,
}

impl FeedforwardSynthesizer {
    pub fn new(backend: Box<dyn InferenceBackend>) -> FeedforwardSynthesizer {
        FeedforwardSynthesizer {
            backend,
            segmenter: RegionSegmenter::default(),
            input_size: GENERATOR_INPUT_SIZE,
        }
    }

    pub fn with_segmenter(mut self, segmenter: RegionSegmenter) -> FeedforwardSynthesizer {
        self.segmenter = segmenter;
        self
    }

    pub fn with_input_size(mut self, size: u32) -> FeedforwardSynthesizer {
        self.input_size = size.max(1);
        self
    }

    pub fn is_loaded(&self) -> bool {
        self.backend.is_loaded()
    }
}

impl AgeSynthesizer for FeedforwardSynthesizer {
    fn name(&self) -> &'static str {
        "feedforward"
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

        let image = image_to_square_tensor(crop, self.input_size, ValueRange::Signed);
        let output = self.backend.run(&[image, condition_tensor(controls)])?;
        trace!("feedforward output shape {:?}", output.shape());

        let raw = tensor_to_image(&output, ValueRange::Signed, crop.width(), crop.height())?;
        Ok(apply_controls(crop, &raw, controls, parsing, &self.segmenter))
    }
}
