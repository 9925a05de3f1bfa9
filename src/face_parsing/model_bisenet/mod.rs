use image::{imageops, Luma, RgbImage};
use ndarray::{ArrayView3, Axis, Ix4};
use tracing::warn;

use crate::error::InferenceError;
use crate::face_parsing::{background_map, FaceLabel, FaceParser, LabelMap};
use crate::inference::{image_to_square_tensor, shape_error, InferenceBackend, ValueRange};

/// Model input resolution.
pub const PARSER_INPUT_SIZE: u32 = 512;

/// Segmentation-network face parser: class logits (1, 19, H, W) reduced by argmax.
pub struct ModelFaceParser {
    backend: Box<dyn InferenceBackend>,
    input_size: u32,
}

impl ModelFaceParser {
    pub fn new(backend: Box<dyn InferenceBackend>) -> ModelFaceParser {
        ModelFaceParser {
            backend,
            input_size: PARSER_INPUT_SIZE,
        }
    }

    pub fn with_input_size(mut self, size: u32) -> ModelFaceParser {
        self.input_size = size.max(1);
        self
    }

    fn try_parse(&self, crop: &RgbImage) -> Result<LabelMap, InferenceError> {
        if !self.backend.is_loaded() {
            return Err(InferenceError::ModelNotLoaded);
        }
        let input = image_to_square_tensor(crop, self.input_size, ValueRange::Unit);
        let output = self.backend.run(&[input])?;

        let shape = output.shape().to_vec();
        let logits = output
            .view()
            .into_dimensionality::<Ix4>()
            .map_err(|_| shape_error("(1, 19, H, W)", &shape))?;
        if logits.shape()[0] == 0 || logits.shape()[1] < FaceLabel::COUNT {
            return Err(shape_error("(1, 19, H, W)", &shape));
        }

        let labels = argmax_labels(logits.index_axis(Axis(0), 0));
        if labels.dimensions() == crop.dimensions() {
            Ok(labels)
        } else {
            // nearest keeps ids intact
            Ok(imageops::resize(
                &labels,
                crop.width(),
                crop.height(),
                imageops::FilterType::Nearest,
            ))
        }
    }
}

fn argmax_labels(logits: ArrayView3<f32>) -> LabelMap {
    let (h, w) = (logits.shape()[1], logits.shape()[2]);
    LabelMap::from_fn(w as u32, h as u32, |x, y| {
        let mut best = 0;
        let mut best_score = f32::NEG_INFINITY;
        for c in 0..FaceLabel::COUNT {
            let score = logits[[c, y as usize, x as usize]];
            if score > best_score {
                best_score = score;
                best = c;
            }
        }
        Luma([best as u8])
    })
}

impl FaceParser for ModelFaceParser {
    fn parse(&self, crop: &RgbImage) -> LabelMap {
        if crop.width() == 0 || crop.height() == 0 {
            return background_map(crop);
        }
        match self.try_parse(crop) {
            Ok(labels) => labels,
            Err(InferenceError::ModelNotLoaded) => background_map(crop),
            Err(e) => {
                warn!("face parsing failed: {}", e);
                background_map(crop)
            }
        }
    }
}
