use image::{imageops, RgbImage};
use ndarray::Array4;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::InferenceError;
use crate::face::{AffineTransform, FaceBox, FaceDetection};
use crate::face_detection::FaceDetector;
use crate::frame::{is_empty_frame, Frame};
use crate::inference::{shape_error, InferenceBackend, Tensor};

// per-channel means subtracted from raw RGB input
const CHANNEL_MEANS: [f32; 3] = [123.0, 117.0, 104.0];

// [image_id, label, confidence, x1, y1, x2, y2], corners normalized to [0, 1]
const ROW_LEN: usize = 7;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    pub confidence_threshold: f32,
    pub nms_threshold: f32,
    pub max_faces: usize,
    pub input_size: u32,
    /// Extra context around each box kept in the crop.
    pub crop_padding: u32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.7,
            nms_threshold: 0.4,
            max_faces: 10,
            input_size: 640,
            crop_padding: 50,
        }
    }
}

/// Single-shot detector producing rows of normalized corner boxes.
pub struct ModelFaceDetector {
    backend: Box<dyn InferenceBackend>,
    config: DetectorConfig,
}

impl ModelFaceDetector {
    pub fn new(backend: Box<dyn InferenceBackend>, config: DetectorConfig) -> ModelFaceDetector {
        ModelFaceDetector { backend, config }
    }

    fn input_tensor(&self, frame: &Frame) -> Tensor {
        let size = self.config.input_size.max(1);
        let resized = imageops::resize(frame, size, size, imageops::FilterType::Triangle);
        let mut array = Array4::<f32>::zeros((1, 3, size as usize, size as usize));
        for (x, y, px) in resized.enumerate_pixels() {
            for c in 0..3 {
                array[[0, c, y as usize, x as usize]] = px[c] as f32 - CHANNEL_MEANS[c];
            }
        }
        array.into_dyn()
    }

    /// Decodes raw detector output into frame-space candidates above threshold.
    pub fn decode(&self, output: &Tensor, frame_width: u32, frame_height: u32) -> Result<Vec<(FaceBox, f32)>, InferenceError> {
        if output.ndim() == 0 || output.shape()[output.ndim() - 1] != ROW_LEN {
            return Err(shape_error("(.., 7)", output.shape()));
        }
        let values: Vec<f32> = output.iter().copied().collect();

        let (fw, fh) = (frame_width as f32, frame_height as f32);
        let candidates = values
            .chunks_exact(ROW_LEN)
            .filter(|row| row[2] > self.config.confidence_threshold)
            .map(|row| {
                // boxes may hang off the frame edge; keep only the visible part
                let bbox = FaceBox::from_corners(
                    (row[3] * fw).trunc().clamp(0.0, fw),
                    (row[4] * fh).trunc().clamp(0.0, fh),
                    (row[5] * fw).trunc().clamp(0.0, fw),
                    (row[6] * fh).trunc().clamp(0.0, fh),
                );
                (bbox, row[2])
            })
            .filter(|(b, _)| b.width > 0.0 && b.height > 0.0)
            .collect();
        Ok(candidates)
    }

    fn to_detection(&self, frame: &Frame, bbox: FaceBox, confidence: f32, id: i32) -> Option<FaceDetection> {
        let padded = bbox.expanded(self.config.crop_padding as f32);
        let rect = padded.clip_to(frame.width(), frame.height())?;
        let crop = imageops::crop_imm(frame, rect.x0, rect.y0, rect.width(), rect.height()).to_image();

        // crop is taken at native scale, so only a translation remains
        let transform = AffineTransform::new(1.0, 0.0, rect.x0 as f32, 0.0, 1.0, rect.y0 as f32);
        Some(FaceDetection::new(bbox, confidence, id, crop).with_transform(transform))
    }
}

/// Greedy IoU suppression, highest confidence first. Returns kept indices.
pub fn non_max_suppression(candidates: &[(FaceBox, f32)], iou_threshold: f32) -> Vec<usize> {
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| candidates[b].1.total_cmp(&candidates[a].1));

    let mut keep: Vec<usize> = Vec::new();
    for i in order {
        if keep
            .iter()
            .all(|&k| candidates[k].0.iou(&candidates[i].0) <= iou_threshold)
        {
            keep.push(i);
        }
    }
    keep
}

impl FaceDetector for ModelFaceDetector {
    fn detect(&self, frame: &Frame) -> Vec<FaceDetection> {
        if is_empty_frame(frame) || !self.backend.is_loaded() {
            return Vec::new();
        }

        let output = match self.backend.run(&[self.input_tensor(frame)]) {
            Ok(output) => output,
            Err(e) => {
                warn!("face detection failed: {}", e);
                return Vec::new();
            }
        };
        let candidates = match self.decode(&output, frame.width(), frame.height()) {
            Ok(c) => c,
            Err(e) => {
                warn!("face detection output rejected: {}", e);
                return Vec::new();
            }
        };

        let keep = non_max_suppression(&candidates, self.config.nms_threshold);
        let faces: Vec<FaceDetection> = keep
            .into_iter()
            .take(self.config.max_faces)
            .enumerate()
            .filter_map(|(id, i)| {
                let (bbox, confidence) = candidates[i];
                self.to_detection(frame, bbox, confidence, id as i32)
            })
            .collect();

        debug!("detected {} faces ({} candidates)", faces.len(), candidates.len());
        faces
    }
}
