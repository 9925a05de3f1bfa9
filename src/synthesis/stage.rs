use image::RgbImage;
use tracing::{debug, warn};

use crate::controls::AgeControls;
use crate::error::InferenceError;
use crate::face_parsing::LabelMap;
use crate::frame::ProcessingMode;
use crate::synthesis::{identity_blend, AgeSynthesizer};

pub const DEFAULT_HYBRID_WEIGHT: f32 = 0.5;

/// Picks a concrete variant for `Auto`.
///
/// Diffusion is only chosen for frames whose longer side is at most half of
/// `max_resolution` and when the controls do not ask for temporal stability.
pub fn auto_select(frame_width: u32, frame_height: u32, controls: &AgeControls, max_resolution: u32) -> ProcessingMode {
    let longest = frame_width.max(frame_height);
    if longest <= max_resolution / 2 && controls.temporal_stability < 0.5 {
        ProcessingMode::Diffusion
    } else {
        ProcessingMode::Feedforward
    }
}

/// Holds both synthesis variants and resolves Hybrid / Auto between them.
pub struct SynthesisStage {
    feedforward: Box<dyn AgeSynthesizer>,
    diffusion: Box<dyn AgeSynthesizer>,
    hybrid_weight: f32,
    max_resolution: u32,
}

impl SynthesisStage {
    pub fn new(feedforward: Box<dyn AgeSynthesizer>, diffusion: Box<dyn AgeSynthesizer>) -> SynthesisStage {
        SynthesisStage {
            feedforward,
            diffusion,
            hybrid_weight: DEFAULT_HYBRID_WEIGHT,
            max_resolution: 2048,
        }
    }

    /// Diffusion share of the Hybrid result, clamped to [0, 1].
    pub fn with_hybrid_weight(mut self, weight: f32) -> SynthesisStage {
        self.hybrid_weight = if weight.is_nan() { DEFAULT_HYBRID_WEIGHT } else { weight.clamp(0.0, 1.0) };
        self
    }

    pub fn with_max_resolution(mut self, max_resolution: u32) -> SynthesisStage {
        self.max_resolution = max_resolution;
        self
    }

    pub fn hybrid_weight(&self) -> f32 {
        self.hybrid_weight
    }

    /// Replaces `Auto` with the variant chosen for a frame of the given size.
    pub fn resolve(&self, mode: ProcessingMode, frame_width: u32, frame_height: u32, controls: &AgeControls) -> ProcessingMode {
        match mode {
            ProcessingMode::Auto => auto_select(frame_width, frame_height, controls, self.max_resolution),
            other => other,
        }
    }

    /// Runs the variant for `mode`. `Auto` is resolved against the crop size
    /// when the caller has not resolved it against the frame already.
    pub fn synthesize(
        &self,
        mode: ProcessingMode,
        crop: &RgbImage,
        controls: &AgeControls,
        parsing: Option<&LabelMap>,
    ) -> Result<RgbImage, InferenceError> {
        match mode {
            ProcessingMode::Feedforward => self.feedforward.synthesize(crop, controls, parsing),
            ProcessingMode::Diffusion => self.diffusion.synthesize(crop, controls, parsing),
            ProcessingMode::Hybrid => self.hybrid(crop, controls, parsing),
            // auto_select only yields Feedforward or Diffusion
            ProcessingMode::Auto => {
                let chosen = auto_select(crop.width(), crop.height(), controls, self.max_resolution);
                self.synthesize(chosen, crop, controls, parsing)
            }
        }
    }

    fn hybrid(
        &self,
        crop: &RgbImage,
        controls: &AgeControls,
        parsing: Option<&LabelMap>,
    ) -> Result<RgbImage, InferenceError> {
        let ff = self.feedforward.synthesize(crop, controls, parsing);
        let diff = self.diffusion.synthesize(crop, controls, parsing);

        let (ff, diff) = match (ff, diff) {
            (Ok(a), Ok(b)) => (a, b),
            (Ok(a), Err(e)) => {
                warn!("hybrid: diffusion failed, using crop in its place: {}", e);
                (a, crop.clone())
            }
            (Err(e), Ok(b)) => {
                warn!("hybrid: feedforward failed, using crop in its place: {}", e);
                (crop.clone(), b)
            }
            (Err(e), Err(_)) => return Err(e),
        };
        debug!("hybrid blend with diffusion weight {:.2}", self.hybrid_weight);

        // ff * (1 - w) + diff * w
        Ok(identity_blend(&ff, &diff, 1.0 - self.hybrid_weight))
    }
}
