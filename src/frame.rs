use std::collections::BTreeMap;
use std::str::FromStr;

use image::RgbImage;
use serde::{Deserialize, Serialize};

use crate::controls::AgeControls;
use crate::face::FaceDetection;

pub type Frame = RgbImage;

pub type Metrics = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingMode {
    #[default]
    Feedforward,
    Diffusion,
    Hybrid,
    Auto,
}

impl FromStr for ProcessingMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "feedforward" => Ok(ProcessingMode::Feedforward),
            "diffusion" => Ok(ProcessingMode::Diffusion),
            "hybrid" => Ok(ProcessingMode::Hybrid),
            "auto" => Ok(ProcessingMode::Auto),
            other => Err(format!("unknown processing mode '{}'", other)),
        }
    }
}

/// Everything the pipeline needs to process one frame.
#[derive(Debug, Clone)]
pub struct FrameContext {
    pub frame_number: u64,
    pub input_frame: Frame,
    // caller supplied detections skip the detector
    pub detected_faces: Option<Vec<FaceDetection>>,
    pub controls: AgeControls,
    pub mode: ProcessingMode,
}

impl FrameContext {
    pub fn new(frame_number: u64, input_frame: Frame) -> FrameContext {
        FrameContext {
            frame_number,
            input_frame,
            detected_faces: None,
            controls: AgeControls::default(),
            mode: ProcessingMode::default(),
        }
    }

    pub fn with_controls(mut self, controls: AgeControls) -> FrameContext {
        self.controls = controls;
        self
    }

    pub fn with_mode(mut self, mode: ProcessingMode) -> FrameContext {
        self.mode = mode;
        self
    }

    pub fn with_faces(mut self, faces: Vec<FaceDetection>) -> FrameContext {
        self.detected_faces = Some(faces);
        self
    }
}

#[derive(Debug, Clone)]
pub struct ProcessingResult {
    pub output_frame: Frame,
    pub processed_faces: Vec<FaceDetection>,
    pub metrics: Metrics,
    pub success: bool,
    pub error_message: String,
}

impl ProcessingResult {
    pub fn succeeded(output_frame: Frame, processed_faces: Vec<FaceDetection>, metrics: Metrics) -> Self {
        Self {
            output_frame,
            processed_faces,
            metrics,
            success: true,
            error_message: String::new(),
        }
    }

    /// A failed frame carries the input through unmodified.
    pub fn failed(input_frame: &Frame, error: impl ToString, metrics: Metrics) -> Self {
        Self {
            output_frame: input_frame.clone(),
            processed_faces: Vec::new(),
            metrics,
            success: false,
            error_message: error.to_string(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }
}

pub(crate) fn is_empty_frame(frame: &Frame) -> bool {
    frame.width() == 0 || frame.height() == 0
}
