pub mod model_ssd;

use crate::face::FaceDetection;
use crate::frame::Frame;

/// Locates faces in a frame.
///
/// An empty frame, or a detector that cannot run, yields no detections.
pub trait FaceDetector: Send {
    fn detect(&self, frame: &Frame) -> Vec<FaceDetection>;
}

impl<F> FaceDetector for F
where
    F: Fn(&Frame) -> Vec<FaceDetection> + Send,
{
    fn detect(&self, frame: &Frame) -> Vec<FaceDetection> {
        self(frame)
    }
}

/// Detector that never finds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoFaces;

impl FaceDetector for NoFaces {
    fn detect(&self, _frame: &Frame) -> Vec<FaceDetection> {
        Vec::new()
    }
}
