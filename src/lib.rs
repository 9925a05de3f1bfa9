//! Identity-preserving facial re-aging for video frames.
//!
//! A [`pipeline::FramePipeline`] finds faces, parses them into facial regions,
//! runs an age synthesizer on each crop and composites the result back into
//! the frame.

pub mod age_estimation;
pub mod compositor;
pub mod controls;
pub mod error;
pub mod face;
pub mod face_detection;
pub mod face_parsing;
pub mod frame;
pub mod inference;
pub mod pipeline;
pub mod synthesis;
pub mod utils;

pub use controls::AgeControls;
pub use error::{ConfigError, InferenceError, PipelineError};
pub use face::{FaceBox, FaceDetection};
pub use frame::{Frame, FrameContext, ProcessingMode, ProcessingResult};
pub use pipeline::config::{ConfigFile, ModelConfig, PipelineSettings};
pub use pipeline::FramePipeline;
