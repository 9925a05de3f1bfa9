use std::path::Path;

use tracing::{info, warn};

use crate::age_estimation::AgeEstimator;
use crate::error::PipelineError;
use crate::face_detection::model_ssd::ModelFaceDetector;
use crate::face_detection::{FaceDetector, NoFaces};
use crate::face_parsing::model_bisenet::ModelFaceParser;
use crate::face_parsing::regions::RegionSegmenter;
use crate::face_parsing::FaceParser;
use crate::inference::{InferenceBackend, UnavailableBackend};
use crate::pipeline::config::{ModelConfig, PipelineSettings};
use crate::synthesis::{AgeSynthesizer, DiffusionSynthesizer, FeedforwardSynthesizer};

pub const DETECTOR_MODEL: &str = "face_detector.onnx";
pub const PARSER_MODEL: &str = "face_parser.onnx";
pub const FEEDFORWARD_MODEL: &str = "feedforward_generator.onnx";
pub const DIFFUSION_MODEL: &str = "diffusion_editor.onnx";
pub const AGE_MODEL: &str = "age_estimator.onnx";

/// Everything a pipeline instance calls out to. Owned by exactly one pipeline.
pub struct Collaborators {
    pub detector: Box<dyn FaceDetector>,
    pub parser: Box<dyn FaceParser>,
    pub feedforward: Box<dyn AgeSynthesizer>,
    pub diffusion: Box<dyn AgeSynthesizer>,
    pub age_estimator: Option<AgeEstimator>,
}

impl Collaborators {
    /// No detector output, background parsing and synthesizers that pass crops through.
    pub fn passthrough(settings: &PipelineSettings) -> Collaborators {
        Collaborators {
            detector: Box::new(NoFaces),
            parser: Box::new(ModelFaceParser::new(Box::new(UnavailableBackend))),
            feedforward: Box::new(FeedforwardSynthesizer::new(Box::new(UnavailableBackend))),
            diffusion: Box::new(DiffusionSynthesizer::new(Box::new(UnavailableBackend), settings.diffusion)),
            age_estimator: None,
        }
    }
}

/// Builds the collaborators for one pipeline.
pub trait BackendProvider: Send {
    fn provide(&mut self, model: &ModelConfig, settings: &PipelineSettings) -> Result<Collaborators, PipelineError>;
}

impl<F> BackendProvider for F
where
    F: FnMut(&ModelConfig, &PipelineSettings) -> Result<Collaborators, PipelineError> + Send,
{
    fn provide(&mut self, model: &ModelConfig, settings: &PipelineSettings) -> Result<Collaborators, PipelineError> {
        self(model, settings)
    }
}

/// Loads the standard model files from `ModelConfig::model_path`.
///
/// A missing or unloadable model is logged and its stage degrades; only a
/// missing model directory fails initialization.
#[derive(Debug, Default, Clone, Copy)]
pub struct ModelDirectoryProvider;

#[cfg(feature = "onnx")]
fn new_backend(model: &ModelConfig) -> Result<Box<dyn InferenceBackend>, PipelineError> {
    let backend = crate::inference::onnx::OnnxBackend::new(model.backend)
        .map_err(|e| PipelineError::Initialization(e.to_string()))?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "onnx"))]
fn new_backend(_model: &ModelConfig) -> Result<Box<dyn InferenceBackend>, PipelineError> {
    Ok(Box::new(UnavailableBackend))
}

fn load(model: &ModelConfig, file: &str) -> Result<Box<dyn InferenceBackend>, PipelineError> {
    let path = model.model_path.join(file);
    let mut backend = new_backend(model)?;
    if !path.is_file() {
        warn!("model {} not found, stage will pass through", path.display());
    } else if !backend.load_model(&path) {
        warn!("model {} could not be loaded, stage will pass through", path.display());
    } else {
        info!("loaded {}", path.display());
    }
    Ok(backend)
}

fn model_dir_exists(path: &Path) -> bool {
    path.is_dir()
}

impl BackendProvider for ModelDirectoryProvider {
    fn provide(&mut self, model: &ModelConfig, settings: &PipelineSettings) -> Result<Collaborators, PipelineError> {
        if !model_dir_exists(&model.model_path) {
            return Err(PipelineError::Initialization(format!(
                "model directory {} does not exist",
                model.model_path.display()
            )));
        }
        if model.use_half_precision {
            info!("half precision requested; models run at the precision they were exported with");
        }

        let segmenter = RegionSegmenter::new(settings.segmenter);
        let detector = ModelFaceDetector::new(load(model, DETECTOR_MODEL)?, settings.detector);
        let parser = ModelFaceParser::new(load(model, PARSER_MODEL)?);
        let feedforward = FeedforwardSynthesizer::new(load(model, FEEDFORWARD_MODEL)?).with_segmenter(segmenter.clone());
        let diffusion = DiffusionSynthesizer::new(load(model, DIFFUSION_MODEL)?, settings.diffusion).with_segmenter(segmenter);
        let age_estimator = if settings.estimate_ages {
            Some(AgeEstimator::new(load(model, AGE_MODEL)?))
        } else {
            None
        };

        Ok(Collaborators {
            detector: Box::new(detector),
            parser: Box::new(parser),
            feedforward: Box::new(feedforward),
            diffusion: Box::new(diffusion),
            age_estimator,
        })
    }
}
