pub mod config;
pub mod parallel;
pub mod provider;

use std::time::Instant;

use tracing::{debug, info, warn};

use crate::age_estimation::AgeEstimator;
use crate::compositor::Compositor;
use crate::error::PipelineError;
use crate::face::FaceDetection;
use crate::face_detection::FaceDetector;
use crate::face_parsing::{FaceParser, LabelMap};
use crate::frame::{is_empty_frame, Frame, FrameContext, Metrics, ProcessingResult};
use crate::synthesis::SynthesisStage;
use crate::utils::StageTimings;

use config::{ModelConfig, PipelineSettings};
use provider::{BackendProvider, ModelDirectoryProvider};

pub use config::{available_backends, GpuBackend};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

const STAGES: [&str; 4] = ["detect", "parse", "synthesis", "composite"];

/// Progress and error notifications for one `process_frame_with` call.
pub trait FrameObserver {
    fn on_progress(&mut self, _frame_number: u64, _faces_done: usize, _faces_total: usize) {}

    fn on_error(&mut self, _frame_number: u64, _message: &str) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl FrameObserver for NoopObserver {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    Uninitialized,
    Ready,
    ShutDown,
}

// everything that exists only while initialized
struct Engine {
    model: ModelConfig,
    detector: Box<dyn FaceDetector>,
    parser: Box<dyn FaceParser>,
    stage: SynthesisStage,
    compositor: Compositor,
    age_estimator: Option<AgeEstimator>,
}

enum State {
    Uninitialized,
    Initialized(Box<Engine>),
    ShutDown,
}

#[derive(Debug, Default)]
struct FaceCounts {
    processed: usize,
    skipped: usize,
    fallbacks: usize,
}

/// Detect -> parse -> synthesize -> composite, one frame at a time.
pub struct FramePipeline {
    settings: PipelineSettings,
    provider: Box<dyn BackendProvider>,
    state: State,
}

impl FramePipeline {
    /// Pipeline that loads its models from `ModelConfig::model_path`.
    pub fn new(settings: PipelineSettings) -> FramePipeline {
        FramePipeline::with_provider(settings, ModelDirectoryProvider)
    }

    pub fn with_provider(settings: PipelineSettings, provider: impl BackendProvider + 'static) -> FramePipeline {
        FramePipeline {
            settings,
            provider: Box::new(provider),
            state: State::Uninitialized,
        }
    }

    pub fn version() -> &'static str {
        VERSION
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn status(&self) -> PipelineStatus {
        match self.state {
            State::Uninitialized => PipelineStatus::Uninitialized,
            State::Initialized(_) => PipelineStatus::Ready,
            State::ShutDown => PipelineStatus::ShutDown,
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.status() == PipelineStatus::Ready
    }

    /// Validates `model` and builds the backends. A no-op when already initialized.
    pub fn initialize(&mut self, model: &ModelConfig) -> Result<(), PipelineError> {
        if let State::Initialized(engine) = &self.state {
            debug!("pipeline already initialized with {}", engine.model.model_path.display());
            return Ok(());
        }
        model.validate()?;

        let collaborators = self.provider.provide(model, &self.settings)?;
        let stage = SynthesisStage::new(collaborators.feedforward, collaborators.diffusion)
            .with_hybrid_weight(self.settings.hybrid_weight)
            .with_max_resolution(model.max_resolution);

        self.state = State::Initialized(Box::new(Engine {
            model: model.clone(),
            detector: collaborators.detector,
            parser: collaborators.parser,
            stage,
            compositor: Compositor::new(self.settings.compositor),
            age_estimator: collaborators.age_estimator,
        }));
        info!("pipeline {} initialized on {:?}", VERSION, model.backend);
        Ok(())
    }

    /// Releases all backend state. Safe to call more than once.
    pub fn shutdown(&mut self) {
        if let State::Initialized(_) = self.state {
            info!("pipeline shut down");
        }
        self.state = State::ShutDown;
    }

    fn engine(&self) -> Result<&Engine, PipelineError> {
        match &self.state {
            State::Initialized(engine) => Ok(engine),
            _ => Err(PipelineError::NotInitialized),
        }
    }

    /// Live compositor tuning; `None` unless initialized.
    pub fn compositor_mut(&mut self) -> Option<&mut Compositor> {
        match &mut self.state {
            State::Initialized(engine) => Some(&mut engine.compositor),
            _ => None,
        }
    }

    pub fn detect_faces(&self, frame: &Frame) -> Result<Vec<FaceDetection>, PipelineError> {
        let engine = self.engine()?;
        if is_empty_frame(frame) {
            return Ok(Vec::new());
        }
        Ok(engine.detector.detect(frame))
    }

    pub fn generate_face_parsing(&self, face: &FaceDetection) -> Result<LabelMap, PipelineError> {
        Ok(self.engine()?.parser.parse(&face.crop))
    }

    /// Apparent age of a face, 0 when no estimator is loaded.
    pub fn estimate_age(&self, face: &FaceDetection) -> Result<f32, PipelineError> {
        let engine = self.engine()?;
        Ok(engine
            .age_estimator
            .as_ref()
            .map(|e| e.estimate(&face.crop))
            .unwrap_or(0.0))
    }

    pub fn process_frame(&mut self, ctx: &FrameContext) -> ProcessingResult {
        self.process_frame_with(ctx, &mut NoopObserver)
    }

    pub fn process_frame_with(&mut self, ctx: &FrameContext, observer: &mut dyn FrameObserver) -> ProcessingResult {
        let start = Instant::now();
        let mut metrics = Metrics::new();
        metrics.insert("frame_number".to_string(), ctx.frame_number as f64);

        let outcome = match self.engine() {
            Ok(engine) => engine.run(ctx, &mut *observer, &mut metrics),
            Err(e) => Err(e),
        };
        metrics.insert(
            "processing_time_ms".to_string(),
            start.elapsed().as_secs_f64() * 1000.0,
        );

        match outcome {
            Ok((frame, faces)) => ProcessingResult::succeeded(frame, faces, metrics),
            Err(e) => {
                warn!("frame {} failed: {}", ctx.frame_number, e);
                observer.on_error(ctx.frame_number, &e.to_string());
                ProcessingResult::failed(&ctx.input_frame, e, metrics)
            }
        }
    }

    /// Processes frames in order on the calling thread.
    pub fn process_batch(&mut self, contexts: &[FrameContext]) -> Vec<ProcessingResult> {
        contexts.iter().map(|ctx| self.process_frame(ctx)).collect()
    }
}

impl Engine {
    fn run(
        &self,
        ctx: &FrameContext,
        observer: &mut dyn FrameObserver,
        metrics: &mut Metrics,
    ) -> Result<(Frame, Vec<FaceDetection>), PipelineError> {
        let frame = &ctx.input_frame;
        if is_empty_frame(frame) {
            return Err(PipelineError::InvalidInput("empty input frame".to_string()));
        }

        let mut timings = StageTimings::new(&STAGES);
        let faces = match &ctx.detected_faces {
            Some(faces) if !faces.is_empty() => faces.clone(),
            _ => timings.time("detect", || self.detector.detect(frame)),
        };

        let mut output = frame.clone();
        let mut processed = Vec::with_capacity(faces.len());
        let mut counts = FaceCounts::default();
        let mut ages = Vec::new();

        let mode = self
            .stage
            .resolve(ctx.mode, frame.width(), frame.height(), &ctx.controls);

        for (i, face) in faces.iter().enumerate() {
            observer.on_progress(ctx.frame_number, i, faces.len());
            if !face.is_valid() {
                debug!("skipping invalid detection {}", face.id);
                counts.skipped += 1;
                continue;
            }

            let labels = timings.time("parse", || self.parser.parse(&face.crop));
            let synthesized = timings.time("synthesis", || {
                self.stage
                    .synthesize(mode, &face.crop, &ctx.controls, Some(&labels))
            });
            let synthesized = match synthesized {
                Ok(image) => image,
                Err(e) => {
                    debug!("face {} passed through: {}", face.id, e);
                    counts.fallbacks += 1;
                    continue;
                }
            };

            timings.time("composite", || {
                self.compositor.composite_face(&mut output, &synthesized, face)
            });
            if let Some(estimator) = self.age_estimator.as_ref() {
                ages.push(estimator.estimate(&face.crop) as f64);
            }
            processed.push(face.clone());
            counts.processed += 1;
        }
        observer.on_progress(ctx.frame_number, faces.len(), faces.len());

        metrics.insert("faces_detected".to_string(), faces.len() as f64);
        metrics.insert("faces_processed".to_string(), counts.processed as f64);
        metrics.insert("faces_skipped".to_string(), counts.skipped as f64);
        metrics.insert("synthesis_fallbacks".to_string(), counts.fallbacks as f64);
        if !ages.is_empty() {
            metrics.insert(
                "estimated_age_mean".to_string(),
                ages.iter().sum::<f64>() / ages.len() as f64,
            );
        }
        timings.record_into(metrics);

        debug!(
            "frame {}: {} faces, {} processed, {:?} mode",
            ctx.frame_number,
            faces.len(),
            counts.processed,
            mode
        );
        Ok((output, processed))
    }
}

impl Drop for FramePipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}
