use std::path::Path;
use std::thread;

use face_reaging::age_estimation::AgeEstimator;
use face_reaging::face_detection::FaceDetector;
use face_reaging::face_parsing::{FaceParser, LabelMap};
use face_reaging::inference::{InferenceBackend, Tensor};
use face_reaging::pipeline::parallel::process_frames_parallel;
use face_reaging::pipeline::provider::{BackendProvider, Collaborators};
use face_reaging::pipeline::{available_backends, FrameObserver, GpuBackend, PipelineStatus};
use face_reaging::synthesis::AgeSynthesizer;
use face_reaging::{
    AgeControls, FaceBox, FaceDetection, Frame, FrameContext, FramePipeline, InferenceError, ModelConfig,
    PipelineError, PipelineSettings, ProcessingMode,
};
use image::{imageops, Luma, Rgb, RgbImage};

struct FixedBoxes(Vec<(u32, u32, u32)>);

impl FaceDetector for FixedBoxes {
    fn detect(&self, frame: &Frame) -> Vec<FaceDetection> {
        self.0
            .iter()
            .enumerate()
            .filter(|(_, &(x, y, s))| x + s <= frame.width() && y + s <= frame.height())
            .map(|(id, &(x, y, s))| {
                let crop = imageops::crop_imm(frame, x, y, s, s).to_image();
                FaceDetection::new(FaceBox::new(x as f32, y as f32, s as f32, s as f32), 0.9, id as i32, crop)
            })
            .collect()
    }
}

struct AllSkin;

impl FaceParser for AllSkin {
    fn parse(&self, crop: &RgbImage) -> LabelMap {
        LabelMap::from_pixel(crop.width(), crop.height(), Luma([1]))
    }
}

struct Solid(u8);

impl AgeSynthesizer for Solid {
    fn name(&self) -> &'static str {
        "solid"
    }

    fn synthesize(&self, crop: &RgbImage, _: &AgeControls, _: Option<&LabelMap>) -> Result<RgbImage, InferenceError> {
        Ok(RgbImage::from_pixel(crop.width(), crop.height(), Rgb([self.0; 3])))
    }
}

struct Failing;

impl AgeSynthesizer for Failing {
    fn name(&self) -> &'static str {
        "failing"
    }

    fn synthesize(&self, _: &RgbImage, _: &AgeControls, _: Option<&LabelMap>) -> Result<RgbImage, InferenceError> {
        Err(InferenceError::Backend("device lost".to_string()))
    }
}

struct FixedAge(f32);

impl InferenceBackend for FixedAge {
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

#[derive(Clone)]
struct StubProvider {
    boxes: Vec<(u32, u32, u32)>,
    feedforward: Option<u8>,
    diffusion: Option<u8>,
    age: Option<f32>,
}

impl StubProvider {
    fn new(boxes: Vec<(u32, u32, u32)>) -> StubProvider {
        StubProvider {
            boxes,
            feedforward: Some(250),
            diffusion: Some(200),
            age: None,
        }
    }
}

fn synth(value: Option<u8>) -> Box<dyn AgeSynthesizer> {
    match value {
        Some(v) => Box::new(Solid(v)),
        None => Box::new(Failing),
    }
}

impl BackendProvider for StubProvider {
    fn provide(&mut self, _model: &ModelConfig, _settings: &PipelineSettings) -> Result<Collaborators, PipelineError> {
        Ok(Collaborators {
            detector: Box::new(FixedBoxes(self.boxes.clone())),
            parser: Box::new(AllSkin),
            feedforward: synth(self.feedforward),
            diffusion: synth(self.diffusion),
            age_estimator: self.age.map(|a| AgeEstimator::new(Box::new(FixedAge(a)))),
        })
    }
}

fn hard_edge_settings() -> PipelineSettings {
    let mut settings = PipelineSettings::default();
    settings.compositor.feather_radius = 0.0;
    settings
}

fn ready_pipeline(provider: StubProvider) -> FramePipeline {
    let mut pipeline = FramePipeline::with_provider(hard_edge_settings(), provider);
    pipeline.initialize(&ModelConfig::default()).unwrap();
    pipeline
}

fn gray_frame(value: u8) -> Frame {
    Frame::from_pixel(320, 240, Rgb([value; 3]))
}

#[test]
fn uninitialized_pipeline_refuses_frames() {
    let mut pipeline = FramePipeline::with_provider(PipelineSettings::default(), StubProvider::new(vec![]));
    let result = pipeline.process_frame(&FrameContext::new(0, gray_frame(10)));
    assert!(!result.success);
    assert!(result.error_message.contains("not initialized"));
    assert_eq!(result.output_frame, gray_frame(10));
}

#[test]
fn shut_down_pipeline_refuses_frames() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![]));
    pipeline.shutdown();
    assert_eq!(pipeline.status(), PipelineStatus::ShutDown);
    let result = pipeline.process_frame(&FrameContext::new(0, gray_frame(10)));
    assert!(!result.success);
    assert!(!result.error_message.is_empty());
    assert_eq!(result.output_frame, gray_frame(10));
}

#[test]
fn empty_frame_is_an_error() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![(0, 0, 10)]));
    let result = pipeline.process_frame(&FrameContext::new(3, Frame::new(0, 0)));
    assert!(!result.success);
    assert!(result.error_message.contains("empty input frame"));
    assert_eq!(result.metric("frame_number"), Some(3.0));
    assert!(pipeline.detect_faces(&Frame::new(0, 0)).unwrap().is_empty());
}

#[test]
fn frame_without_faces_is_returned_unchanged() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![]));
    let frame = gray_frame(77);
    let result = pipeline.process_frame(&FrameContext::new(0, frame.clone()));
    assert!(result.success);
    assert!(result.error_message.is_empty());
    assert_eq!(result.output_frame, frame);
    assert_eq!(result.metric("faces_detected"), Some(0.0));
    assert_eq!(result.metric("faces_processed"), Some(0.0));
}

#[test]
fn detected_faces_are_aged_in_place() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![(20, 20, 64), (150, 100, 64)]));
    let result = pipeline.process_frame(&FrameContext::new(1, gray_frame(100)));

    assert!(result.success);
    assert_eq!(result.processed_faces.len(), 2);
    assert_eq!(result.metric("faces_detected"), Some(2.0));
    assert_eq!(result.metric("faces_processed"), Some(2.0));
    assert!(result.metric("processing_time_ms").unwrap() >= 0.0);
    for stage in ["detect_ms", "parse_ms", "synthesis_ms", "composite_ms"] {
        assert!(result.metric(stage).is_some(), "missing {}", stage);
    }

    assert_eq!(result.output_frame.get_pixel(52, 52).0, [250; 3]);
    assert_eq!(result.output_frame.get_pixel(180, 130).0, [250; 3]);
    assert_eq!(result.output_frame.get_pixel(5, 5).0, [100; 3]);
    assert_eq!(result.output_frame.get_pixel(300, 220).0, [100; 3]);
}

#[test]
fn supplied_detections_skip_the_detector() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![]));
    let frame = gray_frame(100);
    let crop = RgbImage::from_pixel(32, 32, Rgb([100; 3]));
    let face = FaceDetection::new(FaceBox::new(10.0, 10.0, 32.0, 32.0), 0.8, 7, crop);

    let result = pipeline.process_frame(&FrameContext::new(0, frame).with_faces(vec![face]));
    assert_eq!(result.metric("faces_processed"), Some(1.0));
    assert_eq!(result.output_frame.get_pixel(20, 20).0, [250; 3]);
}

#[test]
fn invalid_detections_are_skipped() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![]));
    let good = FaceDetection::new(
        FaceBox::new(10.0, 10.0, 32.0, 32.0),
        0.8,
        0,
        RgbImage::new(32, 32),
    );
    let bad_box = FaceDetection::new(FaceBox::new(-5.0, 10.0, 32.0, 32.0), 0.8, 1, RgbImage::new(32, 32));
    let bad_confidence = FaceDetection::new(FaceBox::new(100.0, 10.0, 32.0, 32.0), 1.5, 2, RgbImage::new(32, 32));

    let ctx = FrameContext::new(0, gray_frame(0)).with_faces(vec![good, bad_box, bad_confidence]);
    let result = pipeline.process_frame(&ctx);
    assert!(result.success);
    assert_eq!(result.metric("faces_processed"), Some(1.0));
    assert_eq!(result.metric("faces_skipped"), Some(2.0));
    assert_eq!(result.output_frame.get_pixel(110, 20).0, [0; 3]);
}

#[test]
fn synthesis_failure_passes_faces_through() {
    let provider = StubProvider {
        feedforward: None,
        ..StubProvider::new(vec![(20, 20, 64), (150, 100, 64)])
    };
    let mut pipeline = ready_pipeline(provider);
    let frame = gray_frame(100);
    let result = pipeline.process_frame(&FrameContext::new(0, frame.clone()));

    assert!(result.success);
    assert_eq!(result.output_frame, frame);
    assert_eq!(result.metric("synthesis_fallbacks"), Some(2.0));
    assert_eq!(result.metric("faces_processed"), Some(0.0));
}

#[test]
fn hybrid_and_auto_modes_resolve() {
    let provider = StubProvider {
        feedforward: Some(0),
        diffusion: Some(200),
        ..StubProvider::new(vec![(20, 20, 64)])
    };
    let mut pipeline = ready_pipeline(provider);

    let hybrid = FrameContext::new(0, gray_frame(30)).with_mode(ProcessingMode::Hybrid);
    assert_eq!(pipeline.process_frame(&hybrid).output_frame.get_pixel(50, 50).0, [100; 3]);

    let mut controls = AgeControls::default();
    controls.temporal_stability = 0.1;
    let auto_small = FrameContext::new(1, gray_frame(30))
        .with_mode(ProcessingMode::Auto)
        .with_controls(controls);
    assert_eq!(pipeline.process_frame(&auto_small).output_frame.get_pixel(50, 50).0, [200; 3]);

    controls.temporal_stability = 0.9;
    let auto_stable = auto_small.clone().with_controls(controls);
    assert_eq!(pipeline.process_frame(&auto_stable).output_frame.get_pixel(50, 50).0, [0; 3]);
}

#[test]
fn age_estimates_are_reported() {
    let provider = StubProvider {
        age: Some(64.0),
        ..StubProvider::new(vec![(20, 20, 64)])
    };
    let mut pipeline = ready_pipeline(provider);
    let result = pipeline.process_frame(&FrameContext::new(0, gray_frame(100)));
    assert_eq!(result.metric("estimated_age_mean"), Some(64.0));

    let face = &result.processed_faces[0];
    assert_eq!(pipeline.estimate_age(face).unwrap(), 64.0);
    assert_eq!(pipeline.generate_face_parsing(face).unwrap().get_pixel(0, 0)[0], 1);
}

#[derive(Default)]
struct Recorder {
    progress: Vec<(u64, usize, usize)>,
    errors: Vec<String>,
}

impl FrameObserver for Recorder {
    fn on_progress(&mut self, frame_number: u64, done: usize, total: usize) {
        self.progress.push((frame_number, done, total));
    }

    fn on_error(&mut self, _frame_number: u64, message: &str) {
        self.errors.push(message.to_string());
    }
}

#[test]
fn observer_sees_progress_and_errors() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![(20, 20, 64), (150, 100, 64)]));
    let mut recorder = Recorder::default();

    pipeline.process_frame_with(&FrameContext::new(9, gray_frame(1)), &mut recorder);
    assert_eq!(recorder.progress.last(), Some(&(9, 2, 2)));
    assert!(recorder.errors.is_empty());

    pipeline.process_frame_with(&FrameContext::new(10, Frame::new(0, 0)), &mut recorder);
    assert_eq!(recorder.errors.len(), 1);
}

#[test]
fn batch_keeps_frame_order() {
    let mut pipeline = ready_pipeline(StubProvider::new(vec![(20, 20, 64)]));
    let contexts: Vec<FrameContext> = (0..4).map(|i| FrameContext::new(i, gray_frame(i as u8))).collect();
    let results = pipeline.process_batch(&contexts);
    assert_eq!(results.len(), 4);
    for (i, result) in results.iter().enumerate() {
        assert_eq!(result.metric("frame_number"), Some(i as f64));
        assert_eq!(result.output_frame.get_pixel(0, 0)[0], i as u8);
    }
}

#[test]
fn independent_pipelines_run_on_separate_threads() {
    let handles: Vec<_> = (0..4)
        .map(|t| {
            thread::spawn(move || {
                let mut pipeline = ready_pipeline(StubProvider::new(vec![(20, 20, 64)]));
                (0..5)
                    .map(|i| pipeline.process_frame(&FrameContext::new(t * 100 + i, gray_frame(50))))
                    .all(|r| r.success && r.metric("faces_processed") == Some(1.0))
            })
        })
        .collect();

    for handle in handles {
        assert!(handle.join().unwrap());
    }
}

#[test]
fn parallel_runner_keeps_frame_order() {
    let contexts: Vec<FrameContext> = (0..12).map(|i| FrameContext::new(i, gray_frame(60))).collect();
    let results = process_frames_parallel(&contexts, || {
        let mut pipeline = FramePipeline::with_provider(hard_edge_settings(), StubProvider::new(vec![(20, 20, 64)]));
        pipeline.initialize(&ModelConfig::default())?;
        Ok(pipeline)
    });

    assert_eq!(results.len(), 12);
    for (i, result) in results.iter().enumerate() {
        assert!(result.success);
        assert_eq!(result.metric("frame_number"), Some(i as f64));
        assert_eq!(result.output_frame.get_pixel(50, 50).0, [250; 3]);
    }
}

#[test]
fn parallel_runner_reports_initialization_failures() {
    let contexts = vec![FrameContext::new(0, gray_frame(60))];
    let results = process_frames_parallel(&contexts, || {
        let mut pipeline = FramePipeline::with_provider(PipelineSettings::default(), StubProvider::new(vec![]));
        pipeline.initialize(&ModelConfig {
            batch_size: 0,
            ..ModelConfig::default()
        })?;
        Ok(pipeline)
    });
    assert!(!results[0].success);
    assert!(results[0].error_message.contains("batch_size"));
    assert_eq!(results[0].output_frame, gray_frame(60));
}

#[test]
fn cpu_backend_is_always_available() {
    assert!(available_backends().contains(&GpuBackend::CpuFallback));
}
