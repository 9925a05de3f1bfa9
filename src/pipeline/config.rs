use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::compositor::CompositorConfig;
use crate::controls::AgeControls;
use crate::error::{ConfigError, PipelineError};
use crate::face_detection::model_ssd::DetectorConfig;
use crate::face_parsing::regions::SegmenterConfig;
use crate::frame::ProcessingMode;
use crate::synthesis::stage::DEFAULT_HYBRID_WEIGHT;
use crate::synthesis::DiffusionConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GpuBackend {
    Cuda,
    Metal,
    DirectMl,
    CpuFallback,
}

/// Backends this build can run on. `CpuFallback` is always present.
pub fn available_backends() -> Vec<GpuBackend> {
    let mut backends = Vec::new();
    if cfg!(feature = "cuda") {
        backends.push(GpuBackend::Cuda);
    }
    if cfg!(feature = "metal") {
        backends.push(GpuBackend::Metal);
    }
    if cfg!(feature = "directml") {
        backends.push(GpuBackend::DirectMl);
    }
    backends.push(GpuBackend::CpuFallback);
    backends
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub backend: GpuBackend,
    pub batch_size: usize,
    pub use_half_precision: bool,
    pub max_resolution: u32,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            model_path: PathBuf::from("models"),
            backend: GpuBackend::CpuFallback,
            batch_size: 1,
            use_half_precision: false,
            max_resolution: 2048,
        }
    }
}

impl ModelConfig {
    pub fn new(model_path: impl Into<PathBuf>) -> ModelConfig {
        ModelConfig {
            model_path: model_path.into(),
            ..ModelConfig::default()
        }
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if self.batch_size == 0 {
            return Err(PipelineError::InvalidConfig("batch_size must be > 0".to_string()));
        }
        if self.max_resolution == 0 {
            return Err(PipelineError::InvalidConfig("max_resolution must be > 0".to_string()));
        }
        if !available_backends().contains(&self.backend) {
            return Err(PipelineError::InvalidConfig(format!(
                "backend {:?} is not available in this build",
                self.backend
            )));
        }
        Ok(())
    }
}

/// Tunables for the non-model stages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    pub segmenter: SegmenterConfig,
    pub compositor: CompositorConfig,
    pub diffusion: DiffusionConfig,
    pub detector: DetectorConfig,
    pub hybrid_weight: f32,
    pub estimate_ages: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            segmenter: SegmenterConfig::default(),
            compositor: CompositorConfig::default(),
            diffusion: DiffusionConfig::default(),
            detector: DetectorConfig::default(),
            hybrid_weight: DEFAULT_HYBRID_WEIGHT,
            estimate_ages: false,
        }
    }
}

/// On-disk configuration: `{ "model": {...}, "pipeline": {...} }`, plus the
/// controls and mode used for frames that don't carry their own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConfigFile {
    pub model: ModelConfig,
    pub pipeline: PipelineSettings,
    pub controls: AgeControls,
    pub mode: ProcessingMode,
}

impl ConfigFile {
    pub fn from_json(text: &str) -> Result<ConfigFile, ConfigError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<ConfigFile, ConfigError> {
        let text = fs::read_to_string(path)?;
        ConfigFile::from_json(&text)
    }
}
