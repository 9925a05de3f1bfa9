use std::ops::Deref;
use std::path::Path;
use std::sync::Arc;

use ndarray::{CowArray, IxDyn};
use ort::tensor::OrtOwnedTensor;
use ort::{Environment, ExecutionProvider, Session, SessionBuilder, Value};
use tracing::{debug, warn};

use crate::error::InferenceError;
use crate::inference::{InferenceBackend, Tensor};
use crate::pipeline::config::GpuBackend;

/// `InferenceBackend` over an onnxruntime session.
pub struct OnnxBackend {
    environment: Arc<Environment>,
    session: Option<Session>,
    intra_threads: i16,
}

fn backend_err(e: impl std::fmt::Display) -> InferenceError {
    InferenceError::Backend(e.to_string())
}

fn execution_provider(backend: GpuBackend) -> ExecutionProvider {
    match backend {
        GpuBackend::Cuda => ExecutionProvider::CUDA(Default::default()),
        GpuBackend::Metal => ExecutionProvider::CoreML(Default::default()),
        GpuBackend::DirectMl => ExecutionProvider::DirectML(Default::default()),
        GpuBackend::CpuFallback => ExecutionProvider::CPU(Default::default()),
    }
}

impl OnnxBackend {
    pub fn new(backend: GpuBackend) -> Result<OnnxBackend, InferenceError> {
        // cpu always comes last so sessions still build when the device is missing
        let environment = Environment::builder()
            .with_name("face-reaging")
            .with_execution_providers([
                execution_provider(backend),
                ExecutionProvider::CPU(Default::default()),
            ])
            .build()
            .map_err(backend_err)?
            .into_arc();

        Ok(OnnxBackend {
            environment,
            session: None,
            intra_threads: 4,
        })
    }

    pub fn with_intra_threads(mut self, threads: i16) -> OnnxBackend {
        self.intra_threads = threads;
        self
    }
}

impl InferenceBackend for OnnxBackend {
    fn load_model(&mut self, path: &Path) -> bool {
        let session = SessionBuilder::new(&self.environment)
            .and_then(|b| b.with_intra_threads(self.intra_threads))
            .and_then(|b| b.with_model_from_file(path));

        match session {
            Ok(session) => {
                debug!("loaded onnx model {}", path.display());
                self.session = Some(session);
                true
            }
            Err(e) => {
                warn!("failed to load onnx model {}: {}", path.display(), e);
                self.session = None;
                false
            }
        }
    }

    fn is_loaded(&self) -> bool {
        self.session.is_some()
    }

    fn run(&self, inputs: &[Tensor]) -> Result<Tensor, InferenceError> {
        let session = self.session.as_ref().ok_or(InferenceError::ModelNotLoaded)?;

        let arrays: Vec<CowArray<f32, IxDyn>> = inputs.iter().map(|t| CowArray::from(t.view())).collect();
        let values = arrays
            .iter()
            .map(|a| Value::from_array(session.allocator(), a))
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend_err)?;

        let outputs: Vec<Value> = session.run(values).map_err(backend_err)?;
        let first = outputs
            .first()
            .ok_or_else(|| InferenceError::Backend("model produced no outputs".to_string()))?;

        let tensor: OrtOwnedTensor<f32, _> = first.try_extract().map_err(backend_err)?;
        let result = tensor.view().deref().to_owned();
        Ok(result)
    }
}
