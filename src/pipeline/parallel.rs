use rayon::prelude::*;
use tracing::debug;

use crate::error::PipelineError;
use crate::frame::{FrameContext, Metrics, ProcessingResult};
use crate::pipeline::FramePipeline;

/// Processes frames on the rayon pool. `make_pipeline` runs once per rayon
/// work split (at least once per busy thread, possibly more), and each
/// pipeline is used by one split only. Results keep the order of `contexts`.
/// If `make_pipeline` fails, the frames of that split come back failed with
/// their input unmodified.
pub fn process_frames_parallel<F>(contexts: &[FrameContext], make_pipeline: F) -> Vec<ProcessingResult>
where
    F: Fn() -> Result<FramePipeline, PipelineError> + Sync + Send,
{
    debug!(
        "processing {} frames on {} threads",
        contexts.len(),
        rayon::current_num_threads()
    );
    contexts
        .par_iter()
        .map_init(
            || make_pipeline(),
            |pipeline, ctx| match pipeline {
                Ok(pipeline) => pipeline.process_frame(ctx),
                Err(e) => ProcessingResult::failed(&ctx.input_frame, e, Metrics::new()),
            },
        )
        .collect()
}
