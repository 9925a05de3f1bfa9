use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use face_reaging::pipeline::parallel::process_frames_parallel;
use face_reaging::utils::RollingMean;
use face_reaging::{ConfigFile, FrameContext, FramePipeline};

fn load_frames(paths: &[String], config: &ConfigFile) -> Result<Vec<FrameContext>> {
    paths
        .iter()
        .enumerate()
        .map(|(i, path)| {
            let image = image::open(path)
                .with_context(|| format!("failed to open {}", path))?
                .to_rgb8();
            Ok(FrameContext::new(i as u64, image)
                .with_controls(config.controls)
                .with_mode(config.mode))
        })
        .collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.len() < 3 {
        bail!("usage: reage <config.json> <output-dir> <image>...");
    }

    let config = ConfigFile::load(Path::new(&args[0]))
        .with_context(|| format!("failed to load config {}", args[0]))?;
    let output_dir = PathBuf::from(&args[1]);
    fs::create_dir_all(&output_dir)?;

    let inputs = &args[2..];
    let frames = load_frames(inputs, &config)?;
    info!(
        "re-aging {} frames to age {} ({:?})",
        frames.len(),
        config.controls.target_age,
        config.mode
    );

    let results = process_frames_parallel(&frames, || {
        let mut pipeline = FramePipeline::new(config.pipeline.clone());
        pipeline.initialize(&config.model)?;
        Ok(pipeline)
    });

    let mut frame_times = RollingMean::new(30);
    for (input, result) in inputs.iter().zip(results) {
        if !result.success {
            warn!("{}: {}", input, result.error_message);
            continue;
        }
        if let Some(ms) = result.metric("processing_time_ms") {
            frame_times.push(ms);
        }

        let name = Path::new(input)
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| format!("frame_{}.png", result.metric("frame_number").unwrap_or(0.0)).into());
        let out = output_dir.join(name);
        result
            .output_frame
            .save(&out)
            .with_context(|| format!("failed to write {}", out.display()))?;
        info!(
            "{} -> {} ({} faces)",
            input,
            out.display(),
            result.metric("faces_processed").unwrap_or(0.0)
        );
    }

    if let Some(mean) = frame_times.get_mean() {
        info!("mean frame time {:.1} ms", mean);
    }
    Ok(())
}
