mod cli;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use framepace_core::pipeline::{self, ResampleConfig, ResampleReport};
use framepace_core::resample::LengthCorrection;
use framepace_core::video::backend::BackendKind;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = cli::Cli::parse();

    match cli.command {
        cli::Command::Resample {
            input,
            output_video,
            frames_dir,
            encode,
        } => {
            let config = build_config(
                ResampleConfig::new(input, output_video, frames_dir, encode.target_fps),
                encode,
            );
            resample(&config)
        }
        cli::Command::Project {
            root,
            name,
            ext,
            encode,
        } => {
            let config = build_config(
                ResampleConfig::from_project_layout(&root, &name, &ext, encode.target_fps),
                encode,
            );
            resample(&config)
        }
        cli::Command::Probe { input, backends } => probe(input, &backends),
    }
}

fn build_config(base: ResampleConfig, encode: cli::EncodeArgs) -> ResampleConfig {
    ResampleConfig {
        backends: encode.backends,
        video_codec: encode.codec,
        jpeg_quality: encode.jpeg_quality,
        ..base
    }
}

fn resample(config: &ResampleConfig) -> Result<()> {
    info!(
        input = ?config.input,
        target_fps = config.target_fps,
        backends = ?config.backends,
        "starting resample"
    );

    let report = pipeline::run_resample(config)
        .with_context(|| format!("failed to resample {}", config.input.display()))?;

    print_report(&report);
    Ok(())
}

fn print_report(report: &ResampleReport) {
    let summary = &report.summary;

    info!(
        backend = %report.backend,
        source_fps = report.source_fps,
        width = report.source.width,
        height = report.source.height,
        "input properties"
    );

    match summary.correction {
        LengthCorrection::Exact => {}
        LengthCorrection::Pad(n) => warn!(frames = n, "output was padded with the final frame"),
        LengthCorrection::Truncate(n) => info!(frames = n, "surplus sample points dropped"),
    }

    info!(
        estimated_duration_seconds = %format!("{:.3}", summary.estimated_duration_seconds),
        source_frames = summary.source_frames,
        output_frames = summary.output_frames,
        target_fps = summary.target_fps,
        output_duration_seconds = %format!("{:.3}", summary.output_duration_seconds()),
        "resample finished"
    );
    info!(output_video = ?report.output_video, frames_dir = ?report.frames_dir, "outputs written");
}

fn probe(input: PathBuf, backends: &[BackendKind]) -> Result<()> {
    let report = pipeline::probe_source(&input, backends)
        .with_context(|| format!("failed to probe {}", input.display()))?;

    info!(
        backend = %report.backend,
        width = report.source.width,
        height = report.source.height,
        fps = ?report.source.fps,
        "probe complete"
    );
    Ok(())
}
