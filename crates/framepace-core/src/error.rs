use std::path::PathBuf;

use thiserror::Error;

use crate::video::backend::BackendAttempt;

#[derive(Debug, Error)]
pub enum ResampleError {
    #[error("target frame rate must be a positive finite number, got {0}")]
    InvalidTargetFps(f64),

    #[error("input video does not exist: {}", .0.display())]
    MissingInput(PathBuf),

    #[error(
        "source unreadable by every backend (tried {}): {}",
        format_attempts(.attempts),
        .path.display()
    )]
    BackendsExhausted {
        path: PathBuf,
        attempts: Vec<BackendAttempt>,
    },

    #[error("empty source: no frames could be decoded")]
    EmptySource,

    #[error("failed to create output directory {}: {source}", .path.display())]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to create output video {}: {reason:#}", .path.display())]
    Encode { path: PathBuf, reason: anyhow::Error },

    #[error(
        "failed to finalize outputs {} and {}: {reason:#}",
        .video.display(),
        .frames_dir.display()
    )]
    Finalize {
        video: PathBuf,
        frames_dir: PathBuf,
        reason: anyhow::Error,
    },

    #[error("failed to decode source frame: {0:#}")]
    Decode(anyhow::Error),

    #[error("failed to write output frame {index}: {reason:#}")]
    FrameWrite { index: u64, reason: anyhow::Error },
}

fn format_attempts(attempts: &[BackendAttempt]) -> String {
    if attempts.is_empty() {
        return "no backends".to_string();
    }
    attempts
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}
