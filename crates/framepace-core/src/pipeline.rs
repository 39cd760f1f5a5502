use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::ResampleError;
use crate::output::{
    FrameDirectory, FrameSink, Tee, VideoEncoder, DEFAULT_JPEG_QUALITY, DEFAULT_VIDEO_CODEC,
};
use crate::resample::{frame_timestamp, ResampleSummary, Resampler};
use crate::video::backend::{
    build_backends, open_with_fallback, Backend, BackendKind, FrameSource, OpenedSource,
};
use crate::video::frame::{Frame, SourceInfo};

/// Output rate used when no rate is requested.
pub const DEFAULT_TARGET_FPS: f64 = 5.0;
/// Nominal source rate assumed when the container does not report one.
pub const FALLBACK_SOURCE_FPS: f64 = 30.0;

/// Parameters for one resampling run.
#[derive(Debug, Clone)]
pub struct ResampleConfig {
    /// Source video file.
    pub input: PathBuf,
    /// Re-encoded video at the target rate.
    pub output_video: PathBuf,
    /// Directory receiving one JPEG per output frame.
    pub frames_dir: PathBuf,
    pub target_fps: f64,
    /// Backends to try, in priority order.
    pub backends: Vec<BackendKind>,
    /// ffmpeg encoder name for the output video.
    pub video_codec: String,
    pub jpeg_quality: u8,
}

impl ResampleConfig {
    pub fn new(input: PathBuf, output_video: PathBuf, frames_dir: PathBuf, target_fps: f64) -> Self {
        Self {
            input,
            output_video,
            frames_dir,
            target_fps,
            backends: BackendKind::DEFAULT_ORDER.to_vec(),
            video_codec: DEFAULT_VIDEO_CODEC.to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }

    /// Paths for a clip named `name` inside a data-processing project tree:
    ///
    /// - input: `<root>/DATA_PROCESSING/Edit/<name><ext>`
    /// - video: `<root>/DATA_PROCESSING/output_video/<name>_<fps>fps.mp4`
    /// - frames: `<root>/DATA_PROCESSING/output_frame/<name>/`
    pub fn from_project_layout(root: &Path, name: &str, ext: &str, target_fps: f64) -> Self {
        let base = root.join("DATA_PROCESSING");
        let ext = if ext.is_empty() || ext.starts_with('.') {
            ext.to_string()
        } else {
            format!(".{ext}")
        };
        Self::new(
            base.join("Edit").join(format!("{name}{ext}")),
            base.join("output_video")
                .join(format!("{name}_{}fps.mp4", format_rate(target_fps))),
            base.join("output_frame").join(name),
            target_fps,
        )
    }
}

/// `5.0` -> `5`, `12.5` -> `12.5`.
fn format_rate(fps: f64) -> String {
    if fps.fract() == 0.0 {
        format!("{fps:.0}")
    } else {
        fps.to_string()
    }
}

/// Result of a completed run.
#[derive(Debug, Clone)]
pub struct ResampleReport {
    pub backend: String,
    pub source: SourceInfo,
    /// Nominal source rate actually used for timestamp fallback.
    pub source_fps: f64,
    pub summary: ResampleSummary,
    pub output_video: PathBuf,
    pub frames_dir: PathBuf,
}

/// Backend and properties of a source, without resampling it.
#[derive(Debug, Clone)]
pub struct ProbeReport {
    pub backend: String,
    pub source: SourceInfo,
}

/// Resample `config.input` to `config.target_fps`, writing the output video
/// and the frame directory.
///
/// Nothing is created on disk until the source has been opened and shown to
/// contain at least one frame.
pub fn run_resample(config: &ResampleConfig) -> Result<ResampleReport, ResampleError> {
    run_resample_with_backends(config, &build_backends(&config.backends))
}

/// [`run_resample`] with an explicit backend list in place of `config.backends`.
pub fn run_resample_with_backends(
    config: &ResampleConfig,
    backends: &[Box<dyn Backend>],
) -> Result<ResampleReport, ResampleError> {
    let resampler = Resampler::new(config.target_fps)?;
    if !config.input.exists() {
        return Err(ResampleError::MissingInput(config.input.clone()));
    }

    info!(
        input = ?config.input,
        output_video = ?config.output_video,
        frames_dir = ?config.frames_dir,
        target_fps = config.target_fps,
        "resample starting"
    );

    let OpenedSource {
        backend, mut source, ..
    } = open_source(&config.input, backends)?;
    let info = source.info();

    let mut peeked = Peeked::new(source.as_mut())?;

    for dir in [config.output_video.parent(), Some(config.frames_dir.as_path())]
        .into_iter()
        .flatten()
        .filter(|dir| !dir.as_os_str().is_empty())
    {
        std::fs::create_dir_all(dir).map_err(|e| ResampleError::OutputDir {
            path: dir.to_path_buf(),
            source: e,
        })?;
    }

    let encoder = match VideoEncoder::create(
        &config.output_video,
        info.width,
        info.height,
        config.target_fps,
        &config.video_codec,
    ) {
        Ok(encoder) => encoder,
        Err(reason) => {
            // Release the source before reporting.
            drop(peeked);
            drop(source);
            return Err(ResampleError::Encode {
                path: config.output_video.clone(),
                reason,
            });
        }
    };
    let frames = FrameDirectory::new(&config.frames_dir, config.jpeg_quality);

    let mut sink = Tee {
        first: encoder,
        second: frames,
    };
    let (source_fps, summary) = stream(&mut peeked, info, resampler, &mut sink)?;
    sink.finish().map_err(|reason| ResampleError::Finalize {
        video: config.output_video.clone(),
        frames_dir: config.frames_dir.clone(),
        reason,
    })?;

    info!(
        estimated_duration_seconds = summary.estimated_duration_seconds,
        output_frames = summary.output_frames,
        output_duration_seconds = summary.output_duration_seconds(),
        target_fps = config.target_fps,
        "resample complete"
    );

    Ok(ResampleReport {
        backend,
        source: info,
        source_fps,
        summary,
        output_video: config.output_video.clone(),
        frames_dir: config.frames_dir.clone(),
    })
}

/// Resample an already opened source into `sink`.
///
/// Fails with `EmptySource` before touching the sink when the source has no frames.
pub fn resample_stream(
    source: &mut dyn FrameSource,
    target_fps: f64,
    sink: &mut dyn FrameSink,
) -> Result<ResampleSummary, ResampleError> {
    let resampler = Resampler::new(target_fps)?;
    let info = source.info();
    let mut peeked = Peeked::new(source)?;
    let (_, summary) = stream(&mut peeked, info, resampler, sink)?;
    Ok(summary)
}

/// Open `path` and report its backend and properties.
pub fn probe_source(path: &Path, kinds: &[BackendKind]) -> Result<ProbeReport, ResampleError> {
    if !path.exists() {
        return Err(ResampleError::MissingInput(path.to_path_buf()));
    }
    let backends = build_backends(kinds);
    let opened = open_source(path, &backends)?;
    Ok(ProbeReport {
        backend: opened.backend,
        source: opened.source.info(),
    })
}

/// Open through the backend list, logging each fallback.
fn open_source(path: &Path, backends: &[Box<dyn Backend>]) -> Result<OpenedSource, ResampleError> {
    match open_with_fallback(path, backends) {
        Ok(opened) => {
            for attempt in &opened.failed {
                info!(backend = %attempt.backend, reason = %attempt.reason, "backend could not open source");
            }
            let info = opened.source.info();
            info!(
                backend = %opened.backend,
                width = info.width,
                height = info.height,
                fps = ?info.fps,
                "opened source"
            );
            Ok(opened)
        }
        Err(attempts) => {
            for attempt in &attempts {
                warn!(backend = %attempt.backend, reason = %attempt.reason, "backend could not open source");
            }
            Err(ResampleError::BackendsExhausted {
                path: path.to_path_buf(),
                attempts,
            })
        }
    }
}

/// A source whose first frame has already been read.
struct Peeked<'a> {
    source: &'a mut dyn FrameSource,
    first: Option<Frame>,
}

impl<'a> Peeked<'a> {
    fn new(source: &'a mut dyn FrameSource) -> Result<Self, ResampleError> {
        let first = source.next_frame().map_err(ResampleError::Decode)?;
        if first.is_none() {
            return Err(ResampleError::EmptySource);
        }
        Ok(Self { source, first })
    }

    fn next_frame(&mut self) -> Result<Option<Frame>, ResampleError> {
        match self.first.take() {
            Some(frame) => Ok(Some(frame)),
            None => self.source.next_frame().map_err(ResampleError::Decode),
        }
    }
}

fn stream(
    source: &mut Peeked<'_>,
    info: SourceInfo,
    mut resampler: Resampler<image::RgbImage>,
    sink: &mut dyn FrameSink,
) -> Result<(f64, ResampleSummary), ResampleError> {
    let source_fps = match info.fps {
        Some(fps) if fps > 0.0 => fps,
        _ => {
            info!(fallback = FALLBACK_SOURCE_FPS, "source reports no frame rate, assuming fallback");
            FALLBACK_SOURCE_FPS
        }
    };

    let mut write = |index: u64, image: &image::RgbImage| {
        sink.write_frame(index, image)
            .map_err(|reason| ResampleError::FrameWrite { index, reason })
    };

    while let Some(frame) = source.next_frame()? {
        let t = frame_timestamp(frame.position_seconds, frame.frame_number, Some(source_fps));
        resampler.push(t, frame.image, &mut write)?;
    }

    info!(source_frames = resampler.source_frames(), "source exhausted");
    let summary = resampler.finish(&mut write)?;
    Ok((source_fps, summary))
}
