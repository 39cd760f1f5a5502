//! Fixed-rate resampling of variable-frame-rate video.
//!
//! A source is opened through an ordered list of [`video::backend::Backend`]s,
//! its frames are selected against wall-clock sample points by
//! [`resample::Resampler`], and the exact-length result is written to a video
//! container and a directory of numbered JPEG stills.

pub mod error;
pub mod output;
pub mod pipeline;
pub mod resample;
pub mod video;

pub use error::ResampleError;
pub use pipeline::{
    probe_source, run_resample, run_resample_with_backends, ProbeReport, ResampleConfig,
    ResampleReport,
};
