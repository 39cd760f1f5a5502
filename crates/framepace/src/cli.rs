use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use framepace_core::output::{DEFAULT_JPEG_QUALITY, DEFAULT_VIDEO_CODEC};
use framepace_core::pipeline::DEFAULT_TARGET_FPS;
use framepace_core::video::backend::BackendKind;

#[derive(Parser)]
#[command(name = "framepace", about = "Resample videos to a fixed frame rate")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Resample a video file to a fixed frame rate.
    Resample {
        /// Path to the input video file (MP4, GIF, etc.).
        #[arg(short, long)]
        input: PathBuf,

        /// Path to write the resampled video.
        #[arg(short, long)]
        output_video: PathBuf,

        /// Directory to write one JPEG per output frame.
        #[arg(short, long)]
        frames_dir: PathBuf,

        #[command(flatten)]
        encode: EncodeArgs,
    },

    /// Resample a clip stored in the DATA_PROCESSING project layout.
    Project {
        /// Project root containing DATA_PROCESSING/.
        #[arg(short, long)]
        root: PathBuf,

        /// Clip name without extension, read from DATA_PROCESSING/Edit/.
        #[arg(short, long)]
        name: String,

        /// Input file extension.
        #[arg(long, default_value = ".mp4")]
        ext: String,

        #[command(flatten)]
        encode: EncodeArgs,
    },

    /// Report which backend opens a video and what it detects.
    Probe {
        #[arg(short, long)]
        input: PathBuf,

        /// Backends to try, in order. May be repeated.
        #[arg(short, long = "backend", default_values_t = BackendKind::DEFAULT_ORDER)]
        backends: Vec<BackendKind>,
    },
}

#[derive(Args)]
pub struct EncodeArgs {
    /// Output frames per second.
    #[arg(short, long, default_value_t = DEFAULT_TARGET_FPS)]
    pub target_fps: f64,

    /// Backends to try, in order. May be repeated.
    #[arg(short, long = "backend", default_values_t = BackendKind::DEFAULT_ORDER)]
    pub backends: Vec<BackendKind>,

    /// ffmpeg encoder for the output video.
    #[arg(long, default_value = DEFAULT_VIDEO_CODEC)]
    pub codec: String,

    /// JPEG quality (1-100) for the frame images.
    #[arg(long, default_value_t = DEFAULT_JPEG_QUALITY, value_parser = clap::value_parser!(u8).range(1..=100))]
    pub jpeg_quality: u8,
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn resample_defaults() {
        let cli = Cli::parse_from([
            "framepace", "resample", "-i", "in.mp4", "-o", "out.mp4", "-f", "frames",
        ]);
        let Command::Resample { encode, .. } = cli.command else {
            panic!("expected resample command");
        };
        assert_eq!(encode.target_fps, 5.0);
        assert_eq!(encode.backends, BackendKind::DEFAULT_ORDER.to_vec());
        assert_eq!(encode.codec, "mpeg4");
        assert_eq!(encode.jpeg_quality, 95);
    }

    #[test]
    fn backends_can_be_reordered() {
        let cli = Cli::parse_from([
            "framepace", "probe", "-i", "in.gif", "-b", "gif", "-b", "ffmpeg",
        ]);
        let Command::Probe { backends, .. } = cli.command else {
            panic!("expected probe command");
        };
        assert_eq!(backends, vec![BackendKind::Gif, BackendKind::Ffmpeg]);
    }

    #[test]
    fn unknown_backend_is_rejected() {
        assert!(Cli::try_parse_from(["framepace", "probe", "-i", "x", "-b", "dshow"]).is_err());
    }
}
