use std::fs::File;
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::RgbImage;
use tracing::{debug, error, info, warn};

pub const DEFAULT_VIDEO_CODEC: &str = "mpeg4";
pub const DEFAULT_JPEG_QUALITY: u8 = 95;

/// Destination for the corrected output sequence.
pub trait FrameSink {
    /// Write output frame `index`. Indices arrive in order starting at 0.
    fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<()>;

    /// Flush and close the destination.
    fn finish(&mut self) -> Result<()>;
}

/// Encodes frames into a video container by piping raw RGB24 into the ffmpeg CLI.
pub struct VideoEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    path: PathBuf,
    width: u32,
    height: u32,
    frames_written: u64,
    finished: bool,
}

impl VideoEncoder {
    /// Create `path` and start an encoder for `width`x`height` frames at `fps`.
    pub fn create(path: &Path, width: u32, height: u32, fps: f64, codec: &str) -> Result<Self> {
        Self::create_with_program("ffmpeg", path, width, height, fps, codec)
    }

    pub(crate) fn create_with_program(
        program: &str,
        path: &Path,
        width: u32,
        height: u32,
        fps: f64,
        codec: &str,
    ) -> Result<Self> {
        // ffmpeg only reports an unwritable destination after it has consumed
        // input, so check creatability up front.
        File::create(path).with_context(|| format!("cannot create {}", path.display()))?;

        info!(?path, program, width, height, fps, codec, "spawning encoder process");

        let child = Command::new(program)
            .args(["-y", "-v", "error"])
            .args(["-f", "rawvideo", "-pix_fmt", "rgb24"])
            .args(["-s", &format!("{width}x{height}")])
            .args(["-r", &fps.to_string()])
            .args(["-i", "pipe:0"])
            .args(["-an", "-c:v", codec, "-q:v", "3", "-pix_fmt", "yuv420p"])
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn();
        let mut child = match child {
            Ok(child) => child,
            Err(e) => {
                // Leave no empty placeholder behind.
                let _ = std::fs::remove_file(path);
                return Err(e).context("failed to spawn ffmpeg, is ffmpeg installed?");
            }
        };

        let stdin = child.stdin.take().context("ffmpeg stdin not available")?;

        Ok(Self {
            child,
            stdin: Some(stdin),
            path: path.to_path_buf(),
            width,
            height,
            frames_written: 0,
            finished: false,
        })
    }

    fn stderr_text(&mut self) -> String {
        let mut text = String::new();
        if let Some(stderr) = self.child.stderr.as_mut() {
            let _ = stderr.read_to_string(&mut text);
        }
        text.trim().to_string()
    }
}

impl FrameSink for VideoEncoder {
    fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<()> {
        if image.dimensions() != (self.width, self.height) {
            bail!(
                "frame {index} is {}x{}, encoder expects {}x{}",
                image.width(),
                image.height(),
                self.width,
                self.height
            );
        }

        let stdin = self.stdin.as_mut().context("encoder already finished")?;
        if let Err(e) = stdin.write_all(image.as_raw()) {
            // The pipe closes when ffmpeg exits early; its stderr says why.
            self.stdin = None;
            let _ = self.child.wait();
            let stderr = self.stderr_text();
            error!(frame = index, %e, %stderr, "failed to write frame to ffmpeg");
            bail!("ffmpeg rejected frame {index}: {e} ({stderr})");
        }

        self.frames_written += 1;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        if self.finished {
            return Ok(());
        }
        self.finished = true;

        // Closing stdin signals end of input.
        drop(self.stdin.take());
        let status = self.child.wait().context("failed to wait for ffmpeg")?;
        if !status.success() {
            let stderr = self.stderr_text();
            error!(?status, %stderr, path = ?self.path, "ffmpeg encoder failed");
            bail!("ffmpeg encoder exited with {status}: {stderr}");
        }

        info!(path = ?self.path, frames = self.frames_written, "output video written");
        Ok(())
    }
}

impl Drop for VideoEncoder {
    fn drop(&mut self) {
        if !self.finished {
            warn!(path = ?self.path, "encoder dropped before finishing, killing ffmpeg");
            drop(self.stdin.take());
            let _ = self.child.kill();
            let _ = self.child.wait();
        }
    }
}

/// Saves every frame as `frame_NNNNN.jpg` in a directory.
pub struct FrameDirectory {
    dir: PathBuf,
    quality: u8,
    frames_written: u64,
}

impl FrameDirectory {
    /// The directory must already exist.
    pub fn new(dir: &Path, quality: u8) -> Self {
        Self {
            dir: dir.to_path_buf(),
            quality: quality.clamp(1, 100),
            frames_written: 0,
        }
    }

    pub fn frame_path(&self, index: u64) -> PathBuf {
        self.dir.join(frame_file_name(index))
    }
}

pub fn frame_file_name(index: u64) -> String {
    format!("frame_{index:05}.jpg")
}

impl FrameSink for FrameDirectory {
    fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<()> {
        let path = self.frame_path(index);
        let file = File::create(&path)
            .with_context(|| format!("failed to create {}", path.display()))?;
        let mut writer = BufWriter::new(file);
        JpegEncoder::new_with_quality(&mut writer, self.quality)
            .encode_image(image)
            .with_context(|| format!("failed to encode {}", path.display()))?;
        writer
            .flush()
            .with_context(|| format!("failed to write {}", path.display()))?;

        self.frames_written += 1;
        debug!(?path, "saved frame");
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        info!(dir = ?self.dir, frames = self.frames_written, "frame directory written");
        Ok(())
    }
}

/// Writes every frame to two sinks, `first` before `second`.
pub struct Tee<A, B> {
    pub first: A,
    pub second: B,
}

impl<A: FrameSink, B: FrameSink> FrameSink for Tee<A, B> {
    fn write_frame(&mut self, index: u64, image: &RgbImage) -> Result<()> {
        self.first.write_frame(index, image)?;
        self.second.write_frame(index, image)
    }

    fn finish(&mut self) -> Result<()> {
        self.first.finish()?;
        self.second.finish()
    }
}


#[cfg(test)]
mod tests {
    use image::Rgb;

    use super::testing::MemorySink;
    use super::*;

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(frame_file_name(0), "frame_00000.jpg");
        assert_eq!(frame_file_name(49), "frame_00049.jpg");
        assert_eq!(frame_file_name(123456), "frame_123456.jpg");
    }

    #[test]
    fn frame_directory_writes_readable_jpegs() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FrameDirectory::new(dir.path(), DEFAULT_JPEG_QUALITY);
        let image = RgbImage::from_pixel(16, 8, Rgb([200, 30, 30]));

        sink.write_frame(0, &image).unwrap();
        sink.write_frame(1, &image).unwrap();
        sink.finish().unwrap();

        let decoded = image::open(dir.path().join("frame_00001.jpg")).unwrap().to_rgb8();
        assert_eq!(decoded.dimensions(), (16, 8));
        let px = decoded.get_pixel(8, 4);
        assert!(px[0] > 150 && px[1] < 80, "unexpected colour {px:?}");
    }

    #[test]
    fn frame_directory_fails_when_directory_is_missing() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FrameDirectory::new(&dir.path().join("missing"), 90);
        let image = RgbImage::new(2, 2);
        assert!(sink.write_frame(0, &image).is_err());
    }

    #[test]
    fn tee_writes_to_both_sinks() {
        let mut tee = Tee {
            first: MemorySink::default(),
            second: MemorySink::default(),
        };
        tee.write_frame(0, &RgbImage::new(1, 1)).unwrap();
        tee.finish().unwrap();

        assert_eq!(tee.first.frames.len(), 1);
        assert_eq!(tee.second.frames.len(), 1);
        assert!(tee.first.finished && tee.second.finished);
    }

    #[test]
    fn encoder_rejects_uncreatable_destination() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("no_such_dir").join("out.mp4");
        let err = VideoEncoder::create(&path, 4, 4, 5.0, DEFAULT_VIDEO_CODEC).err().unwrap();
        assert!(format!("{err:#}").contains("cannot create"));
    }

    #[test]
    fn spawn_failure_removes_placeholder_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.mp4");
        let err = VideoEncoder::create_with_program(
            "framepace-no-such-encoder",
            &path,
            4,
            4,
            5.0,
            DEFAULT_VIDEO_CODEC,
        )
        .err()
        .unwrap();
        assert!(format!("{err:#}").contains("failed to spawn"));
        assert!(!path.exists());
    }
}
