use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use anyhow::{Context, Result};
use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, DynamicImage, Frames, ImageDecoder};
use tracing::{debug, info};

use super::backend::{Backend, FrameSource};
use super::frame::{Frame, SourceInfo};

/// Decodes animated GIFs in-process. GIFs carry per-frame delays, so they are
/// variable-rate sources with no nominal frame rate.
pub struct GifBackend;

impl Backend for GifBackend {
    fn name(&self) -> &str {
        "gif"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(GifSource::open(path)?))
    }
}

pub struct GifSource {
    frames: Frames<'static>,
    info: SourceInfo,
    frame_count: u32,
    /// Start time of the next frame, in milliseconds.
    elapsed_ms: f64,
}

impl GifSource {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        let decoder = GifDecoder::new(BufReader::new(file)).context("not a readable GIF")?;
        let (width, height) = decoder.dimensions();

        info!(?path, width, height, "gif decoder opened");

        Ok(Self {
            frames: decoder.into_frames(),
            info: SourceInfo {
                width,
                height,
                fps: None,
            },
            frame_count: 0,
            elapsed_ms: 0.0,
        })
    }
}

impl FrameSource for GifSource {
    fn info(&self) -> SourceInfo {
        self.info
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(next) = self.frames.next() else {
            info!(total_frames = self.frame_count, "gif stream ended");
            return Ok(None);
        };
        let frame = next.with_context(|| format!("failed to decode gif frame {}", self.frame_count))?;

        let (numer, denom) = frame.delay().numer_denom_ms();
        let position_seconds = self.elapsed_ms / 1000.0;
        if denom > 0 {
            self.elapsed_ms += f64::from(numer) / f64::from(denom);
        }

        let image = DynamicImage::ImageRgba8(frame.into_buffer()).into_rgb8();
        let frame_number = self.frame_count;
        self.frame_count += 1;

        debug!(frame_number, position_seconds, "decoded gif frame");

        Ok(Some(Frame {
            image,
            frame_number,
            position_seconds,
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use image::codecs::gif::GifEncoder;
    use image::{Delay, Rgba, RgbaImage};

    use super::*;

    fn write_gif(path: &Path, delays_ms: &[u64]) {
        let file = File::create(path).unwrap();
        let mut encoder = GifEncoder::new(file);
        for (i, ms) in delays_ms.iter().enumerate() {
            let buffer = RgbaImage::from_pixel(6, 4, Rgba([(i * 40) as u8, 0, 0, 255]));
            let delay = Delay::from_saturating_duration(Duration::from_millis(*ms));
            encoder
                .encode_frame(image::Frame::from_parts(buffer, 0, 0, delay))
                .unwrap();
        }
    }

    #[test]
    fn positions_accumulate_frame_delays() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.gif");
        write_gif(&path, &[100, 300, 200]);

        let mut source = GifBackend.open(&path).unwrap();
        assert_eq!(source.info().width, 6);
        assert_eq!(source.info().fps, None);

        let mut positions = Vec::new();
        while let Some(frame) = source.next_frame().unwrap() {
            assert_eq!(frame.image.dimensions(), (6, 4));
            positions.push(frame.position_seconds);
        }
        assert_eq!(positions.len(), 3);
        assert!((positions[0] - 0.0).abs() < 1e-9);
        assert!((positions[1] - 0.1).abs() < 1e-9);
        assert!((positions[2] - 0.4).abs() < 1e-9);
    }

    #[test]
    fn rejects_files_that_are_not_gifs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("clip.mp4");
        std::fs::write(&path, b"\x00\x00\x00\x18ftypmp42").unwrap();

        assert!(GifBackend.open(&path).is_err());
    }
}
