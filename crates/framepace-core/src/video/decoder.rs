use std::io::Read;
use std::path::Path;
use std::process::{Child, Command, Stdio};

use anyhow::{bail, Context, Result};
use image::RgbImage;
use tracing::{debug, error, info, warn};

use super::backend::{Backend, FrameSource};
use super::frame::{Frame, SourceInfo};

/// Video metadata obtained by probing with ffprobe.
struct ProbeResult {
    width: u32,
    height: u32,
    fps: Option<f64>,
}

fn probe(path: &Path) -> Result<ProbeResult> {
    info!(?path, "probing video metadata with ffprobe");

    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "stream=width,height,r_frame_rate",
            "-of", "csv=p=0",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe, is ffmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(%stderr, ?path, "ffprobe failed");
        bail!("ffprobe failed: {}", stderr.trim());
    }

    parse_stream_line(&String::from_utf8_lossy(&output.stdout))
}

/// Parse ffprobe's "width,height,num/den" stream line.
fn parse_stream_line(stdout: &str) -> Result<ProbeResult> {
    let parts: Vec<&str> = stdout.trim().split(',').collect();
    if parts.len() < 3 {
        bail!("no video stream found (ffprobe printed {:?})", stdout.trim());
    }

    let width: u32 = parts[0].parse().context("failed to parse width")?;
    let height: u32 = parts[1].parse().context("failed to parse height")?;
    if width == 0 || height == 0 {
        bail!("invalid video dimensions: {width}x{height}");
    }

    let fps = if let Some((num, den)) = parts[2].split_once('/') {
        let num: f64 = num.parse().context("failed to parse fps numerator")?;
        let den: f64 = den.parse().context("failed to parse fps denominator")?;
        if den > 0.0 { num / den } else { 0.0 }
    } else {
        parts[2].parse().unwrap_or(0.0)
    };

    Ok(ProbeResult {
        width,
        height,
        fps: (fps > 0.0).then_some(fps),
    })
}

/// Read presentation timestamps of every displayed video packet, in
/// presentation order, rebased so the earliest one is 0.
fn probe_timestamps(path: &Path) -> Result<Vec<f64>> {
    let output = Command::new("ffprobe")
        .args([
            "-v", "error",
            "-select_streams", "v:0",
            "-show_entries", "packet=pts_time,flags",
            "-of", "csv=p=0",
        ])
        .arg(path)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to run ffprobe for packet timestamps")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!("ffprobe packet listing failed: {}", stderr.trim());
    }

    Ok(parse_packet_times(&String::from_utf8_lossy(&output.stdout)))
}

/// Parses `pts_time,flags` lines. Packets without a timestamp ("N/A") and
/// packets flagged for discard (`D`, e.g. cut by an edit list) are skipped.
fn parse_packet_times(stdout: &str) -> Vec<f64> {
    let mut times: Vec<f64> = stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.trim().split(',');
            let pts = fields.next()?.trim().parse::<f64>().ok()?;
            let discarded = fields.next().is_some_and(|flags| flags.contains('D'));
            (!discarded).then_some(pts)
        })
        .filter(|t| t.is_finite())
        .collect();
    times.sort_by(f64::total_cmp);

    if let Some(&start) = times.first() {
        for t in &mut times {
            *t -= start;
        }
    }
    times
}

/// Opens sources through the ffmpeg and ffprobe command-line tools.
pub struct FfmpegBackend;

impl Backend for FfmpegBackend {
    fn name(&self) -> &str {
        "ffmpeg"
    }

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>> {
        Ok(Box::new(VideoDecoder::open(path)?))
    }
}

/// Decodes video frames by piping raw RGB24 data from the ffmpeg CLI.
pub struct VideoDecoder {
    child: Child,
    info: SourceInfo,
    timestamps: Vec<f64>,
    frame_count: u32,
    frame_bytes: usize,
}

impl VideoDecoder {
    /// Open a video file for decoding.
    pub fn open(path: &Path) -> Result<Self> {
        if !path.exists() {
            bail!("video file does not exist: {}", path.display());
        }

        let probed = probe(path)?;
        if probed.fps.is_none() {
            warn!(?path, "ffprobe reported no frame rate");
        }

        let timestamps = probe_timestamps(path)?;
        debug!(packets = timestamps.len(), "packet timestamps loaded");

        info!(?path, "spawning ffmpeg decoder process");

        // passthrough keeps ffmpeg from duplicating or dropping frames of
        // variable-rate sources.
        let child = Command::new("ffmpeg")
            .args(["-i"])
            .arg(path)
            .args([
                "-map", "0:v:0",
                "-fps_mode", "passthrough",
                "-f", "rawvideo",
                "-pix_fmt", "rgb24",
                "-v", "error",
                "pipe:1",
            ])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .context("failed to spawn ffmpeg, is ffmpeg installed?")?;

        let frame_bytes = (probed.width as usize) * (probed.height as usize) * 3;

        info!(
            width = probed.width,
            height = probed.height,
            fps = ?probed.fps,
            frame_bytes,
            "video decoder opened"
        );

        Ok(Self {
            child,
            info: SourceInfo {
                width: probed.width,
                height: probed.height,
                fps: probed.fps,
            },
            timestamps,
            frame_count: 0,
            frame_bytes,
        })
    }
}

impl FrameSource for VideoDecoder {
    fn info(&self) -> SourceInfo {
        self.info
    }

    /// Read the next frame from the ffmpeg pipe, or `None` if the video is finished.
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let stdout = self
            .child
            .stdout
            .as_mut()
            .context("ffmpeg stdout not available")?;

        let mut buf = vec![0u8; self.frame_bytes];
        let mut read = 0;

        while read < self.frame_bytes {
            match stdout.read(&mut buf[read..]) {
                Ok(0) => {
                    if read == 0 {
                        info!(total_frames = self.frame_count, "video stream ended");
                        return Ok(None);
                    }
                    error!(
                        read_bytes = read,
                        expected_bytes = self.frame_bytes,
                        frame = self.frame_count,
                        "ffmpeg stream ended mid-frame"
                    );
                    bail!(
                        "ffmpeg stream ended mid-frame (read {read}/{} bytes)",
                        self.frame_bytes,
                    );
                }
                Ok(n) => read += n,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    error!(frame = self.frame_count, %e, "failed to read from ffmpeg pipe");
                    return Err(e).context("failed to read from ffmpeg pipe");
                }
            }
        }

        let image = RgbImage::from_raw(self.info.width, self.info.height, buf)
            .context("failed to create RgbImage from raw frame data")?;

        let frame_number = self.frame_count;
        // Decoded frames pair one-to-one with the non-discarded packets in
        // presentation order. Frames past the list report 0 so callers fall
        // back to the index.
        let position_seconds = self
            .timestamps
            .get(frame_number as usize)
            .copied()
            .unwrap_or(0.0);
        self.frame_count += 1;

        debug!(frame_number, position_seconds, "decoded frame");

        Ok(Some(Frame {
            image,
            frame_number,
            position_seconds,
        }))
    }
}

impl Drop for VideoDecoder {
    fn drop(&mut self) {
        info!(total_frames = self.frame_count, "closing video decoder");
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_rational_frame_rate() {
        let probed = parse_stream_line("1920,1080,30000/1001\n").unwrap();
        assert_eq!((probed.width, probed.height), (1920, 1080));
        let fps = probed.fps.unwrap();
        assert!((fps - 29.97).abs() < 0.01, "fps was {fps}");
    }

    #[test]
    fn zero_denominator_means_unknown_rate() {
        let probed = parse_stream_line("640,360,0/0").unwrap();
        assert_eq!(probed.fps, None);
    }

    #[test]
    fn empty_probe_output_is_an_error() {
        let err = parse_stream_line("").err().unwrap();
        assert!(err.to_string().contains("no video stream"));
    }

    #[test]
    fn packet_times_are_sorted_and_rebased() {
        let times = parse_packet_times("1.066667,___\n1.000000,K__\nN/A,___\n1.033333,\n");
        assert_eq!(times.len(), 3);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.033333).abs() < 1e-9);
        assert!((times[2] - 0.066667).abs() < 1e-9);
    }

    #[test]
    fn discarded_packets_do_not_shift_later_times() {
        // Leading packet cut by an edit list, then three displayed frames.
        let times = parse_packet_times("0.966667,K_D\n1.000000,K__\n1.033333,___\n1.066667,___\n");
        assert_eq!(times.len(), 3);
        assert_eq!(times[0], 0.0);
        assert!((times[1] - 0.033333).abs() < 1e-9);
        assert!((times[2] - 0.066667).abs() < 1e-9);
    }

    #[test]
    fn missing_file_fails_to_open() {
        let err = VideoDecoder::open(Path::new("/nonexistent/clip.mp4")).err().unwrap();
        assert!(err.to_string().contains("does not exist"));
    }
}
