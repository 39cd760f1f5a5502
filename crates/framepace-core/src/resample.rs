//! Timestamp-based conversion of a variable-rate frame stream into a fixed-rate one.
//!
//! Frames are selected against sample points spaced `1 / target_fps` apart,
//! starting at 0. A source frame is emitted once for every sample point its
//! timestamp has reached, so a stalled source repeats its last frame instead
//! of shifting later frames earlier in time. The final output length is
//! forced to `max(1, round(last_timestamp * target_fps))`.

use std::collections::VecDeque;

use tracing::{debug, info, warn};

use crate::error::ResampleError;

/// Tolerance for floating-point jitter when comparing a timestamp with a sample point.
pub const EMIT_EPSILON: f64 = 1e-6;

/// Timestamp of a decoded frame, in seconds.
///
/// The backend-reported position is used when positive. Otherwise the
/// timestamp is derived from the 0-based frame number and the nominal rate,
/// which is only possible when that rate is known.
pub fn frame_timestamp(position_seconds: f64, frame_number: u32, nominal_fps: Option<f64>) -> f64 {
    if position_seconds > 0.0 {
        return position_seconds;
    }
    match nominal_fps {
        Some(fps) if fps > 0.0 => f64::from(frame_number) / fps,
        _ => position_seconds,
    }
}

/// Exact number of output frames for a source whose last frame is at `duration_seconds`.
///
/// Halves round to even.
pub fn target_frame_count(duration_seconds: f64, target_fps: f64) -> u64 {
    let exact = (duration_seconds * target_fps).round_ties_even();
    if exact.is_finite() && exact > 1.0 {
        exact as u64
    } else {
        1
    }
}

/// How a produced sequence must be corrected to reach the target length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LengthCorrection {
    Exact,
    /// Repeat the final sampled frame this many times at the tail.
    Pad(u64),
    /// Drop this many frames from the tail.
    Truncate(u64),
}

impl LengthCorrection {
    pub fn between(produced: u64, target: u64) -> Self {
        use std::cmp::Ordering;
        match produced.cmp(&target) {
            Ordering::Equal => LengthCorrection::Exact,
            Ordering::Less => LengthCorrection::Pad(target - produced),
            Ordering::Greater => LengthCorrection::Truncate(produced - target),
        }
    }
}

/// Statistics of a completed resampling run.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResampleSummary {
    pub target_fps: f64,
    /// Frames read from the source.
    pub source_frames: u64,
    /// Sample points emitted before length correction.
    pub sampled_frames: u64,
    /// Frames written after length correction.
    pub output_frames: u64,
    /// Timestamp of the last source frame.
    pub estimated_duration_seconds: f64,
    pub correction: LengthCorrection,
}

impl ResampleSummary {
    pub fn output_duration_seconds(&self) -> f64 {
        self.output_frames as f64 / self.target_fps
    }
}

/// One source frame emitted for `count` consecutive sample points.
struct Run<F> {
    frame: F,
    count: u64,
}

/// Streaming resampler.
///
/// Output index `i` is handed to the sink as soon as `i` is below
/// `max(1, round(last_seen_time * target_fps))`. That bound never shrinks
/// because timestamps are non-decreasing, so anything written is part of the
/// final sequence. Only the few sample points past the bound stay buffered.
pub struct Resampler<F> {
    target_fps: f64,
    interval: f64,
    next_emit_time: f64,
    last_seen_time: f64,
    source_frames: u64,
    emitted: u64,
    written: u64,
    pending: VecDeque<Run<F>>,
    last_written: Option<F>,
}

impl<F> Resampler<F> {
    pub fn new(target_fps: f64) -> Result<Self, ResampleError> {
        if !target_fps.is_finite() || target_fps <= 0.0 {
            return Err(ResampleError::InvalidTargetFps(target_fps));
        }
        Ok(Self {
            target_fps,
            interval: 1.0 / target_fps,
            next_emit_time: 0.0,
            last_seen_time: 0.0,
            source_frames: 0,
            emitted: 0,
            written: 0,
            pending: VecDeque::new(),
            last_written: None,
        })
    }

    pub fn source_frames(&self) -> u64 {
        self.source_frames
    }

    /// Feed the next source frame.
    ///
    /// `sink` receives `(output_index, frame)` for every output frame that is
    /// final, in increasing index order.
    pub fn push<S>(&mut self, timestamp: f64, frame: F, sink: &mut S) -> Result<(), ResampleError>
    where
        S: FnMut(u64, &F) -> Result<(), ResampleError>,
    {
        // Timestamps are non-decreasing by contract; hold the previous value otherwise.
        let timestamp = if timestamp.is_finite() && timestamp >= self.last_seen_time {
            timestamp
        } else {
            warn!(
                timestamp,
                previous = self.last_seen_time,
                frame = self.source_frames,
                "unusable or backwards source timestamp, holding previous value"
            );
            self.last_seen_time
        };

        self.source_frames += 1;
        self.last_seen_time = timestamp;

        let mut count = 0;
        while timestamp + EMIT_EPSILON >= self.next_emit_time {
            count += 1;
            self.next_emit_time += self.interval;
        }

        if count > 0 {
            if count > 1 {
                debug!(timestamp, count, "source frame covers several sample points");
            }
            self.emitted += count;
            self.pending.push_back(Run { frame, count });
        }

        let bound = target_frame_count(self.last_seen_time, self.target_fps);
        self.drain(bound, sink)
    }

    /// Apply length correction and write every remaining output frame.
    pub fn finish<S>(mut self, sink: &mut S) -> Result<ResampleSummary, ResampleError>
    where
        S: FnMut(u64, &F) -> Result<(), ResampleError>,
    {
        if self.source_frames == 0 {
            return Err(ResampleError::EmptySource);
        }

        let target = target_frame_count(self.last_seen_time, self.target_fps);
        let correction = LengthCorrection::between(self.emitted, target);

        match correction {
            LengthCorrection::Exact => {}
            LengthCorrection::Pad(n) => info!(
                sampled = self.emitted,
                target,
                padding = n,
                "padding tail with final sampled frame"
            ),
            LengthCorrection::Truncate(n) => info!(
                sampled = self.emitted,
                target,
                dropped = n,
                "truncating surplus sample points"
            ),
        }

        self.drain(target, sink)?;

        if self.written < target {
            let last = self
                .pending
                .back()
                .map(|run| &run.frame)
                .or(self.last_written.as_ref())
                .ok_or(ResampleError::EmptySource)?;
            while self.written < target {
                sink(self.written, last)?;
                self.written += 1;
            }
        }

        Ok(ResampleSummary {
            target_fps: self.target_fps,
            source_frames: self.source_frames,
            sampled_frames: self.emitted,
            output_frames: self.written,
            estimated_duration_seconds: self.last_seen_time,
            correction,
        })
    }

    /// Write pending sample points while their index is below `bound`.
    fn drain<S>(&mut self, bound: u64, sink: &mut S) -> Result<(), ResampleError>
    where
        S: FnMut(u64, &F) -> Result<(), ResampleError>,
    {
        while self.written < bound {
            let Some(run) = self.pending.front_mut() else {
                break;
            };
            sink(self.written, &run.frame)?;
            self.written += 1;
            run.count -= 1;
            if run.count == 0 {
                if let Some(run) = self.pending.pop_front() {
                    self.last_written = Some(run.frame);
                }
            }
        }
        Ok(())
    }
}
