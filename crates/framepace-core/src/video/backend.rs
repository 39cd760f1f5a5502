use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;

use super::decoder::FfmpegBackend;
use super::frame::{Frame, SourceInfo};
use super::gif::GifBackend;

/// A sequentially readable stream of decoded frames.
///
/// Implementations release their underlying handle on drop.
pub trait FrameSource {
    fn info(&self) -> SourceInfo;

    /// Read the next frame, or `None` once the stream is exhausted.
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// A decoding implementation that may or may not be able to open a given file.
pub trait Backend {
    fn name(&self) -> &str;

    fn open(&self, path: &Path) -> Result<Box<dyn FrameSource>>;
}

/// Identifies a built-in backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Ffmpeg,
    Gif,
}

impl BackendKind {
    /// Priority order used when the caller does not choose.
    pub const DEFAULT_ORDER: [BackendKind; 2] = [BackendKind::Ffmpeg, BackendKind::Gif];

    pub fn build(self) -> Box<dyn Backend> {
        match self {
            BackendKind::Ffmpeg => Box::new(FfmpegBackend),
            BackendKind::Gif => Box::new(GifBackend),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendKind::Ffmpeg => write!(f, "ffmpeg"),
            BackendKind::Gif => write!(f, "gif"),
        }
    }
}

impl FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "ffmpeg" => Ok(BackendKind::Ffmpeg),
            "gif" => Ok(BackendKind::Gif),
            other => Err(format!("unknown backend '{other}' (expected ffmpeg or gif)")),
        }
    }
}

pub fn build_backends(kinds: &[BackendKind]) -> Vec<Box<dyn Backend>> {
    kinds.iter().map(|k| k.build()).collect()
}

/// Outcome of one backend's attempt to open a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendAttempt {
    pub backend: String,
    pub reason: String,
}

impl fmt::Display for BackendAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.backend, self.reason)
    }
}

/// A source opened by the named backend.
pub struct OpenedSource {
    pub backend: String,
    pub source: Box<dyn FrameSource>,
    /// Backends that were tried and failed before this one, in order.
    pub failed: Vec<BackendAttempt>,
}

/// Try each backend in order, stopping at the first that opens `path`.
///
/// Every backend is attempted at most once and none after the first success.
/// On exhaustion, returns every attempt with its failure reason.
pub fn open_with_fallback(
    path: &Path,
    backends: &[Box<dyn Backend>],
) -> Result<OpenedSource, Vec<BackendAttempt>> {
    let mut failed = Vec::with_capacity(backends.len());

    for backend in backends {
        match backend.open(path) {
            Ok(source) => {
                return Ok(OpenedSource {
                    backend: backend.name().to_string(),
                    source,
                    failed,
                });
            }
            Err(e) => failed.push(BackendAttempt {
                backend: backend.name().to_string(),
                reason: format!("{e:#}"),
            }),
        }
    }

    Err(failed)
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::RefCell;
    use std::rc::Rc;

    use anyhow::{bail, Result};
    use image::{Rgb, RgbImage};

    use super::*;

    /// In-memory source yielding solid-colour frames at the given positions.
    pub struct MemorySource {
        pub info: SourceInfo,
        pub positions: Vec<f64>,
        pub next: usize,
    }

    impl MemorySource {
        pub fn new(positions: Vec<f64>, fps: Option<f64>) -> Self {
            Self {
                info: SourceInfo { width: 4, height: 2, fps },
                positions,
                next: 0,
            }
        }
    }

    /// Frame `n` is filled with a colour derived from `n` so copies can be told apart.
    pub fn shade(n: u32) -> RgbImage {
        RgbImage::from_pixel(4, 2, Rgb([(n % 256) as u8, (n / 256) as u8, 7]))
    }

    impl FrameSource for MemorySource {
        fn info(&self) -> SourceInfo {
            self.info
        }

        fn next_frame(&mut self) -> Result<Option<Frame>> {
            let Some(&position_seconds) = self.positions.get(self.next) else {
                return Ok(None);
            };
            let frame_number = self.next as u32;
            self.next += 1;
            Ok(Some(Frame {
                image: shade(frame_number),
                frame_number,
                position_seconds,
            }))
        }
    }

    /// Backend that succeeds or fails on demand and records every call.
    pub struct ScriptedBackend {
        pub name: String,
        pub succeeds: bool,
        pub calls: Rc<RefCell<Vec<String>>>,
    }

    impl Backend for ScriptedBackend {
        fn name(&self) -> &str {
            &self.name
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            self.calls.borrow_mut().push(self.name.clone());
            if !self.succeeds {
                bail!("{} cannot decode this file", self.name);
            }
            Ok(Box::new(MemorySource::new(vec![0.0, 0.1], Some(10.0))))
        }
    }

    /// Backend whose sources open fine but contain no frames.
    pub struct EmptyBackend;

    impl Backend for EmptyBackend {
        fn name(&self) -> &str {
            "empty"
        }

        fn open(&self, _path: &Path) -> Result<Box<dyn FrameSource>> {
            Ok(Box::new(MemorySource::new(Vec::new(), Some(30.0))))
        }
    }

    pub fn scripted(
        outcomes: &[(&str, bool)],
    ) -> (Vec<Box<dyn Backend>>, Rc<RefCell<Vec<String>>>) {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let backends = outcomes
            .iter()
            .map(|(name, succeeds)| {
                Box::new(ScriptedBackend {
                    name: name.to_string(),
                    succeeds: *succeeds,
                    calls: Rc::clone(&calls),
                }) as Box<dyn Backend>
            })
            .collect();
        (backends, calls)
    }
}

#[cfg(test)]
mod tests {
    use super::testing::scripted;
    use super::*;

    #[test]
    fn stops_at_first_successful_backend() {
        let (backends, calls) = scripted(&[
            ("first", false),
            ("second", false),
            ("third", true),
            ("fourth", true),
        ]);

        let opened = match open_with_fallback(Path::new("clip.mp4"), &backends) {
            Ok(opened) => opened,
            Err(attempts) => panic!("expected success, got {attempts:?}"),
        };

        assert_eq!(opened.backend, "third");
        assert_eq!(*calls.borrow(), vec!["first", "second", "third"]);
        assert_eq!(opened.failed.len(), 2);
        assert_eq!(opened.failed[0].backend, "first");
    }

    #[test]
    fn exhaustion_lists_every_attempt_in_order() {
        let (backends, calls) = scripted(&[("a", false), ("b", false)]);

        let attempts = match open_with_fallback(Path::new("clip.mp4"), &backends) {
            Ok(opened) => panic!("unexpected success with {}", opened.backend),
            Err(attempts) => attempts,
        };

        assert_eq!(calls.borrow().len(), 2);
        let names: Vec<&str> = attempts.iter().map(|a| a.backend.as_str()).collect();
        assert_eq!(names, ["a", "b"]);
        assert!(attempts[1].reason.contains("b cannot decode"));
    }

    #[test]
    fn no_backends_is_exhaustion() {
        let attempts = open_with_fallback(Path::new("clip.mp4"), &[]).err();
        assert_eq!(attempts, Some(Vec::new()));
    }

    #[test]
    fn backend_kind_parses_case_insensitively() {
        assert_eq!("FFmpeg".parse::<BackendKind>(), Ok(BackendKind::Ffmpeg));
        assert_eq!("gif".parse::<BackendKind>(), Ok(BackendKind::Gif));
        assert!("msmf".parse::<BackendKind>().is_err());
        assert_eq!(BackendKind::Gif.to_string(), "gif");
    }
}
