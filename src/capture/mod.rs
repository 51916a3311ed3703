//! Frame sources and the ingest-side view of a frame

pub mod frame;
pub mod mjpeg;
pub mod pattern;

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;
use std::time::{Duration, Instant};

pub use frame::{Frame, FrameMetadata, PixelFormat};
pub use mjpeg::MjpegSource;
pub use pattern::PatternSource;

use crate::error::SourceError;
use crate::CaptureConfig;

/// Result of asking a source for its next frame
#[derive(Debug)]
pub enum SourcePoll {
    Frame(Frame),
    /// Nothing available right now; try again shortly
    Empty,
    /// The source is exhausted and will never produce another frame
    Closed,
}

/// Producer of frames at its own pace.
///
/// `next_frame` may block for as long as the underlying device or stream
/// needs. It is only ever called from the ingest thread.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<SourcePoll, SourceError>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<SourcePoll, SourceError> {
        (**self).next_frame()
    }
}

/// Parsed form of the positional source argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceSpec {
    /// Motion-JPEG stream on stdin
    Stdin,
    /// Motion-JPEG file
    File(PathBuf),
    /// Synthetic test pattern, optionally overriding the configured resolution
    Pattern(Option<(u32, u32)>),
}

impl SourceSpec {
    pub fn parse(arg: &str) -> Result<Self, SourceError> {
        if arg == "-" {
            return Ok(Self::Stdin);
        }
        if arg == "pattern" {
            return Ok(Self::Pattern(None));
        }
        if let Some(size) = arg.strip_prefix("pattern:") {
            let (w, h) = size
                .split_once('x')
                .ok_or_else(|| SourceError::InvalidSpec(arg.to_string()))?;
            let width = w
                .parse::<u32>()
                .map_err(|_| SourceError::InvalidSpec(arg.to_string()))?;
            let height = h
                .parse::<u32>()
                .map_err(|_| SourceError::InvalidSpec(arg.to_string()))?;
            if width == 0 || height == 0 {
                return Err(SourceError::InvalidSpec(arg.to_string()));
            }
            return Ok(Self::Pattern(Some((width, height))));
        }
        if arg.is_empty() {
            return Err(SourceError::InvalidSpec(arg.to_string()));
        }
        Ok(Self::File(PathBuf::from(arg)))
    }

    /// Open the source described by this spec.
    pub fn open(&self, config: &CaptureConfig) -> Result<Box<dyn FrameSource>, SourceError> {
        let pacer = Pacer::new(config.fps);
        Ok(match self {
            SourceSpec::Stdin => Box::new(MjpegSource::new(std::io::stdin(), None)),
            SourceSpec::File(path) => {
                let file = File::open(path)?;
                Box::new(MjpegSource::new(BufReader::new(file), pacer))
            }
            SourceSpec::Pattern(size) => {
                let (width, height) = size.unwrap_or((config.width, config.height));
                Box::new(PatternSource::new(width, height, pacer, config.frame_limit))
            }
        })
    }
}

/// Spaces out frames to emulate a live device running at a fixed rate
#[derive(Debug)]
pub struct Pacer {
    interval: Duration,
    next: Option<Instant>,
}

impl Pacer {
    pub fn new(fps: u32) -> Option<Self> {
        (fps > 0).then(|| Self {
            interval: Duration::from_secs(1) / fps,
            next: None,
        })
    }

    /// Block until the next frame slot.
    pub fn wait(&mut self) {
        let now = Instant::now();
        let deadline = self.next.unwrap_or(now);
        if deadline > now {
            std::thread::sleep(deadline - now);
        }
        // Never accumulate a backlog after a stall
        self.next = Some(deadline.max(now) + self.interval);
    }
}
