//! Error types for every stage of the frame pipeline

use thiserror::Error;

/// A frame payload that does not match its declared geometry
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame has zero-sized dimensions {width}x{height}")]
    Empty { width: u32, height: u32 },

    #[error("frame dimensions {width}x{height} overflow")]
    Overflow { width: u32, height: u32 },

    #[error("frame length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Unrecoverable failure of a frame source. Transient "no frame yet" is not an error.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("source i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid source `{0}`")]
    InvalidSpec(String),

    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Failure of a single annotation pass. Only ever skips the overlay for one frame.
#[derive(Debug, Error)]
pub enum AnnotateError {
    #[error(transparent)]
    Frame(#[from] FrameError),

    #[error("annotator failed: {0}")]
    Failed(String),
}

/// Failure of a frame sink. Always terminal for the owning pipeline.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("sink i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink encode error: {0}")]
    Image(#[from] image::ImageError),

    #[error("sink failed: {0}")]
    Fatal(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("no pipelines configured")]
    NoPipelines,

    #[error("failed to spawn ingest thread: {0}")]
    Spawn(#[from] std::io::Error),
}
