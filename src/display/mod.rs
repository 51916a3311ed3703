//! Frame sinks: where each pipeline delivers its frames

pub mod console;
pub mod snapshot;

pub use console::ConsoleSink;
pub use snapshot::SnapshotSink;

use crate::error::SinkError;
use crate::Frame;

/// What a sink wants its pipeline to do after a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkStatus {
    Continue,
    /// The operator asked this pipeline to stop
    StopRequested,
}

/// Output end of a pipeline.
///
/// Calls may block (rendering, encoding, disk). Any error is fatal for the
/// owning pipeline only.
pub trait FrameSink: Send {
    fn display(&mut self, frame: &Frame, label: &str) -> Result<SinkStatus, SinkError>;

    /// Polled after every frame for an out-of-band stop signal.
    fn stop_requested(&mut self) -> bool {
        false
    }

    /// Sink-level teardown once the pipeline has finished.
    fn close(&mut self) {}
}

impl<S: FrameSink + ?Sized> FrameSink for Box<S> {
    fn display(&mut self, frame: &Frame, label: &str) -> Result<SinkStatus, SinkError> {
        (**self).display(frame, label)
    }

    fn stop_requested(&mut self) -> bool {
        (**self).stop_requested()
    }

    fn close(&mut self) {
        (**self).close()
    }
}
