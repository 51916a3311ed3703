//! Source-to-buffer pump

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{error, info, trace};

use super::latest::LatestFrameBuffer;
use crate::capture::{FrameSource, SourcePoll};
use crate::IngestConfig;

/// How the ingest loop ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestExit {
    /// The source reported it was closed
    Exhausted,
    /// The buffer was closed from outside
    Stopped,
    /// The source failed
    Failed(String),
    /// Still blocked inside the source when shutdown gave up waiting
    Detached,
}

/// Pulls frames from the source as fast as it yields them and publishes
/// each one, never waiting on any reader.
pub struct Ingestor {
    source: Box<dyn FrameSource>,
    buffer: Arc<LatestFrameBuffer>,
    retry_delay: Duration,
}

impl Ingestor {
    pub fn new(
        source: Box<dyn FrameSource>,
        buffer: Arc<LatestFrameBuffer>,
        config: &IngestConfig,
    ) -> Self {
        Self {
            source,
            buffer,
            retry_delay: config.retry_delay(),
        }
    }

    /// Run on a dedicated thread; the receiver resolves when the loop ends.
    ///
    /// A thread rather than a blocking task, so a source stuck in a read
    /// cannot hold up runtime shutdown.
    pub fn spawn(self) -> std::io::Result<oneshot::Receiver<IngestExit>> {
        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("ingest".into())
            .spawn(move || {
                let _ = tx.send(self.run());
            })?;
        Ok(rx)
    }

    /// Blocking ingest loop. Always leaves the buffer closed.
    pub fn run(mut self) -> IngestExit {
        info!("ingest started");

        let exit = loop {
            if self.buffer.is_closed() {
                break IngestExit::Stopped;
            }
            match self.source.next_frame() {
                Ok(SourcePoll::Frame(frame)) => {
                    let source_sequence = frame.meta.sequence;
                    let sequence = self.buffer.publish(frame);
                    trace!(sequence, source_sequence, "frame published");
                }
                Ok(SourcePoll::Empty) => {
                    trace!("source had no frame ready");
                    std::thread::sleep(self.retry_delay);
                }
                Ok(SourcePoll::Closed) => {
                    info!("source closed");
                    break IngestExit::Exhausted;
                }
                Err(e) => {
                    error!(error = %e, "source failed");
                    break IngestExit::Failed(e.to_string());
                }
            }
        };

        self.buffer.close();
        info!(?exit, published = self.buffer.sequence(), "ingest finished");
        exit
    }
}
