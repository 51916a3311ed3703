//! Console sink: one label per delivered frame
//!
//! Counting the characters printed per stream over time gives each
//! pipeline's delivered frame rate.

use std::io::Write;

use super::{FrameSink, SinkStatus};
use crate::error::SinkError;
use crate::Frame;

pub struct ConsoleSink<W> {
    out: W,
    frames: u64,
    limit: Option<u64>,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout(limit: Option<u64>) -> Self {
        Self::new(std::io::stdout(), limit)
    }
}

impl<W: Write + Send> ConsoleSink<W> {
    /// Request a stop after `limit` frames, if given.
    pub fn new(out: W, limit: Option<u64>) -> Self {
        Self {
            out,
            frames: 0,
            limit,
        }
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> FrameSink for ConsoleSink<W> {
    fn display(&mut self, _frame: &Frame, label: &str) -> Result<SinkStatus, SinkError> {
        self.out.write_all(label.as_bytes())?;
        self.out.flush()?;
        self.frames += 1;
        Ok(SinkStatus::Continue)
    }

    fn stop_requested(&mut self) -> bool {
        self.limit.is_some_and(|limit| self.frames >= limit)
    }

    fn close(&mut self) {
        let _ = self.out.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;
    use bytes::Bytes;

    fn frame() -> Frame {
        Frame::new(Bytes::from_static(&[0]), 1, 1, PixelFormat::Gray8, 1).unwrap()
    }

    #[test]
    fn writes_label_per_frame() {
        let mut sink = ConsoleSink::new(Vec::new(), None);
        for _ in 0..3 {
            assert_eq!(sink.display(&frame(), "a").unwrap(), SinkStatus::Continue);
        }
        assert!(!sink.stop_requested());
        assert_eq!(sink.into_inner(), b"aaa");
    }

    #[test]
    fn requests_stop_at_limit() {
        let mut sink = ConsoleSink::new(Vec::new(), Some(2));
        sink.display(&frame(), ".").unwrap();
        assert!(!sink.stop_requested());
        sink.display(&frame(), ".").unwrap();
        assert!(sink.stop_requested());
        assert_eq!(sink.frames(), 2);
    }
}
