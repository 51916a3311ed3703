//! Single-slot, overwrite-on-write frame handoff
//!
//! One producer publishes into the slot; any number of readers take the
//! newest frame they have not seen yet. The producer never waits: an
//! unobserved frame is simply replaced, so a slow reader skips frames
//! instead of queueing them.
//!
//! Closing the buffer ends the stream: readers still get the frame held at
//! that moment if they have not seen it, then [`Take::Closed`]. Stopping it
//! ends every reader at once with [`Take::Stopped`].

use std::pin::pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use crossbeam::utils::CachePadded;
use tokio::sync::Notify;
use tracing::{debug, trace};

use crate::Frame;

/// Frame and its sequence number, swapped in as one unit
struct Slot {
    sequence: u64,
    frame: Frame,
    observed: AtomicBool,
}

/// A frame as handed to a reader
#[derive(Debug, Clone)]
pub struct Published {
    pub sequence: u64,
    pub frame: Frame,
}

/// Outcome of waiting on the buffer
#[derive(Debug)]
pub enum Take {
    Frame(Published),
    /// The producer is gone and the last frame was already taken
    Closed,
    /// The whole system was asked to stop; any held frame is abandoned
    Stopped,
}

/// Latest-frame buffer shared by the ingestor and every pipeline
pub struct LatestFrameBuffer {
    slot: ArcSwapOption<Slot>,
    sequence: CachePadded<AtomicU64>,
    closed: AtomicBool,
    stopped: AtomicBool,
    notify: Notify,

    /// Statistics
    stats: CachePadded<Stats>,
}

#[derive(Default)]
struct Stats {
    frames_published: AtomicU64,
    frames_taken: AtomicU64,
    frames_dropped: AtomicU64,
}

/// Point-in-time copy of the buffer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub published: u64,
    pub taken: u64,
    /// Frames replaced before any reader took them
    pub dropped: u64,
}

impl Default for LatestFrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl LatestFrameBuffer {
    pub fn new() -> Self {
        Self {
            slot: ArcSwapOption::empty(),
            sequence: CachePadded::new(AtomicU64::new(0)),
            closed: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            notify: Notify::new(),
            stats: CachePadded::new(Stats::default()),
        }
    }

    /// Producer: replace the held frame and wake every waiting reader.
    ///
    /// Never blocks. Returns the sequence number assigned to `frame`.
    pub fn publish(&self, frame: Frame) -> u64 {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let previous = self.slot.swap(Some(Arc::new(Slot {
            sequence,
            frame,
            observed: AtomicBool::new(false),
        })));

        // Approximate under contention: a reader may still be copying `previous` out
        if let Some(previous) = previous {
            if !previous.observed.load(Ordering::Acquire) {
                self.stats.frames_dropped.fetch_add(1, Ordering::Relaxed);
                metrics::counter!("frames_dropped").increment(1);
                trace!(sequence = previous.sequence, "dropped unobserved frame");
            }
        }
        self.stats.frames_published.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("frames_published").increment(1);

        self.notify.notify_waiters();
        sequence
    }

    /// Mark the end of the stream. Readers drain the held frame, then see
    /// [`Take::Closed`].
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(
                last_sequence = self.sequence.load(Ordering::Relaxed),
                "frame buffer closed"
            );
        }
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Close the buffer and make every reader return [`Take::Stopped`]
    /// without draining.
    pub fn stop(&self) {
        if !self.stopped.swap(true, Ordering::AcqRel) {
            debug!("frame buffer stopped");
        }
        self.close();
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Sequence number of the most recent publish, 0 before the first.
    pub fn sequence(&self) -> u64 {
        self.sequence.load(Ordering::Relaxed)
    }

    /// New reader that has not yet seen any frame.
    pub fn reader(self: &Arc<Self>) -> FrameReader {
        FrameReader {
            buffer: Arc::clone(self),
            last_seen: 0,
        }
    }

    pub fn stats(&self) -> BufferStats {
        BufferStats {
            published: self.stats.frames_published.load(Ordering::Relaxed),
            taken: self.stats.frames_taken.load(Ordering::Relaxed),
            dropped: self.stats.frames_dropped.load(Ordering::Relaxed),
        }
    }
}

/// A single consumer's view of the buffer.
///
/// Each reader remembers the last sequence number it was given, so every
/// reader sees each frame at most once and never goes backwards.
pub struct FrameReader {
    buffer: Arc<LatestFrameBuffer>,
    last_seen: u64,
}

impl FrameReader {
    /// Wait for a frame newer than the last one this reader took.
    ///
    /// After [`close`](LatestFrameBuffer::close) an unseen held frame is
    /// still returned first. After [`stop`](LatestFrameBuffer::stop) this
    /// returns [`Take::Stopped`] straight away.
    pub async fn take(&mut self) -> Take {
        let buffer = Arc::clone(&self.buffer);
        loop {
            // Register interest before checking so a publish in between is not missed
            let mut notified = pin!(buffer.notify.notified());
            notified.as_mut().enable();

            if let Some(take) = self.try_take() {
                return take;
            }
            notified.await;
        }
    }

    /// Non-blocking variant of [`take`](Self::take); `None` if nothing new is held.
    pub fn try_take(&mut self) -> Option<Take> {
        if self.buffer.is_stopped() {
            return Some(Take::Stopped);
        }
        // Read the flag before the slot: a close seen here follows the final publish
        let closed = self.buffer.is_closed();

        let slot = match self.buffer.slot.load_full() {
            Some(slot) if slot.sequence > self.last_seen => slot,
            _ => return closed.then_some(Take::Closed),
        };
        slot.observed.store(true, Ordering::Release);
        self.last_seen = slot.sequence;
        self.buffer
            .stats
            .frames_taken
            .fetch_add(1, Ordering::Relaxed);

        Some(Take::Frame(Published {
            sequence: slot.sequence,
            frame: slot.frame.clone(),
        }))
    }

    pub fn is_closed(&self) -> bool {
        self.buffer.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PixelFormat;
    use bytes::Bytes;
    use std::time::Duration;
    use tokio::time::timeout;

    fn frame(tag: u8) -> Frame {
        Frame::new(Bytes::from(vec![tag; 4]), 2, 2, PixelFormat::Gray8, tag as u64).unwrap()
    }

    fn sequence_of(take: Take) -> u64 {
        match take {
            Take::Frame(p) => p.sequence,
            other => panic!("expected a frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn take_before_first_publish_waits() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut reader = buffer.reader();
        assert!(reader.try_take().is_none());

        let waiter = tokio::spawn(async move { sequence_of(reader.take().await) });
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        buffer.publish(frame(1));
        let seq = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(seq, 1);
    }

    #[tokio::test]
    async fn overwritten_frame_is_never_observed() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut reader = buffer.reader();

        buffer.publish(frame(1));
        buffer.publish(frame(2));

        match reader.take().await {
            Take::Frame(p) => {
                assert_eq!(p.sequence, 2);
                assert_eq!(p.frame.data[0], 2);
            }
            other => panic!("expected a frame, got {other:?}"),
        }
        assert!(reader.try_take().is_none());
        assert_eq!(
            buffer.stats(),
            BufferStats {
                published: 2,
                taken: 1,
                dropped: 1
            }
        );
    }

    #[tokio::test]
    async fn reader_sequence_never_decreases() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut reader = buffer.reader();
        let producer = {
            let buffer = Arc::clone(&buffer);
            std::thread::spawn(move || {
                for i in 0..500u32 {
                    buffer.publish(frame((i % 256) as u8));
                    if i % 50 == 0 {
                        std::thread::sleep(Duration::from_millis(1));
                    }
                }
                buffer.close();
            })
        };

        let mut seen = Vec::new();
        loop {
            match timeout(Duration::from_secs(5), reader.take()).await.unwrap() {
                Take::Frame(p) => seen.push(p.sequence),
                Take::Closed | Take::Stopped => break,
            }
        }
        producer.join().unwrap();

        assert!(!seen.is_empty());
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
        // The final publish is always drained before the close is reported
        assert_eq!(*seen.last().unwrap(), 500);
    }

    #[tokio::test]
    async fn every_reader_gets_the_same_frame_once() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut a = buffer.reader();
        let mut b = buffer.reader();

        buffer.publish(frame(9));
        assert_eq!(sequence_of(a.take().await), 1);
        assert_eq!(sequence_of(b.take().await), 1);
        assert!(a.try_take().is_none());
        assert!(b.try_take().is_none());
        assert_eq!(buffer.stats().dropped, 0);
    }

    #[tokio::test]
    async fn close_releases_pending_readers() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let mut reader = buffer.reader();
                tokio::spawn(async move { matches!(reader.take().await, Take::Closed) })
            })
            .collect();
        tokio::time::sleep(Duration::from_millis(20)).await;

        buffer.close();
        for waiter in waiters {
            assert!(timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap());
        }
    }

    #[tokio::test]
    async fn close_drains_last_frame_to_every_reader() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut a = buffer.reader();
        let mut b = buffer.reader();
        buffer.publish(frame(1));
        buffer.close();

        assert_eq!(sequence_of(a.take().await), 1);
        assert!(matches!(a.take().await, Take::Closed));
        assert_eq!(sequence_of(b.take().await), 1);
        assert!(matches!(b.take().await, Take::Closed));
        assert!(a.is_closed());
        assert_eq!(buffer.stats().dropped, 0);
    }

    #[tokio::test]
    async fn close_wakes_reader_waiting_on_final_frame() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut reader = buffer.reader();
        let waiter = tokio::spawn(async move {
            let first = sequence_of(reader.take().await);
            (first, matches!(reader.take().await, Take::Closed))
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        buffer.publish(frame(1));
        buffer.close();
        let (first, closed) = timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
        assert_eq!(first, 1);
        assert!(closed);
    }

    #[tokio::test]
    async fn stop_abandons_unseen_frame() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let mut reader = buffer.reader();
        buffer.publish(frame(1));
        buffer.stop();

        assert!(matches!(reader.take().await, Take::Stopped));
        assert!(buffer.is_closed());
        assert!(buffer.is_stopped());
    }
}
