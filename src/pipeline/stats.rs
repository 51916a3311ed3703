//! Frame-rate accounting
//!
//! Each pipeline bumps its own cache-padded counters; a single collector
//! owns the set and turns two snapshots into rates.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::utils::CachePadded;
use tracing::{debug, info};

use super::latest::{BufferStats, LatestFrameBuffer};

/// Counters written by exactly one pipeline
#[derive(Debug, Default)]
pub struct PipelineCounters {
    frames: AtomicU64,
    annotated: AtomicU64,
    regions: AtomicU64,
    max_latency_us: AtomicU64,
}

impl PipelineCounters {
    /// One frame accepted by the sink, `latency` after it was captured.
    pub fn record_frame(&self, latency: Duration) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.max_latency_us.fetch_max(micros, Ordering::Relaxed);
    }

    pub fn record_annotation(&self, regions: usize) {
        self.annotated.fetch_add(1, Ordering::Relaxed);
        self.regions.fetch_add(regions as u64, Ordering::Relaxed);
    }

    pub fn frames(&self) -> u64 {
        self.frames.load(Ordering::Relaxed)
    }

    pub fn annotated(&self) -> u64 {
        self.annotated.load(Ordering::Relaxed)
    }

    pub fn regions(&self) -> u64 {
        self.regions.load(Ordering::Relaxed)
    }

    pub fn max_latency(&self) -> Duration {
        Duration::from_micros(self.max_latency_us.load(Ordering::Relaxed))
    }
}

/// Owner of every pipeline's counters plus the buffer's
#[derive(Clone)]
pub struct StatsCollector {
    buffer: Arc<LatestFrameBuffer>,
    pipelines: Vec<(String, Arc<CachePadded<PipelineCounters>>)>,
}

#[derive(Debug, Clone)]
pub struct PipelineSample {
    pub label: String,
    pub frames: u64,
    pub annotated: u64,
    pub regions: u64,
}

#[derive(Debug, Clone)]
pub struct StatsSnapshot {
    pub at: Instant,
    pub buffer: BufferStats,
    pub pipelines: Vec<PipelineSample>,
}

/// Rates between two snapshots
#[derive(Debug, Clone, PartialEq)]
pub struct Rates {
    pub published_fps: f64,
    pub dropped: u64,
    /// `(label, delivered frames per second)`
    pub pipelines: Vec<(String, f64)>,
}

impl StatsCollector {
    pub fn new(buffer: Arc<LatestFrameBuffer>) -> Self {
        Self {
            buffer,
            pipelines: Vec::new(),
        }
    }

    /// Counters for a new pipeline.
    pub fn register(&mut self, label: &str) -> Arc<CachePadded<PipelineCounters>> {
        let counters = Arc::new(CachePadded::new(PipelineCounters::default()));
        self.pipelines.push((label.to_string(), Arc::clone(&counters)));
        counters
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            at: Instant::now(),
            buffer: self.buffer.stats(),
            pipelines: self
                .pipelines
                .iter()
                .map(|(label, c)| PipelineSample {
                    label: label.clone(),
                    frames: c.frames(),
                    annotated: c.annotated(),
                    regions: c.regions(),
                })
                .collect(),
        }
    }

    /// Log per-pipeline frame rates every `interval`, forever.
    pub async fn report_every(self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        ticker.tick().await;

        let mut last = self.snapshot();
        loop {
            ticker.tick().await;
            let now = self.snapshot();
            let rates = now.rates_since(&last);

            let summary = rates
                .pipelines
                .iter()
                .map(|(label, fps)| format!("{label}={fps:.1}"))
                .collect::<Vec<_>>()
                .join(" ");
            info!(
                source_fps = rates.published_fps,
                dropped = rates.dropped,
                "fps {summary}"
            );
            for (label, fps) in rates.pipelines {
                debug!(pipeline = %label, fps, "pipeline rate");
                metrics::gauge!("pipeline_fps", "pipeline" => label).set(fps);
            }
            last = now;
        }
    }
}

impl StatsSnapshot {
    /// Rates over the interval from `earlier` to `self`.
    ///
    /// Pipelines missing from `earlier` are measured from zero.
    pub fn rates_since(&self, earlier: &StatsSnapshot) -> Rates {
        let secs = self.at.saturating_duration_since(earlier.at).as_secs_f64();
        let per_sec = |delta: u64| if secs > 0.0 { delta as f64 / secs } else { 0.0 };

        let pipelines = self
            .pipelines
            .iter()
            .map(|sample| {
                let before = earlier
                    .pipelines
                    .iter()
                    .find(|s| s.label == sample.label)
                    .map_or(0, |s| s.frames);
                (
                    sample.label.clone(),
                    per_sec(sample.frames.saturating_sub(before)),
                )
            })
            .collect();

        Rates {
            published_fps: per_sec(
                self.buffer
                    .published
                    .saturating_sub(earlier.buffer.published),
            ),
            dropped: self.buffer.dropped.saturating_sub(earlier.buffer.dropped),
            pipelines,
        }
    }

    pub fn pipeline(&self, label: &str) -> Option<&PipelineSample> {
        self.pipelines.iter().find(|s| s.label == label)
    }
}
