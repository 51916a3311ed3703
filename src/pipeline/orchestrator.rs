//! Wiring of one ingestor and N pipelines around a shared buffer

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::ingest::{IngestExit, Ingestor};
use super::latest::LatestFrameBuffer;
use super::process::{PipelineExit, PipelineReport, ProcessingPipeline};
use super::stats::{StatsCollector, StatsSnapshot};
use crate::analysis::FrameAnnotator;
use crate::capture::FrameSource;
use crate::display::FrameSink;
use crate::error::OrchestratorError;
use crate::{IngestConfig, PipelineConfig, StatsConfig};

/// Stops a running orchestrator from outside, e.g. on Ctrl-C
#[derive(Clone)]
pub struct StopHandle {
    buffer: Arc<LatestFrameBuffer>,
}

impl StopHandle {
    /// Stop the buffer: the ingestor stops and every pipeline exits with
    /// [`PipelineExit::StopRequested`] after its current frame.
    pub fn stop(&self) {
        info!("stop requested for all pipelines");
        self.buffer.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.buffer.is_stopped()
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone)]
pub struct RunReport {
    /// In the order pipelines were added
    pub pipelines: Vec<PipelineReport>,
    pub ingest: IngestExit,
    pub stats: StatsSnapshot,
}

impl RunReport {
    pub fn pipeline(&self, label: &str) -> Option<&PipelineReport> {
        self.pipelines.iter().find(|p| p.label == label)
    }
}

/// Owns the buffer, the ingestor and every pipeline for one run.
///
/// Failed pipelines are not restarted; that is up to the caller.
pub struct Orchestrator {
    buffer: Arc<LatestFrameBuffer>,
    ingest: IngestConfig,
    report_interval: Duration,
    stats: StatsCollector,
    pipelines: Vec<ProcessingPipeline>,
}

impl Orchestrator {
    pub fn new(ingest: IngestConfig, stats: &StatsConfig) -> Self {
        let buffer = Arc::new(LatestFrameBuffer::new());
        Self {
            stats: StatsCollector::new(Arc::clone(&buffer)),
            buffer,
            ingest,
            report_interval: Duration::from_millis(stats.report_interval_ms),
            pipelines: Vec::new(),
        }
    }

    /// Bind a new pipeline to the shared buffer.
    pub fn add_pipeline(
        &mut self,
        config: PipelineConfig,
        sink: Box<dyn FrameSink>,
        annotator: Option<Box<dyn FrameAnnotator>>,
    ) -> &mut Self {
        let counters = self.stats.register(&config.label);
        let pipeline =
            ProcessingPipeline::new(config, self.buffer.reader(), sink, annotator, counters);
        self.pipelines.push(pipeline);
        self
    }

    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            buffer: Arc::clone(&self.buffer),
        }
    }

    /// Run until every pipeline has exited.
    ///
    /// That happens when the source closes, when [`StopHandle::stop`] is
    /// called, or when each pipeline has stopped on its own. The ingestor is
    /// then stopped and given `shutdown_grace_ms` to finish.
    pub async fn run(self, source: Box<dyn FrameSource>) -> Result<RunReport, OrchestratorError> {
        if self.pipelines.is_empty() {
            return Err(OrchestratorError::NoPipelines);
        }

        let ingest_done = Ingestor::new(source, Arc::clone(&self.buffer), &self.ingest).spawn()?;
        let reporter = (!self.report_interval.is_zero())
            .then(|| tokio::spawn(self.stats.clone().report_every(self.report_interval)));

        let handles: Vec<(String, JoinHandle<PipelineReport>)> = self
            .pipelines
            .into_iter()
            .map(|pipeline| (pipeline.label().to_string(), tokio::spawn(pipeline.run())))
            .collect();
        info!(pipelines = handles.len(), "orchestrator running");

        let mut reports = Vec::with_capacity(handles.len());
        for (label, handle) in handles {
            let report = match handle.await {
                Ok(report) => report,
                Err(e) => PipelineReport {
                    label,
                    exit: PipelineExit::Panicked(e.to_string()),
                    frames: 0,
                    annotated: 0,
                    last_sequence: 0,
                    max_latency: Duration::ZERO,
                },
            };
            reports.push(report);
        }

        // No pipeline left to feed
        self.buffer.close();
        let ingest = match tokio::time::timeout(self.ingest.shutdown_grace(), ingest_done).await {
            Ok(Ok(exit)) => exit,
            Ok(Err(_)) => IngestExit::Failed("ingest thread ended without reporting".into()),
            Err(_) => {
                warn!("ingestor still blocked in its source, detaching");
                IngestExit::Detached
            }
        };
        if let Some(reporter) = reporter {
            reporter.abort();
        }

        let stats = self.stats.snapshot();
        info!(
            ?ingest,
            published = stats.buffer.published,
            dropped = stats.buffer.dropped,
            "orchestrator finished"
        );
        Ok(RunReport {
            pipelines: reports,
            ingest,
            stats,
        })
    }
}
