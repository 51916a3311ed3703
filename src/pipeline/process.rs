//! Per-consumer processing pipeline

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crossbeam::utils::CachePadded;
use tokio::task;
use tracing::{debug, error, info, instrument, warn};

use super::latest::{FrameReader, Take};
use super::stats::PipelineCounters;
use crate::analysis::{draw_regions, prepare, FrameAnnotator, OutlineStyle};
use crate::display::{FrameSink, SinkStatus};
use crate::error::SinkError;
use crate::{Frame, PipelineConfig};

/// Why a pipeline stopped
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineExit {
    /// The source was exhausted and its last frame handled
    SourceClosed,
    /// The sink asked this pipeline to stop, or the whole run was stopped
    StopRequested,
    /// The sink failed
    SinkFatal(String),
    /// Annotator or sink panicked
    Panicked(String),
}

impl fmt::Display for PipelineExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineExit::SourceClosed => f.write_str("source closed"),
            PipelineExit::StopRequested => f.write_str("stop requested"),
            PipelineExit::SinkFatal(e) => write!(f, "sink failed: {e}"),
            PipelineExit::Panicked(e) => write!(f, "panicked: {e}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub label: String,
    pub exit: PipelineExit,
    /// Frames delivered to the sink
    pub frames: u64,
    /// Frames that went through the annotator
    pub annotated: u64,
    /// Buffer sequence number of the last frame delivered, 0 if none
    pub last_sequence: u64,
    /// Longest time from capture to the sink accepting a frame
    pub max_latency: Duration,
}

/// Optional analysis step: detect on a normalized copy, outline on the original
struct Annotation {
    annotator: Box<dyn FrameAnnotator>,
    width: u32,
    height: u32,
    style: OutlineStyle,
}

impl Annotation {
    /// Annotated frame and region count, or the untouched frame and `None`
    /// if this pass failed.
    fn apply(&mut self, frame: Frame, label: &str) -> (Frame, Option<usize>) {
        let analysis = match prepare(&frame, self.width, self.height) {
            Ok(analysis) => analysis,
            Err(e) => {
                warn!(pipeline = label, error = %e, "cannot normalize frame, skipping overlay");
                return (frame, None);
            }
        };
        let regions = match self.annotator.detect(&analysis) {
            Ok(regions) => regions,
            Err(e) => {
                debug!(pipeline = label, annotator = self.annotator.name(), error = %e, "annotation failed");
                return (frame, None);
            }
        };
        if regions.is_empty() {
            return (frame, Some(0));
        }

        let from = (self.width, self.height);
        let to = (frame.width(), frame.height());
        let mapped: Vec<_> = regions.iter().map(|r| r.rescale(from, to)).collect();
        (draw_regions(&frame, &mapped, self.style), Some(mapped.len()))
    }
}

/// Everything a pipeline touches per frame; shuttled onto the blocking pool.
struct Stage {
    label: String,
    annotation: Option<Annotation>,
    sink: Box<dyn FrameSink>,
    counters: Arc<CachePadded<PipelineCounters>>,
    frames_metric: metrics::Counter,
    regions_metric: metrics::Counter,
    latency_metric: metrics::Histogram,
}

impl Stage {
    fn process(&mut self, frame: Frame) -> Result<SinkStatus, SinkError> {
        let frame = match self.annotation.as_mut() {
            Some(annotation) => {
                let (frame, regions) = annotation.apply(frame, &self.label);
                if let Some(n) = regions {
                    self.counters.record_annotation(n);
                    self.regions_metric.increment(n as u64);
                }
                frame
            }
            None => frame,
        };

        let status = self.sink.display(&frame, &self.label)?;
        let latency = frame.timestamp.elapsed();
        self.counters.record_frame(latency);
        self.frames_metric.increment(1);
        self.latency_metric.record(latency.as_secs_f64() * 1000.0);

        if status == SinkStatus::Continue && self.sink.stop_requested() {
            return Ok(SinkStatus::StopRequested);
        }
        Ok(status)
    }
}

/// One consumer of the shared buffer.
///
/// Takes the newest unseen frame, optionally annotates it and hands it to
/// its sink. Slow sinks only make this pipeline skip frames.
pub struct ProcessingPipeline {
    reader: FrameReader,
    stage: Stage,
}

impl ProcessingPipeline {
    /// Annotation runs only when `config.annotate` is set and an annotator is given.
    pub fn new(
        config: PipelineConfig,
        reader: FrameReader,
        sink: Box<dyn FrameSink>,
        annotator: Option<Box<dyn FrameAnnotator>>,
        counters: Arc<CachePadded<PipelineCounters>>,
    ) -> Self {
        let annotation = match (config.annotate, annotator) {
            (true, Some(annotator)) => Some(Annotation {
                annotator,
                width: config.analysis_width,
                height: config.analysis_height,
                style: OutlineStyle::default(),
            }),
            (true, None) => {
                warn!(pipeline = %config.label, "annotation enabled without an annotator");
                None
            }
            (false, Some(annotator)) => {
                debug!(pipeline = %config.label, annotator = annotator.name(), "annotation disabled, annotator unused");
                None
            }
            (false, None) => None,
        };

        let frames_metric = metrics::counter!("pipeline_frames", "pipeline" => config.label.clone());
        let regions_metric =
            metrics::counter!("pipeline_regions", "pipeline" => config.label.clone());
        let latency_metric =
            metrics::histogram!("frame_latency_ms", "pipeline" => config.label.clone());

        Self {
            reader,
            stage: Stage {
                label: config.label,
                annotation,
                sink,
                counters,
                frames_metric,
                regions_metric,
                latency_metric,
            },
        }
    }

    pub fn label(&self) -> &str {
        &self.stage.label
    }

    pub fn annotates(&self) -> bool {
        self.stage.annotation.is_some()
    }

    /// Run until the buffer closes, the sink asks to stop, or the sink fails.
    #[instrument(skip(self), fields(pipeline = %self.stage.label))]
    pub async fn run(self) -> PipelineReport {
        let ProcessingPipeline {
            mut reader,
            mut stage,
        } = self;
        let label = stage.label.clone();
        let counters = Arc::clone(&stage.counters);
        info!(annotate = stage.annotation.is_some(), "pipeline started");

        let mut last_sequence = 0;
        let exit = loop {
            let published = match reader.take().await {
                Take::Frame(published) => published,
                Take::Closed => break PipelineExit::SourceClosed,
                Take::Stopped => break PipelineExit::StopRequested,
            };
            let sequence = published.sequence;

            // Annotator and sink calls may block for arbitrary periods
            let job = task::spawn_blocking(move || {
                let outcome = stage.process(published.frame);
                (stage, outcome)
            });
            let outcome;
            (stage, outcome) = match job.await {
                Ok(done) => done,
                Err(e) => {
                    error!(error = %e, "pipeline stage panicked");
                    return PipelineReport {
                        label,
                        exit: PipelineExit::Panicked(e.to_string()),
                        frames: counters.frames(),
                        annotated: counters.annotated(),
                        last_sequence,
                        max_latency: counters.max_latency(),
                    };
                }
            };

            match outcome {
                Ok(SinkStatus::Continue) => last_sequence = sequence,
                Ok(SinkStatus::StopRequested) => {
                    last_sequence = sequence;
                    break PipelineExit::StopRequested;
                }
                Err(e) => {
                    error!(sequence, error = %e, "sink failed");
                    break PipelineExit::SinkFatal(e.to_string());
                }
            }
        };

        stage.sink.close();
        let frames = counters.frames();
        let annotated = counters.annotated();
        info!(%exit, frames, annotated, last_sequence, "pipeline finished");

        PipelineReport {
            label,
            exit,
            frames,
            annotated,
            last_sequence,
            max_latency: counters.max_latency(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::DetectionRegion;
    use crate::error::AnnotateError;
    use crate::pipeline::LatestFrameBuffer;
    use crate::PixelFormat;
    use bytes::Bytes;
    use image::GrayImage;
    use std::sync::Mutex;

    /// Always reports one fixed region in analysis coordinates
    struct Fixed(DetectionRegion);

    impl FrameAnnotator for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }

        fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<DetectionRegion>, AnnotateError> {
            Ok(vec![self.0])
        }
    }

    struct Failing;

    impl FrameAnnotator for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn detect(&mut self, _frame: &GrayImage) -> Result<Vec<DetectionRegion>, AnnotateError> {
            Err(AnnotateError::Failed("no model".into()))
        }
    }

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<Frame>>>);

    impl FrameSink for Recorder {
        fn display(&mut self, frame: &Frame, _label: &str) -> Result<SinkStatus, SinkError> {
            self.0.lock().unwrap().push(frame.clone());
            Ok(SinkStatus::Continue)
        }
    }

    fn black(width: u32, height: u32) -> Frame {
        let data = vec![0u8; (width * height * 3) as usize];
        Frame::new(Bytes::from(data), width, height, PixelFormat::Rgb24, 1).unwrap()
    }

    fn config(annotate: bool) -> PipelineConfig {
        PipelineConfig {
            label: "t".into(),
            annotate,
            analysis_width: 40,
            analysis_height: 30,
        }
    }

    fn pixel(frame: &Frame, x: u32, y: u32) -> &[u8] {
        let at = (y * frame.meta.stride + x * 3) as usize;
        &frame.data[at..at + 3]
    }

    async fn run_one(
        annotate: bool,
        annotator: Option<Box<dyn FrameAnnotator>>,
        frame: Frame,
    ) -> (PipelineReport, Vec<Frame>) {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let recorder = Recorder::default();
        let pipeline = ProcessingPipeline::new(
            config(annotate),
            buffer.reader(),
            Box::new(recorder.clone()),
            annotator,
            Arc::default(),
        );
        let handle = tokio::spawn(pipeline.run());

        buffer.publish(frame);
        while recorder.0.lock().unwrap().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        buffer.close();

        let report = handle.await.unwrap();
        let frames = recorder.0.lock().unwrap().clone();
        (report, frames)
    }

    #[tokio::test]
    async fn draws_regions_in_original_coordinates() {
        let annotator = Box::new(Fixed(DetectionRegion::new(10, 10, 5, 5)));
        let (report, frames) = run_one(true, Some(annotator), black(80, 60)).await;

        assert_eq!(report.exit, PipelineExit::SourceClosed);
        assert_eq!(report.frames, 1);
        assert_eq!(report.annotated, 1);
        assert_eq!(report.last_sequence, 1);
        let out = &frames[0];
        // (10, 10, 5, 5) at 40x30 is (20, 20, 10, 10) at 80x60
        assert_eq!(pixel(out, 20, 20), &[0, 255, 0]);
        assert_eq!(pixel(out, 29, 29), &[0, 255, 0]);
        assert_eq!(pixel(out, 25, 25), &[0, 0, 0]);
        assert_eq!(pixel(out, 19, 19), &[0, 0, 0]);
        assert_eq!(pixel(out, 30, 30), &[0, 0, 0]);
    }

    #[tokio::test]
    async fn reports_latency_since_capture() {
        let frame = black(80, 60);
        tokio::time::sleep(std::time::Duration::from_millis(30)).await;
        let (report, _) = run_one(false, None, frame).await;
        assert!(report.max_latency >= std::time::Duration::from_millis(30));
    }

    #[tokio::test]
    async fn stop_ends_pipeline_as_requested() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let recorder = Recorder::default();
        let pipeline = ProcessingPipeline::new(
            config(false),
            buffer.reader(),
            Box::new(recorder.clone()),
            None,
            Arc::default(),
        );
        buffer.publish(black(8, 6));
        buffer.stop();

        let report = pipeline.run().await;
        assert_eq!(report.exit, PipelineExit::StopRequested);
        assert_eq!(report.frames, 0);
        assert!(recorder.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn disabled_annotation_passes_frame_through() {
        let annotator = Box::new(Fixed(DetectionRegion::new(10, 10, 5, 5)));
        let frame = black(80, 60);
        let (_, frames) = run_one(false, Some(annotator), frame.clone()).await;
        assert_eq!(frames[0].data.as_ptr(), frame.data.as_ptr());
    }

    #[tokio::test]
    async fn annotation_failure_forwards_plain_frame() {
        let frame = black(80, 60);
        let (report, frames) = run_one(true, Some(Box::new(Failing)), frame.clone()).await;
        assert_eq!(report.exit, PipelineExit::SourceClosed);
        assert_eq!(report.annotated, 0);
        assert_eq!(frames[0].data, frame.data);
    }

    #[test]
    fn strategy_follows_config() {
        let buffer = Arc::new(LatestFrameBuffer::new());
        let make = |annotate, annotator: Option<Box<dyn FrameAnnotator>>| {
            ProcessingPipeline::new(
                config(annotate),
                buffer.reader(),
                Box::new(Recorder::default()),
                annotator,
                Arc::default(),
            )
        };
        let fixed = || Some(Box::new(Fixed(DetectionRegion::new(0, 0, 1, 1))) as Box<dyn FrameAnnotator>);

        assert!(make(true, fixed()).annotates());
        assert!(!make(false, fixed()).annotates());
        assert!(!make(true, None).annotates());
        assert_eq!(make(false, None).label(), "t");
    }
}
