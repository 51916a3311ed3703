pub mod ingest;
pub mod latest;
pub mod orchestrator;
pub mod process;
pub mod stats;

pub use ingest::{IngestExit, Ingestor};
pub use latest::{BufferStats, FrameReader, LatestFrameBuffer, Published, Take};
pub use orchestrator::{Orchestrator, RunReport, StopHandle};
pub use process::{PipelineExit, PipelineReport, ProcessingPipeline};
pub use stats::{PipelineCounters, Rates, StatsCollector, StatsSnapshot};
