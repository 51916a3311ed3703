pub mod analysis;
pub mod capture;
pub mod display;
pub mod error;
pub mod pipeline;

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

pub use analysis::{DetectionRegion, FrameAnnotator, MotionAnnotator};
pub use capture::{Frame, FrameMetadata, FrameSource, PixelFormat, SourcePoll, SourceSpec};
pub use display::{ConsoleSink, FrameSink, SinkStatus, SnapshotSink};
pub use error::ConfigError;
pub use pipeline::{
    LatestFrameBuffer, Orchestrator, PipelineExit, PipelineReport, RunReport, StopHandle, Take,
};

/// Prefix of environment variables overriding file configuration
pub const ENV_PREFIX: &str = "LOOKOUT";

/// System configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub capture: CaptureConfig,
    pub ingest: IngestConfig,
    pub stats: StatsConfig,
    pub motion: MotionConfig,
    pub pipelines: Vec<PipelineConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CaptureConfig {
    /// Resolution of synthetic sources
    pub width: u32,
    pub height: u32,
    /// Pace of file and synthetic sources, emulating a live device
    pub fps: u32,
    /// Close synthetic sources after this many frames
    pub frame_limit: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct IngestConfig {
    /// Delay before polling a source again after it had nothing ready
    pub retry_delay_ms: u64,
    /// How long shutdown waits for an ingestor blocked inside its source
    pub shutdown_grace_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StatsConfig {
    /// Frame-rate report period; 0 disables reporting
    pub report_interval_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MotionConfig {
    /// Per-pixel luma difference counted as change
    pub threshold: u8,
    /// Edge of the square cells change is aggregated over
    pub cell_size: u32,
    /// Fraction of changed pixels that marks a cell active
    pub min_cell_ratio: f32,
    /// Smallest reported region, in analysis pixels
    pub min_width: u32,
    pub min_height: u32,
}

/// Per-pipeline configuration, fixed for the pipeline's lifetime
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct PipelineConfig {
    pub label: String,
    pub annotate: bool,
    pub analysis_width: u32,
    pub analysis_height: u32,
}

impl Default for Config {
    fn default() -> Self {
        let pipelines = [
            (".", true),
            (",", false),
            ("a", true),
            ("b", false),
            ("c", false),
            ("d", false),
            ("e", false),
            ("f", true),
        ]
        .into_iter()
        .map(|(label, annotate)| PipelineConfig::new(label, annotate))
        .collect();

        Self {
            capture: CaptureConfig::default(),
            ingest: IngestConfig::default(),
            stats: StatsConfig::default(),
            motion: MotionConfig::default(),
            pipelines,
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 960,
            fps: 30,
            frame_limit: None,
        }
    }
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            retry_delay_ms: 10,
            shutdown_grace_ms: 500,
        }
    }
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            report_interval_ms: 1000,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        Self {
            threshold: 25,
            cell_size: 16,
            min_cell_ratio: 0.1,
            min_width: 30,
            min_height: 30,
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            label: String::new(),
            annotate: false,
            analysis_width: 640,
            analysis_height: 480,
        }
    }
}

impl PipelineConfig {
    pub fn new(label: impl Into<String>, annotate: bool) -> Self {
        Self {
            label: label.into(),
            annotate,
            ..Self::default()
        }
    }
}

impl IngestConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl Config {
    /// Load from an optional TOML file, then apply `LOOKOUT_*` environment
    /// overrides (`LOOKOUT_CAPTURE__FPS=15`).
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        Self::load_with(path, environment())
    }

    fn load_with(path: Option<&Path>, env: config::Environment) -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let config: Config = builder.add_source(env).build()?.try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.pipelines.is_empty() {
            return Err(ConfigError::Invalid("at least one pipeline is required".into()));
        }
        if self.capture.width == 0 || self.capture.height == 0 {
            return Err(ConfigError::Invalid("capture resolution must be non-zero".into()));
        }
        if self.motion.cell_size == 0 {
            return Err(ConfigError::Invalid("motion cell size must be non-zero".into()));
        }

        let mut labels = HashSet::new();
        for pipeline in &self.pipelines {
            if pipeline.label.is_empty() {
                return Err(ConfigError::Invalid("pipeline label must not be empty".into()));
            }
            if !labels.insert(pipeline.label.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate pipeline label `{}`",
                    pipeline.label
                )));
            }
            if pipeline.analysis_width == 0 || pipeline.analysis_height == 0 {
                return Err(ConfigError::Invalid(format!(
                    "pipeline `{}` has a zero analysis resolution",
                    pipeline.label
                )));
            }
        }
        Ok(())
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
