//! Lookout: fan one live frame stream out to independent consumers

use std::path::PathBuf;

use clap::Parser;
use color_eyre::{eyre::WrapErr, Result};
use tracing::{info, warn};
use tracing_subscriber::{fmt::time::uptime, prelude::*, EnvFilter};

use lookout::{
    Config, ConsoleSink, FrameAnnotator, FrameSink, MotionAnnotator, Orchestrator, SnapshotSink,
    SourceSpec,
};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Stream to open: an MJPEG file, `-` for MJPEG on stdin, or `pattern[:WxH]`
    source: String,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Stop each pipeline after this many frames
    #[arg(long)]
    frames: Option<u64>,

    /// Write each pipeline's latest frame as a JPEG here instead of printing labels
    #[arg(long)]
    snapshot_dir: Option<PathBuf>,

    /// Override the source pacing rate
    #[arg(long)]
    fps: Option<u32>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize error handling and logging
    color_eyre::install()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("lookout=info"));
    let registry = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_timer(uptime()));
    #[cfg(feature = "profiling")]
    let registry = registry.with(tracing_tracy::TracyLayer::default());
    registry.init();

    let args = Args::parse();

    info!("Lookout launching...");

    // Load configuration
    let mut config = Config::load(args.config.as_deref()).wrap_err("failed to load configuration")?;
    if let Some(fps) = args.fps {
        config.capture.fps = fps;
    }

    let spec = SourceSpec::parse(&args.source)?;
    let source = spec
        .open(&config.capture)
        .wrap_err_with(|| format!("failed to open source `{}`", args.source))?;
    info!(source = ?spec, "source opened");

    let mut orchestrator = Orchestrator::new(config.ingest.clone(), &config.stats);
    for (index, pipeline) in config.pipelines.iter().enumerate() {
        let sink: Box<dyn FrameSink> = match &args.snapshot_dir {
            Some(dir) => Box::new(SnapshotSink::new(dir, &format!("pipeline-{index}"), 1)?),
            None => Box::new(ConsoleSink::stdout(args.frames)),
        };
        let annotator: Option<Box<dyn FrameAnnotator>> = pipeline
            .annotate
            .then(|| Box::new(MotionAnnotator::new(config.motion.clone())) as Box<dyn FrameAnnotator>);
        orchestrator.add_pipeline(pipeline.clone(), sink, annotator);
    }

    // Ctrl-C stops every pipeline
    let stop = orchestrator.stop_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            stop.stop();
        }
    });

    let report = orchestrator.run(source).await?;
    println!();
    for pipeline in &report.pipelines {
        info!(
            pipeline = %pipeline.label,
            exit = %pipeline.exit,
            frames = pipeline.frames,
            annotated = pipeline.annotated,
            max_latency_ms = pipeline.max_latency.as_secs_f64() * 1000.0,
            "pipeline report"
        );
    }
    if report.stats.buffer.published > 0 {
        info!(
            published = report.stats.buffer.published,
            dropped = report.stats.buffer.dropped,
            "frames"
        );
    } else {
        warn!("source produced no frames");
    }

    info!("Lookout shutting down");
    Ok(())
}
