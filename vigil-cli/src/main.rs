// Vigil command line interface
// Runs the detection pipeline against the synthetic camera

mod console;
mod simulated;

use anyhow::Context;
use clap::{Parser, Subcommand};
use futures::StreamExt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use vigil::{
    DetectionStream, InferencePolicy, PipelineConfig, PipelineController, SyntheticCamera,
    ThreadBindingContext,
};

use crate::console::InteractiveConsole;
use crate::simulated::SimulatedDetector;

#[derive(Parser)]
#[command(name = "vigil")]
#[command(about = "Live object detection over a camera frame stream", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (TOML)
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    /// Simulated inference latency in milliseconds
    #[arg(long, default_value = "40", global = true)]
    latency_ms: u64,

    /// Make every Nth detection fail
    #[arg(long, global = true)]
    fail_every: Option<u64>,

    /// Seed for the simulated detector
    #[arg(long, global = true)]
    seed: Option<u64>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the pipeline for a fixed time, printing events as JSON lines
    Run {
        /// Seconds to run before stopping
        #[arg(long, default_value = "5")]
        duration_secs: u64,

        /// Override the camera frame rate
        #[arg(long)]
        frame_rate: Option<u32>,

        /// Skip inference while nobody is subscribed
        #[arg(long)]
        when_subscribed: bool,

        /// Assign tracking ids with the IoU tracker
        #[arg(long)]
        track: bool,
    },

    /// Drive the pipeline with host control commands read from stdin
    Interactive,
}

struct Pipeline {
    controller: Arc<PipelineController>,
    camera: Arc<SyntheticCamera>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn build_pipeline(cli: &Cli, config: PipelineConfig) -> anyhow::Result<Pipeline> {
    let camera = Arc::new(SyntheticCamera::new());
    let binding = Arc::new(
        ThreadBindingContext::spawn("camera-main").context("spawning binding thread")?,
    );
    let detector = SimulatedDetector::new(
        Duration::from_millis(cli.latency_ms),
        cli.fail_every,
        cli.seed,
    );
    let controller = PipelineController::new(config, camera.clone(), Box::new(detector), binding)?;
    Ok(Pipeline {
        controller: Arc::new(controller),
        camera,
    })
}

/// Print every batch as one JSON line until the stream ends
fn spawn_printer(mut stream: DetectionStream) -> tokio::task::JoinHandle<u64> {
    tokio::spawn(async move {
        let mut printed = 0;
        while let Some(events) = stream.next().await {
            match serde_json::to_string(&events) {
                Ok(line) => {
                    println!("{}", line);
                    printed += 1;
                }
                Err(e) => warn!("Failed to encode events: {}", e),
            }
        }
        printed
    })
}

async fn run(
    cli: &Cli,
    duration_secs: u64,
    frame_rate: Option<u32>,
    when_subscribed: bool,
    track: bool,
) -> anyhow::Result<()> {
    let mut config = load_config(cli.config.as_ref())?;
    if let Some(frame_rate) = frame_rate {
        config.camera.frame_rate = frame_rate;
    }
    if when_subscribed {
        config.inference_policy = InferencePolicy::WhenSubscribed;
    }
    if track && config.tracking.is_none() {
        config.tracking = Some(Default::default());
    }

    let pipeline = build_pipeline(cli, config)?;
    let controller = &pipeline.controller;
    let printer = spawn_printer(controller.open_stream());

    controller.initialize().await?;
    controller.start().await?;
    info!("Running for {}s", duration_secs);
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration_secs)) => {}
        _ = tokio::signal::ctrl_c() => info!("Interrupted"),
    }
    controller.teardown().await?;

    let printed = printer.await.unwrap_or(0);
    info!("Printed {} batches", printed);
    let stats = controller.stats();
    eprintln!("{}", serde_json::to_string_pretty(&stats)?);
    if pipeline.camera.outstanding() > 0 {
        warn!("{} frames not yet released", pipeline.camera.outstanding());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = tracing::Level::from_str(&cli.log_level)
        .map_err(|_| anyhow::anyhow!("invalid log level: {}", cli.log_level))?;
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Run {
            duration_secs,
            frame_rate,
            when_subscribed,
            track,
        } => run(&cli, *duration_secs, *frame_rate, *when_subscribed, *track).await?,
        Commands::Interactive => {
            let config = load_config(cli.config.as_ref())?;
            let pipeline = build_pipeline(&cli, config)?;
            InteractiveConsole::new(pipeline.controller.clone())
                .run()
                .await?;
            pipeline.controller.teardown().await?;
        }
    }

    Ok(())
}
