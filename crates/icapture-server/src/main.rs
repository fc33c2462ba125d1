use anyhow::{Context, Result};
use clap::Parser;
use icapture_config::ConfigLoader;
use icapture_logging::init_logging;
use icapture_metrics::PipelineMetrics;
use icapture_pipeline::RunningPipeline;
use icapture_server::build_pipeline;
use icapture_shutdown::SignalHandler;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{error, info, warn};

const STATS_INTERVAL: Duration = Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(author, version, about = "Dual-camera helmet violation detection", long_about = None)]
struct Args {
    /// Directory containing icapture.toml
    #[arg(short, long, default_value = "config")]
    config_dir: PathBuf,

    /// Print the effective configuration and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let loader = ConfigLoader::new(&args.config_dir);
    let config = loader
        .load()
        .with_context(|| format!("Invalid configuration in {}", loader.config_path().display()))?;

    if args.print_config {
        println!("{}", ConfigLoader::render(&config)?);
        return Ok(());
    }

    init_logging(&config.logging)?;
    info!(
        name = %config.system.name,
        location = %config.system.location,
        config = %loader.config_path().display(),
        "Starting iCapture"
    );

    let metrics = PipelineMetrics::new()?;
    let pipeline = build_pipeline(&config, &metrics).await?;
    let running = pipeline.start()?;

    let signals = SignalHandler::default();
    let shutdown = signals.wait_for_system_signal();
    tokio::pin!(shutdown);
    let mut ticker = tokio::time::interval(STATS_INTERVAL);
    ticker.tick().await;

    loop {
        tokio::select! {
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!(error = %e, "Signal handler failed, shutting down");
                }
                break;
            }
            _ = ticker.tick() => log_stats(&running),
        }
    }

    let report = running.shutdown().await;
    if report.is_clean() {
        info!(elapsed_ms = report.elapsed.as_millis() as u64, "iCapture stopped");
    } else {
        warn!(
            aborted = ?report.aborted,
            failed = ?report.failed,
            "iCapture stopped with unfinished tasks"
        );
    }

    Ok(())
}

fn log_stats(running: &RunningPipeline) {
    let sync = running.sync_stats();
    let verification = running.verification_stats();
    let (frames, results) = running.queue_depths();
    let cameras: Vec<String> = running
        .cameras()
        .iter()
        .map(|c| format!("{}={:?}", c.camera_id(), c.state()))
        .collect();

    info!(
        pairs = sync.pairs_emitted,
        synchronized = sync.synchronized,
        wide_only = sync.wide_only,
        plate_only = sync.plate_only,
        sync_rate = %format!("{:.2}", sync.sync_rate()),
        emitted = verification.emitted,
        suppressed = verification.suppressed,
        frames_queued = frames,
        results_queued = results,
        cameras = ?cameras,
        "Pipeline stats"
    );
}
