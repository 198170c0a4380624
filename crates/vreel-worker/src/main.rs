//! Highlight pipeline binary.

use std::sync::Arc;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vreel_media::FfmpegFrameSource;
use vreel_worker::{PipelineConfig, PipelineController};

#[tokio::main]
async fn main() {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Initialize tracing with colored output for dev, JSON for production
    let use_json = std::env::var("LOG_FORMAT")
        .map(|v| v.to_lowercase() == "json")
        .unwrap_or(false);

    let env_filter = EnvFilter::from_default_env().add_directive(
        "vreel=info"
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );

    if use_json {
        tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(env_filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(
                fmt::layer()
                    .with_ansi(true)
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_file(false)
                    .with_line_number(false),
            )
            .with(env_filter)
            .init();
    }

    info!("Starting vreel-worker");

    let config = match PipelineConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    info!("Pipeline config: {:?}", config);

    let mode = config.run_mode;
    let output_dir = config.output_dir.clone();

    // Ctrl-C requests cancellation; the current stage finishes without writing
    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Received shutdown signal, cancelling run");
            cancel_tx.send(true).ok();
        }
    });

    let controller = PipelineController::new(config, Arc::new(FfmpegFrameSource::new()))
        .with_cancellation(cancel_rx);

    let report = match controller.run(mode).await {
        Ok(report) => report,
        Err(e) => {
            error!(error_kind = e.kind(), "Pipeline failed: {}", e);
            std::process::exit(1);
        }
    };

    match report.write_to(&output_dir).await {
        Ok(path) => info!(path = %path.display(), "Run report written"),
        Err(e) => warn!("Could not write run report: {}", e),
    }

    for warning in &report.warnings {
        warn!("{}", warning);
    }

    info!(
        run_id = %report.run_id,
        state = %report.final_state,
        selected = ?report.selected_count,
        duration = ?report.actual_duration,
        "vreel-worker finished"
    );
}
