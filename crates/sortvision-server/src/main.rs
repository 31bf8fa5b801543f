//! SortVision Server
//!
//! HTTP front end for the waste classifier. Accepts an uploaded photo on
//! `/predict` and answers with the predicted material and its confidence.

use anyhow::Result;
use clap::Parser;
use metrics_exporter_prometheus::PrometheusHandle;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::signal;
use tracing::{error, info, warn};

mod config;
mod routes;
mod state;

use config::ServerConfig;

#[derive(Parser, Debug)]
#[command(name = "sortvision-server")]
#[command(about = "SortVision waste classification service", long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Model checkpoint (.safetensors or .pth)
    #[arg(short = 'm', long, env = "SORTVISION_CHECKPOINT")]
    checkpoint: Option<PathBuf>,

    /// Compute device: cpu, cuda[:N] or metal[:N]
    #[arg(short, long)]
    device: Option<String>,

    /// Listen address (overrides config)
    #[arg(short = 'l', long)]
    listen: Option<String>,

    /// Listen port (overrides config)
    #[arg(short = 'P', long)]
    port: Option<u16>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.verbose);

    info!("Starting SortVision Server");

    let config = ServerConfig::load(&cli.config, &cli)?;
    info!("Configuration loaded successfully");
    info!("Model: {:?}", config.detector.model.source);
    info!("Device: {:?}", config.detector.device);
    info!("Low-confidence policy: {:?}", config.detector.low_confidence);

    let metrics_handle = init_metrics()?;

    // The model must be fully loaded before the listener is bound
    info!("Loading classifier...");
    let state_config = config.clone();
    let state = tokio::task::spawn_blocking(move || state::AppState::load(state_config, metrics_handle))
        .await?
        .map_err(|e| {
            error!("Failed to load classifier: {:#}", e);
            e
        })?;

    let addr: SocketAddr = format!("{}:{}", config.listen, config.port).parse()?;
    let app = routes::create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!("Listening on http://{}", addr);

    let shutdown = async {
        shutdown_signal().await;
        warn!("Shutdown signal received, stopping server...");
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Listen for shutdown signals (SIGTERM, SIGINT)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Initialize tracing/logging
fn init_tracing(verbose: bool) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("sortvision=debug,tower_http=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sortvision=info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Initialize metrics exporter and return handle for rendering
fn init_metrics() -> Result<PrometheusHandle> {
    use metrics_exporter_prometheus::PrometheusBuilder;

    let handle = PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| anyhow::anyhow!("Failed to install metrics: {}", e))?;

    metrics::describe_counter!(
        "sortvision_requests_total",
        "Total number of prediction requests received"
    );
    metrics::describe_counter!(
        "sortvision_predictions_total",
        "Total number of successful predictions by label"
    );
    metrics::describe_histogram!(
        "sortvision_inference_latency_us",
        metrics::Unit::Microseconds,
        "Preprocessing plus forward pass latency in microseconds"
    );
    metrics::describe_counter!("sortvision_errors_total", "Total number of errors by type");

    info!("Metrics exporter initialized");
    Ok(handle)
}
