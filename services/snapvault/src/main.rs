use anyhow::{Context, Result};
use snapvault::{
    start_api_server, AppState, ArchiveStore, CaptureService, Config, ExportAssembler,
    FfmpegEncoder, HttpFrameFetcher,
};
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level, &config.service.log_format);

    info!(
        service = %config.service.name,
        archive = %config.archive.directory.display(),
        exports = %config.archive.export_directory.display(),
        "Starting snapvault"
    );

    if config.service.metrics_port != 0 {
        init_metrics(config.service.metrics_port)?;
    }

    // Initialize components
    let fetcher = Arc::new(
        HttpFrameFetcher::new(&config.camera).context("Failed to build camera HTTP client")?,
    );

    let store = Arc::new(ArchiveStore::new(
        config.archive.directory.clone(),
        config.archive.jpeg_quality,
    ));

    let assembler = ExportAssembler::new(
        store.clone(),
        config.archive.export_directory.clone(),
        Arc::new(FfmpegEncoder::new(&config.export)),
    );

    let service = Arc::new(CaptureService::new(
        fetcher,
        store,
        assembler,
        config.camera.snapshot_path.clone(),
    ));

    let api_state = AppState {
        service,
        default_frame_rate: config.export.default_frame_rate,
    };

    if let Err(e) = start_api_server(api_state, &config.api, shutdown_signal()).await {
        error!(error = %e, "API server error");
        return Err(e);
    }

    info!("snapvault stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str, log_format: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if log_format == "pretty" {
        registry.with(fmt::layer().pretty()).init();
    } else {
        registry.with(fmt::layer().json()).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
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
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }

    info!("Shutting down snapvault");
}
