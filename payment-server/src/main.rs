//! Payment HTTP Server binary

use clap::Parser;
use payment_server::{telemetry, wire_up, HttpMetrics, ServerConfig};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();

    if config.otel_enabled {
        telemetry::init_tracing_stack(&config.service_name, config.json_logs)?;
        info!("OpenTelemetry tracing enabled");
    } else {
        telemetry::init_console_logging(config.json_logs)?;
        info!("Console logging enabled (set OTEL_ENABLED=true for OpenTelemetry)");
    }

    info!("Starting payment server v{}", env!("CARGO_PKG_VERSION"));

    let metrics = Arc::new(HttpMetrics::new()?);
    let shutdown = CancellationToken::new();

    let (handler, logger) = wire_up(shutdown.clone(), &config.wire_config(), metrics)?;
    info!(
        parent: &logger,
        decline_amount = config.decline_amount,
        "payment service configured"
    );

    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;
    info!(parent: &logger, transport = "HTTP", addr = %config.bind_address, "listening");

    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Received shutdown signal, shutting down gracefully...");
        signal_token.cancel();
    });

    axum::serve(listener, handler)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    if config.otel_enabled {
        info!("Flushing OpenTelemetry traces...");
        telemetry::shutdown_telemetry();
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Resolves on ctrl-c, or SIGTERM on unix
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("Failed to listen for SIGTERM: {}", e);
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
