//! `altherma-mqtt` – bridges a Daikin Altherma heat pump to an MQTT broker.
//!
//! 1. Initialises tracing (`RUST_LOG`, `ALTHERMA_LOG_FORMAT=json`,
//!    `OTEL_EXPORTER_OTLP_ENDPOINT`).
//! 2. Loads the configuration from `ALTHERMA_*` variables; see [`config`].
//! 3. Connects to the broker, discovers the LAN adapter and runs the bridge
//!    until Ctrl-C or SIGTERM.
//!
//! Exit status is 0 after an orderly shutdown, 1 when startup fails and 2 on
//! a configuration error.

mod config;

use std::process::ExitCode;
use std::sync::Arc;

use altherma_hal::LanAdapterConnector;
use altherma_runtime::{BridgeSupervisor, ShutdownReason, init_tracing};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const CONFIG_ERROR: u8 = 2;

fn main() -> ExitCode {
    let _telemetry = init_tracing("altherma-mqtt");

    let cfg = match config::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            return ExitCode::from(CONFIG_ERROR);
        }
    };
    info!(config = ?cfg, "starting bridge");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!(error = %e, "failed to build the tokio runtime");
            return ExitCode::FAILURE;
        }
    };

    runtime.block_on(async move {
        let shutdown = CancellationToken::new();
        tokio::spawn({
            let shutdown = shutdown.clone();
            async move {
                shutdown_signal().await;
                shutdown.cancel();
            }
        });

        let (client, source) = altherma_middleware::connect(&cfg.mqtt);
        let connector = LanAdapterConnector::new(cfg.device_host.clone(), cfg.device_timeout);
        let supervisor = BridgeSupervisor::new(Arc::new(client), Arc::new(connector), &cfg);

        match supervisor.run(source, shutdown).await {
            Ok(ShutdownReason::Signal) => {
                info!("bridge stopped");
                ExitCode::SUCCESS
            }
            Ok(reason) => {
                warn!(?reason, "bridge stopped on its own");
                ExitCode::SUCCESS
            }
            Err(e) => {
                error!(error = %e, "bridge failed");
                ExitCode::FAILURE
            }
        }
    })
}

/// Resolve on Ctrl-C or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl-C, shutting down"),
        _ = terminate => info!("received SIGTERM, shutting down"),
    }
}
