// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::process::ExitCode;
use std::time::Duration;

use enclave_keystore::cancel::Context;
use enclave_keystore::config::Config;
use enclave_keystore::error::KmsResult;
use enclave_keystore::service::Service;
use enclave_keystore::telemetry::init_tracing;
use tokio_util::sync::CancellationToken;

/// Interval between backend health checks.
const HEALTH_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() -> ExitCode {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = init_tracing(config.log_format, &config.log_filter) {
        eprintln!("Failed to initialize logging: {e}");
        return ExitCode::FAILURE;
    }

    match run(config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, code = e.error_code(), "Key store stopped with an error");
            ExitCode::FAILURE
        }
    }
}

async fn run(config: Config) -> KmsResult<()> {
    let shutdown = CancellationToken::new();
    tokio::spawn(cancel_on_signal(shutdown.clone()));
    let root = Context::new(shutdown.clone());

    tracing::info!(
        backend = ?config.backend,
        data_dir = %config.data_dir.display(),
        default_enclave = %config.default_enclave,
        "Starting enclave key store"
    );
    if config.admin_identity.is_none() {
        tracing::warn!("No admin identity configured; only assigned policies grant access");
    }

    let service = Service::open(&root, &config).await?;
    let state = service.health(&root).await?;
    tracing::info!(latency_ms = state.latency.as_millis() as u64, "Store reachable");

    monitor(&service, &root, shutdown).await;
    Ok(())
}

/// Probe the backend periodically until shutdown.
async fn monitor(service: &Service, root: &Context, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(HEALTH_INTERVAL) => {},
            _ = shutdown.cancelled() => {
                tracing::info!("Key store shutting down");
                return;
            }
        }

        match service.health(root).await {
            Ok(state) => tracing::debug!(
                latency_ms = state.latency.as_millis() as u64,
                "Store health check passed"
            ),
            Err(e) if e.is_canceled() => {}
            Err(e) => tracing::warn!(error = %e, "Store health check failed"),
        }
    }
}

async fn cancel_on_signal(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Shutdown signal received");
            shutdown.cancel();
        }
        Err(e) => tracing::error!(error = %e, "Failed to listen for shutdown signal"),
    }
}
