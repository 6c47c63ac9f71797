// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Tracing subscriber setup.

use tracing_subscriber::EnvFilter;

use crate::config::LogFormat;
use crate::error::{KmsError, KmsResult};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` in the process environment takes precedence over
/// `default_filter`. Fails if a subscriber is already installed.
pub fn init_tracing(format: LogFormat, default_filter: &str) -> KmsResult<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_filter))
        .map_err(|e| KmsError::invalid(format!("log filter {default_filter:?}: {e}")))?;

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
        LogFormat::Pretty => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init(),
    };

    result.map_err(|e| KmsError::Internal(format!("tracing already initialized: {e}")))
}
