// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment at startup. Tests build it
//! from an explicit lookup closure instead.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `KMS_BACKEND` | Store connector: `memory`, `fs` or `redb` | `fs` |
//! | `DATA_DIR` | Root directory for the `fs` and `redb` connectors | `/data` |
//! | `KMS_KEY_PREFIX` | Prefix prepended to every stored name | empty |
//! | `KMS_ADMIN_IDENTITY` | Identity with unrestricted access | unset |
//! | `KMS_DEFAULT_ENCLAVE` | Enclave used when a request names none | `default` |
//! | `KMS_OP_TIMEOUT_SECS` | Deadline applied to each bootstrap call | `30` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{KmsError, KmsResult};
use crate::identity::Identity;
use crate::pattern::has_metacharacters;
use crate::validate::validate_enclave_name;

/// Environment variable selecting the store connector.
pub const BACKEND_ENV: &str = "KMS_BACKEND";

/// Environment variable name for the data directory path.
///
/// # Default
/// `/data`
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Environment variable for the storage name prefix.
///
/// Lets several deployments share one backend namespace.
pub const KEY_PREFIX_ENV: &str = "KMS_KEY_PREFIX";

/// Environment variable naming the admin identity.
///
/// The admin bypasses policy evaluation in every enclave. Leave unset to
/// disable the admin entirely.
pub const ADMIN_IDENTITY_ENV: &str = "KMS_ADMIN_IDENTITY";

/// Environment variable naming the default enclave.
pub const DEFAULT_ENCLAVE_ENV: &str = "KMS_DEFAULT_ENCLAVE";

/// Environment variable for the per-call timeout, in seconds.
pub const OP_TIMEOUT_ENV: &str = "KMS_OP_TIMEOUT_SECS";

/// Environment variable selecting the log output format.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Environment variable holding the log filter directives.
pub const LOG_FILTER_ENV: &str = "RUST_LOG";

pub const DEFAULT_DATA_DIR: &str = "/data";
pub const DEFAULT_ENCLAVE: &str = "default";
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(30);
pub const DEFAULT_LOG_FILTER: &str = "info";

/// File name of the redb database inside the data directory.
pub const REDB_FILE_NAME: &str = "keystore.redb";

/// Which store connector backs the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Volatile in-process map (tests, development).
    Memory,
    /// One file per name under `DATA_DIR`.
    Fs,
    /// Embedded redb database under `DATA_DIR`.
    Redb,
}

impl FromStr for BackendKind {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "memory" | "mem" => Ok(BackendKind::Memory),
            "fs" | "file" => Ok(BackendKind::Fs),
            "redb" => Ok(BackendKind::Redb),
            other => Err(KmsError::invalid(format!(
                "{BACKEND_ENV}: unknown backend {other:?} (expected memory, fs or redb)"
            ))),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = KmsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => Err(KmsError::invalid(format!(
                "{LOG_FORMAT_ENV}: unknown format {other:?} (expected json or pretty)"
            ))),
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: BackendKind,
    pub data_dir: PathBuf,
    pub key_prefix: String,
    pub admin_identity: Option<Identity>,
    pub default_enclave: String,
    pub op_timeout: Duration,
    pub log_format: LogFormat,
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            backend: BackendKind::Fs,
            data_dir: PathBuf::from(DEFAULT_DATA_DIR),
            key_prefix: String::new(),
            admin_identity: None,
            default_enclave: DEFAULT_ENCLAVE.to_string(),
            op_timeout: DEFAULT_OP_TIMEOUT,
            log_format: LogFormat::Pretty,
            log_filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl Config {
    /// Load the configuration from the process environment.
    pub fn from_env() -> KmsResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load the configuration from an arbitrary variable lookup.
    ///
    /// Variables that are unset or blank fall back to their defaults.
    pub fn from_lookup<F>(lookup: F) -> KmsResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let mut config = Config::default();

        if let Some(value) = get(BACKEND_ENV) {
            config.backend = value.parse()?;
        }
        if let Some(value) = get(DATA_DIR_ENV) {
            config.data_dir = PathBuf::from(value);
        }
        if let Some(value) = get(KEY_PREFIX_ENV) {
            if has_metacharacters(&value) {
                return Err(KmsError::invalid(format!(
                    "{KEY_PREFIX_ENV}: prefix {value:?} contains a pattern character"
                )));
            }
            config.key_prefix = value;
        }
        if let Some(value) = get(ADMIN_IDENTITY_ENV) {
            let admin = Identity::new(value);
            admin.validate()?;
            config.admin_identity = Some(admin);
        }
        if let Some(value) = get(DEFAULT_ENCLAVE_ENV) {
            validate_enclave_name(&value)?;
            config.default_enclave = value;
        }
        if let Some(value) = get(OP_TIMEOUT_ENV) {
            let secs: u64 = value.trim().parse().map_err(|_| {
                KmsError::invalid(format!("{OP_TIMEOUT_ENV}: {value:?} is not a number"))
            })?;
            if secs == 0 {
                return Err(KmsError::invalid(format!("{OP_TIMEOUT_ENV} must be positive")));
            }
            config.op_timeout = Duration::from_secs(secs);
        }
        if let Some(value) = get(LOG_FORMAT_ENV) {
            config.log_format = value.parse()?;
        }
        if let Some(value) = get(LOG_FILTER_ENV) {
            config.log_filter = value;
        }

        Ok(config)
    }

    /// Path of the redb database file.
    pub fn redb_path(&self) -> PathBuf {
        self.data_dir.join(REDB_FILE_NAME)
    }
}
