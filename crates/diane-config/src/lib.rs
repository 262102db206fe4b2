//! Layered configuration for the hub, following `crucible-config`'s shape:
//! a `Default`-able top-level struct loaded from an optional TOML file with
//! environment and CLI overrides applied on top.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// HTTP-streamable and SSE transport listen configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct TransportConfig {
    pub http_bind: String,
    pub sse_bind: String,
    /// Idle HTTP-streamable/SSE sessions are reaped after this many seconds
    /// of inactivity (spec.md §4.4).
    pub idle_timeout_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            http_bind: "127.0.0.1:7337".to_string(),
            sse_bind: "127.0.0.1:7338".to_string(),
            idle_timeout_secs: 600,
        }
    }
}

/// Top-level application configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct AppConfig {
    /// Directory holding the SQLite database and any legacy JSON to import.
    pub data_dir: PathBuf,
    /// This process's placement host identity (spec.md §3): the serving
    /// path loads only servers live on this host. Single-host deployments
    /// keep the default `master`, matching the placement row
    /// `ensure_builtin_registered` seeds for builtins.
    pub host: String,
    /// Per-call deadline applied to `tools/call`, independent of transport
    /// (spec.md §4.1).
    pub call_deadline_secs: u64,
    /// Starting backoff delay before respawning a dead stdio upstream.
    pub backoff_initial_secs: u64,
    /// Backoff delay cap.
    pub backoff_max_secs: u64,
    pub transports: TransportConfig,
    pub log_level: String,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            host: "master".to_string(),
            call_deadline_secs: 60,
            backoff_initial_secs: 1,
            backoff_max_secs: 30,
            transports: TransportConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".diane")
}

impl AppConfig {
    /// Load from an optional config file, then apply env var overrides.
    /// Missing file is not an error (falls back to defaults, per
    /// `crucible-cli`'s `CliConfig::load` convention); malformed TOML is.
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::load_file(&p)?,
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_file(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|source| ConfigError::Parse {
                    path: path.to_path_buf(),
                    source,
                })
            }
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                Ok(Self::default())
            }
            Err(source) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("DIANE_DATA_DIR") {
            self.data_dir = PathBuf::from(dir);
        }
        if let Ok(level) = std::env::var("DIANE_LOG_LEVEL") {
            self.log_level = level;
        }
        if let Ok(host) = std::env::var("DIANE_HOST") {
            self.host = host;
        }
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("diane.db")
    }

    pub fn legacy_import_path(&self) -> PathBuf {
        self.data_dir.join("servers.legacy.json")
    }

    pub fn call_deadline(&self) -> Duration {
        Duration::from_secs(self.call_deadline_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.transports.idle_timeout_secs)
    }
}
