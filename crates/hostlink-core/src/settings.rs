//! Settings
//!
//! Per-connection-type settings (pool sizing and transport timeouts) plus
//! logging options, deserialized from JSON:
//!
//! ```json
//! {
//!   "connectors": {
//!     "http": { "max_num_idle": 3, "max_num_conn": 10, "idle_timeout": 1000 },
//!     "ssh":  { "timeout": 5, "banner_timeout": 60 }
//!   },
//!   "logging": { "filter": "info", "directory": "logs" }
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Errors while loading or validating settings
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("failed to read settings file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse settings: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid settings for connector '{kind}': {reason}")]
    Invalid { kind: String, reason: String },
}

fn default_max_num_idle() -> usize {
    3
}

fn default_max_num_conn() -> usize {
    10
}

fn default_min_num_idle() -> usize {
    1
}

fn default_idle_timeout() -> u64 {
    1000
}

fn default_timeout() -> u64 {
    5
}

fn default_banner_timeout() -> u64 {
    60
}

fn default_create_retry_interval_ms() -> u64 {
    1000
}

/// Settings for one connection type (`http`, `ssh`, `gateway`, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorSettings {
    /// Upper bound on cached idle connections
    #[serde(default = "default_max_num_idle")]
    pub max_num_idle: usize,

    /// Upper bound on total connections per endpoint
    #[serde(default = "default_max_num_conn")]
    pub max_num_conn: usize,

    /// Idle floor the reaper replenishes to
    #[serde(default = "default_min_num_idle")]
    pub min_num_idle: usize,

    /// Seconds an idle connection may sit before eviction
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout: u64,

    /// Transport connect timeout, seconds
    #[serde(default = "default_timeout")]
    pub timeout: u64,

    /// Shell banner/handshake timeout, seconds
    #[serde(default = "default_banner_timeout")]
    pub banner_timeout: u64,

    /// Verify TLS certificates for HTTP connections
    #[serde(default)]
    pub verify_tls: bool,

    /// Wait between creation retries when the target is unreachable, ms
    #[serde(default = "default_create_retry_interval_ms")]
    pub create_retry_interval_ms: u64,

    /// Keys this crate does not interpret, kept for transports
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for ConnectorSettings {
    fn default() -> Self {
        Self {
            max_num_idle: default_max_num_idle(),
            max_num_conn: default_max_num_conn(),
            min_num_idle: default_min_num_idle(),
            idle_timeout: default_idle_timeout(),
            timeout: default_timeout(),
            banner_timeout: default_banner_timeout(),
            verify_tls: false,
            create_retry_interval_ms: default_create_retry_interval_ms(),
            extra: Map::new(),
        }
    }
}

impl ConnectorSettings {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    pub fn banner_timeout(&self) -> Duration {
        Duration::from_secs(self.banner_timeout)
    }

    pub fn create_retry_interval(&self) -> Duration {
        Duration::from_millis(self.create_retry_interval_ms)
    }

    /// Check sizing relationships
    pub fn validate(&self, kind: &str) -> Result<(), SettingsError> {
        let invalid = |reason: String| SettingsError::Invalid {
            kind: kind.to_string(),
            reason,
        };

        if self.max_num_conn == 0 {
            return Err(invalid("max_num_conn must be at least 1".to_string()));
        }
        if self.max_num_idle > self.max_num_conn {
            return Err(invalid(format!(
                "max_num_idle ({}) exceeds max_num_conn ({})",
                self.max_num_idle, self.max_num_conn
            )));
        }
        if self.min_num_idle > self.max_num_idle {
            return Err(invalid(format!(
                "min_num_idle ({}) exceeds max_num_idle ({})",
                self.min_num_idle, self.max_num_idle
            )));
        }
        Ok(())
    }
}

fn default_filter() -> String {
    "info,hostlink_core=debug,hostlink_connect=debug".to_string()
}

fn default_file_prefix() -> String {
    "hostlink".to_string()
}

fn default_ansi() -> bool {
    true
}

/// Logging options consumed by [`crate::logging::init_tracing`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset
    #[serde(default = "default_filter")]
    pub filter: String,

    /// Directory for daily-rotated log files; console only when unset
    #[serde(default)]
    pub directory: Option<PathBuf>,

    #[serde(default = "default_file_prefix")]
    pub file_prefix: String,

    /// Colored console output
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            directory: None,
            file_prefix: default_file_prefix(),
            ansi: default_ansi(),
        }
    }
}

/// Root settings document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default, alias = "Connectors")]
    pub connectors: HashMap<String, ConnectorSettings>,

    #[serde(default)]
    pub logging: LoggingSettings,
}

impl Settings {
    /// Parse and validate settings from a JSON string
    pub fn from_json_str(json: &str) -> Result<Self, SettingsError> {
        let settings: Settings = serde_json::from_str(json)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Read, parse and validate a JSON settings file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded settings file");
        Self::from_json_str(&contents)
    }

    /// Settings for a connection kind; defaults when not configured
    pub fn connector(&self, kind: &str) -> ConnectorSettings {
        self.connectors.get(kind).cloned().unwrap_or_default()
    }

    pub fn validate(&self) -> Result<(), SettingsError> {
        for (kind, connector) in &self.connectors {
            connector.validate(kind)?;
        }
        Ok(())
    }
}
