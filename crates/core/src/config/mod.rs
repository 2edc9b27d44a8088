//! Queue SDK configuration.
//!
//! JSON layout of config files:
//! `database.application_name` stays snake_case, the `queue` and
//! `monitoring` sections are camelCase.

mod loader;

pub use loader::ConfigLoader;

use serde::{Deserialize, Serialize};

pub const DEFAULT_SCHEMA: &str = "pgboss";
pub const DEFAULT_APPLICATION_NAME: &str = "queue-sdk";
pub const DEFAULT_PORT: u16 = 5432;
pub const DEFAULT_RETRY_LIMIT: u32 = 3;
pub const DEFAULT_RETRY_DELAY_MS: u64 = 5000;
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_HEALTH_CHECK_INTERVAL_MS: u64 = 30_000;

/// Root configuration, immutable once handed to the queue manager
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueSdkConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<QueueDefaults>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monitoring: Option<MonitoringConfig>,
}

impl QueueSdkConfig {
    pub fn new(database: DatabaseConfig) -> Self {
        Self {
            database,
            queue: None,
            monitoring: None,
        }
    }

    pub fn queue_defaults(&self) -> Option<&QueueDefaults> {
        self.queue.as_ref()
    }

    pub fn log_level(&self) -> LogLevel {
        self.monitoring
            .as_ref()
            .and_then(|m| m.log_level)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TlsMode {
    #[default]
    Disable,
    Prefer,
    Require,
}

/// Required fields are `#[serde(default)]` so that a file missing one of
/// them loads and then fails `ConfigLoader::validate` with a precise message.
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default)]
    pub port: u16,
    #[serde(default)]
    pub database: String,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_name: Option<String>,
    /// Also read from the older `ssl` key, where `true` or an options
    /// object means TLS is required and `false` turns it off.
    #[serde(default, alias = "ssl", deserialize_with = "deserialize_tls_mode")]
    pub ssl_mode: TlsMode,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TlsSetting {
    Mode(TlsMode),
    Enabled(bool),
    Options(serde_json::Map<String, serde_json::Value>),
}

fn deserialize_tls_mode<'de, D>(deserializer: D) -> Result<TlsMode, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(match Option::<TlsSetting>::deserialize(deserializer)? {
        None | Some(TlsSetting::Enabled(false)) => TlsMode::Disable,
        Some(TlsSetting::Enabled(true)) | Some(TlsSetting::Options(_)) => TlsMode::Require,
        Some(TlsSetting::Mode(mode)) => mode,
    })
}

impl DatabaseConfig {
    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or(DEFAULT_SCHEMA)
    }

    pub fn application_name(&self) -> &str {
        self.application_name
            .as_deref()
            .unwrap_or(DEFAULT_APPLICATION_NAME)
    }
}

impl std::fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .field("schema", &self.schema)
            .field("application_name", &self.application_name)
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// Manager-wide defaults for submissions and workers
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct QueueDefaults {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_limit: Option<u32>,
    /// Milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_delay: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_size: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub team_concurrency: Option<u32>,
    /// Worker polling interval in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_metadata: Option<bool>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitoringConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics_port: Option<u16>,
    /// Milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check_interval: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_level: Option<LogLevel>,
}

impl MonitoringConfig {
    pub fn metrics_port(&self) -> u16 {
        self.metrics_port.unwrap_or(DEFAULT_METRICS_PORT)
    }

    pub fn health_check_interval_ms(&self) -> u64 {
        self.health_check_interval
            .unwrap_or(DEFAULT_HEALTH_CHECK_INTERVAL_MS)
    }
}
