//! Configuration for the telemetry agent.

use crate::core::scheduler::SchedulerConfig;
use crate::transport::TransportConfig;
use serde::{Deserialize, Serialize};
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory name under the platform config and data dirs.
const APP_DIR: &str = "cbsa-telemetry";

/// Main configuration for the telemetry agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Length of each collection window
    #[serde(with = "duration_serde")]
    pub window_duration: Duration,

    /// How often the scheduler checks whether the window is due
    #[serde(with = "millis_serde")]
    pub tick_period: Duration,

    /// Interaction events that close a window early
    pub max_window_events: usize,

    /// Bound of the raw event channel between the sink and the scheduler
    pub event_buffer_capacity: usize,

    pub backend: BackendConfig,

    pub transport: TransportSettings,

    /// Path for storing transparency stats
    pub data_path: PathBuf,

    /// `event_type` for windows that carry no interaction tag
    pub event_type: String,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR);

        Self {
            window_duration: Duration::from_secs(10),
            tick_period: Duration::from_millis(1000),
            max_window_events: 512,
            event_buffer_capacity: 10_000,
            backend: BackendConfig::default(),
            transport: TransportSettings::default(),
            data_path: data_dir,
            event_type: "BEHAVIORAL_VECTOR".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default location.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`, falling back to defaults when the
    /// file does not exist.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        serde_json::from_str(&content).map_err(ConfigError::Parse)
    }

    /// Save configuration to the default location.
    pub fn save(&self) -> Result<(), ConfigError> {
        self.save_to(&Self::config_path())
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(APP_DIR)
            .join("config.json")
    }

    /// Ensure all required directories exist.
    pub fn ensure_directories(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.data_path)?;
        Ok(())
    }

    /// Where transparency stats persist between runs.
    pub fn transparency_path(&self) -> PathBuf {
        self.data_path.join("transparency.json")
    }

    /// WebSocket endpoint for the configured backend.
    pub fn ws_url(&self) -> String {
        self.backend.ws_url()
    }

    /// Validate and store a new backend address.
    pub fn set_backend(&mut self, host: &str, port: u16) -> Result<(), ConfigError> {
        let host = host.trim();
        if !is_valid_host(host) {
            return Err(ConfigError::InvalidHost(host.to_string()));
        }
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }
        self.backend = BackendConfig {
            host: host.to_string(),
            port,
        };
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            window_duration: self.window_duration,
            tick_period: self.tick_period,
            max_window_events: self.max_window_events,
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        TransportConfig {
            url: self.ws_url(),
            reconnect_delay: Duration::from_millis(self.transport.reconnect_delay_ms),
            max_reconnect_attempts: self.transport.max_reconnect_attempts,
            backoff_cap: self.transport.backoff_cap,
            queue_size: self.transport.queue_size,
            connection_timeout: Duration::from_millis(self.transport.connection_timeout_ms),
        }
    }
}

/// Backend address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackendConfig {
    pub host: String,
    pub port: u16,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 8000,
        }
    }
}

impl BackendConfig {
    pub fn ws_url(&self) -> String {
        format!("ws://{}:{}/ws/behaviour", self.host, self.port)
    }
}

/// Reconnect and queueing tunables, as stored on disk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportSettings {
    pub reconnect_delay_ms: u64,
    pub max_reconnect_attempts: u32,
    pub backoff_cap: u32,
    pub queue_size: usize,
    pub connection_timeout_ms: u64,
}

impl Default for TransportSettings {
    fn default() -> Self {
        Self {
            reconnect_delay_ms: 3000,
            max_reconnect_attempts: 10,
            backoff_cap: 5,
            queue_size: 100,
            connection_timeout_ms: 10_000,
        }
    }
}

/// Dotted IPv4 address or RFC 1123 hostname.
fn is_valid_host(host: &str) -> bool {
    if host.is_empty() || host.len() > 253 {
        return false;
    }
    if host.parse::<Ipv4Addr>().is_ok() {
        return true;
    }

    let labels: Vec<&str> = host.split('.').collect();
    // All-numeric labels are a malformed address, not a hostname
    if labels.iter().all(|l| l.chars().all(|c| c.is_ascii_digit())) {
        return false;
    }

    labels.iter().all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
    })
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[source] serde_json::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[source] serde_json::Error),
    #[error("Invalid backend host: {0:?}")]
    InvalidHost(String),
    #[error("Port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),
}

/// Serde support for Duration, as whole seconds.
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde support for Duration, as milliseconds.
mod millis_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
