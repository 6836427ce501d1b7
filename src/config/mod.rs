//! Configuration management.
//!
//! TOML-backed configuration for the link engine and CLI, organized into
//! sections with serde defaults so a minimal file stays minimal:
//!
//! ```toml
//! [link]
//! port = "/dev/ttyUSB0"
//! baud_rate = 115200
//! channel = 0
//!
//! [timing]
//! heartbeat_secs = 12
//! reconnect_floor_ms = 1000
//! reconnect_cap_ms = 15000
//!
//! [logging]
//! level = "info"
//! # file = "meshlink.log"
//! ```
//!
//! All values are validated on load; `create_default` writes a starter file
//! for `meshlink init`.
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};

use crate::link::SessionTiming;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkConfig {
    /// Serial device path, e.g. `/dev/ttyUSB0`.
    #[serde(default)]
    pub port: String,
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,
    /// Channel index for outbound traffic (0 = primary).
    #[serde(default)]
    pub channel: u32,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: default_baud_rate(),
            channel: 0,
        }
    }
}

fn default_baud_rate() -> u32 {
    115_200
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimingConfig {
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Re-send cadence for the node-db request while syncing.
    #[serde(default = "default_want_config_resend_secs")]
    pub want_config_resend_secs: u64,
    #[serde(default = "default_sync_timeout_secs")]
    pub sync_timeout_secs: u64,
    #[serde(default = "default_reconnect_floor_ms")]
    pub reconnect_floor_ms: u64,
    #[serde(default = "default_reconnect_cap_ms")]
    pub reconnect_cap_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            heartbeat_secs: default_heartbeat_secs(),
            want_config_resend_secs: default_want_config_resend_secs(),
            sync_timeout_secs: default_sync_timeout_secs(),
            reconnect_floor_ms: default_reconnect_floor_ms(),
            reconnect_cap_ms: default_reconnect_cap_ms(),
        }
    }
}

fn default_heartbeat_secs() -> u64 {
    12
}
fn default_want_config_resend_secs() -> u64 {
    7
}
fn default_sync_timeout_secs() -> u64 {
    45
}
fn default_reconnect_floor_ms() -> u64 {
    1000
}
fn default_reconnect_cap_ms() -> u64 {
    15000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl TimingConfig {
    /// Lower the config into the engine's timing knobs.
    pub fn session_timing(&self) -> SessionTiming {
        SessionTiming {
            heartbeat: Duration::from_secs(self.heartbeat_secs),
            want_config_resend: Duration::from_secs(self.want_config_resend_secs),
            sync_timeout: Duration::from_secs(self.sync_timeout_secs),
            reconnect_floor: Duration::from_millis(self.reconnect_floor_ms),
            reconnect_cap: Duration::from_millis(self.reconnect_cap_ms),
        }
    }
}

impl Config {
    /// Load and validate a configuration file.
    pub async fn load(path: &str) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("invalid config in {}", path))?;
        config.validate()?;
        Ok(config)
    }

    /// Write a starter configuration file. Refuses to clobber an existing
    /// one.
    pub async fn create_default(path: &str) -> Result<()> {
        if tokio::fs::try_exists(path).await.unwrap_or(false) {
            return Err(anyhow!("{} already exists", path));
        }
        let config = Config::default();
        let content = toml::to_string_pretty(&config)?;
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("failed to write {}", path))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.link.baud_rate == 0 {
            return Err(anyhow!("link.baud_rate must be non-zero"));
        }
        if self.timing.heartbeat_secs == 0 {
            return Err(anyhow!("timing.heartbeat_secs must be non-zero"));
        }
        if self.timing.reconnect_floor_ms == 0 {
            return Err(anyhow!("timing.reconnect_floor_ms must be non-zero"));
        }
        if self.timing.reconnect_cap_ms < self.timing.reconnect_floor_ms {
            return Err(anyhow!(
                "timing.reconnect_cap_ms must be >= timing.reconnect_floor_ms"
            ));
        }
        self.logging
            .level
            .parse::<log::LevelFilter>()
            .map_err(|_| anyhow!("logging.level '{}' is not a log level", self.logging.level))?;
        Ok(())
    }
}
