//! # Bridge Configuration
//!
//! Configuration for the management API side, the panel's serial link, the
//! Marlin identity presented to the panel, and the reconnect backoff.
//!
//! ## Example: TOML Configuration
//!
//! ```toml
//! [moonraker]
//! host = "192.168.1.20"
//! port = 7125
//! poll_interval_ms = 2000
//!
//! [serial]
//! port = "/dev/ttyS0"
//! baud = 115200
//!
//! [panel]
//! dialect = "auto"
//! firmware_name = "Klipper"
//! action_passthrough = true
//!
//! [backoff]
//! initial_ms = 500
//! max_ms = 30000
//! ```
//!
//! Every field has a default, so an empty file is a valid configuration.
//! [`Config::validate`] is the only place invalid values are rejected; a
//! validation failure is fatal at startup and never re-checked at runtime.
//!
//! ## Example: Rust Usage
//!
//! ```rust
//! use tft_shared::config::Config;
//! let config: Config = toml::from_str("[serial]\nbaud = 250000\n").unwrap();
//! assert_eq!(config.serial.baud, 250000);
//! assert_eq!(config.moonraker.port, 7125);
//! assert!(config.validate().is_ok());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::backoff::BackoffPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Main configuration struct for the bridge.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub moonraker: MoonrakerConfig,
    #[serde(default)]
    pub serial: SerialConfig,
    #[serde(default)]
    pub panel: PanelConfig,
    #[serde(default)]
    pub backoff: BackoffConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Management API connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MoonrakerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
}

impl Default for MoonrakerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_api_port(),
            poll_interval_ms: default_poll_interval_ms(),
            request_timeout_ms: default_request_timeout_ms(),
        }
    }
}

impl MoonrakerConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Panel UART.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SerialConfig {
    #[serde(default = "default_serial_port")]
    pub port: String,
    #[serde(default = "default_baud")]
    pub baud: u32,
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
}

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            port: default_serial_port(),
            baud: default_baud(),
            write_timeout_ms: default_write_timeout_ms(),
        }
    }
}

impl SerialConfig {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}

/// TFT firmware family on the serial link. The two families expect different
/// temperature lines and identities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PanelDialect {
    /// BIGTREETECH firmware: `ok`-prefixed Marlin answers and capability lines.
    #[default]
    Btt,
    /// Original MKS firmware: bare temperature lines and the MKS identity.
    Mks,
    /// Pick one from the panel's first commands after every connect.
    Auto,
}

impl fmt::Display for PanelDialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PanelDialect::Btt => write!(f, "BIGTREETECH"),
            PanelDialect::Mks => write!(f, "MKS"),
            PanelDialect::Auto => write!(f, "auto"),
        }
    }
}

/// What the bridge tells the panel about the "mainboard" it impersonates.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PanelConfig {
    #[serde(default)]
    pub dialect: PanelDialect,
    /// How long `auto` waits for a telling command before assuming BTT.
    #[serde(default = "default_dialect_detect_timeout_ms")]
    pub dialect_detect_timeout_ms: u64,
    #[serde(default = "default_firmware_name")]
    pub firmware_name: String,
    #[serde(default = "default_extruder_count")]
    pub extruder_count: u8,
    /// Forward `action:remote pause|resume|cancel` from the panel to the API.
    #[serde(default)]
    pub action_passthrough: bool,
    /// X, Y, Z, E
    #[serde(default = "default_steps_per_mm")]
    pub steps_per_mm: [f64; 4],
    #[serde(default = "default_progress_step_percent")]
    pub progress_step_percent: u8,
    /// Layer count assumed when the slicer does not report one. Unset means
    /// layer notifications are omitted for such files.
    #[serde(default)]
    pub estimated_total_layers: Option<u32>,
    /// Temperature autoreport interval until the panel sends its own M155.
    #[serde(default)]
    pub autoreport_temp_interval_s: u64,
}

impl PanelConfig {
    pub fn dialect_detect_timeout(&self) -> Duration {
        Duration::from_millis(self.dialect_detect_timeout_ms)
    }
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            dialect: PanelDialect::default(),
            dialect_detect_timeout_ms: default_dialect_detect_timeout_ms(),
            firmware_name: default_firmware_name(),
            extruder_count: default_extruder_count(),
            action_passthrough: false,
            steps_per_mm: default_steps_per_mm(),
            progress_step_percent: default_progress_step_percent(),
            estimated_total_layers: None,
            autoreport_temp_interval_s: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackoffConfig {
    #[serde(default = "default_backoff_initial_ms")]
    pub initial_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub max_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub multiplier: f64,
    /// Consecutive failures tolerated as Degraded before a link is Disconnected.
    #[serde(default = "default_degraded_threshold")]
    pub degraded_threshold: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_ms: default_backoff_initial_ms(),
            max_ms: default_backoff_max_ms(),
            multiplier: default_backoff_multiplier(),
            degraded_threshold: default_degraded_threshold(),
        }
    }
}

impl BackoffConfig {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            initial: Duration::from_millis(self.initial_ms),
            max: Duration::from_millis(self.max_ms),
            multiplier: self.multiplier,
            degraded_threshold: self.degraded_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: default_log_level() }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: String| Err(ConfigError::Invalid(msg));

        let host = self.moonraker.host.trim();
        if host.is_empty() {
            return invalid("moonraker.host must not be empty".to_string());
        }
        if host.contains(['/', ' ', '?', '#', '@']) {
            return invalid(format!("moonraker.host '{}' is not a host name or address", host));
        }
        if self.moonraker.port == 0 {
            return invalid("moonraker.port must be > 0".to_string());
        }
        if self.moonraker.poll_interval_ms == 0 {
            return invalid("moonraker.poll_interval_ms must be > 0".to_string());
        }
        if self.moonraker.request_timeout_ms == 0 {
            return invalid("moonraker.request_timeout_ms must be > 0".to_string());
        }
        if self.serial.port.trim().is_empty() {
            return invalid("serial.port must not be empty".to_string());
        }
        if self.serial.baud == 0 {
            return invalid("serial.baud must be > 0".to_string());
        }
        if self.panel.firmware_name.trim().is_empty() {
            return invalid("panel.firmware_name must not be empty".to_string());
        }
        if self.panel.dialect == PanelDialect::Auto && self.panel.dialect_detect_timeout_ms == 0 {
            return invalid("panel.dialect_detect_timeout_ms must be > 0 with dialect = \"auto\"".to_string());
        }
        if self.panel.extruder_count == 0 {
            return invalid("panel.extruder_count must be > 0".to_string());
        }
        if !(1..=100).contains(&self.panel.progress_step_percent) {
            return invalid(format!(
                "panel.progress_step_percent must be between 1 and 100, got {}",
                self.panel.progress_step_percent
            ));
        }
        if self.panel.steps_per_mm.iter().any(|s| !s.is_finite() || *s <= 0.0) {
            return invalid("panel.steps_per_mm entries must be > 0".to_string());
        }
        if self.panel.estimated_total_layers == Some(0) {
            return invalid("panel.estimated_total_layers must be > 0 when set".to_string());
        }
        if self.backoff.initial_ms == 0 {
            return invalid("backoff.initial_ms must be > 0".to_string());
        }
        if self.backoff.max_ms < self.backoff.initial_ms {
            return invalid("backoff.max_ms must be >= backoff.initial_ms".to_string());
        }
        if self.backoff.multiplier.is_nan() || self.backoff.multiplier < 1.0 {
            return invalid("backoff.multiplier must be >= 1.0".to_string());
        }
        Ok(())
    }
}

fn default_host() -> String { "localhost".to_string() }
fn default_api_port() -> u16 { 7125 }
fn default_poll_interval_ms() -> u64 { 2000 }
fn default_request_timeout_ms() -> u64 { 3000 }
fn default_serial_port() -> String { "/dev/ttyS0".to_string() }
fn default_baud() -> u32 { 115200 }
fn default_write_timeout_ms() -> u64 { 1000 }
fn default_dialect_detect_timeout_ms() -> u64 { 10_000 }
fn default_firmware_name() -> String { "Klipper".to_string() }
fn default_extruder_count() -> u8 { 1 }
fn default_steps_per_mm() -> [f64; 4] { [80.0, 80.0, 400.0, 420.0] }
fn default_progress_step_percent() -> u8 { 5 }
fn default_backoff_initial_ms() -> u64 { 500 }
fn default_backoff_max_ms() -> u64 { 30_000 }
fn default_backoff_multiplier() -> f64 { 2.0 }
fn default_degraded_threshold() -> u32 { 3 }
fn default_log_level() -> String { "info".to_string() }

/// Load and validate the configuration file at `path`.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path).map_err(|e| {
        tracing::error!("Failed to read config file '{}': {}", path.display(), e);
        ConfigError::Io(e)
    })?;
    let config: Config = toml::from_str(&contents).map_err(|e| {
        tracing::error!("Failed to parse config TOML: {}", e);
        ConfigError::Toml(e)
    })?;
    config.validate()?;
    Ok(config)
}
