//! Configuration file.
//!
//! ```toml
//! [mqtt]
//! server_url = "mqtt://192.168.2.242:1883"
//! base_topic = "homeassistant/sensor/ble-temp/"
//! publish_style = "home-assistant"
//!
//! [scan]
//! adapter = 0
//! active = true
//!
//! [discovery]
//! enabled = true
//!
//! [[sensors]]
//! mac = "A4:C1:38:DB:64:96"
//! type = "xiaomi-atc"
//! name = "Kitchen"
//! location = "Ground floor"
//! unique_id = "kitchen-temp"
//! ```

use crate::mac_address::MacAddress;
use crate::output::{MAX_PAYLOAD_SIZE, PayloadError, PublishStyle, stats_message};
use crate::stats::{HourlyStats, StatsEntry};
use crate::vendor::VendorType;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use time::OffsetDateTime;

/// Upper bound on configured sensors.
///
/// The hourly stats payload is sized separately in [`Config::validate`], so
/// fewer sensors may be accepted depending on address and location lengths.
pub const MAX_SENSORS: usize = 64;

/// rumqttc refuses shorter keep-alive intervals.
const MIN_KEEP_ALIVE_SECS: u64 = 5;

const DEFAULT_SCAN_WINDOW: u16 = 48;
const DEFAULT_SCAN_INTERVAL: u16 = 1500;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub mqtt: MqttConfig,
    pub scan: ScanConfig,
    pub discovery: DiscoveryConfig,
    pub sensors: Vec<SensorConfig>,
}

impl Config {
    /// Load configuration from a file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source: e,
        })?;
        toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.as_ref().to_path_buf(),
            source: e,
        })
    }

    /// Load and validate configuration from a file.
    pub fn load_validated<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration, collecting every problem found.
    ///
    /// Duplicate sensor MAC addresses are rejected so that a lookup can never
    /// depend on which of two entries is scanned last.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        errors.extend(self.mqtt.validate());
        errors.extend(self.scan.validate());

        if self.sensors.len() > MAX_SENSORS {
            errors.push(ValidationError {
                field: "sensors".to_string(),
                message: format!(
                    "{} sensors configured, at most {MAX_SENSORS} are supported",
                    self.sensors.len()
                ),
            });
        } else {
            errors.extend(self.validate_stats_size());
        }

        let mut seen = HashSet::new();
        for (i, sensor) in self.sensors.iter().enumerate() {
            let prefix = format!("sensors[{i}]");
            errors.extend(sensor.validate(&prefix));

            if !seen.insert(sensor.mac.as_str()) {
                errors.push(ValidationError {
                    field: format!("{prefix}.mac"),
                    message: format!("duplicate sensor address '{}'", sensor.mac),
                });
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(errors))
        }
    }

    /// The hourly stats message must fit the publish limit even with every
    /// counter at its maximum.
    fn validate_stats_size(&self) -> Option<ValidationError> {
        let stats = HourlyStats {
            timestamp: OffsetDateTime::UNIX_EPOCH,
            entries: self
                .sensors
                .iter()
                .map(|sensor| StatsEntry {
                    mac: sensor.mac.clone(),
                    location: sensor.location.clone(),
                    count: u32::MAX,
                })
                .collect(),
            total: u32::MAX,
        };

        let message = match stats_message(&self.mqtt.base_topic, &stats) {
            Ok(_) => return None,
            Err(PayloadError::TooLarge { size, .. }) => format!(
                "hourly stats for {} sensors can reach {size} bytes, the limit is {MAX_PAYLOAD_SIZE}",
                self.sensors.len()
            ),
            Err(e) => e.to_string(),
        };
        Some(ValidationError {
            field: "sensors".to_string(),
            message,
        })
    }
}

/// MQTT connection and publishing settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    /// Broker URL, `mqtt://host[:port]` or `mqtts://host[:port]`.
    pub server_url: String,
    /// Prefix every topic starts with, used verbatim (include the trailing `/`).
    pub base_topic: String,
    pub username: Option<String>,
    pub password: Option<String>,
    /// Defaults to `ble-sensor-mqtt-hci<adapter>`.
    pub client_id: Option<String>,
    pub keep_alive_secs: u64,
    /// How long a publish may wait for the broker's acknowledgement.
    pub ack_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    pub publish_style: PublishStyle,
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            server_url: "mqtt://localhost:1883".to_string(),
            base_topic: "homeassistant/sensor/ble-temp/".to_string(),
            username: None,
            password: None,
            client_id: None,
            keep_alive_secs: 20,
            ack_timeout_secs: 10,
            connect_timeout_secs: 10,
            publish_style: PublishStyle::Legacy,
        }
    }
}

impl MqttConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(message) = crate::sink::mqtt::parse_broker_url(&self.server_url) {
            errors.push(ValidationError {
                field: "mqtt.server_url".to_string(),
                message,
            });
        }
        if self.keep_alive_secs < MIN_KEEP_ALIVE_SECS {
            errors.push(ValidationError {
                field: "mqtt.keep_alive_secs".to_string(),
                message: format!("must be at least {MIN_KEEP_ALIVE_SECS} seconds"),
            });
        }
        if self.ack_timeout_secs == 0 {
            errors.push(ValidationError {
                field: "mqtt.ack_timeout_secs".to_string(),
                message: "must be at least 1 second".to_string(),
            });
        }

        errors
    }

    pub fn ack_timeout(&self) -> Duration {
        Duration::from_secs(self.ack_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn client_id(&self, adapter: u16) -> String {
        self.client_id
            .clone()
            .unwrap_or_else(|| format!("{}-hci{adapter}", env!("CARGO_PKG_NAME")))
    }
}

/// Bluetooth scan settings. Window and interval are in 0.625 ms units.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScanConfig {
    /// HCI device index (`hci0` is 0).
    pub adapter: u16,
    /// Active scanning requests scan responses, which H5052 and H5074 need.
    pub active: bool,
    pub window: u16,
    pub interval: u16,
    /// Delay after an hour boundary before the stats are published.
    pub settle_secs: u64,
    /// How often the clock is checked for an hour rollover.
    pub poll_interval_ms: u64,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            adapter: 0,
            active: false,
            window: DEFAULT_SCAN_WINDOW,
            interval: DEFAULT_SCAN_INTERVAL,
            settle_secs: 10,
            poll_interval_ms: 1000,
        }
    }
}

impl ScanConfig {
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.effective_window() > self.effective_interval() {
            errors.push(ValidationError {
                field: "scan.window".to_string(),
                message: format!(
                    "window ({}) must not exceed interval ({})",
                    self.effective_window(),
                    self.effective_interval()
                ),
            });
        }
        if self.poll_interval_ms == 0 {
            errors.push(ValidationError {
                field: "scan.poll_interval_ms".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        errors
    }

    /// Scan window, with zero meaning the default.
    pub fn effective_window(&self) -> u16 {
        if self.window == 0 {
            DEFAULT_SCAN_WINDOW
        } else {
            self.window
        }
    }

    /// Scan interval, with zero meaning the default.
    pub fn effective_interval(&self) -> u16 {
        if self.interval == 0 {
            DEFAULT_SCAN_INTERVAL
        } else {
            self.interval
        }
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_secs(self.settle_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

/// Home Assistant MQTT discovery announcements published at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub enabled: bool,
    pub stats: bool,
    pub temperature_f: bool,
    pub temperature_c: bool,
    pub humidity: bool,
    pub battery: bool,
    /// Only applies to sensors that report battery voltage.
    pub voltage: bool,
    pub signal: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            stats: true,
            temperature_f: true,
            temperature_c: true,
            humidity: true,
            battery: true,
            voltage: true,
            signal: true,
        }
    }
}

/// One sensor to track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorConfig {
    /// Address as reported by the scanner, compared verbatim (`A4:C1:38:DB:64:96`).
    pub mac: String,
    #[serde(rename = "type")]
    pub vendor: VendorType,
    pub name: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub unique_id: String,
}

impl SensorConfig {
    pub fn validate(&self, prefix: &str) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if let Err(e) = self.mac.parse::<MacAddress>() {
            errors.push(ValidationError {
                field: format!("{prefix}.mac"),
                message: e.to_string(),
            });
        } else if self.mac.chars().any(|c| c.is_ascii_lowercase()) {
            errors.push(ValidationError {
                field: format!("{prefix}.mac"),
                message: format!(
                    "'{}' uses lowercase hex and would never match; write it as '{}'",
                    self.mac,
                    self.mac.to_uppercase()
                ),
            });
        }
        if self.name.is_empty() {
            errors.push(ValidationError {
                field: format!("{prefix}.name"),
                message: "name cannot be empty".to_string(),
            });
        }

        errors
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("Configuration validation failed:\n{}", format_validation_errors(.0))]
    Validation(Vec<ValidationError>),
}

/// A single validation error with context.
#[derive(Debug, Clone)]
pub struct ValidationError {
    /// The field path (e.g., `mqtt.server_url` or `sensors[0].mac`).
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

fn format_validation_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("  - {e}"))
        .collect::<Vec<_>>()
        .join("\n")
}
