//! MQTT message shaping for readings, hourly statistics and discovery.
//!
//! A [`Message`] is a topic plus a JSON payload that has already been checked
//! against [`MAX_PAYLOAD_SIZE`]. Two reading layouts are supported, selected by
//! [`PublishStyle`].

pub mod discovery;
pub mod home_assistant;
pub mod legacy;

use crate::reading::Reading;
use crate::registry::Device;
use crate::stats::HourlyStats;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use time::OffsetDateTime;
use time::macros::format_description;

pub use home_assistant::HomeAssistantFormatter;
pub use legacy::LegacyFormatter;

/// Serialized payloads must be strictly shorter than this.
pub const MAX_PAYLOAD_SIZE: usize = 2048;

/// Hourly statistics topic, appended to the base topic.
pub const STATS_TOPIC: &str = "$SYS/hour-stats";

/// Topic and payload layout for readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PublishStyle {
    /// `<base><mac>` with long, hyphenated keys
    #[default]
    Legacy,
    /// `<base><unique_id>/state` with the short keys Home Assistant templates expect
    HomeAssistant,
}

impl PublishStyle {
    pub fn formatter(self, base_topic: &str) -> Box<dyn OutputFormatter> {
        match self {
            Self::Legacy => Box::new(LegacyFormatter::new(base_topic)),
            Self::HomeAssistant => Box::new(HomeAssistantFormatter::new(base_topic)),
        }
    }

    /// Topic segment identifying `device`.
    pub fn device_id(self, device: &Device) -> &str {
        match self {
            Self::Legacy => &device.mac,
            Self::HomeAssistant => &device.unique_id,
        }
    }
}

/// A message ready to hand to the sink.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub topic: String,
    pub payload: String,
    pub retain: bool,
}

impl Message {
    /// Build a message, rejecting payloads of [`MAX_PAYLOAD_SIZE`] bytes or more.
    pub fn new(topic: String, payload: String, retain: bool) -> Result<Self, PayloadError> {
        if payload.len() >= MAX_PAYLOAD_SIZE {
            return Err(PayloadError::TooLarge {
                topic,
                size: payload.len(),
            });
        }
        Ok(Self {
            topic,
            payload,
            retain,
        })
    }

    pub fn json<T: Serialize>(topic: String, value: &T, retain: bool) -> Result<Self, PayloadError> {
        Self::new(topic, serde_json::to_string(value)?, retain)
    }
}

/// Errors while shaping a payload. All of them indicate a sizing or
/// configuration problem rather than a transient failure.
#[derive(Debug, thiserror::Error)]
pub enum PayloadError {
    #[error("payload for {topic} is {size} bytes, the limit is {MAX_PAYLOAD_SIZE}")]
    TooLarge { topic: String, size: usize },
    #[error("failed to format timestamp: {0}")]
    Timestamp(#[from] time::error::Format),
    #[error("failed to serialize payload: {0}")]
    Json(#[from] serde_json::Error),
}

/// Trait for turning a reading into a publishable message.
pub trait OutputFormatter: Send + Sync {
    fn format(&self, reading: &Reading<'_>) -> Result<Message, PayloadError>;
}

/// Round to one decimal place.
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// `YYYYMMDDHHMMSS` in UTC.
pub fn compact_timestamp(timestamp: OffsetDateTime) -> Result<String, PayloadError> {
    let format = format_description!("[year][month][day][hour][minute][second]");
    Ok(timestamp
        .to_offset(time::UtcOffset::UTC)
        .format(&format)?)
}

struct StatsPayload<'a> {
    timestamp: String,
    stats: &'a HourlyStats,
}

#[derive(Serialize)]
struct CountEntry<'a> {
    count: u32,
    location: &'a str,
}

impl Serialize for StatsPayload<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.stats.entries.len() + 2))?;
        map.serialize_entry("timestamp", &self.timestamp)?;
        for entry in &self.stats.entries {
            map.serialize_entry(
                &entry.mac,
                &CountEntry {
                    count: entry.count,
                    location: &entry.location,
                },
            )?;
        }
        map.serialize_entry("total_adv_packets", &self.stats.total)?;
        map.end()
    }
}

/// Hourly statistics message, published to `<base>$SYS/hour-stats`.
pub fn stats_message(base_topic: &str, stats: &HourlyStats) -> Result<Message, PayloadError> {
    let payload = StatsPayload {
        timestamp: compact_timestamp(stats.timestamp)?,
        stats,
    };
    Message::json(format!("{base_topic}{STATS_TOPIC}"), &payload, false)
}
