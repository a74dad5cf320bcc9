//! Legacy reading layout: one topic per sensor address, long hyphenated keys.

use super::{Message, OutputFormatter, PayloadError, PublishStyle, compact_timestamp, round1};
use crate::reading::Reading;
use serde::Serialize;

#[derive(Serialize)]
#[serde(rename_all = "kebab-case")]
struct Payload<'a> {
    timestamp: String,
    mac_address: String,
    rssi: i8,
    /// Fahrenheit
    temperature: f64,
    units: &'static str,
    temperature_celsius: f64,
    humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    battery_pct: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    battery_mv: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<u8>,
    sensor_name: &'a str,
    location: &'a str,
    sensor_type: String,
}

/// Publishes to `<base><mac>`.
pub struct LegacyFormatter {
    base_topic: String,
}

impl LegacyFormatter {
    pub fn new(base_topic: &str) -> Self {
        Self {
            base_topic: base_topic.to_string(),
        }
    }
}

impl OutputFormatter for LegacyFormatter {
    fn format(&self, reading: &Reading<'_>) -> Result<Message, PayloadError> {
        let device = reading.device;
        let payload = Payload {
            timestamp: compact_timestamp(reading.timestamp)?,
            mac_address: reading.mac.to_string(),
            rssi: reading.rssi,
            temperature: round1(reading.temperature_f()),
            units: "F",
            temperature_celsius: round1(reading.temperature_c()),
            humidity: round1(reading.humidity()),
            battery_pct: reading.values.battery_pct,
            battery_mv: reading.values.battery_mv,
            frame: reading.values.frame,
            sensor_name: &device.name,
            location: &device.location,
            sensor_type: device.vendor.code().to_string(),
        };
        let topic = format!(
            "{}{}",
            self.base_topic,
            PublishStyle::Legacy.device_id(device)
        );
        Message::json(topic, &payload, false)
    }
}
