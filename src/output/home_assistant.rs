//! Home Assistant reading layout: `<base><unique_id>/state` with the short keys
//! referenced by the discovery value templates.

use super::{Message, OutputFormatter, PayloadError, PublishStyle, compact_timestamp, round1};
use crate::reading::Reading;
use serde::Serialize;

#[derive(Serialize)]
struct Payload<'a> {
    timestamp: String,
    mac: String,
    rssi: i8,
    tempf: f64,
    units: &'static str,
    tempc: f64,
    humidity: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    batterypct: Option<i16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    batterymv: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frame: Option<u8>,
    name: &'a str,
    location: &'a str,
    #[serde(rename = "type")]
    sensor_type: String,
}

pub struct HomeAssistantFormatter {
    base_topic: String,
}

impl HomeAssistantFormatter {
    pub fn new(base_topic: &str) -> Self {
        Self {
            base_topic: base_topic.to_string(),
        }
    }
}

impl OutputFormatter for HomeAssistantFormatter {
    fn format(&self, reading: &Reading<'_>) -> Result<Message, PayloadError> {
        let device = reading.device;
        let payload = Payload {
            timestamp: compact_timestamp(reading.timestamp)?,
            mac: reading.mac.to_string(),
            rssi: reading.rssi,
            tempf: round1(reading.temperature_f()),
            units: "F",
            tempc: round1(reading.temperature_c()),
            humidity: round1(reading.humidity()),
            batterypct: reading.values.battery_pct,
            batterymv: reading.values.battery_mv,
            frame: reading.values.frame,
            name: &device.name,
            location: &device.location,
            sensor_type: device.vendor.code().to_string(),
        };
        let topic = format!(
            "{}{}/state",
            self.base_topic,
            PublishStyle::HomeAssistant.device_id(device)
        );
        Message::json(topic, &payload, false)
    }
}
