//! Home Assistant MQTT discovery announcements.
//!
//! Published once, retained, before scanning starts. Each configured sensor
//! becomes one Home Assistant device with an entity per measured quantity;
//! every entity reads its value from the sensor's `~/state` topic.

use super::{Message, PayloadError, PublishStyle, STATS_TOPIC};
use crate::config::DiscoveryConfig;
use crate::registry::{Device, Registry};
use crate::vendor::VendorType;
use serde::Serialize;

struct Entity {
    suffix: &'static str,
    device_class: &'static str,
    unit: &'static str,
    template: &'static str,
    enabled: fn(&DiscoveryConfig) -> bool,
    supported: fn(VendorType) -> bool,
}

fn always(_: VendorType) -> bool {
    true
}

const ENTITIES: &[Entity] = &[
    Entity {
        suffix: "F",
        device_class: "temperature",
        unit: "°F",
        template: "{{value_json.tempf}}",
        enabled: |c| c.temperature_f,
        supported: always,
    },
    Entity {
        suffix: "T",
        device_class: "temperature",
        unit: "°C",
        template: "{{value_json.tempc}}",
        enabled: |c| c.temperature_c,
        supported: always,
    },
    Entity {
        suffix: "H",
        device_class: "humidity",
        unit: "%",
        template: "{{value_json.humidity}}",
        enabled: |c| c.humidity,
        supported: always,
    },
    Entity {
        suffix: "B",
        device_class: "battery",
        unit: "%",
        template: "{{value_json.batterypct}}",
        enabled: |c| c.battery,
        supported: always,
    },
    Entity {
        suffix: "V",
        device_class: "voltage",
        unit: "mV",
        template: "{{value_json.batterymv}}",
        enabled: |c| c.voltage,
        supported: VendorType::reports_voltage,
    },
    Entity {
        suffix: "S",
        device_class: "signal_strength",
        unit: "dBm",
        template: "{{value_json.rssi}}",
        enabled: |c| c.signal,
        supported: always,
    },
];

#[derive(Serialize)]
struct StatsConfig<'a> {
    #[serde(rename = "~")]
    base: String,
    name: &'a str,
    uniq_id: &'a str,
    stat_t: &'a str,
    unit_of_meas: &'a str,
    val_tpl: &'a str,
}

#[derive(Serialize)]
struct EntityConfig<'a> {
    #[serde(rename = "~")]
    base: String,
    dev_cla: &'a str,
    name: String,
    uniq_id: String,
    stat_t: &'a str,
    unit_of_meas: &'a str,
    val_tpl: &'a str,
    dev: DeviceInfo<'a>,
}

#[derive(Serialize)]
struct DeviceInfo<'a> {
    name: &'a str,
    ids: &'a str,
    /// Suggested area
    sa: &'a str,
    cns: [[&'a str; 2]; 1],
    mf: &'a str,
    mdl: &'a str,
}

fn stats_announcement(base_topic: &str) -> Result<Message, PayloadError> {
    let payload = StatsConfig {
        base: format!("{base_topic}{STATS_TOPIC}"),
        name: "BLE Temperature Reading Hourly Stats",
        uniq_id: "ble-tmp-hourly-stats",
        stat_t: "~",
        unit_of_meas: "Pkts",
        val_tpl: "{{value_json.total_adv_packets}}",
    };
    Message::json(format!("{base_topic}hourly-stats/config"), &payload, true)
}

fn entity_announcement(
    base_topic: &str,
    id: &str,
    device: &Device,
    entity: &Entity,
) -> Result<Message, PayloadError> {
    let payload = EntityConfig {
        base: format!("{base_topic}{id}"),
        dev_cla: entity.device_class,
        name: format!("{}-{}", device.name, entity.suffix),
        uniq_id: format!("{id}-{}", entity.suffix),
        stat_t: "~/state",
        unit_of_meas: entity.unit,
        val_tpl: entity.template,
        dev: DeviceInfo {
            name: &device.name,
            ids: id,
            sa: &device.location,
            cns: [["mac", &device.mac]],
            mf: device.vendor.manufacturer(),
            mdl: device.vendor.model(),
        },
    };
    Message::json(
        format!("{base_topic}{id}{}/config", entity.suffix),
        &payload,
        true,
    )
}

/// Every retained discovery message for `registry`, stats entity first.
///
/// Raw debug devices are never announced.
pub fn announcements(
    config: &DiscoveryConfig,
    style: PublishStyle,
    base_topic: &str,
    registry: &Registry,
) -> Result<Vec<Message>, PayloadError> {
    let mut messages = Vec::new();

    if config.stats {
        messages.push(stats_announcement(base_topic)?);
    }

    for device in registry.iter().filter(|d| d.vendor != VendorType::RawDebug) {
        let id = style.device_id(device);
        for entity in ENTITIES {
            if (entity.enabled)(config) && (entity.supported)(device.vendor) {
                messages.push(entity_announcement(base_topic, id, device, entity)?);
            }
        }
    }

    Ok(messages)
}
