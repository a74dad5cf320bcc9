//! A decoded sensor reading.

use crate::mac_address::MacAddress;
use crate::registry::Device;
use crate::vendor::SensorValues;
use time::OffsetDateTime;

/// One complete reading from a configured device.
///
/// A `Reading` only exists when its vendor decoder succeeded, so every field
/// the model reports is present.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading<'a> {
    /// UTC time the advertising event was processed
    pub timestamp: OffsetDateTime,
    pub mac: MacAddress,
    /// Signal strength in dBm
    pub rssi: i8,
    pub values: SensorValues,
    pub device: &'a Device,
}

impl Reading<'_> {
    pub fn temperature_c(&self) -> f64 {
        self.values.temperature_c
    }

    /// Derived from the Celsius value; never decoded on its own.
    pub fn temperature_f(&self) -> f64 {
        self.values.temperature_c * 9.0 / 5.0 + 32.0
    }

    pub fn humidity(&self) -> f64 {
        self.values.humidity
    }
}
