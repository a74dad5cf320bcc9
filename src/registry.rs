//! Configured sensors, looked up by the address string seen on air.
//!
//! Registry order is stable: it is the order sensors appear in the
//! configuration file, and it is the order hourly statistics are reported in.

use crate::config::SensorConfig;

/// A configured device. Identical to its configuration entry.
pub type Device = SensorConfig;

#[derive(Debug, Clone, Default)]
pub struct Registry {
    devices: Vec<Device>,
}

impl Registry {
    pub fn new(devices: Vec<Device>) -> Self {
        Self { devices }
    }

    /// Find the device with address `mac`, returning its registry index.
    ///
    /// Matching is exact and case-sensitive. The first entry wins if the same
    /// address was configured more than once.
    pub fn lookup(&self, mac: &str) -> Option<(usize, &Device)> {
        self.devices
            .iter()
            .enumerate()
            .find(|(_, device)| device.mac == mac)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Device> {
        self.devices.iter()
    }
}

impl<'a> IntoIterator for &'a Registry {
    type Item = &'a Device;
    type IntoIter = std::slice::Iter<'a, Device>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
