//! `ble-sensor-mqtt` library.
//!
//! The binary (`src/main.rs`) is responsible for CLI parsing, signal handling
//! and process exit codes. The core “business logic” lives in [`crate::app`]
//! where it can be tested deterministically with an injected scanner, sink
//! and clock.

pub mod app;
pub mod config;
pub mod mac_address;
pub mod output;
pub mod reading;
pub mod registry;
pub mod scanner;
pub mod sink;
pub mod stats;
pub mod vendor;

#[cfg(test)]
mod test_utils;

// Re-export commonly used types at the crate root
pub use config::{Config, ConfigError};
pub use mac_address::MacAddress;
pub use output::{Message, OutputFormatter, PublishStyle};
pub use reading::Reading;
pub use registry::{Device, Registry};
pub use scanner::ScanError;
pub use scanner::report::{AdvertisingReport, AdvertisingReports, AdvertisingType};
pub use sink::{Sink, SinkError};
pub use stats::{HourlyAggregator, HourlyStats};
pub use vendor::{Decision, SensorValues, VendorType, dispatch};
