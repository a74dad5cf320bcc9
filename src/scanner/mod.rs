//! BLE advertising event acquisition.
//!
//! The scanner hands raw HCI LE Advertising Report events to the caller
//! unparsed; [`report::AdvertisingReports`] splits them into reports.

#[cfg(feature = "hci")]
pub mod hci;

pub mod report;

use crate::config::ScanConfig;
use thiserror::Error;
use tokio::sync::mpsc;

// HCI packet types
pub const HCI_EVENT_PKT: u8 = 0x04;

// HCI events
pub const EVT_LE_META_EVENT: u8 = 0x3E;

// LE Meta event sub-events
pub const EVT_LE_ADVERTISING_REPORT: u8 = 0x02;

/// Channel buffer size for raw advertising events.
pub const EVENT_CHANNEL_BUFFER_SIZE: usize = 100;

/// Error type for scanner operations.
#[derive(Error, Debug)]
pub enum ScanError {
    /// Bluetooth/adapter related error
    #[error("Bluetooth error: {0}")]
    Bluetooth(String),
    /// Backend not available (not compiled in)
    #[error("Backend '{0}' not available (not compiled in)")]
    BackendNotAvailable(String),
}

/// Start scanning with the compiled-in backend.
///
/// Returns a receiver of complete HCI event buffers, each one an LE
/// Advertising Report event. Dropping the receiver stops the scan.
pub async fn start_scan(config: &ScanConfig) -> Result<mpsc::Receiver<Vec<u8>>, ScanError> {
    #[cfg(feature = "hci")]
    {
        hci::start_scan(config).await
    }
    #[cfg(not(feature = "hci"))]
    {
        let _ = config;
        Err(ScanError::BackendNotAvailable("hci".to_string()))
    }
}
