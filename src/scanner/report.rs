//! Splitting an HCI LE Advertising Report event into individual reports.
//!
//! Event layout (offsets into the buffer read from the HCI socket):
//!
//! ```text
//! [0] packet type (0x04)  [1] event code (0x3E)  [2] parameter length
//! [3] subevent (0x02)     [4] number of reports  [5..] reports
//! ```
//!
//! Each report is `event_type(1) address_type(1) address(6) length(1)
//! data(length) rssi(1)`, so the next report starts right after the RSSI byte
//! of the previous one.

use super::{EVT_LE_ADVERTISING_REPORT, EVT_LE_META_EVENT, HCI_EVENT_PKT};
use crate::mac_address::MacAddress;
use std::fmt;

/// Offset of the report count within the event buffer.
const NUM_REPORTS_OFFSET: usize = 4;

/// Fixed bytes preceding a report's data: type, address type, address, length.
const REPORT_HEADER_LEN: usize = 9;

/// Advertising PDU type as reported by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdvertisingType {
    AdvInd,
    AdvDirectInd,
    AdvNonconnInd,
    ScanReq,
    ScanRsp,
    ConnectReq,
    AdvScanInd,
    AdvExtInd,
    AuxConnectRsp,
    Unknown(u8),
}

impl From<u8> for AdvertisingType {
    fn from(value: u8) -> Self {
        match value {
            0 => Self::AdvInd,
            1 => Self::AdvDirectInd,
            2 => Self::AdvNonconnInd,
            3 => Self::ScanReq,
            4 => Self::ScanRsp,
            5 => Self::ConnectReq,
            6 => Self::AdvScanInd,
            7 => Self::AdvExtInd,
            8 => Self::AuxConnectRsp,
            other => Self::Unknown(other),
        }
    }
}

impl AdvertisingType {
    pub fn code(self) -> u8 {
        match self {
            Self::AdvInd => 0,
            Self::AdvDirectInd => 1,
            Self::AdvNonconnInd => 2,
            Self::ScanReq => 3,
            Self::ScanRsp => 4,
            Self::ConnectReq => 5,
            Self::AdvScanInd => 6,
            Self::AdvExtInd => 7,
            Self::AuxConnectRsp => 8,
            Self::Unknown(code) => code,
        }
    }
}

impl fmt::Display for AdvertisingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::AdvInd => "ADV_IND",
            Self::AdvDirectInd => "ADV_DIRECT_IND",
            Self::AdvNonconnInd => "ADV_NONCONN_IND",
            Self::ScanReq => "SCAN_REQ",
            Self::ScanRsp => "SCAN_RSP",
            Self::ConnectReq => "CONNECT_REQ",
            Self::AdvScanInd => "ADV_SCAN_IND",
            Self::AdvExtInd => "ADV_EXT_IND",
            Self::AuxConnectRsp => "AUX_CONNECT_RSP",
            Self::Unknown(_) => "UNKNOWN",
        };
        write!(f, "{name} ({})", self.code())
    }
}

/// A single advertising report borrowed from the event buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdvertisingReport<'a> {
    pub event_type: AdvertisingType,
    pub address_type: u8,
    pub mac: MacAddress,
    /// Advertising data bytes; `data.len()` is the report's length field.
    pub data: &'a [u8],
    /// Signal strength in dBm, the byte right after `data`.
    pub rssi: i8,
}

/// Returns true if `event` is an HCI LE Meta event carrying advertising reports.
pub fn is_advertising_report(event: &[u8]) -> bool {
    event.len() > NUM_REPORTS_OFFSET
        && event[0] == HCI_EVENT_PKT
        && event[1] == EVT_LE_META_EVENT
        && event[3] == EVT_LE_ADVERTISING_REPORT
}

/// Lazy iterator over the reports of one advertising event.
///
/// Stops at the declared report count, or earlier as soon as a report would
/// extend past the end of the buffer. A truncated report is never yielded.
#[derive(Debug, Clone)]
pub struct AdvertisingReports<'a> {
    event: &'a [u8],
    offset: usize,
    remaining: u8,
}

impl<'a> AdvertisingReports<'a> {
    /// Start iterating the reports of `event`.
    ///
    /// The buffer is expected to be an advertising report event (see
    /// [`is_advertising_report`]); a buffer too short to hold the report count
    /// simply yields nothing.
    pub fn new(event: &'a [u8]) -> Self {
        let remaining = event.get(NUM_REPORTS_OFFSET).copied().unwrap_or(0);
        Self {
            event,
            offset: NUM_REPORTS_OFFSET + 1,
            remaining,
        }
    }

    fn parse_at(&self, offset: usize) -> Option<(AdvertisingReport<'a>, usize)> {
        let header = self.event.get(offset..offset.checked_add(REPORT_HEADER_LEN)?)?;
        let data_len = header[8] as usize;
        let data_start = offset + REPORT_HEADER_LEN;
        let rssi_at = data_start + data_len;
        let rssi = *self.event.get(rssi_at)?;

        let mut wire = [0u8; 6];
        wire.copy_from_slice(&header[2..8]);

        let report = AdvertisingReport {
            event_type: AdvertisingType::from(header[0]),
            address_type: header[1],
            mac: MacAddress::from_hci(wire),
            data: &self.event[data_start..rssi_at],
            rssi: rssi as i8,
        };
        Some((report, rssi_at + 1))
    }
}

impl<'a> Iterator for AdvertisingReports<'a> {
    type Item = AdvertisingReport<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.parse_at(self.offset) {
            Some((report, next)) => {
                self.remaining -= 1;
                self.offset = next;
                Some(report)
            }
            None => {
                self.remaining = 0;
                None
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining as usize))
    }
}

impl std::iter::FusedIterator for AdvertisingReports<'_> {}
