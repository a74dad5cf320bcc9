use crate::config::SensorConfig;
use crate::mac_address::MacAddress;
use crate::registry::Registry;
use crate::vendor::VendorType;

/// A stable MAC address for unit tests.
pub const TEST_MAC: MacAddress = MacAddress([0xA4, 0xC1, 0x38, 0xDB, 0x64, 0x96]);

/// One report to be packed into a synthetic HCI advertising event.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub event_type: u8,
    pub mac: MacAddress,
    pub data: Vec<u8>,
    pub rssi: i8,
}

/// Build a complete HCI LE Advertising Report event as read from the socket.
pub fn advertising_event(reports: &[TestReport]) -> Vec<u8> {
    let mut event = vec![0x04, 0x3E, 0x00, 0x02, reports.len() as u8];
    for report in reports {
        let mut wire = report.mac.0;
        wire.reverse();
        event.push(report.event_type);
        event.push(0x00);
        event.extend_from_slice(&wire);
        event.push(report.data.len() as u8);
        event.extend_from_slice(&report.data);
        event.push(report.rssi as u8);
    }
    event[2] = (event.len() - 3) as u8;
    event
}

/// Single-report event from `mac`.
pub fn single_report_event(event_type: u8, mac: MacAddress, data: &[u8], rssi: i8) -> Vec<u8> {
    advertising_event(&[TestReport {
        event_type,
        mac,
        data: data.to_vec(),
        rssi,
    }])
}

pub fn sensor(mac: &str, vendor: VendorType, name: &str) -> SensorConfig {
    SensorConfig {
        mac: mac.to_string(),
        vendor,
        name: name.to_string(),
        location: format!("{name} room"),
        unique_id: format!("{}-id", name.to_lowercase()),
    }
}

pub fn registry(sensors: Vec<SensorConfig>) -> Registry {
    Registry::new(sensors)
}

/// Xiaomi ATC payload in the legacy layout: 21.5 °C, 45 %, 87 %, 2950 mV, frame 7.
pub fn xiaomi_legacy_payload() -> Vec<u8> {
    let mut data = vec![0u8; 17];
    data[0] = 0x10;
    data[1] = 0x16;
    data[10] = 0x00;
    data[11] = 0xD7;
    data[12] = 45;
    data[13] = 87;
    data[14] = 0x0B;
    data[15] = 0x86;
    data[16] = 7;
    data
}

/// Govee H5074 scan response payload: 23.45 °C, 51.20 %, battery 88 %.
pub fn govee_h5074_payload() -> Vec<u8> {
    vec![
        0x0A, 0xFF, 0x88, 0xEC, 0x00, 0x29, 0x09, 0x00, 0x14, 0x58, 0x02,
    ]
}
