//! Raw HCI socket backend.
//!
//! Opens a raw Linux HCI socket on the configured adapter, programs LE
//! scanning directly and forwards every LE Advertising Report event
//! unmodified. Requires CAP_NET_RAW and CAP_NET_ADMIN capabilities or root
//! privileges; no BlueZ daemon is involved.

use super::{
    EVENT_CHANNEL_BUFFER_SIZE, EVT_LE_META_EVENT, HCI_EVENT_PKT, ScanError,
    report::is_advertising_report,
};
use crate::config::ScanConfig;
use libc::{AF_BLUETOOTH, SOCK_CLOEXEC, SOCK_RAW, c_int, c_void, sockaddr, socklen_t};
use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd};
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

// HCI protocol constants
const BTPROTO_HCI: c_int = 1;
const SOL_HCI: c_int = 0;
const HCI_FILTER: c_int = 2;
const HCI_CHANNEL_RAW: u16 = 0;

/// Largest HCI event: 2-byte header, 255 parameter bytes, packet type.
const HCI_MAX_EVENT_SIZE: usize = 260;

// HCI commands
const HCI_COMMAND_PKT: u8 = 0x01;
const OGF_LE_CTL: u16 = 0x08;
const OCF_LE_SET_EVENT_MASK: u16 = 0x0001;
const OCF_LE_SET_SCAN_PARAMETERS: u16 = 0x000B;
const OCF_LE_SET_SCAN_ENABLE: u16 = 0x000C;

// Scan types
const LE_SCAN_PASSIVE: u8 = 0x00;
const LE_SCAN_ACTIVE: u8 = 0x01;

// Own address type
const LE_PUBLIC_ADDRESS: u8 = 0x00;

// Filter policy
const FILTER_POLICY_ACCEPT_ALL: u8 = 0x00;

/// HCI socket address structure
#[repr(C)]
struct SockaddrHci {
    hci_family: u16,
    hci_dev: u16,
    hci_channel: u16,
}

/// HCI filter structure for raw sockets
#[repr(C)]
struct HciFilter {
    type_mask: u32,
    event_mask: [u32; 2],
    opcode: u16,
}

impl HciFilter {
    fn new() -> Self {
        Self {
            type_mask: 0,
            event_mask: [0, 0],
            opcode: 0,
        }
    }

    fn set_ptype(&mut self, ptype: u8) {
        self.type_mask |= 1 << (ptype as u32);
    }

    fn set_event(&mut self, event: u8) {
        let bit = event as usize;
        self.event_mask[bit / 32] |= 1 << (bit % 32);
    }
}

/// LE Set Scan Parameters command
#[repr(C, packed)]
struct LeSetScanParametersCmd {
    scan_type: u8,
    interval: u16,
    window: u16,
    own_address_type: u8,
    filter_policy: u8,
}

impl LeSetScanParametersCmd {
    fn new(config: &ScanConfig) -> Self {
        Self {
            scan_type: if config.active {
                LE_SCAN_ACTIVE
            } else {
                LE_SCAN_PASSIVE
            },
            interval: config.effective_interval().to_le(),
            window: config.effective_window().to_le(),
            own_address_type: LE_PUBLIC_ADDRESS,
            filter_policy: FILTER_POLICY_ACCEPT_ALL,
        }
    }
}

/// LE Set Scan Enable command
#[repr(C, packed)]
struct LeSetScanEnableCmd {
    enable: u8,
    filter_dup: u8,
}

/// View a packed command struct as its wire bytes.
fn command_bytes<T>(cmd: &T) -> &[u8] {
    unsafe { std::slice::from_raw_parts(cmd as *const T as *const u8, mem::size_of::<T>()) }
}

/// Create an HCI command packet
fn hci_command_packet(ogf: u16, ocf: u16, params: &[u8]) -> Vec<u8> {
    let opcode = (ogf << 10) | ocf;
    let mut packet = Vec::with_capacity(4 + params.len());
    packet.push(HCI_COMMAND_PKT);
    packet.push((opcode & 0xFF) as u8);
    packet.push((opcode >> 8) as u8);
    packet.push(params.len() as u8);
    packet.extend_from_slice(params);
    packet
}

/// Open a raw HCI socket
fn open_hci_socket() -> Result<OwnedFd, ScanError> {
    // SOCK_NONBLOCK is required for AsyncFd to work properly
    let fd = unsafe {
        libc::socket(
            AF_BLUETOOTH,
            SOCK_RAW | SOCK_CLOEXEC | libc::SOCK_NONBLOCK,
            BTPROTO_HCI,
        )
    };

    if fd < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to create HCI socket: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

/// Bind HCI socket to a device
fn bind_hci_socket(fd: &OwnedFd, dev_id: u16) -> Result<(), ScanError> {
    let addr = SockaddrHci {
        hci_family: AF_BLUETOOTH as u16,
        hci_dev: dev_id,
        hci_channel: HCI_CHANNEL_RAW,
    };

    let ret = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const SockaddrHci as *const sockaddr,
            mem::size_of::<SockaddrHci>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to bind HCI socket to hci{dev_id}: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Only pass LE meta events up from the kernel.
fn set_hci_filter(fd: &OwnedFd) -> Result<(), ScanError> {
    let mut filter = HciFilter::new();
    filter.set_ptype(HCI_EVENT_PKT);
    filter.set_event(EVT_LE_META_EVENT);

    let ret = unsafe {
        libc::setsockopt(
            fd.as_raw_fd(),
            SOL_HCI,
            HCI_FILTER,
            &filter as *const HciFilter as *const c_void,
            mem::size_of::<HciFilter>() as socklen_t,
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to set HCI filter: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

/// Send an HCI command
fn send_hci_command(fd: &OwnedFd, packet: &[u8]) -> Result<(), ScanError> {
    let ret = unsafe {
        libc::write(
            fd.as_raw_fd(),
            packet.as_ptr() as *const c_void,
            packet.len(),
        )
    };

    if ret < 0 {
        return Err(ScanError::Bluetooth(format!(
            "Failed to send HCI command: {}",
            io::Error::last_os_error()
        )));
    }

    Ok(())
}

fn scan_enable_packet(enable: bool) -> Vec<u8> {
    let cmd = LeSetScanEnableCmd {
        enable: u8::from(enable),
        filter_dup: 0x00, // Don't filter duplicates
    };
    hci_command_packet(OGF_LE_CTL, OCF_LE_SET_SCAN_ENABLE, command_bytes(&cmd))
}

/// Program scan parameters, unmask all LE events and enable scanning.
fn configure_le_scan(fd: &OwnedFd, config: &ScanConfig) -> Result<(), ScanError> {
    let params = LeSetScanParametersCmd::new(config);
    let packet = hci_command_packet(
        OGF_LE_CTL,
        OCF_LE_SET_SCAN_PARAMETERS,
        command_bytes(&params),
    );
    send_hci_command(fd, &packet)?;

    let packet = hci_command_packet(OGF_LE_CTL, OCF_LE_SET_EVENT_MASK, &[0xFF; 8]);
    send_hci_command(fd, &packet)?;

    send_hci_command(fd, &scan_enable_packet(true))
}

fn read_event(fd: &OwnedFd, buf: &mut [u8]) -> io::Result<usize> {
    let ret = unsafe { libc::read(fd.as_raw_fd(), buf.as_mut_ptr() as *mut c_void, buf.len()) };
    if ret < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(ret as usize)
    }
}

/// Start scanning on `hci<config.adapter>` using raw HCI sockets.
///
/// Advertising report events are sent through the returned channel as they
/// arrive. When the receiver is dropped, scanning is disabled and the sockets
/// are closed.
///
/// # Requirements
/// - CAP_NET_RAW and CAP_NET_ADMIN capabilities or root privileges
/// - An HCI device with the configured index
pub async fn start_scan(config: &ScanConfig) -> Result<mpsc::Receiver<Vec<u8>>, ScanError> {
    let adapter = config.adapter;

    let fd = open_hci_socket()?;
    bind_hci_socket(&fd, adapter)?;
    set_hci_filter(&fd)?;

    // Commands go out on a separate socket bound to the same device
    let cmd_fd = open_hci_socket()?;
    bind_hci_socket(&cmd_fd, adapter)?;
    configure_le_scan(&cmd_fd, config)?;

    info!(
        adapter = %format!("hci{adapter}"),
        active = config.active,
        window_ms = f64::from(config.effective_window()) * 0.625,
        interval_ms = f64::from(config.effective_interval()) * 0.625,
        "Scanning"
    );

    let (tx, rx) = mpsc::channel(EVENT_CHANNEL_BUFFER_SIZE);

    let async_fd = AsyncFd::new(fd)
        .map_err(|e| ScanError::Bluetooth(format!("Failed to create async fd: {}", e)))?;

    tokio::spawn(async move {
        let mut buf = [0u8; HCI_MAX_EVENT_SIZE];

        'read: loop {
            let mut guard = tokio::select! {
                _ = tx.closed() => break 'read,
                ready = async_fd.readable() => match ready {
                    Ok(guard) => guard,
                    Err(e) => {
                        warn!("HCI socket no longer readable: {e}");
                        break 'read;
                    }
                },
            };

            // Drain all available packets before waiting again
            loop {
                let n = match guard.try_io(|inner| read_event(inner.get_ref(), &mut buf)) {
                    Ok(Ok(n)) if n > 0 => n,
                    Ok(Ok(_)) => break,
                    Ok(Err(e)) => {
                        warn!("HCI read failed: {e}");
                        break 'read;
                    }
                    Err(_would_block) => break,
                };

                let event = &buf[..n];
                if is_advertising_report(event) && tx.send(event.to_vec()).await.is_err() {
                    break 'read;
                }
            }
        }

        if let Err(e) = send_hci_command(&cmd_fd, &scan_enable_packet(false)) {
            warn!("Failed to disable scan: {e}");
        } else {
            debug!("Scan disabled on hci{adapter}");
        }
    });

    Ok(rx)
}
