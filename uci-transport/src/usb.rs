//! USB transport over libusb bulk endpoints
//!
//! libusb calls are blocking, so every device operation is fenced with
//! `tokio::task::spawn_blocking`; the device handle is shared with the
//! worker closures through an `Arc`.

use crate::stream::{Channel, Transport};
use async_trait::async_trait;
use rusb::{DeviceHandle, GlobalContext};
use std::sync::Arc;
use std::time::Duration;
use uci_core::{DEFAULT_TIMEOUT, NodeAddress, UciError, UciResult};

/// Default bulk IN endpoint used by UCI instruments
pub const DEFAULT_EP_IN: u8 = 0x81;

/// Default bulk OUT endpoint used by UCI instruments
pub const DEFAULT_EP_OUT: u8 = 0x01;

const DEFAULT_INTERFACE: u8 = 0;

/// USB transport settings
#[derive(Debug, Clone)]
pub struct UsbSettings {
    pub vid: u16,
    pub pid: u16,
    /// Bus address to disambiguate identical devices; 0 matches any
    pub bus_addr: u16,
    pub timeout: Option<Duration>,
    pub ep_in: u8,
    pub ep_out: u8,
    pub interface: u8,
}

impl UsbSettings {
    /// Settings for a device selected by vendor/product ID and bus address
    pub fn new(vid: u16, pid: u16, bus_addr: u16) -> Self {
        Self {
            vid,
            pid,
            bus_addr,
            timeout: Some(DEFAULT_TIMEOUT),
            ep_in: DEFAULT_EP_IN,
            ep_out: DEFAULT_EP_OUT,
            interface: DEFAULT_INTERFACE,
        }
    }
}

/// USB transport for one claimed device interface
pub struct UsbTransport {
    handle: Option<Arc<DeviceHandle<GlobalContext>>>,
    settings: UsbSettings,
    closed: bool,
}

impl std::fmt::Debug for UsbTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UsbTransport")
            .field("vid", &format_args!("{:04x}", self.settings.vid))
            .field("pid", &format_args!("{:04x}", self.settings.pid))
            .field("bus_addr", &self.settings.bus_addr)
            .field("closed", &self.closed)
            .finish()
    }
}

impl UsbTransport {
    /// Create a new USB transport
    pub fn new(settings: UsbSettings) -> Self {
        Self {
            handle: None,
            settings,
            closed: true,
        }
    }

    /// Create a USB transport from a parsed node address
    pub fn from_node_address(address: &NodeAddress, timeout: Duration) -> UciResult<Self> {
        match address {
            NodeAddress::Usb { vid, pid, bus_addr } => {
                let mut settings = UsbSettings::new(*vid, *pid, *bus_addr);
                settings.timeout = Some(timeout);
                Ok(Self::new(settings))
            }
            other => Err(UciError::UnsupportedTransport(other.to_string())),
        }
    }

    fn not_connected() -> UciError {
        UciError::Connection(std::io::Error::new(
            std::io::ErrorKind::NotConnected,
            "USB device not opened",
        ))
    }

    fn bulk_timeout(&self) -> Duration {
        self.settings.timeout.unwrap_or(DEFAULT_TIMEOUT)
    }
}

/// Map a libusb error into the UCI taxonomy
pub(crate) fn map_usb_error(err: rusb::Error) -> UciError {
    match err {
        rusb::Error::Timeout => UciError::Timeout,
        rusb::Error::NoDevice | rusb::Error::NotFound => UciError::DeviceNotFound,
        rusb::Error::Access => UciError::Connection(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            err.to_string(),
        )),
        other => UciError::Connection(std::io::Error::other(other.to_string())),
    }
}

fn join_err(err: tokio::task::JoinError) -> UciError {
    UciError::Subsystem(err.to_string())
}

/// Locate and open the matching device; runs on the blocking pool.
fn open_device(
    vid: u16,
    pid: u16,
    bus_addr: u16,
    interface: u8,
) -> UciResult<DeviceHandle<GlobalContext>> {
    let devices = rusb::devices().map_err(map_usb_error)?;
    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        if descriptor.vendor_id() != vid || descriptor.product_id() != pid {
            continue;
        }
        if bus_addr != 0 && u16::from(device.address()) != bus_addr {
            continue;
        }
        let handle = device.open().map_err(map_usb_error)?;
        handle.claim_interface(interface).map_err(map_usb_error)?;
        return Ok(handle);
    }
    Err(UciError::DeviceNotFound)
}

#[async_trait]
impl Transport for UsbTransport {
    async fn open(&mut self) -> UciResult<()> {
        if !self.closed {
            return Err(UciError::Connection(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "device has already been opened",
            )));
        }

        let UsbSettings {
            vid,
            pid,
            bus_addr,
            interface,
            ..
        } = self.settings;

        let task =
            tokio::task::spawn_blocking(move || open_device(vid, pid, bus_addr, interface));
        let handle = if let Some(timeout) = self.settings.timeout {
            tokio::time::timeout(timeout, task)
                .await
                .map_err(|_| UciError::Timeout)?
                .map_err(join_err)??
        } else {
            task.await.map_err(join_err)??
        };

        log::debug!(
            "USB transport opened {:04x}:{:04x}@{}",
            vid,
            pid,
            bus_addr
        );
        self.handle = Some(Arc::new(handle));
        self.closed = false;
        Ok(())
    }
}

#[async_trait]
impl Channel for UsbTransport {
    async fn set_timeout(&mut self, timeout: Option<Duration>) -> UciResult<()> {
        self.settings.timeout = timeout;
        Ok(())
    }

    async fn recv(&mut self, buf: &mut [u8]) -> UciResult<usize> {
        let handle = self
            .handle
            .as_ref()
            .cloned()
            .ok_or_else(Self::not_connected)?;
        let ep_in = self.settings.ep_in;
        let timeout = self.bulk_timeout();
        let len = buf.len();

        let result = tokio::task::spawn_blocking(move || {
            let mut chunk = vec![0u8; len];
            handle
                .read_bulk(ep_in, &mut chunk, timeout)
                .map(|n| {
                    chunk.truncate(n);
                    chunk
                })
                .map_err(map_usb_error)
        })
        .await
        .map_err(join_err)?;

        match result {
            Ok(chunk) => {
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            }
            Err(e) => {
                if !e.is_timeout() {
                    self.closed = true;
                }
                Err(e)
            }
        }
    }

    async fn send(&mut self, buf: &[u8]) -> UciResult<usize> {
        let handle = self
            .handle
            .as_ref()
            .cloned()
            .ok_or_else(Self::not_connected)?;
        let ep_out = self.settings.ep_out;
        let timeout = self.bulk_timeout();
        let data = buf.to_vec();

        let result = tokio::task::spawn_blocking(move || {
            handle.write_bulk(ep_out, &data, timeout).map_err(map_usb_error)
        })
        .await
        .map_err(join_err)?;

        match result {
            Ok(n) => Ok(n),
            Err(e) => {
                if !e.is_timeout() {
                    self.closed = true;
                }
                Err(e)
            }
        }
    }

    async fn flush(&mut self) -> UciResult<()> {
        // Bulk writes are handed to the host controller synchronously.
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed
    }

    async fn close(&mut self) -> UciResult<()> {
        if let Some(handle) = self.handle.take() {
            let interface = self.settings.interface;
            let _ = tokio::task::spawn_blocking(move || {
                let _ = handle.release_interface(interface);
            })
            .await;
        }
        self.closed = true;
        Ok(())
    }
}

/// Enumerate currently attached USB devices as (vid, pid, bus address,
/// serial) tuples, optionally filtered by packed PVIDs.
///
/// Runs on the caller's thread; callers on the async runtime should fence
/// it with `spawn_blocking`.
pub fn enumerate_usb(pvids: &[u32]) -> UciResult<Vec<(u16, u16, u16, String)>> {
    let devices = rusb::devices().map_err(map_usb_error)?;
    let mut found = Vec::new();
    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(d) => d,
            Err(_) => continue,
        };
        let vid = descriptor.vendor_id();
        let pid = descriptor.product_id();
        if !pvids.is_empty() && !pvids.contains(&uci_core::make_pvid(pid, vid)) {
            continue;
        }
        let serial = device
            .open()
            .ok()
            .and_then(|h| {
                let lang = h.read_languages(Duration::from_millis(200)).ok()?;
                let lang = lang.first().copied()?;
                h.read_serial_number_string(lang, &descriptor, Duration::from_millis(200))
                    .ok()
            })
            .unwrap_or_default();
        found.push((vid, pid, u16::from(device.address()), serial));
    }
    Ok(found)
}
