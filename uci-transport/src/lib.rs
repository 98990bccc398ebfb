//! Transport layer for the UCI engine
//!
//! This crate provides the byte-channel abstraction sessions are built on,
//! with LAN (TCP socket) and USB (libusb bulk endpoint) implementations
//! and a scripted mock for tests.

pub mod lan;
pub mod mock;
pub mod stream;
pub mod usb;

pub use lan::{LanSettings, LanTransport};
pub use mock::{MockTransport, WireLog};
pub use stream::{Channel, Transport};
pub use usb::{DEFAULT_EP_IN, DEFAULT_EP_OUT, UsbSettings, UsbTransport, enumerate_usb};

use std::time::Duration;
use uci_core::{NodeAddress, UciResult};

/// Build the transport matching a parsed node address
///
/// The transport is returned unopened; establishing the connection is the
/// caller's step so it can bound it with its own deadline.
pub fn transport_for(address: &NodeAddress, timeout: Duration) -> UciResult<Box<dyn Transport>> {
    match address {
        NodeAddress::Lan { .. } => Ok(Box::new(LanTransport::from_node_address(
            address, timeout,
        )?)),
        NodeAddress::Usb { .. } => Ok(Box::new(UsbTransport::from_node_address(
            address, timeout,
        )?)),
    }
}
