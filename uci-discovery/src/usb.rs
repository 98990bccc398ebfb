//! USB discovery probe
//!
//! Enumerates attached devices through libusb, optionally filtered by the
//! candidate PVID list. Enumeration is blocking and runs on the blocking
//! pool.

use crate::directory::{DiscoveryFilter, DiscoveryProbe};
use async_trait::async_trait;
use std::time::Duration;
use uci_core::{NodeAddress, NodeDescriptor, NodeType, UciError, UciResult};
use uci_transport::enumerate_usb;

/// libusb enumeration probe
#[derive(Debug, Clone, Default)]
pub struct UsbProbe;

impl UsbProbe {
    pub fn new() -> Self {
        Self
    }
}

fn descriptor_for(vid: u16, pid: u16, bus_addr: u16, serial: String) -> NodeDescriptor {
    NodeDescriptor {
        name: format!("USB {vid:04x}:{pid:04x}"),
        dev_type: "USB".to_string(),
        address: NodeAddress::Usb { vid, pid, bus_addr },
        serial,
        status: 0,
        idn: String::new(),
    }
}

#[async_trait]
impl DiscoveryProbe for UsbProbe {
    fn node_type(&self) -> NodeType {
        NodeType::Usb
    }

    async fn scan(
        &self,
        filter: &DiscoveryFilter,
        _timeout: Duration,
    ) -> UciResult<Vec<NodeDescriptor>> {
        let pvids = filter.pvids.clone();
        let devices = tokio::task::spawn_blocking(move || enumerate_usb(&pvids))
            .await
            .map_err(|e| UciError::Subsystem(e.to_string()))??;

        Ok(devices
            .into_iter()
            .map(|(vid, pid, bus_addr, serial)| descriptor_for(vid, pid, bus_addr, serial))
            .collect())
    }

    async fn probe_address(
        &self,
        address: &NodeAddress,
        _timeout: Duration,
    ) -> UciResult<NodeDescriptor> {
        let NodeAddress::Usb { vid, pid, bus_addr } = *address else {
            return Err(UciError::UnsupportedTransport(address.to_string()));
        };

        let devices = tokio::task::spawn_blocking(move || enumerate_usb(&[]))
            .await
            .map_err(|e| UciError::Subsystem(e.to_string()))??;

        devices
            .into_iter()
            .find(|(v, p, a, _)| {
                *v == vid && *p == pid && (bus_addr == 0 || *a == bus_addr)
            })
            .map(|(v, p, a, serial)| descriptor_for(v, p, a, serial))
            .ok_or(UciError::DeviceNotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_shape() {
        let node = descriptor_for(0x04b4, 0x1234, 3, "SN42".to_string());
        assert_eq!(node.node_type(), NodeType::Usb);
        assert_eq!(node.uci_addr(), "usb://04b4:1234@3");
        assert_eq!(node.serial, "SN42");
    }
}
