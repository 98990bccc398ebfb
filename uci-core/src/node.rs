//! Node descriptors and transport-agnostic addressing
//!
//! A node is a discoverable device endpoint. Its `NodeAddress` is a tagged
//! variant per transport kind, and round-trips losslessly through the
//! canonical UCI address string (`lan://<ip>:<port>`,
//! `usb://<vid>:<pid>@<bus>`), so a descriptor returned by discovery can
//! always be re-opened later from the string alone.

use crate::error::{UciError, UciResult};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;

/// Type-mask bit for LAN nodes
pub const NODE_TYPE_LAN: u32 = 0x0001;

/// Type-mask bit for USB nodes
pub const NODE_TYPE_USB: u32 = 0x0010;

/// Type-mask matching every transport kind
pub const NODE_TYPE_ALL: u32 = NODE_TYPE_LAN | NODE_TYPE_USB;

/// Transport kind of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeType {
    Lan,
    Usb,
}

impl NodeType {
    /// Mask bit for this kind
    pub fn mask(&self) -> u32 {
        match self {
            NodeType::Lan => NODE_TYPE_LAN,
            NodeType::Usb => NODE_TYPE_USB,
        }
    }

    /// Check whether this kind is selected by a type mask
    pub fn matches_mask(&self, mask: u32) -> bool {
        self.mask() & mask != 0
    }
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeType::Lan => write!(f, "LAN"),
            NodeType::Usb => write!(f, "USB"),
        }
    }
}

static LAN_ADDR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^lan://(\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}):(\d{1,5})$").unwrap());

static USB_ADDR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^usb://([0-9a-fA-F]{1,4}):([0-9a-fA-F]{1,4})@(\d{1,5})$").unwrap()
});

/// Transport-specific node address
///
/// Tagged per transport kind, so only the fields that are meaningful for
/// the kind exist at all.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeAddress {
    /// LAN socket endpoint
    Lan { ip: Ipv4Addr, port: u16 },
    /// USB device identified by vendor/product ID and bus address
    Usb { vid: u16, pid: u16, bus_addr: u16 },
}

impl NodeAddress {
    /// Transport kind of this address
    pub fn node_type(&self) -> NodeType {
        match self {
            NodeAddress::Lan { .. } => NodeType::Lan,
            NodeAddress::Usb { .. } => NodeType::Usb,
        }
    }

    /// Parse a canonical UCI address string
    ///
    /// # Errors
    /// Returns `UciError::InvalidAddress` if the string matches no known
    /// address form.
    pub fn parse(addr: &str) -> UciResult<Self> {
        let addr = addr.trim();
        if let Some(caps) = LAN_ADDR_RE.captures(addr) {
            let ip: Ipv4Addr = caps[1]
                .parse()
                .map_err(|_| UciError::InvalidAddress(addr.to_string()))?;
            let port: u16 = caps[2]
                .parse()
                .map_err(|_| UciError::InvalidAddress(addr.to_string()))?;
            return Ok(NodeAddress::Lan { ip, port });
        }
        if let Some(caps) = USB_ADDR_RE.captures(addr) {
            let vid = u16::from_str_radix(&caps[1], 16)
                .map_err(|_| UciError::InvalidAddress(addr.to_string()))?;
            let pid = u16::from_str_radix(&caps[2], 16)
                .map_err(|_| UciError::InvalidAddress(addr.to_string()))?;
            let bus_addr: u16 = caps[3]
                .parse()
                .map_err(|_| UciError::InvalidAddress(addr.to_string()))?;
            return Ok(NodeAddress::Usb { vid, pid, bus_addr });
        }
        Err(UciError::InvalidAddress(addr.to_string()))
    }

    /// Packed 32-bit form of a LAN IP (big-endian field order)
    pub fn packed_ip(&self) -> Option<u32> {
        match self {
            NodeAddress::Lan { ip, .. } => Some(u32::from(*ip)),
            NodeAddress::Usb { .. } => None,
        }
    }
}

impl fmt::Display for NodeAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeAddress::Lan { ip, port } => write!(f, "lan://{}:{}", ip, port),
            NodeAddress::Usb { vid, pid, bus_addr } => {
                write!(f, "usb://{:04x}:{:04x}@{}", vid, pid, bus_addr)
            }
        }
    }
}

/// Snapshot of one discovered device
///
/// Produced by a discovery query. Carries no reference to any live
/// session; `uci_addr()` alone is enough to open the node later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeDescriptor {
    /// Display name (typically the model part of the identity string)
    pub name: String,
    /// Short device-type tag
    pub dev_type: String,
    /// Transport-specific address
    pub address: NodeAddress,
    /// Device serial number, empty if unknown
    pub serial: String,
    /// Last-known status code observed for the node
    pub status: i32,
    /// Raw identity (`*IDN?`) string, empty if unknown
    pub idn: String,
}

impl NodeDescriptor {
    /// Transport kind of the node
    pub fn node_type(&self) -> NodeType {
        self.address.node_type()
    }

    /// Canonical address string usable with `open`
    pub fn uci_addr(&self) -> String {
        self.address.to_string()
    }

    /// Build a descriptor from an identity reply of the common
    /// `vendor,model,serial,firmware` form. Missing fields stay empty.
    pub fn from_idn(address: NodeAddress, idn: &str) -> Self {
        let idn = idn.trim();
        let mut fields = idn.split(',').map(str::trim);
        let _vendor = fields.next().unwrap_or("");
        let model = fields.next().unwrap_or("");
        let serial = fields.next().unwrap_or("");
        Self {
            name: model.to_string(),
            dev_type: model.chars().take(10).collect(),
            address,
            serial: serial.to_string(),
            status: 0,
            idn: idn.to_string(),
        }
    }
}

/// Pack a product/vendor ID pair into a single PVID value
pub fn make_pvid(pid: u16, vid: u16) -> u32 {
    ((pid as u32) << 16) | (vid as u32)
}

/// Extract the product ID from a packed PVID
pub fn pvid_pid(pvid: u32) -> u16 {
    ((pvid >> 16) & 0xffff) as u16
}

/// Extract the vendor ID from a packed PVID
pub fn pvid_vid(pvid: u32) -> u16 {
    (pvid & 0xffff) as u16
}
