//! Node discovery for the UCI engine
//!
//! The directory fans one probe out per transport kind, aggregates the
//! descriptors that answer before the deadline, and caches them for
//! later enumeration without I/O.

pub mod directory;
pub mod lan;
pub mod usb;

pub use directory::{DiscoveryFilter, DiscoveryProbe, DiscoveryReport, NodeDirectory};
pub use lan::{DEFAULT_QUERY, DEFAULT_SCPI_PORT, LanProbe};
pub use usb::UsbProbe;
