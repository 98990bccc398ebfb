//! UCI: unified communication interface for measurement instruments
//!
//! One engine, two transports: applications open sessions to instruments
//! over LAN (TCP) or USB, exchange commands and replies under explicit
//! time budgets, transfer files, and receive asynchronous notifications.
//! Results carry typed errors that flatten to the classic negative status
//! codes via [`status_of`].
//!
//! # Quick start
//!
//! ```no_run
//! use std::time::Duration;
//! use uci::{CommandRequest, Uci};
//!
//! # async fn demo() -> uci::UciResult<()> {
//! let engine = Uci::new();
//! let handle = engine
//!     .open("lan://192.168.1.42:5025", Duration::from_secs(3))
//!     .await?;
//!
//! let request = CommandRequest::query("*IDN?", 64, Duration::from_secs(2));
//! let identity = engine.query(handle, &request).await?;
//! println!("{}", String::from_utf8_lossy(&identity));
//!
//! engine.close(handle).await?;
//! # Ok(())
//! # }
//! ```
//!
//! Most applications want one engine per process; [`instance`] hands out
//! a shared default. Libraries and tests should prefer their own
//! [`Uci::new`] so callbacks and sessions stay isolated.

pub mod engine;

pub use engine::Uci;

pub use uci_core::{
    CommandRequest, DEFAULT_TIMEOUT, MAX_PATH, NODE_TYPE_ALL, NODE_TYPE_LAN, NODE_TYPE_USB,
    NodeAddress, NodeDescriptor, NodeType, UCI_ERR, UCI_SUCCESS, UciError, UciResult, make_pvid,
    pvid_pid, pvid_vid, status_of,
};
pub use uci_discovery::{DiscoveryFilter, DiscoveryProbe, DiscoveryReport, NodeDirectory};
pub use uci_notify::{NotificationEvent, NotificationHub, NotifyCallback, SessionId};
pub use uci_session::{Session, SessionHandle, SessionRegistry};
pub use uci_transport::{Channel, Transport};

use once_cell::sync::Lazy;

static ENGINE: Lazy<Uci> = Lazy::new(|| {
    log::debug!("Default UCI engine initialized");
    Uci::new()
});

/// Process-wide default engine
///
/// The engine is built on first use; that first call must happen inside a
/// tokio runtime, because the notification hub spawns its delivery task
/// immediately.
pub fn instance() -> &'static Uci {
    &ENGINE
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_instance_is_shared() {
        let a = instance() as *const Uci;
        let b = instance() as *const Uci;
        assert_eq!(a, b);

        // Operations against the shared engine behave like any other.
        let result = instance().close(SessionHandle::from_raw(0)).await;
        assert_eq!(status_of(&result), UciError::InvalidSession.status());
    }

    #[tokio::test]
    async fn test_reexported_surface() {
        // The facade alone is enough to drive a full exchange.
        let request = CommandRequest::query("*IDN?", 64, Duration::ZERO);
        assert_eq!(request.budget(), DEFAULT_TIMEOUT);
        assert_eq!(NODE_TYPE_LAN | NODE_TYPE_USB, NODE_TYPE_ALL);
    }
}
