//! Session lifecycle and per-session state
//!
//! A session exclusively owns one open transport plus its mutable state:
//! the dispatcher state machine, the attribute map, and the broken flag.
//! The transport and dispatcher state live behind one async mutex whose
//! try-lock realizes the single-in-flight-command rule.

use crate::dispatcher::DispatchState;
use crate::registry::SessionHandle;
use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{MutexGuard, TryLockError};
use uci_core::{NodeAddress, UciError, UciResult, effective_timeout};
use uci_notify::{NotificationEvent, NotificationHub};
use uci_transport::Transport;

pub(crate) struct SessionInner {
    pub(crate) transport: Box<dyn Transport>,
    pub(crate) state: DispatchState,
}

/// One open logical connection to a device
pub struct Session {
    handle: SessionHandle,
    address: String,
    opened_at: Instant,
    inner: tokio::sync::Mutex<SessionInner>,
    attributes: Mutex<HashMap<String, Vec<u8>>>,
    broken: AtomicBool,
    hub: Arc<NotificationHub>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("address", &self.address)
            .field("broken", &self.broken.load(Ordering::Relaxed))
            .finish()
    }
}

impl Session {
    /// Open a session to the device at `address`
    ///
    /// Parses the address to select the transport kind, then establishes
    /// the connection within `timeout` (zero selects the channel default).
    ///
    /// # Errors
    /// - `InvalidAddress` for unparseable input, before any I/O
    /// - `Timeout` when establishment exceeds the deadline
    /// - `NotEstablished` when the peer refuses or is unreachable
    pub async fn open(
        address: &str,
        timeout: Duration,
        hub: Arc<NotificationHub>,
    ) -> UciResult<Self> {
        let parsed = NodeAddress::parse(address)?;
        let budget = effective_timeout(timeout);
        let mut transport = uci_transport::transport_for(&parsed, budget)?;
        transport.open().await?;
        log::info!("Session opened to {address}");
        Ok(Self::with_transport(transport, parsed.to_string(), hub))
    }

    /// Build a session around an already-established transport
    ///
    /// Used by `open` and by tests injecting a scripted transport.
    pub fn with_transport(
        transport: Box<dyn Transport>,
        address: String,
        hub: Arc<NotificationHub>,
    ) -> Self {
        Self {
            handle: SessionHandle::INVALID,
            address,
            opened_at: Instant::now(),
            inner: tokio::sync::Mutex::new(SessionInner {
                transport,
                state: DispatchState::Idle,
            }),
            attributes: Mutex::new(HashMap::new()),
            broken: AtomicBool::new(false),
            hub,
        }
    }

    pub(crate) fn assign_handle(&mut self, handle: SessionHandle) {
        self.handle = handle;
    }

    /// Handle assigned by the registry
    pub fn handle(&self) -> SessionHandle {
        self.handle
    }

    /// Canonical address the session was opened with
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Instant the session was opened
    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    /// True once a channel break has been detected
    ///
    /// A broken session fails every operation fast with
    /// `ChannelNotOpened` until it is closed and a new one opened.
    pub fn is_broken(&self) -> bool {
        self.broken.load(Ordering::Acquire)
    }

    pub(crate) fn ensure_usable(&self) -> UciResult<()> {
        if self.is_broken() {
            Err(UciError::ChannelNotOpened)
        } else {
            Ok(())
        }
    }

    /// Acquire the dispatcher, failing fast when a command is in flight.
    ///
    /// Busy policy: the second concurrent caller on a handle does not
    /// queue, it fails immediately with `Busy`.
    pub(crate) fn acquire(&self) -> UciResult<MutexGuard<'_, SessionInner>> {
        self.inner.try_lock().map_err(|_: TryLockError| UciError::Busy)
    }

    /// Record a detected break and post the non-voluntary close event
    pub(crate) fn mark_broken(&self) {
        if !self.broken.swap(true, Ordering::AcqRel) {
            log::warn!("Session {} channel broke", self.handle);
            self.hub.post(NotificationEvent::ConnectionClosed {
                session: self.handle.raw(),
            });
        }
    }

    pub(crate) fn hub(&self) -> &NotificationHub {
        &self.hub
    }

    /// Post a device-initiated out-of-band signal for this session
    pub fn notify_device(&self, payload: Vec<u8>) {
        self.hub.post(NotificationEvent::DeviceNotify {
            session: self.handle.raw(),
            payload,
        });
    }

    /// Release the transport
    ///
    /// `voluntary` distinguishes an application-initiated close (no
    /// notification) from teardown after a detected break. The transport
    /// resource is released even if the channel is already broken.
    pub async fn close(&self, voluntary: bool) -> UciResult<()> {
        self.broken.store(true, Ordering::Release);
        let mut inner = self.inner.lock().await;
        inner.state = DispatchState::Idle;
        let result = inner.transport.close().await;
        drop(inner);
        if !voluntary {
            self.hub.post(NotificationEvent::ConnectionClosed {
                session: self.handle.raw(),
            });
        }
        log::info!("Session {} closed (voluntary: {voluntary})", self.handle);
        result
    }

    /// Store an opaque attribute value under a message key
    pub fn set_attribute(&self, key: &str, value: &[u8]) -> UciResult<()> {
        if key.is_empty() {
            return Err(UciError::InvalidArgument("empty attribute key".into()));
        }
        self.attributes
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    /// Fetch a copy of an attribute value
    ///
    /// # Errors
    /// `InvalidArgument` for a key that was never set
    pub fn get_attribute(&self, key: &str) -> UciResult<Vec<u8>> {
        self.attributes
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .ok_or_else(|| UciError::InvalidArgument(format!("unknown attribute: {key}")))
    }
}
