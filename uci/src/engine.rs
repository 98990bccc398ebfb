//! The engine facade: handle-based operation surface
//!
//! `Uci` bundles the session registry, the node directory, the
//! notification hub and the last-error slot into one engine. Applications
//! normally use the process-wide [`crate::instance`]; tests build
//! isolated engines with [`Uci::new`] so notification callbacks and
//! sessions never leak across test cases.

use bytes::Bytes;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use uci_core::{CommandRequest, NodeDescriptor, UciResult};
use uci_discovery::{DiscoveryFilter, DiscoveryReport, NodeDirectory};
use uci_notify::{NotificationHub, NotifyCallback};
use uci_session::{Session, SessionHandle, SessionRegistry};

/// One UCI engine: registry + directory + notification hub
pub struct Uci {
    registry: SessionRegistry,
    directory: NodeDirectory,
    hub: Arc<NotificationHub>,
    last_error: RwLock<String>,
}

impl std::fmt::Debug for Uci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Uci")
            .field("sessions", &self.registry.len())
            .finish()
    }
}

impl Uci {
    /// Build an isolated engine
    ///
    /// Must be called from within a tokio runtime; the notification hub
    /// spawns its delivery task immediately.
    pub fn new() -> Self {
        Self::with_directory(NodeDirectory::new())
    }

    /// Build an engine over an explicit node directory (tests inject
    /// stub probes this way)
    pub fn with_directory(directory: NodeDirectory) -> Self {
        Self {
            registry: SessionRegistry::new(),
            directory,
            hub: NotificationHub::new(),
            last_error: RwLock::new(String::new()),
        }
    }

    /// Record a failure for `last_error` and pass the result through
    fn track<T>(&self, result: UciResult<T>) -> UciResult<T> {
        if let Err(e) = &result {
            *self.last_error.write().unwrap() = e.to_string();
        }
        result
    }

    /// Human-readable description of the most recent failure
    ///
    /// Purely diagnostic; the status returned by each operation stays
    /// authoritative. Empty when nothing has failed yet.
    pub fn last_error(&self) -> String {
        self.last_error.read().unwrap().clone()
    }

    // ---- session lifecycle ----

    /// Open a session to the device at `address`
    pub async fn open(&self, address: &str, timeout: Duration) -> UciResult<SessionHandle> {
        let session = self
            .track(Session::open(address, timeout, Arc::clone(&self.hub)).await)?;
        Ok(self.registry.insert(session))
    }

    /// Validate that `address` can be opened, retaining nothing
    pub async fn check_open(&self, address: &str, timeout: Duration) -> UciResult<()> {
        let handle = self.open(address, timeout).await?;
        self.close(handle).await
    }

    /// Close a session and invalidate its handle
    ///
    /// Safe against concurrent close: the second caller observes
    /// `InvalidSession`. The transport is released even if broken.
    pub async fn close(&self, handle: SessionHandle) -> UciResult<()> {
        let session = self.track(self.registry.destroy(handle))?;
        self.track(session.close(true).await)
    }

    /// Live session behind a handle
    pub fn session(&self, handle: SessionHandle) -> UciResult<Arc<Session>> {
        self.track(self.registry.lookup(handle))
    }

    // ---- command exchange ----

    /// Combined write-then-read round trip under one budget
    pub async fn query(&self, handle: SessionHandle, request: &CommandRequest) -> UciResult<Bytes> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.query(request).await)
    }

    /// Send a command with binary payload
    pub async fn write(
        &self,
        handle: SessionHandle,
        command: &str,
        data: &[u8],
        timeout: Duration,
    ) -> UciResult<()> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.write(command, data, timeout).await)
    }

    /// Send a bare command
    pub async fn write_simple(
        &self,
        handle: SessionHandle,
        command: &str,
        timeout: Duration,
    ) -> UciResult<()> {
        self.write(handle, command, &[], timeout).await
    }

    /// Render a formatted command and send it
    pub async fn format_write(
        &self,
        handle: SessionHandle,
        timeout: Duration,
        args: std::fmt::Arguments<'_>,
    ) -> UciResult<()> {
        let command = self.track(uci_session::render_command(args))?;
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.write(&command, &[], timeout).await)
    }

    /// Send a command carrying two numeric parameters
    pub async fn send_command(
        &self,
        handle: SessionHandle,
        command: &str,
        param1: u32,
        param2: u32,
        timeout: Duration,
    ) -> UciResult<()> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.send_command(command, param1, param2, timeout).await)
    }

    /// Issue an optional command, then receive exactly `expected_len`
    /// reply bytes
    pub async fn read(
        &self,
        handle: SessionHandle,
        command: &str,
        expected_len: usize,
        timeout: Duration,
    ) -> UciResult<Bytes> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.read(command, expected_len, timeout).await)
    }

    // ---- file transfer ----

    /// Send a command whose payload is a local file's content
    pub async fn write_from_file(
        &self,
        handle: SessionHandle,
        command: &str,
        path: &Path,
        timeout: Duration,
    ) -> UciResult<()> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.write_from_file(command, path, timeout).await)
    }

    /// Issue a command and store the reply stream in a file, returning
    /// the materialized path
    pub async fn read_to_file(
        &self,
        handle: SessionHandle,
        command: &str,
        path: &Path,
        timeout: Duration,
    ) -> UciResult<PathBuf> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.read_to_file(command, path, timeout).await)
    }

    // ---- attributes ----

    /// Store an opaque attribute value on a session
    pub fn set_attribute(&self, handle: SessionHandle, key: &str, value: &[u8]) -> UciResult<()> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.set_attribute(key, value))
    }

    /// Fetch a copy of a session attribute value
    pub fn get_attribute(&self, handle: SessionHandle, key: &str) -> UciResult<Vec<u8>> {
        let session = self.track(self.registry.lookup(handle))?;
        self.track(session.get_attribute(key))
    }

    // ---- discovery ----

    /// Fan out discovery and aggregate answering nodes
    pub async fn discover_nodes(
        &self,
        filter: &DiscoveryFilter,
        timeout: Duration,
        capacity: usize,
    ) -> UciResult<DiscoveryReport> {
        self.track(self.directory.discover(filter, timeout, capacity).await)
    }

    /// Probe one candidate address directly
    pub async fn probe_address(
        &self,
        address_hint: &str,
        type_mask: u32,
        timeout: Duration,
    ) -> UciResult<NodeDescriptor> {
        self.track(
            self.directory
                .probe_address(address_hint, type_mask, timeout)
                .await,
        )
    }

    /// Descriptors seen by earlier discoveries, without new I/O
    pub fn cached_nodes(&self) -> Vec<NodeDescriptor> {
        self.directory.cached()
    }

    // ---- notification ----

    /// Register the application notification callback, replacing any
    /// previous one
    pub fn set_notify(&self, callback: NotifyCallback) {
        self.hub.set_notify(callback);
    }

    /// Clear the notification slot; later events are dropped
    pub fn clear_notify(&self) {
        self.hub.clear_notify();
    }

    /// Number of currently open sessions
    pub fn session_count(&self) -> usize {
        self.registry.len()
    }
}

impl Default for Uci {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uci_core::{UCI_SUCCESS, UciError, status_of};

    /// Loopback instrument accepting one connection and echoing a fixed
    /// identity for every line received.
    async fn spawn_instrument() -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let local = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut sock, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let mut buf = [0u8; 256];
                    while let Ok(n) = sock.read(&mut buf).await {
                        if n == 0 {
                            break;
                        }
                        if sock.write_all(b"Acme,MP7500,SN001,1.0\n").await.is_err() {
                            break;
                        }
                    }
                });
            }
        });
        local
    }

    #[tokio::test]
    async fn test_open_query_close_round_trip() {
        let addr = spawn_instrument().await;
        let engine = Uci::new();

        let open_result = engine
            .open(
                &format!("lan://127.0.0.1:{}", addr.port()),
                Duration::from_secs(2),
            )
            .await;
        assert_eq!(status_of(&open_result), UCI_SUCCESS);
        let handle = open_result.unwrap();

        let request = CommandRequest::query("*IDN?", 22, Duration::from_secs(2));
        let reply = engine.query(handle, &request).await.unwrap();
        assert_eq!(&reply[..], b"Acme,MP7500,SN001,1.0\n");

        engine.close(handle).await.unwrap();
        assert_eq!(engine.session_count(), 0);
    }

    #[tokio::test]
    async fn test_close_unknown_handle() {
        let engine = Uci::new();
        let result = engine.close(SessionHandle::from_raw(12345)).await;
        assert!(matches!(result, Err(UciError::InvalidSession)));
        assert_eq!(status_of(&result), -1019);
    }

    #[tokio::test]
    async fn test_operations_on_closed_handle() {
        let addr = spawn_instrument().await;
        let engine = Uci::new();
        let handle = engine
            .open(
                &format!("lan://127.0.0.1:{}", addr.port()),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        engine.close(handle).await.unwrap();

        assert!(matches!(
            engine
                .write(handle, "*RST", &[], Duration::from_secs(1))
                .await,
            Err(UciError::InvalidSession)
        ));
        assert!(matches!(
            engine.get_attribute(handle, "X"),
            Err(UciError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_open_bad_address_records_last_error() {
        let engine = Uci::new();
        assert!(engine.last_error().is_empty());

        match engine.open("bogus://device", Duration::from_secs(1)).await {
            Err(UciError::InvalidAddress(_)) => {}
            other => panic!("expected InvalidAddress, got {other:?}"),
        }
        assert!(engine.last_error().contains("bogus://device"));
    }

    #[tokio::test]
    async fn test_check_open_retains_nothing() {
        let addr = spawn_instrument().await;
        let engine = Uci::new();
        engine
            .check_open(
                &format!("lan://127.0.0.1:{}", addr.port()),
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(engine.session_count(), 0);
    }

    #[tokio::test]
    async fn test_attributes_via_handles() {
        let addr = spawn_instrument().await;
        let engine = Uci::new();
        let handle = engine
            .open(
                &format!("lan://127.0.0.1:{}", addr.port()),
                Duration::from_secs(2),
            )
            .await
            .unwrap();

        engine.set_attribute(handle, "TERMCHAR", b"\n").unwrap();
        assert_eq!(engine.get_attribute(handle, "TERMCHAR").unwrap(), b"\n");
        engine.close(handle).await.unwrap();
    }

    #[tokio::test]
    async fn test_discovered_address_reopens() {
        // The address a probe reports must round-trip into open().
        let addr = spawn_instrument().await;
        let engine = Uci::new();

        let node = engine
            .probe_address(
                &format!("lan://127.0.0.1:{}", addr.port()),
                uci_core::NODE_TYPE_LAN,
                Duration::from_secs(2),
            )
            .await
            .unwrap();
        assert_eq!(node.serial, "SN001");
        assert_eq!(engine.cached_nodes().len(), 1);

        let handle = engine
            .open(&node.uci_addr(), Duration::from_secs(2))
            .await
            .unwrap();
        engine.close(handle).await.unwrap();
    }
}
