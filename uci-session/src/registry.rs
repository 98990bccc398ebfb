//! Process-wide session table
//!
//! Maps opaque numeric handles to live sessions. Handles are allocated
//! monotonically and never reused, so a stale handle from a destroyed
//! session is detected (absent from the table) rather than dangling.

use crate::session::Session;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use uci_core::{UciError, UciResult};

/// Opaque identifier of one open session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(u32);

impl SessionHandle {
    /// Reserved never-valid handle value
    pub const INVALID: SessionHandle = SessionHandle(u32::MAX);

    /// Raw 32-bit handle value
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// Rebuild a handle from its raw value (e.g. out of a notification)
    pub fn from_raw(raw: u32) -> Self {
        SessionHandle(raw)
    }
}

impl fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Thread-safe handle → session table
///
/// Mutations (insert/destroy) are exclusive; lookups proceed concurrently
/// with each other. No lock is ever held across blocking I/O.
#[derive(Debug)]
pub struct SessionRegistry {
    next: AtomicU32,
    table: RwLock<HashMap<u32, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            next: AtomicU32::new(1),
            table: RwLock::new(HashMap::new()),
        }
    }

    /// Allocate the next handle value, skipping the reserved `INVALID`
    /// value (and zero, should the counter ever wrap).
    fn next_handle(&self) -> SessionHandle {
        loop {
            let raw = self.next.fetch_add(1, Ordering::Relaxed);
            if raw != u32::MAX && raw != 0 {
                return SessionHandle(raw);
            }
        }
    }

    /// Register a session, assigning it the next handle
    pub fn insert(&self, mut session: Session) -> SessionHandle {
        let handle = self.next_handle();
        session.assign_handle(handle);
        self.table
            .write()
            .unwrap()
            .insert(handle.raw(), Arc::new(session));
        log::debug!("Session {handle} registered");
        handle
    }

    /// Look up a live session
    ///
    /// # Errors
    /// `InvalidSession` for unknown or already-destroyed handles
    pub fn lookup(&self, handle: SessionHandle) -> UciResult<Arc<Session>> {
        self.table
            .read()
            .unwrap()
            .get(&handle.raw())
            .cloned()
            .ok_or(UciError::InvalidSession)
    }

    /// Remove a session from the table, returning it for teardown
    ///
    /// Of two concurrent destroyers only one wins; the other observes
    /// `InvalidSession`.
    pub fn destroy(&self, handle: SessionHandle) -> UciResult<Arc<Session>> {
        let removed = self.table.write().unwrap().remove(&handle.raw());
        match removed {
            Some(session) => {
                log::debug!("Session {handle} destroyed");
                Ok(session)
            }
            None => Err(UciError::InvalidSession),
        }
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.table.read().unwrap().len()
    }

    /// True when no session is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uci_notify::NotificationHub;
    use uci_transport::MockTransport;

    fn mock_session(hub: &Arc<NotificationHub>) -> Session {
        Session::with_transport(
            Box::new(MockTransport::new()),
            "lan://127.0.0.1:5025".to_string(),
            Arc::clone(hub),
        )
    }

    #[tokio::test]
    async fn test_handles_are_monotonic_and_never_reused() {
        let hub = NotificationHub::new();
        let registry = SessionRegistry::new();

        let a = registry.insert(mock_session(&hub));
        let b = registry.insert(mock_session(&hub));
        assert!(b.raw() > a.raw());

        registry.destroy(a).unwrap();
        let c = registry.insert(mock_session(&hub));
        assert!(c.raw() > b.raw(), "destroyed handle value must not return");
    }

    #[tokio::test]
    async fn test_allocation_skips_reserved_handle_values() {
        let hub = NotificationHub::new();
        let registry = SessionRegistry::new();

        // Force the counter to the reserved value; allocation must step
        // over it (and over zero once wrapped) instead of handing it out.
        registry.next.store(u32::MAX, Ordering::Relaxed);
        let handle = registry.insert(mock_session(&hub));
        assert_ne!(handle, SessionHandle::INVALID);
        assert_ne!(handle.raw(), 0);
        assert!(registry.lookup(handle).is_ok());
    }

    #[tokio::test]
    async fn test_lookup_after_destroy_fails() {
        let hub = NotificationHub::new();
        let registry = SessionRegistry::new();
        let handle = registry.insert(mock_session(&hub));

        assert!(registry.lookup(handle).is_ok());
        registry.destroy(handle).unwrap();
        assert!(matches!(
            registry.lookup(handle),
            Err(UciError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_double_destroy_is_invalid_session() {
        let hub = NotificationHub::new();
        let registry = SessionRegistry::new();
        let handle = registry.insert(mock_session(&hub));

        assert!(registry.destroy(handle).is_ok());
        assert!(matches!(
            registry.destroy(handle),
            Err(UciError::InvalidSession)
        ));
        assert!(matches!(
            registry.destroy(SessionHandle::from_raw(9999)),
            Err(UciError::InvalidSession)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_create_destroy() {
        let hub = NotificationHub::new();
        let registry = Arc::new(SessionRegistry::new());

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = Arc::clone(&registry);
            let hub = Arc::clone(&hub);
            tasks.push(tokio::spawn(async move {
                let h = registry.insert(Session::with_transport(
                    Box::new(MockTransport::new()),
                    "lan://127.0.0.1:5025".to_string(),
                    hub,
                ));
                registry.lookup(h).unwrap();
                registry.destroy(h).unwrap();
            }));
        }
        for t in tasks {
            t.await.unwrap();
        }
        assert!(registry.is_empty());
    }
}
