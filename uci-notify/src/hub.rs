//! Notification hub: one swappable application callback, serialized delivery
//!
//! The engine posts events from whatever task detected them; a dedicated
//! delivery task invokes the registered callback one event at a time, so a
//! slow or reentrant callback can never stall the dispatcher of the
//! session that produced the event. Events posted while no callback is
//! registered are dropped, not queued for replay.

use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;

/// Session handle value carried inside an event
pub type SessionId = u32;

/// Asynchronous event delivered to the application callback
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NotificationEvent {
    /// The session's channel broke without an application-initiated close
    ConnectionClosed { session: SessionId },
    /// Progress or completion of a file transfer
    FileTransfer {
        session: SessionId,
        transferred: u64,
        total: u64,
        done: bool,
    },
    /// Out-of-band device-initiated signal
    DeviceNotify {
        session: SessionId,
        payload: Vec<u8>,
    },
}

impl NotificationEvent {
    /// Originating session handle
    pub fn session(&self) -> SessionId {
        match self {
            NotificationEvent::ConnectionClosed { session } => *session,
            NotificationEvent::FileTransfer { session, .. } => *session,
            NotificationEvent::DeviceNotify { session, .. } => *session,
        }
    }
}

/// Application callback invoked for each delivered event
pub type NotifyCallback = Arc<dyn Fn(NotificationEvent) + Send + Sync>;

/// Process-wide notification fan-in with a single registration slot
pub struct NotificationHub {
    tx: mpsc::UnboundedSender<NotificationEvent>,
    callback: Arc<RwLock<Option<NotifyCallback>>>,
}

impl std::fmt::Debug for NotificationHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationHub").finish()
    }
}

impl NotificationHub {
    /// Create the hub and spawn its delivery task
    ///
    /// Must be called from within a tokio runtime.
    pub fn new() -> Arc<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel::<NotificationEvent>();
        let callback: Arc<RwLock<Option<NotifyCallback>>> = Arc::new(RwLock::new(None));

        let slot = Arc::clone(&callback);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                // Capture the callback at dispatch time; a concurrent swap
                // does not affect this delivery.
                let cb = slot.read().unwrap().clone();
                match cb {
                    Some(cb) => cb(event),
                    None => {
                        log::debug!("Dropping notification, no callback registered: {event:?}")
                    }
                }
            }
        });

        Arc::new(Self { tx, callback })
    }

    /// Register the application callback, replacing any previous one
    pub fn set_notify(&self, callback: NotifyCallback) {
        *self.callback.write().unwrap() = Some(callback);
    }

    /// Clear the registration slot; later events are dropped
    pub fn clear_notify(&self) {
        *self.callback.write().unwrap() = None;
    }

    /// Post an event for delivery
    ///
    /// Never blocks the caller; delivery happens on the hub's own task.
    pub fn post(&self, event: NotificationEvent) {
        if self.tx.send(event).is_err() {
            log::warn!("Notification delivery task is gone, event lost");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    fn capturing_callback() -> (NotifyCallback, Arc<Mutex<Vec<NotificationEvent>>>) {
        let seen: Arc<Mutex<Vec<NotificationEvent>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let cb: NotifyCallback = Arc::new(move |ev| sink.lock().unwrap().push(ev));
        (cb, seen)
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    #[tokio::test]
    async fn test_delivery_in_post_order() {
        let hub = NotificationHub::new();
        let (cb, seen) = capturing_callback();
        hub.set_notify(cb);

        for i in 0..5u64 {
            hub.post(NotificationEvent::FileTransfer {
                session: 7,
                transferred: i,
                total: 5,
                done: i == 4,
            });
        }
        settle().await;

        let events = seen.lock().unwrap();
        assert_eq!(events.len(), 5);
        for (i, ev) in events.iter().enumerate() {
            match ev {
                NotificationEvent::FileTransfer { transferred, .. } => {
                    assert_eq!(*transferred, i as u64)
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn test_events_dropped_without_callback() {
        let hub = NotificationHub::new();
        hub.post(NotificationEvent::ConnectionClosed { session: 1 });
        settle().await;

        // Registering afterwards must not replay the dropped event.
        let (cb, seen) = capturing_callback();
        hub.set_notify(cb);
        settle().await;
        assert!(seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_swap_replaces_previous_callback() {
        let hub = NotificationHub::new();
        let (first_cb, first_seen) = capturing_callback();
        let (second_cb, second_seen) = capturing_callback();

        hub.set_notify(first_cb);
        hub.post(NotificationEvent::ConnectionClosed { session: 1 });
        settle().await;

        hub.set_notify(second_cb);
        hub.post(NotificationEvent::ConnectionClosed { session: 2 });
        settle().await;

        assert_eq!(first_seen.lock().unwrap().len(), 1);
        let second = second_seen.lock().unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].session(), 2);
    }

    #[tokio::test]
    async fn test_clear_notify() {
        let hub = NotificationHub::new();
        let (cb, seen) = capturing_callback();
        hub.set_notify(cb);
        hub.clear_notify();
        hub.post(NotificationEvent::DeviceNotify {
            session: 3,
            payload: vec![1, 2, 3],
        });
        settle().await;
        assert!(seen.lock().unwrap().is_empty());
    }
}
