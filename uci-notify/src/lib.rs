//! Asynchronous event notification for the UCI engine

pub mod hub;

pub use hub::{NotificationEvent, NotificationHub, NotifyCallback, SessionId};
