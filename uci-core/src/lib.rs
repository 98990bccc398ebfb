//! Core types and utilities for the UCI engine
//!
//! This crate carries the pieces every layer shares: the error taxonomy
//! with its flat status-code mapping, node descriptors and the
//! transport-agnostic address string, and the command request types.

pub mod command;
pub mod error;
pub mod node;

pub use command::{CommandRequest, DEFAULT_TIMEOUT, MAX_PATH, effective_timeout};
pub use error::{UCI_ERR, UCI_SUCCESS, UciError, UciResult, status_of};
pub use node::{
    NODE_TYPE_ALL, NODE_TYPE_LAN, NODE_TYPE_USB, NodeAddress, NodeDescriptor, NodeType, make_pvid,
    pvid_pid, pvid_vid,
};
