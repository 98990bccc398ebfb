//! Session layer of the UCI engine
//!
//! Owns the session registry, the per-session command dispatcher with its
//! single-in-flight state machine, the attribute map, and the file-based
//! bulk transfer helpers.

pub mod dispatcher;
pub mod file;
pub mod registry;
pub mod session;

pub use dispatcher::{DispatchState, render_command};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::Session;
