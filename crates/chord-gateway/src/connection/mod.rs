//! Connection management
//!
//! Socket plumbing, reconnect backoff, and the session and lifecycle state
//! that survive across reconnects.

mod backoff;
mod session;
pub mod socket;
mod state;

pub use backoff::Backoff;
pub use session::{Session, SessionState};
pub use socket::{Incoming, Outbound};
pub use state::{ConnectionState, StateCell};
