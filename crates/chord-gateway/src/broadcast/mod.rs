//! Event broadcasting
//!
//! Fans decoded events out to one-shot waiters and stream subscribers.

mod dispatcher;
mod waiter;

pub use dispatcher::{EventDispatcher, DEFAULT_EVENT_BUFFER};
pub use waiter::{WaitError, WaitFor};
