//! Op code handlers
//!
//! Handles frames received from the gateway based on their operation code.

mod dispatch;
mod error;
mod heartbeat;
mod identify;
mod resume;

pub use dispatch::DispatchHandler;
pub use error::{HandlerError, HandlerResult};
pub use heartbeat::HeartbeatHandler;
pub use identify::IdentifyHandler;
pub use resume::ResumeHandler;

use crate::broadcast::EventDispatcher;
use crate::connection::{SessionState, StateCell};
use crate::heartbeat::{HeartbeatHandle, HeartbeatMonitor};
use crate::protocol::{FrameError, GatewayMessage, OpCode};

/// What the reader loop does after handling a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    /// Keep reading
    Continue,
    /// READY or RESUMED arrived; the connection is healthy
    Established,
    /// The remote asked us to reconnect (op 7)
    Reconnect,
    /// The remote rejected the session (op 9)
    InvalidSession { resumable: bool },
}

/// State a handler may touch while processing one frame
pub struct HandlerContext<'a> {
    pub session: &'a SessionState,
    pub state: &'a StateCell,
    pub dispatcher: &'a EventDispatcher,
    pub monitor: &'a HeartbeatMonitor,
    pub heartbeat: &'a HeartbeatHandle,
}

/// Routes incoming gateway frames to the appropriate handler
pub struct MessageDispatcher;

impl MessageDispatcher {
    /// Decode a text frame
    ///
    /// Frames with an op code this client does not know are skipped
    /// (`Ok(None)`); anything that is not a valid frame is a violation.
    pub fn decode(text: &str) -> HandlerResult<Option<GatewayMessage>> {
        match GatewayMessage::from_json(text) {
            Ok(message) => Ok(Some(message)),
            Err(FrameError::UnknownOpCode(op)) => {
                tracing::debug!(op, "Skipping frame with unknown op code");
                Ok(None)
            }
            Err(FrameError::Malformed(e)) => Err(HandlerError::Malformed(e.to_string())),
        }
    }

    /// Handle one decoded frame
    pub fn dispatch(ctx: &HandlerContext<'_>, message: GatewayMessage) -> HandlerResult<Flow> {
        if !message.op.is_server_op() {
            tracing::warn!(op = %message.op, "Received client-only op code from gateway");
            return Err(HandlerError::UnexpectedOpCode(message.op));
        }

        match message.op {
            OpCode::Dispatch => DispatchHandler::handle(ctx, message),
            OpCode::Heartbeat => Ok(HeartbeatHandler::handle_request(ctx)),
            OpCode::HeartbeatAck => Ok(HeartbeatHandler::handle_ack(ctx)),
            OpCode::Reconnect => {
                tracing::info!("Gateway requested reconnect (op 7)");
                Ok(Flow::Reconnect)
            }
            OpCode::InvalidateSession => {
                let resumable = message.as_invalid_session().unwrap_or(false);
                Ok(ResumeHandler::handle_invalid_session(ctx, resumable))
            }
            OpCode::Hello => {
                tracing::warn!("Unexpected Hello mid-session");
                Ok(Flow::Continue)
            }
            // Filtered by is_server_op above
            _ => Err(HandlerError::UnexpectedOpCode(message.op)),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::connection::Outbound;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::mpsc;

    /// Everything a `HandlerContext` borrows, owned in one place
    pub(crate) struct Fixture {
        pub session: SessionState,
        pub state: StateCell,
        pub dispatcher: Arc<EventDispatcher>,
        pub monitor: Arc<HeartbeatMonitor>,
        pub heartbeat: HeartbeatHandle,
        pub outbound: mpsc::Receiver<Outbound>,
    }

    impl Fixture {
        /// Driver with a long first delay so only explicit beats are sent
        pub(crate) fn new() -> Self {
            let monitor = HeartbeatMonitor::new();
            let (tx, outbound) = mpsc::channel(16);
            let interval = Duration::from_secs(3600);
            let heartbeat = HeartbeatHandle::spawn(interval, interval, Arc::clone(&monitor), tx, || {
                GatewayMessage::heartbeat(None).to_json()
            });
            Self {
                session: SessionState::new(Some(0)),
                state: StateCell::default(),
                dispatcher: EventDispatcher::new(64),
                monitor,
                heartbeat,
                outbound,
            }
        }

        pub(crate) fn ctx(&self) -> HandlerContext<'_> {
            HandlerContext {
                session: &self.session,
                state: &self.state,
                dispatcher: &self.dispatcher,
                monitor: &self.monitor,
                heartbeat: &self.heartbeat,
            }
        }
    }
}
