//! Resume (op 6) and Invalid Session (op 9)

use super::{Flow, HandlerContext};
use crate::connection::{ConnectionState, SessionState};
use crate::protocol::GatewayMessage;

/// Builds Resume frames and reacts to the remote rejecting a session
pub struct ResumeHandler;

impl ResumeHandler {
    /// Resume frame for the stored session
    ///
    /// `None` when there is nothing to resume, in which case the caller
    /// must identify instead.
    pub fn message(session: &SessionState, token: &str) -> Result<Option<GatewayMessage>, serde_json::Error> {
        let Some(payload) = session.resume_payload(token) else {
            return Ok(None);
        };
        tracing::debug!(session_id = %payload.session_id, seq = payload.seq, "Sending Resume");
        GatewayMessage::resume(&payload).map(Some)
    }

    /// Handle an Invalid Session frame
    ///
    /// A non-resumable rejection drops the session right away so the next
    /// connection identifies.
    pub fn handle_invalid_session(ctx: &HandlerContext<'_>, resumable: bool) -> Flow {
        tracing::warn!(
            session_id = ?ctx.session.session_id(),
            resumable,
            "Gateway invalidated the session"
        );

        if !resumable {
            ctx.session.invalidate();
        }
        ctx.state.set(ConnectionState::Invalidated);

        Flow::InvalidSession { resumable }
    }
}
