//! Dispatch handler (op 0)

use super::{Flow, HandlerContext, HandlerError, HandlerResult};
use crate::connection::ConnectionState;
use crate::events::{GatewayEvent, GatewayEventType, ReadyEvent};
use crate::protocol::GatewayMessage;

/// Handles Dispatch frames
pub struct DispatchHandler;

impl DispatchHandler {
    /// Track the sequence, react to handshake events, then fan the event out
    pub fn handle(ctx: &HandlerContext<'_>, message: GatewayMessage) -> HandlerResult<Flow> {
        let GatewayMessage { d, s, t, .. } = message;
        let name = t.ok_or_else(|| HandlerError::InvalidPayload("Dispatch without event name".to_string()))?;

        if let Some(seq) = s {
            ctx.session.observe_sequence(seq);
        }

        let flow = match GatewayEventType::from_str(&name) {
            Some(GatewayEventType::Ready) => {
                let ready: ReadyEvent = serde_json::from_value(d.clone())
                    .map_err(|e| HandlerError::InvalidPayload(format!("READY: {e}")))?;
                Self::handle_ready(ctx, &ready);
                Flow::Established
            }
            Some(GatewayEventType::Resumed) => {
                Self::handle_resumed(ctx);
                Flow::Established
            }
            _ => Flow::Continue,
        };

        tracing::debug!(event = %name, seq = ?s, "Dispatch received");
        ctx.dispatcher.dispatch(&name, s, d);
        Ok(flow)
    }

    fn handle_ready(ctx: &HandlerContext<'_>, ready: &ReadyEvent) {
        ctx.session.establish(ready.session_id.clone());
        ctx.state.set(ConnectionState::Active);

        tracing::info!(
            session_id = %ready.session_id,
            shard_id = ?ctx.session.shard_id(),
            guilds = ready.guilds.len(),
            version = ready.v,
            "Gateway session ready"
        );

        ctx.dispatcher.publish(GatewayEvent::Ready {
            session_id: ready.session_id.clone(),
            shard_id: ctx.session.shard_id(),
        });
    }

    fn handle_resumed(ctx: &HandlerContext<'_>) {
        ctx.state.set(ConnectionState::Active);
        let session_id = ctx.session.session_id().unwrap_or_default();

        tracing::info!(session_id = %session_id, seq = ?ctx.session.sequence(), "Gateway session resumed");

        ctx.dispatcher.publish(GatewayEvent::Resumed { session_id });
    }
}
