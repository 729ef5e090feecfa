//! Heartbeat handler (op 1 request, op 11 ack)

use super::{Flow, HandlerContext};
use tokio::time::Instant;

/// Handles heartbeat requests and acknowledgements from the gateway
pub struct HeartbeatHandler;

impl HeartbeatHandler {
    /// The gateway asked for a beat right away
    pub fn handle_request(ctx: &HandlerContext<'_>) -> Flow {
        tracing::debug!(seq = ?ctx.session.sequence(), "Gateway requested heartbeat");
        ctx.heartbeat.beat_now();
        Flow::Continue
    }

    /// Record an acknowledgement and update the latency readout
    pub fn handle_ack(ctx: &HandlerContext<'_>) -> Flow {
        match ctx.monitor.record_ack(Instant::now()) {
            Some(latency) => tracing::trace!(latency_ms = latency.as_millis(), "Heartbeat ACK"),
            None => tracing::debug!("Heartbeat ACK without an outstanding beat"),
        }
        Flow::Continue
    }
}
