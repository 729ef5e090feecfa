//! Client state
//!
//! Everything the supervisor task and the public `Gateway` handle share.

use crate::broadcast::EventDispatcher;
use crate::connection::{Outbound, SessionState, StateCell};
use crate::error::{GatewayError, GatewayResult};
use crate::heartbeat::HeartbeatMonitor;
use crate::protocol::{GatewayMessage, IdentifyProperties};
use chord_common::GatewayConfig;
use chord_core::Presence;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Shared client state
pub struct ClientState {
    config: GatewayConfig,
    properties: IdentifyProperties,
    session: SessionState,
    state: StateCell,
    heartbeat: Arc<HeartbeatMonitor>,
    dispatcher: Arc<EventDispatcher>,
    /// Presence sent with the next Identify
    presence: RwLock<Option<Presence>>,
    /// Writer queue of the live connection, if any
    outbound: RwLock<Option<mpsc::Sender<Outbound>>>,
    shutdown: CancellationToken,
    running: AtomicBool,
}

impl ClientState {
    pub fn new(config: GatewayConfig, properties: IdentifyProperties, event_buffer: usize) -> Self {
        let session = SessionState::new(config.shard_id());
        Self {
            config,
            properties,
            session,
            state: StateCell::default(),
            heartbeat: HeartbeatMonitor::new(),
            dispatcher: EventDispatcher::new(event_buffer),
            presence: RwLock::new(None),
            outbound: RwLock::new(None),
            shutdown: CancellationToken::new(),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn properties(&self) -> &IdentifyProperties {
        &self.properties
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn state(&self) -> &StateCell {
        &self.state
    }

    pub fn heartbeat(&self) -> &Arc<HeartbeatMonitor> {
        &self.heartbeat
    }

    pub fn dispatcher(&self) -> &Arc<EventDispatcher> {
        &self.dispatcher
    }

    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    pub fn presence(&self) -> Option<Presence> {
        self.presence.read().clone()
    }

    pub fn set_presence(&self, presence: Option<Presence>) {
        *self.presence.write() = presence;
    }

    /// Publish the writer queue of a freshly opened connection
    pub(crate) fn attach(&self, outbound: mpsc::Sender<Outbound>) {
        *self.outbound.write() = Some(outbound);
    }

    /// Forget the writer queue so its writer can drain and exit
    pub(crate) fn detach(&self) {
        self.outbound.write().take();
    }

    pub fn is_attached(&self) -> bool {
        self.outbound.read().as_ref().is_some_and(|tx| !tx.is_closed())
    }

    /// Queue a frame on the live connection
    pub async fn send(&self, message: &GatewayMessage) -> GatewayResult<()> {
        let tx = self.outbound.read().clone().ok_or(GatewayError::NotConnected)?;
        let json = message.to_json()?;
        tracing::debug!(op = %message.op, "Queueing frame");
        tx.send(Outbound::Frame(json))
            .await
            .map_err(|_| GatewayError::NotConnected)
    }

    /// Claim the right to run the supervisor
    pub(crate) fn try_start(&self) -> GatewayResult<()> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|_| GatewayError::AlreadyRunning)
    }

    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::Release);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for ClientState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientState")
            .field("session", &self.session.snapshot())
            .field("state", &self.state.get())
            .field("config", &"GatewayConfig")
            .finish()
    }
}
