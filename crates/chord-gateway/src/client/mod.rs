//! Gateway client
//!
//! [`Gateway`] is a cheap, cloneable handle. The connection itself is driven
//! by a [`Supervisor`] task started with [`Gateway::run`] or
//! [`Gateway::spawn`]; every clone observes and controls the same session.

mod state;
mod supervisor;

pub use state::ClientState;
pub use supervisor::{RunOutcome, Supervisor};

use crate::broadcast::{WaitFor, DEFAULT_EVENT_BUFFER};
use crate::connection::{ConnectionState, Session};
use crate::error::GatewayResult;
use crate::events::{GatewayEvent, GatewayEventType, VoiceServerUpdateEvent, VoiceStateUpdateEvent};
use crate::protocol::{GatewayMessage, IdentifyProperties, RequestMembersPayload, VoiceStateUpdatePayload};
use crate::voice::{VoiceConfig, VoiceError, VoiceResult, VoiceSession, VoiceSessionDescriptor};
use chord_common::GatewayConfig;
use chord_core::{Presence, Snowflake};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// How long `connect_voice` waits for the two voice dispatches
pub const VOICE_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Handle to one gateway connection
#[derive(Clone, Debug)]
pub struct Gateway {
    shared: Arc<ClientState>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Self {
        Self::with_properties(config, IdentifyProperties::new())
    }

    pub fn with_properties(config: GatewayConfig, properties: IdentifyProperties) -> Self {
        Self {
            shared: Arc::new(ClientState::new(config, properties, DEFAULT_EVENT_BUFFER)),
        }
    }

    /// Presence to announce with Identify
    pub fn with_presence(self, presence: Presence) -> Self {
        self.shared.set_presence(Some(presence));
        self
    }

    /// Run the supervisor on the current task until shutdown or a fatal error
    pub async fn run(&self) -> GatewayResult<()> {
        self.shared.try_start()?;
        let result = Supervisor::new(Arc::clone(&self.shared)).run().await;
        self.shared.finish();
        result
    }

    /// Run the supervisor on a new task
    pub fn spawn(&self) -> JoinHandle<GatewayResult<()>> {
        let gateway = self.clone();
        tokio::spawn(async move { gateway.run().await })
    }

    /// Ask the supervisor to close the socket and stop
    pub fn shutdown(&self) {
        tracing::info!("Gateway shutdown requested");
        self.shared.shutdown_token().cancel();
    }

    /// Lifecycle and dispatch events
    pub fn subscribe(&self) -> broadcast::Receiver<GatewayEvent> {
        self.shared.dispatcher().subscribe()
    }

    /// Wait for the next `event` dispatch matching `predicate`
    ///
    /// The waiter is registered before this returns, so a dispatch that
    /// arrives right after the call is not missed.
    pub fn wait_for<T, P, F>(&self, event: &str, predicate: P, transform: F) -> WaitFor<T>
    where
        T: Send + 'static,
        P: Fn(&Value) -> bool + Send + Sync + 'static,
        F: FnOnce(&Value) -> T + Send + Sync + 'static,
    {
        self.shared.dispatcher().wait_for(event, predicate, transform)
    }

    pub fn wait_for_raw<P>(&self, event: &str, predicate: P) -> WaitFor<Value>
    where
        P: Fn(&Value) -> bool + Send + Sync + 'static,
    {
        self.shared.dispatcher().wait_for_raw(event, predicate)
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state().get()
    }

    /// Handshake complete and a socket is open
    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Active && self.shared.is_attached()
    }

    pub fn session(&self) -> Session {
        self.shared.session().snapshot()
    }

    /// Round trip of the last acknowledged heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.shared.heartbeat().latency()
    }

    pub fn config(&self) -> &GatewayConfig {
        self.shared.config()
    }

    /// Queue a raw frame on the live connection
    pub async fn send(&self, message: &GatewayMessage) -> GatewayResult<()> {
        self.shared.send(message).await
    }

    /// Update presence (op 3)
    ///
    /// The presence is kept for later Identifies even when no socket is open.
    pub async fn change_presence(&self, presence: Presence) -> GatewayResult<()> {
        let message = GatewayMessage::presence(&presence)?;
        self.shared.set_presence(Some(presence));
        if !self.shared.is_attached() {
            tracing::debug!("Presence stored for the next Identify");
            return Ok(());
        }
        self.shared.send(&message).await
    }

    /// Join, move, or leave (`channel_id = None`) a voice channel (op 4)
    pub async fn update_voice_state(
        &self,
        guild_id: Snowflake,
        channel_id: Option<Snowflake>,
        self_mute: bool,
        self_deaf: bool,
    ) -> GatewayResult<()> {
        let payload = VoiceStateUpdatePayload {
            guild_id,
            channel_id,
            self_mute,
            self_deaf,
        };
        self.shared.send(&GatewayMessage::voice_state(&payload)?).await
    }

    /// Request offline members (op 8); `limit` 0 means all
    pub async fn request_members(
        &self,
        guild_ids: Vec<Snowflake>,
        query: impl Into<String>,
        limit: u32,
    ) -> GatewayResult<()> {
        let payload = RequestMembersPayload {
            guild_id: guild_ids,
            query: query.into(),
            limit,
        };
        self.shared.send(&GatewayMessage::request_members(&payload)?).await
    }

    /// Ask for guild sync (op 12)
    pub async fn request_guild_sync(&self, guild_ids: &[Snowflake]) -> GatewayResult<()> {
        self.shared.send(&GatewayMessage::guild_sync(guild_ids)?).await
    }

    /// Join a voice channel and open its voice session
    ///
    /// Sends the voice state update, waits for the matching
    /// VOICE_STATE_UPDATE and VOICE_SERVER_UPDATE, then connects to the voice
    /// server. Returns once the session holds its secret key.
    pub async fn connect_voice(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        self_mute: bool,
        self_deaf: bool,
    ) -> VoiceResult<VoiceSession> {
        let our_session = self
            .shared
            .session()
            .session_id()
            .ok_or(VoiceError::NotConnected)?;

        // Both waiters exist before the request goes out
        let state_update = self
            .wait_for(
                GatewayEventType::VoiceStateUpdate.as_str(),
                move |d| {
                    matches_guild(d, guild_id)
                        && d.get("session_id").and_then(Value::as_str) == Some(our_session.as_str())
                },
                |d| serde_json::from_value::<VoiceStateUpdateEvent>(d.clone()),
            )
            .timeout(VOICE_HANDSHAKE_TIMEOUT);
        let server_update = self
            .wait_for(
                GatewayEventType::VoiceServerUpdate.as_str(),
                move |d| matches_guild(d, guild_id),
                |d| serde_json::from_value::<VoiceServerUpdateEvent>(d.clone()),
            )
            .timeout(VOICE_HANDSHAKE_TIMEOUT);

        self.update_voice_state(guild_id, Some(channel_id), self_mute, self_deaf)
            .await?;

        let (state, server) = tokio::try_join!(state_update, server_update)?;
        let (state, server) = (state?, server?);
        let endpoint = server.endpoint.ok_or(VoiceError::EndpointUnavailable)?;

        tracing::info!(
            guild_id = %guild_id,
            channel_id = %channel_id,
            endpoint = %endpoint,
            "Voice server assigned"
        );

        let descriptor = VoiceSessionDescriptor::new(
            state.session_id,
            server.token,
            endpoint,
            guild_id,
            state.user_id,
        );
        VoiceSession::connect(descriptor, VoiceConfig::from_gateway(self.config())).await
    }

    /// Leave voice in `guild_id` (op 4 with no channel)
    pub async fn disconnect_voice(&self, guild_id: Snowflake) -> GatewayResult<()> {
        self.update_voice_state(guild_id, None, false, false).await
    }
}

fn matches_guild(data: &Value, guild_id: Snowflake) -> bool {
    data.get("guild_id")
        .and_then(|v| serde_json::from_value::<Snowflake>(v.clone()).ok())
        == Some(guild_id)
}
