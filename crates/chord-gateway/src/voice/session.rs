//! Voice session handle
//!
//! A voice session is a second socket with its own heartbeat, opened after
//! the gateway hands out a voice server. It is usable for audio only once
//! the server has delivered the secret key.

use super::connection::VoiceSupervisor;
use super::error::{VoiceError, VoiceResult};
use super::messages::VoiceMessage;
use super::mode::EncryptionMode;
use super::payloads::{SpeakingPayload, VoiceIdentifyPayload, VoiceResumePayload};
use super::transmitter::VoiceTransmitter;
use crate::broadcast::WaitError;
use crate::connection::{ConnectionState, Outbound, StateCell};
use crate::heartbeat::HeartbeatMonitor;
use chord_common::{GatewayConfig, RetryConfig};
use chord_core::Snowflake;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Voice gateway protocol version
pub const VOICE_GATEWAY_VERSION: u8 = 3;

/// Everything needed to open, resume, and use one voice connection
#[derive(Clone, PartialEq, Eq)]
pub struct VoiceSessionDescriptor {
    /// Gateway session id from VOICE_STATE_UPDATE
    pub session_id: String,
    /// Voice token from VOICE_SERVER_UPDATE
    pub token: String,
    /// Voice server host, e.g. `"eu-west1.example.gg:80"`
    pub endpoint: String,
    pub guild_id: Snowflake,
    pub user_id: Snowflake,
    /// Set by SESSION_DESCRIPTION
    pub secret_key: Option<[u8; 32]>,
    /// Set once the mode has been negotiated
    pub selected_mode: Option<EncryptionMode>,
    /// Set by the voice READY
    pub ssrc: Option<u32>,
}

impl VoiceSessionDescriptor {
    pub fn new(
        session_id: impl Into<String>,
        token: impl Into<String>,
        endpoint: impl Into<String>,
        guild_id: Snowflake,
        user_id: Snowflake,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            token: token.into(),
            endpoint: endpoint.into(),
            guild_id,
            user_id,
            secret_key: None,
            selected_mode: None,
            ssrc: None,
        }
    }

    /// Audio may be sent once the secret key is present
    pub fn is_ready(&self) -> bool {
        self.secret_key.is_some()
    }

    /// `WebSocket` URL of the voice server
    ///
    /// A bare host gets `wss://`; the legacy `:80` suffix is dropped.
    pub fn websocket_url(&self) -> String {
        let endpoint = self.endpoint.trim_end_matches('/');
        if endpoint.starts_with("ws://") || endpoint.starts_with("wss://") {
            return format!("{endpoint}/?v={VOICE_GATEWAY_VERSION}");
        }
        let host = endpoint.strip_suffix(":80").unwrap_or(endpoint);
        format!("wss://{host}/?v={VOICE_GATEWAY_VERSION}")
    }

    pub fn identify_payload(&self) -> VoiceIdentifyPayload {
        VoiceIdentifyPayload {
            server_id: self.guild_id,
            user_id: self.user_id,
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        }
    }

    pub fn resume_payload(&self) -> VoiceResumePayload {
        VoiceResumePayload {
            server_id: self.guild_id,
            session_id: self.session_id.clone(),
            token: self.token.clone(),
        }
    }

    /// Forget everything negotiated on the last connection
    pub fn clear_negotiated(&mut self) {
        self.secret_key = None;
        self.selected_mode = None;
        self.ssrc = None;
    }
}

impl std::fmt::Debug for VoiceSessionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSessionDescriptor")
            .field("session_id", &self.session_id)
            .field("endpoint", &self.endpoint)
            .field("guild_id", &self.guild_id)
            .field("user_id", &self.user_id)
            .field("secret_key", &self.secret_key.map(|_| "<redacted>"))
            .field("selected_mode", &self.selected_mode)
            .field("ssrc", &self.ssrc)
            .finish_non_exhaustive()
    }
}

/// Voice connection settings
#[derive(Debug, Clone)]
pub struct VoiceConfig {
    pub retry: RetryConfig,
    pub hello_timeout: Duration,
    /// Bound on UDP IP discovery
    pub discovery_timeout: Duration,
    /// Bound on `VoiceSession::connect` reaching the secret key
    pub ready_timeout: Duration,
    /// Encryption modes in order of preference
    pub preference: Vec<EncryptionMode>,
}

impl VoiceConfig {
    /// Reuse the gateway's retry and handshake limits
    pub fn from_gateway(config: &GatewayConfig) -> Self {
        Self {
            retry: config.retry,
            hello_timeout: config.hello_timeout,
            ..Self::default()
        }
    }
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            hello_timeout: Duration::from_secs(30),
            discovery_timeout: Duration::from_secs(5),
            ready_timeout: Duration::from_secs(30),
            preference: EncryptionMode::PREFERENCE.to_vec(),
        }
    }
}

/// State shared by the voice handle and its supervisor task
pub(crate) struct VoiceShared {
    pub(crate) config: VoiceConfig,
    pub(crate) descriptor: RwLock<VoiceSessionDescriptor>,
    pub(crate) state: StateCell,
    pub(crate) heartbeat: Arc<HeartbeatMonitor>,
    pub(crate) outbound: RwLock<Option<mpsc::Sender<Outbound>>>,
    pub(crate) udp: RwLock<Option<Arc<UdpSocket>>>,
    pub(crate) shutdown: CancellationToken,
    /// Bumped under the descriptor lock whenever the key changes
    key_epoch: Arc<AtomicU64>,
    ready: watch::Sender<bool>,
    speaking: AtomicBool,
}

impl VoiceShared {
    pub(crate) fn new(descriptor: VoiceSessionDescriptor, config: VoiceConfig) -> Self {
        let (ready, _) = watch::channel(descriptor.is_ready());
        Self {
            config,
            descriptor: RwLock::new(descriptor),
            state: StateCell::default(),
            heartbeat: HeartbeatMonitor::new(),
            outbound: RwLock::new(None),
            udp: RwLock::new(None),
            shutdown: CancellationToken::new(),
            key_epoch: Arc::new(AtomicU64::new(0)),
            ready,
            speaking: AtomicBool::new(false),
        }
    }

    /// Store the secret key; the session becomes send-ready
    pub(crate) fn install_key(&self, key: [u8; 32], mode: Option<EncryptionMode>) {
        {
            let mut descriptor = self.descriptor.write();
            descriptor.secret_key = Some(key);
            if mode.is_some() {
                descriptor.selected_mode = mode;
            }
            self.key_epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.ready.send_replace(true);
    }

    /// Drop negotiated state so the next handshake starts from Identify
    pub(crate) fn reset_negotiation(&self) {
        {
            let mut descriptor = self.descriptor.write();
            descriptor.clear_negotiated();
            self.key_epoch.fetch_add(1, Ordering::AcqRel);
        }
        self.udp.write().take();
        self.ready.send_replace(false);
    }

    pub(crate) fn can_resume(&self) -> bool {
        self.descriptor.read().is_ready()
    }

    pub(crate) async fn send(&self, message: &VoiceMessage) -> VoiceResult<()> {
        let tx = self.outbound.read().clone().ok_or(VoiceError::NotConnected)?;
        let json = message.to_json()?;
        tx.send(Outbound::Frame(json))
            .await
            .map_err(|_| VoiceError::NotConnected)
    }
}

/// Handle to a running voice session
#[derive(Clone)]
pub struct VoiceSession {
    shared: Arc<VoiceShared>,
    task: Arc<Mutex<Option<JoinHandle<VoiceResult<()>>>>>,
}

impl VoiceSession {
    /// Open the voice connection and wait until audio may be sent
    ///
    /// Fails with `NoCompatibleMode` if the server offers no usable
    /// encryption mode, or with the supervisor's error if it gives up.
    pub async fn connect(descriptor: VoiceSessionDescriptor, config: VoiceConfig) -> VoiceResult<Self> {
        let ready_timeout = config.ready_timeout;
        let shared = Arc::new(VoiceShared::new(descriptor, config));
        let mut ready = shared.ready.subscribe();
        let mut task = tokio::spawn(VoiceSupervisor::new(Arc::clone(&shared)).run());

        let (guild_id, url) = {
            let descriptor = shared.descriptor.read();
            (descriptor.guild_id, descriptor.websocket_url())
        };
        tracing::info!(guild_id = %guild_id, url = %url, "Opening voice session");

        let outcome = tokio::time::timeout(ready_timeout, async {
            tokio::select! {
                changed = ready.wait_for(|ready| *ready) => {
                    changed.map(|_| ()).map_err(|_| VoiceError::NotConnected)
                }
                joined = &mut task => Err(match joined {
                    Ok(Err(e)) => e,
                    Ok(Ok(())) | Err(_) => VoiceError::NotConnected,
                }),
            }
        })
        .await
        .unwrap_or(Err(VoiceError::Wait(WaitError::TimedOut)));

        if let Err(e) = outcome {
            shared.shutdown.cancel();
            if !task.is_finished() {
                task.abort();
            }
            return Err(e);
        }

        Ok(Self {
            shared,
            task: Arc::new(Mutex::new(Some(task))),
        })
    }

    pub fn descriptor(&self) -> VoiceSessionDescriptor {
        self.shared.descriptor.read().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state.get()
    }

    pub fn is_ready(&self) -> bool {
        self.shared.can_resume()
    }

    /// Round trip of the last voice heartbeat
    pub fn latency(&self) -> Option<Duration> {
        self.shared.heartbeat.latency()
    }

    /// Frame sender for this session
    ///
    /// Refused until the secret key has arrived. A transmitter stops working
    /// once the session drops or renegotiates its key; ask for a new one.
    pub fn transmitter(&self) -> VoiceResult<VoiceTransmitter> {
        let descriptor = self.shared.descriptor.read();
        let (Some(key), Some(mode), Some(ssrc)) =
            (descriptor.secret_key, descriptor.selected_mode, descriptor.ssrc)
        else {
            return Err(VoiceError::NotReady);
        };

        let transmitter = VoiceTransmitter::new(ssrc, mode, key, Arc::clone(&self.shared.key_epoch));
        Ok(match self.shared.udp.read().clone() {
            Some(socket) => transmitter.with_socket(socket),
            None => transmitter,
        })
    }

    /// Toggle the speaking indicator (op 5)
    ///
    /// Does not touch the session state.
    pub async fn set_speaking(&self, speaking: bool) -> VoiceResult<()> {
        let ssrc = self.shared.descriptor.read().ssrc.ok_or(VoiceError::NotConnected)?;
        let payload = SpeakingPayload {
            speaking,
            delay: 0,
            ssrc,
        };
        self.shared.send(&VoiceMessage::speaking(&payload)?).await?;
        self.shared.speaking.store(speaking, Ordering::Release);
        tracing::debug!(speaking, ssrc, "Speaking state sent");
        Ok(())
    }

    pub fn is_speaking(&self) -> bool {
        self.shared.speaking.load(Ordering::Acquire)
    }

    /// Close the voice connection and wait for the supervisor to stop
    pub async fn disconnect(&self) -> VoiceResult<()> {
        self.shared.shutdown.cancel();
        let task = self.task.lock().take();
        match task {
            Some(task) => task.await.unwrap_or(Ok(())),
            None => Ok(()),
        }
    }
}

impl std::fmt::Debug for VoiceSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VoiceSession")
            .field("descriptor", &*self.shared.descriptor.read())
            .field("state", &self.shared.state.get())
            .finish_non_exhaustive()
    }
}
