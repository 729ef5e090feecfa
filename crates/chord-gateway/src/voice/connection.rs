//! Voice connection supervisor
//!
//! Same shape as the gateway supervisor: one socket at a time, classified on
//! exit, reconnected with backoff. A voice session resumes only once it has
//! a secret key; before that every reconnect starts over from Identify.

use super::close_codes::VoiceCloseCode;
use super::discovery::discover;
use super::error::{VoiceError, VoiceResult};
use super::messages::VoiceMessage;
use super::mode::{select_mode, EncryptionMode};
use super::opcodes::VoiceOpCode;
use super::payloads::{SelectProtocolPayload, VoiceHelloPayload};
use super::session::VoiceShared;
use crate::connection::socket::{self, WsSource};
use crate::connection::{Backoff, ConnectionState, Incoming, Outbound};
use crate::heartbeat::{first_beat_delay, HeartbeatHandle};
use crate::protocol::{CloseAction, FrameError};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

const SHUTDOWN_CLOSE_CODE: u16 = 1000;

/// How one voice connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoiceOutcome {
    Shutdown,
    Resume,
    Reidentify,
}

/// What a handled frame means for the connection
enum Step {
    Continue,
    /// The secret key arrived, or a resume was accepted
    Established,
}

pub(crate) struct VoiceSupervisor {
    shared: Arc<VoiceShared>,
    backoff: Backoff,
    attempt: u32,
    failed_resumes: u32,
}

impl VoiceSupervisor {
    pub(crate) fn new(shared: Arc<VoiceShared>) -> Self {
        let retry = &shared.config.retry;
        let backoff = Backoff::new(retry.backoff_base, retry.backoff_max);
        Self {
            shared,
            backoff,
            attempt: 0,
            failed_resumes: 0,
        }
    }

    pub(crate) async fn run(mut self) -> VoiceResult<()> {
        loop {
            if self.shared.shutdown.is_cancelled() {
                self.stop();
                return Ok(());
            }

            let resuming = self.shared.can_resume();
            let mut established = false;
            let result = self.connect_and_run(&mut established).await;
            self.shared.state.set(ConnectionState::Disconnected);

            if established {
                self.backoff.reset();
                self.attempt = 0;
                self.failed_resumes = 0;
            } else if resuming {
                self.failed_resumes = self.failed_resumes.saturating_add(1);
            }

            let outcome = match self.classify(result) {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(error = %e, "Fatal voice error");
                    self.shared.reset_negotiation();
                    return Err(e);
                }
            };

            match outcome {
                VoiceOutcome::Shutdown => {
                    self.stop();
                    return Ok(());
                }
                VoiceOutcome::Resume => {
                    if self.failed_resumes >= self.shared.config.retry.max_resume_attempts {
                        warn!(failed_resumes = self.failed_resumes, "Voice resume keeps failing, identifying");
                        self.shared.reset_negotiation();
                        self.failed_resumes = 0;
                    }
                }
                VoiceOutcome::Reidentify => {
                    self.shared.reset_negotiation();
                    self.failed_resumes = 0;
                }
            }

            self.attempt = self.attempt.saturating_add(1);
            let max_attempts = self.shared.config.retry.max_reconnect_attempts;
            if self.attempt > max_attempts {
                error!(max_attempts, "Max voice reconnect attempts exceeded");
                self.shared.reset_negotiation();
                return Err(VoiceError::RetriesExhausted(max_attempts));
            }

            let delay = self.backoff.next_delay();
            info!(
                delay_ms = delay.as_millis(),
                attempt = self.attempt,
                resume = self.shared.can_resume(),
                "Reconnecting voice after backoff"
            );

            let shutdown = self.shared.shutdown.clone();
            tokio::select! {
                biased;
                () = shutdown.cancelled() => {
                    self.stop();
                    return Ok(());
                }
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn classify(&self, result: VoiceResult<VoiceOutcome>) -> VoiceResult<VoiceOutcome> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(VoiceError::Closed(code)) => self.handle_close(code),
            Err(VoiceError::Protocol(message)) => {
                error!(error = %message, "Voice protocol violation, dropping connection");
                Ok(VoiceOutcome::Reidentify)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "Voice connection error");
                Ok(self.resume_or_reidentify())
            }
        }
    }

    pub(crate) fn handle_close(&self, code: Option<u16>) -> VoiceResult<VoiceOutcome> {
        match VoiceCloseCode::action_for(code) {
            CloseAction::Resume => {
                warn!(code = ?code, "Voice socket closed, attempting resume");
                Ok(self.resume_or_reidentify())
            }
            CloseAction::Reidentify => {
                info!(code = ?code, "Voice session ended by server, identifying again");
                Ok(VoiceOutcome::Reidentify)
            }
            CloseAction::Fatal => {
                let code = code.unwrap_or_default();
                let reason = VoiceCloseCode::from_u16(code).map(|c| c.to_string());
                error!(code, reason = ?reason, "Unrecoverable voice close");
                if code == VoiceCloseCode::AuthenticationFailed.as_u16() {
                    Err(VoiceError::AuthenticationFailed)
                } else {
                    Err(VoiceError::FatalClose(code))
                }
            }
        }
    }

    fn resume_or_reidentify(&self) -> VoiceOutcome {
        if self.shared.can_resume() {
            VoiceOutcome::Resume
        } else {
            VoiceOutcome::Reidentify
        }
    }

    fn stop(&self) {
        info!(guild_id = %self.shared.descriptor.read().guild_id, "Voice session closed");
        self.shared.state.set(ConnectionState::Disconnected);
        self.shared.reset_negotiation();
    }

    async fn connect_and_run(&self, established: &mut bool) -> VoiceResult<VoiceOutcome> {
        let shared = Arc::clone(&self.shared);
        let shutdown = shared.shutdown.clone();
        let url = shared.descriptor.read().websocket_url();

        shared.state.set(ConnectionState::Connecting);
        debug!(url = %url, "Connecting to voice server");

        let (sink, mut reader) = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(VoiceOutcome::Shutdown),
            conn = socket::connect(&url) => conn?,
        };

        let hello = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(VoiceOutcome::Shutdown),
            hello = tokio::time::timeout(shared.config.hello_timeout, read_hello(&mut reader)) => {
                hello.map_err(|_| VoiceError::HelloTimeout)??
            }
        };
        let interval = heartbeat_interval(&hello)?;
        debug!(interval_ms = hello.heartbeat_interval, "Received voice Hello");

        let (outbound, writer) = socket::spawn_writer(sink);
        let heartbeat = HeartbeatHandle::spawn(
            interval,
            first_beat_delay(interval),
            Arc::clone(&shared.heartbeat),
            outbound.clone(),
            || VoiceMessage::heartbeat(heartbeat_nonce()).to_json(),
        );

        let result = match self.send_handshake(&outbound).await {
            Ok(()) => {
                *shared.outbound.write() = Some(outbound.clone());
                self.event_loop(&mut reader, &outbound, &heartbeat, established)
                    .await
            }
            Err(e) => Err(e),
        };

        heartbeat.stop();
        shared.outbound.write().take();
        drop(heartbeat);
        drop(outbound);
        writer.finish().await;

        result
    }

    /// Resume once a key exists, Identify otherwise
    async fn send_handshake(&self, outbound: &mpsc::Sender<Outbound>) -> VoiceResult<()> {
        let message = {
            let descriptor = self.shared.descriptor.read();
            if descriptor.is_ready() {
                self.shared.state.set(ConnectionState::Resuming);
                VoiceMessage::resume(&descriptor.resume_payload())?
            } else {
                self.shared.state.set(ConnectionState::Identifying);
                VoiceMessage::identify(&descriptor.identify_payload())?
            }
        };
        send(outbound, &message).await
    }

    async fn event_loop(
        &self,
        reader: &mut WsSource,
        outbound: &mpsc::Sender<Outbound>,
        heartbeat: &HeartbeatHandle,
        established: &mut bool,
    ) -> VoiceResult<VoiceOutcome> {
        let shutdown = self.shared.shutdown.clone();

        loop {
            let incoming = tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    self.shared.state.set(ConnectionState::Closing);
                    let _ = outbound.send(Outbound::close(SHUTDOWN_CLOSE_CODE, "voice disconnect")).await;
                    return Ok(VoiceOutcome::Shutdown);
                }

                () = heartbeat.zombie() => {
                    warn!("Voice heartbeat went unanswered, reconnecting");
                    return Ok(self.resume_or_reidentify());
                }

                incoming = socket::next_incoming(reader) => incoming,
            };

            let text = match incoming {
                Ok(Incoming::Text(text)) => text,
                Ok(Incoming::Closed(code)) => return Err(VoiceError::Closed(code)),
                Err(e) => {
                    warn!(error = %e, "Voice socket read error");
                    return Ok(self.resume_or_reidentify());
                }
            };

            let message = match VoiceMessage::from_json(&text) {
                Ok(message) => message,
                Err(FrameError::UnknownOpCode(op)) => {
                    debug!(op, "Skipping unknown voice op code");
                    continue;
                }
                Err(FrameError::Malformed(e)) => {
                    return Err(VoiceError::Protocol(format!("malformed voice frame: {e}")));
                }
            };

            if let Step::Established = self.handle(message, outbound).await? {
                *established = true;
            }
        }
    }

    async fn handle(&self, message: VoiceMessage, outbound: &mpsc::Sender<Outbound>) -> VoiceResult<Step> {
        if message.op.is_client_op() {
            return Err(VoiceError::Protocol(format!(
                "unexpected op code from voice server: {}",
                message.op
            )));
        }

        // Anything but InvalidateSession after a Resume means it was accepted
        let resumed = message.op != VoiceOpCode::InvalidateSession
            && self.shared.state.get() == ConnectionState::Resuming;
        if resumed {
            info!("Voice session resumed");
            self.shared.state.set(ConnectionState::Active);
        }

        let step = match message.op {
            VoiceOpCode::Ready => {
                self.handle_ready(&message, outbound).await?;
                Step::Continue
            }
            VoiceOpCode::SessionDescription => {
                self.handle_session_description(&message)?;
                Step::Established
            }
            VoiceOpCode::HeartbeatAck => {
                if let Some(rtt) = self.shared.heartbeat.record_ack(Instant::now()) {
                    debug!(latency_ms = rtt.as_millis(), "Voice heartbeat acknowledged");
                }
                Step::Continue
            }
            VoiceOpCode::InvalidateSession => {
                warn!("Voice session invalidated, identifying again");
                self.shared.reset_negotiation();
                let identify = {
                    let descriptor = self.shared.descriptor.read();
                    VoiceMessage::identify(&descriptor.identify_payload())?
                };
                self.shared.state.set(ConnectionState::Identifying);
                send(outbound, &identify).await?;
                Step::Continue
            }
            VoiceOpCode::Speaking => {
                debug!(d = %message.d, "Speaking update");
                Step::Continue
            }
            VoiceOpCode::Hello => {
                warn!("Duplicate voice Hello ignored");
                Step::Continue
            }
            // Filtered out above
            VoiceOpCode::Identify
            | VoiceOpCode::SelectProtocol
            | VoiceOpCode::Heartbeat
            | VoiceOpCode::Resume => Step::Continue,
        };

        Ok(if resumed { Step::Established } else { step })
    }

    /// Pick a mode, discover our address, and select the UDP protocol
    async fn handle_ready(&self, message: &VoiceMessage, outbound: &mpsc::Sender<Outbound>) -> VoiceResult<()> {
        let ready = message
            .as_ready()
            .ok_or_else(|| VoiceError::Protocol("voice READY payload is malformed".into()))?;
        let mode = select_mode(&self.shared.config.preference, &ready.modes)?;

        let udp = UdpSocket::bind("0.0.0.0:0").await?;
        udp.connect((ready.ip.as_str(), ready.port)).await?;
        let (address, port) = discover(&udp, ready.ssrc, self.shared.config.discovery_timeout).await?;

        {
            let mut descriptor = self.shared.descriptor.write();
            descriptor.ssrc = Some(ready.ssrc);
            descriptor.selected_mode = Some(mode);
        }
        *self.shared.udp.write() = Some(Arc::new(udp));

        info!(ssrc = ready.ssrc, mode = %mode, address = %address, port, "Voice READY, selecting protocol");
        send(outbound, &VoiceMessage::select_protocol(&SelectProtocolPayload::udp(address, port, mode))?).await
    }

    fn handle_session_description(&self, message: &VoiceMessage) -> VoiceResult<()> {
        {
            let descriptor = self.shared.descriptor.read();
            if descriptor.ssrc.is_none() || descriptor.selected_mode.is_none() {
                return Err(VoiceError::Protocol(
                    "SESSION_DESCRIPTION before protocol selection".into(),
                ));
            }
        }

        let description = message
            .as_session_description()
            .ok_or_else(|| VoiceError::Protocol("SESSION_DESCRIPTION payload is malformed".into()))?;
        let key: [u8; 32] = description.secret_key.as_slice().try_into().map_err(|_| {
            VoiceError::Protocol(format!(
                "secret key must be 32 bytes, got {}",
                description.secret_key.len()
            ))
        })?;

        let mode = EncryptionMode::from_str(&description.mode);
        if mode.is_none() {
            warn!(mode = %description.mode, "Server confirmed an unknown mode, keeping ours");
        }

        self.shared.install_key(key, mode);
        self.shared.state.set(ConnectionState::Active);
        info!(mode = %description.mode, "Voice session ready");
        Ok(())
    }
}

async fn send(outbound: &mpsc::Sender<Outbound>, message: &VoiceMessage) -> VoiceResult<()> {
    outbound
        .send(Outbound::Frame(message.to_json()?))
        .await
        .map_err(|_| VoiceError::NotConnected)
}

/// Voice heartbeats carry the current time in milliseconds
fn heartbeat_nonce() -> u64 {
    chrono::Utc::now().timestamp_millis().unsigned_abs()
}

async fn read_hello(reader: &mut WsSource) -> VoiceResult<VoiceHelloPayload> {
    loop {
        let text = match socket::next_incoming(reader).await? {
            Incoming::Text(text) => text,
            Incoming::Closed(code) => return Err(VoiceError::Closed(code)),
        };
        let message = match VoiceMessage::from_json(&text) {
            Ok(message) => message,
            Err(FrameError::UnknownOpCode(_)) => continue,
            Err(FrameError::Malformed(e)) => {
                return Err(VoiceError::Protocol(format!("malformed voice frame: {e}")));
            }
        };
        if message.op != VoiceOpCode::Hello {
            debug!(op = %message.op, "Ignoring voice frame before Hello");
            continue;
        }

        let hello = message
            .as_hello()
            .ok_or_else(|| VoiceError::Protocol("voice Hello missing heartbeat interval".into()))?;
        heartbeat_interval(&hello)?;
        return Ok(hello);
    }
}

/// Heartbeat period announced by a voice Hello, in fractional milliseconds
fn heartbeat_interval(hello: &VoiceHelloPayload) -> VoiceResult<Duration> {
    let invalid = || VoiceError::Protocol(format!("invalid voice heartbeat interval {}", hello.heartbeat_interval));
    // NaN and overflow fail here
    let interval = Duration::try_from_secs_f64(hello.heartbeat_interval / 1000.0).map_err(|_| invalid())?;
    if interval.is_zero() {
        return Err(invalid());
    }
    Ok(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::voice::payloads::SessionDescriptionPayload;
    use crate::voice::session::{VoiceConfig, VoiceSessionDescriptor};
    use chord_core::Snowflake;

    fn supervisor() -> VoiceSupervisor {
        let descriptor = VoiceSessionDescriptor::new("s", "t", "ws://127.0.0.1:1", Snowflake::new(1), Snowflake::new(2));
        VoiceSupervisor::new(Arc::new(VoiceShared::new(descriptor, VoiceConfig::default())))
    }

    #[test]
    fn close_codes_follow_voice_table() {
        let supervisor = supervisor();
        supervisor.shared.install_key([0; 32], Some(EncryptionMode::XSalsa20Poly1305));

        for code in [None, Some(4001), Some(4015), Some(4999)] {
            assert_eq!(supervisor.handle_close(code).unwrap(), VoiceOutcome::Resume, "code {code:?}");
        }
        for code in [1000, 4006, 4009] {
            assert_eq!(supervisor.handle_close(Some(code)).unwrap(), VoiceOutcome::Reidentify);
        }
        assert!(matches!(supervisor.handle_close(Some(4004)), Err(VoiceError::AuthenticationFailed)));
        assert!(matches!(supervisor.handle_close(Some(4014)), Err(VoiceError::FatalClose(4014))));
    }

    #[test]
    fn no_key_means_no_resume() {
        let supervisor = supervisor();
        assert_eq!(supervisor.handle_close(Some(4015)).unwrap(), VoiceOutcome::Reidentify);
    }

    #[test]
    fn mode_mismatch_is_fatal() {
        let supervisor = supervisor();
        let err = VoiceError::NoCompatibleMode { offered: vec!["aead_aes256_gcm".into()] };
        assert!(supervisor.classify(Err(err)).is_err());
        assert_eq!(
            supervisor.classify(Err(VoiceError::Discovery("timed out".into()))).unwrap(),
            VoiceOutcome::Reidentify
        );
    }

    fn description(len: usize) -> VoiceMessage {
        VoiceMessage::session_description(&SessionDescriptionPayload {
            mode: "xsalsa20_poly1305_lite".into(),
            secret_key: vec![1; len],
        })
        .unwrap()
    }

    #[tokio::test]
    async fn session_description_before_ready_is_rejected() {
        let supervisor = supervisor();
        let (tx, _rx) = mpsc::channel(4);
        supervisor.shared.state.set(ConnectionState::Identifying);

        assert!(matches!(supervisor.handle(description(32), &tx).await, Err(VoiceError::Protocol(_))));
        assert!(!supervisor.shared.can_resume());
        assert_eq!(supervisor.shared.descriptor.read().secret_key, None);
        assert_eq!(supervisor.shared.state.get(), ConnectionState::Identifying);
    }

    #[tokio::test]
    async fn session_description_installs_key_after_selection() {
        let supervisor = supervisor();
        let (tx, _rx) = mpsc::channel(4);
        supervisor.shared.state.set(ConnectionState::Identifying);
        {
            let mut descriptor = supervisor.shared.descriptor.write();
            descriptor.ssrc = Some(11);
            descriptor.selected_mode = Some(EncryptionMode::XSalsa20Poly1305);
        }

        assert!(matches!(supervisor.handle(description(16), &tx).await, Err(VoiceError::Protocol(_))));
        assert!(!supervisor.shared.can_resume());

        assert!(matches!(supervisor.handle(description(32), &tx).await, Ok(Step::Established)));
        assert!(supervisor.shared.can_resume());
        assert_eq!(supervisor.shared.state.get(), ConnectionState::Active);
        assert_eq!(
            supervisor.shared.descriptor.read().selected_mode,
            Some(EncryptionMode::XSalsa20Poly1305Lite)
        );
    }

    #[tokio::test]
    async fn invalidate_session_identifies_on_same_socket() {
        let supervisor = supervisor();
        supervisor.shared.install_key([3; 32], Some(EncryptionMode::XSalsa20Poly1305));
        supervisor.shared.state.set(ConnectionState::Resuming);
        let (tx, mut rx) = mpsc::channel(4);

        let step = supervisor.handle(VoiceMessage::invalidate_session(), &tx).await.unwrap();
        assert!(matches!(step, Step::Continue));
        assert!(!supervisor.shared.can_resume());
        assert_eq!(supervisor.shared.state.get(), ConnectionState::Identifying);

        let Some(Outbound::Frame(json)) = rx.recv().await else {
            panic!("expected an Identify frame");
        };
        let frame = VoiceMessage::from_json(&json).unwrap();
        assert_eq!(frame.op, VoiceOpCode::Identify);
        assert_eq!(frame.d["session_id"], "s");
    }

    #[tokio::test]
    async fn first_frame_after_resume_activates() {
        let supervisor = supervisor();
        supervisor.shared.state.set(ConnectionState::Resuming);
        let (tx, _rx) = mpsc::channel(4);

        let step = supervisor.handle(VoiceMessage::heartbeat_ack(1), &tx).await.unwrap();
        assert!(matches!(step, Step::Established));
        assert_eq!(supervisor.shared.state.get(), ConnectionState::Active);
    }

    #[tokio::test]
    async fn client_ops_from_server_are_violations() {
        let supervisor = supervisor();
        let (tx, _rx) = mpsc::channel(4);
        let heartbeat = VoiceMessage::heartbeat(1);
        assert!(matches!(supervisor.handle(heartbeat, &tx).await, Err(VoiceError::Protocol(_))));
    }

    #[test]
    fn hello_interval_must_fit_a_duration() {
        let hello = |ms: f64| VoiceHelloPayload { heartbeat_interval: ms };
        assert_eq!(heartbeat_interval(&hello(41_250.0)).unwrap(), Duration::from_millis(41_250));
        for bad in [0.0, -5.0, f64::NAN, f64::INFINITY, 1e30] {
            assert!(
                matches!(heartbeat_interval(&hello(bad)), Err(VoiceError::Protocol(_))),
                "interval {bad}"
            );
        }
    }

    #[test]
    fn nonce_is_wall_clock_millis() {
        let before = chrono::Utc::now().timestamp_millis().unsigned_abs();
        let nonce = heartbeat_nonce();
        assert!(nonce >= before);
    }
}
