//! Connection supervisor
//!
//! Owns the socket lifecycle: connect, wait for Hello, start the heartbeat,
//! identify or resume, then read until the connection ends. Each ending is
//! classified into resume, re-identify, or stop, and the loop reconnects with
//! backoff until the retry budget runs out.

use super::state::ClientState;
use crate::connection::socket::{self, WsSource};
use crate::connection::{Backoff, ConnectionState, Incoming, Outbound};
use crate::error::{GatewayError, GatewayResult};
use crate::events::GatewayEvent;
use crate::handlers::{Flow, HandlerContext, IdentifyHandler, MessageDispatcher, ResumeHandler};
use crate::heartbeat::{first_beat_delay, HeartbeatHandle};
use crate::protocol::{CloseAction, CloseCode, GatewayMessage, HelloPayload, OpCode};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Close code sent when the client shuts down on purpose
const SHUTDOWN_CLOSE_CODE: u16 = 1000;

/// How one connection ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Local shutdown; do not reconnect
    Shutdown,
    /// Reconnect and resume the session of this shard
    Resume { shard_id: Option<u32> },
    /// Reconnect with a fresh Identify
    Reidentify,
}

/// Reconnect loop state
pub struct Supervisor {
    shared: Arc<ClientState>,
    backoff: Backoff,
    /// Consecutive connections that never reached READY/RESUMED
    attempt: u32,
    /// Consecutive resumes that never reached RESUMED
    failed_resumes: u32,
    last_close: Option<u16>,
}

impl Supervisor {
    pub fn new(shared: Arc<ClientState>) -> Self {
        let retry = &shared.config().retry;
        let backoff = Backoff::new(retry.backoff_base, retry.backoff_max);
        Self {
            shared,
            backoff,
            attempt: 0,
            failed_resumes: 0,
            last_close: None,
        }
    }

    /// Run until shutdown or an unrecoverable error
    pub async fn run(mut self) -> GatewayResult<()> {
        loop {
            if self.shared.shutdown_token().is_cancelled() {
                self.stop();
                return Ok(());
            }

            let resuming = self.shared.session().can_resume();
            let mut established = false;
            let result = self.connect_and_run(&mut established).await;
            self.shared.state().set(ConnectionState::Disconnected);

            if established {
                self.backoff.reset();
                self.attempt = 0;
                self.failed_resumes = 0;
            } else if resuming {
                self.failed_resumes = self.failed_resumes.saturating_add(1);
            }

            let outcome = match self.classify(result) {
                Ok(outcome) => outcome,
                Err(e) => return Err(self.fail(e)),
            };

            match outcome {
                RunOutcome::Shutdown => {
                    self.stop();
                    return Ok(());
                }
                RunOutcome::Resume { shard_id } => {
                    let max = self.shared.config().retry.max_resume_attempts;
                    if self.failed_resumes >= max {
                        warn!(
                            failed_resumes = self.failed_resumes,
                            shard_id = ?shard_id,
                            "Resume keeps failing, falling back to Identify"
                        );
                        self.shared.session().invalidate();
                        self.failed_resumes = 0;
                    }
                }
                RunOutcome::Reidentify => {
                    self.shared.session().invalidate();
                    self.failed_resumes = 0;
                }
            }

            self.attempt = self.attempt.saturating_add(1);
            let max_attempts = self.shared.config().retry.max_reconnect_attempts;
            if self.attempt > max_attempts {
                error!(max_attempts, "Max reconnect attempts exceeded");
                self.shared.dispatcher().publish(GatewayEvent::Disconnected {
                    code: self.last_close,
                    terminal: true,
                });
                return Err(self.fail(GatewayError::RetriesExhausted(max_attempts)));
            }

            let delay = self.backoff.next_delay();
            let resume = self.shared.session().can_resume();
            info!(
                delay_ms = delay.as_millis(),
                attempt = self.attempt,
                resume,
                "Reconnecting after backoff"
            );
            self.shared.dispatcher().publish(GatewayEvent::Reconnecting {
                attempt: self.attempt,
                resume,
                delay,
            });

            if !self.sleep_or_shutdown(delay).await {
                self.stop();
                return Ok(());
            }
        }
    }

    /// Turn the result of one connection into the next step
    fn classify(&mut self, result: GatewayResult<RunOutcome>) -> GatewayResult<RunOutcome> {
        match result {
            Ok(outcome) => Ok(outcome),
            Err(GatewayError::Closed(code)) => self.handle_close(code),
            Err(GatewayError::Protocol(message)) => {
                error!(error = %message, "Gateway protocol violation, dropping connection");
                self.shared
                    .dispatcher()
                    .publish(GatewayEvent::ProtocolError { message });
                Ok(RunOutcome::Reidentify)
            }
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                warn!(error = %e, "Gateway connection error");
                Ok(self.resume_or_reidentify())
            }
        }
    }

    /// Classify a close code
    pub(crate) fn handle_close(&mut self, code: Option<u16>) -> GatewayResult<RunOutcome> {
        self.last_close = code;
        let action = CloseAction::for_code(code);
        self.shared.dispatcher().publish(GatewayEvent::Disconnected {
            code,
            terminal: action == CloseAction::Fatal,
        });

        match action {
            CloseAction::Resume => {
                warn!(code = ?code, "Gateway closed, attempting resume");
                Ok(self.resume_or_reidentify())
            }
            CloseAction::Reidentify => {
                info!(code = ?code, "Gateway closed the session, re-identifying");
                Ok(RunOutcome::Reidentify)
            }
            CloseAction::Fatal => {
                let code = code.unwrap_or_default();
                let reason = CloseCode::from_u16(code).map_or("unknown", CloseCode::description);
                error!(code, reason, "Unrecoverable close");
                if code == CloseCode::AuthenticationFailed.as_u16() {
                    Err(GatewayError::AuthenticationFailed)
                } else {
                    Err(GatewayError::FatalClose(code))
                }
            }
        }
    }

    pub(crate) fn resume_or_reidentify(&self) -> RunOutcome {
        let session = self.shared.session();
        if session.can_resume() {
            RunOutcome::Resume {
                shard_id: session.shard_id(),
            }
        } else {
            RunOutcome::Reidentify
        }
    }

    fn stop(&self) {
        info!("Gateway supervisor stopped");
        self.shared.state().set(ConnectionState::Disconnected);
        self.shared.dispatcher().publish(GatewayEvent::Disconnected {
            code: None,
            terminal: true,
        });
    }

    fn fail(&self, err: GatewayError) -> GatewayError {
        error!(error = %err, "Fatal gateway error");
        self.shared.state().set(ConnectionState::Disconnected);
        err
    }

    /// Single connection: connect, handshake, read until it ends
    async fn connect_and_run(&self, established: &mut bool) -> GatewayResult<RunOutcome> {
        let shared = Arc::clone(&self.shared);
        let shutdown = shared.shutdown_token().clone();
        let url = shared.config().connect_url();

        shared.state().set(ConnectionState::Connecting);
        info!(url = %url, shard_id = ?shared.session().shard_id(), "Connecting to gateway");

        let (sink, mut reader) = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(RunOutcome::Shutdown),
            conn = socket::connect(&url) => conn?,
        };

        let hello = tokio::select! {
            biased;
            () = shutdown.cancelled() => return Ok(RunOutcome::Shutdown),
            hello = self.wait_for_hello(&mut reader) => hello?,
        };
        let interval = Duration::from_millis(hello.heartbeat_interval);
        debug!(interval_ms = hello.heartbeat_interval, trace = ?hello.trace, "Received Hello");

        let (outbound, writer) = socket::spawn_writer(sink);
        let heartbeat = {
            let beat_state = Arc::clone(&shared);
            HeartbeatHandle::spawn(
                interval,
                first_beat_delay(interval),
                Arc::clone(shared.heartbeat()),
                outbound.clone(),
                move || GatewayMessage::heartbeat(beat_state.session().sequence()).to_json(),
            )
        };

        let result = match self.send_handshake(&outbound).await {
            Ok(()) => {
                shared.attach(outbound.clone());
                self.event_loop(&mut reader, &outbound, &heartbeat, established)
                    .await
            }
            Err(e) => Err(e),
        };

        heartbeat.stop();
        shared.detach();
        drop(heartbeat);
        drop(outbound);
        writer.finish().await;

        result
    }

    /// Send Resume if the session allows it, Identify otherwise
    async fn send_handshake(&self, outbound: &mpsc::Sender<Outbound>) -> GatewayResult<()> {
        let shared = &self.shared;
        let message = if let Some(resume) = ResumeHandler::message(shared.session(), &shared.config().token)? {
            shared.state().set(ConnectionState::Resuming);
            resume
        } else {
            shared.state().set(ConnectionState::Identifying);
            IdentifyHandler::message(shared.config(), shared.properties(), shared.presence())?
        };

        outbound
            .send(Outbound::Frame(message.to_json()?))
            .await
            .map_err(|_| GatewayError::NotConnected)
    }

    /// Wait for Hello, bounded by the configured timeout
    async fn wait_for_hello(&self, reader: &mut WsSource) -> GatewayResult<HelloPayload> {
        tokio::time::timeout(self.shared.config().hello_timeout, read_hello(reader))
            .await
            .map_err(|_| GatewayError::HelloTimeout)?
    }

    /// Read frames in arrival order until the connection ends
    async fn event_loop(
        &self,
        reader: &mut WsSource,
        outbound: &mpsc::Sender<Outbound>,
        heartbeat: &HeartbeatHandle,
        established: &mut bool,
    ) -> GatewayResult<RunOutcome> {
        let shared = Arc::clone(&self.shared);
        let shutdown = shared.shutdown_token().clone();

        loop {
            let incoming = tokio::select! {
                biased;

                () = shutdown.cancelled() => {
                    info!("Gateway received shutdown signal");
                    shared.state().set(ConnectionState::Closing);
                    let _ = outbound.send(Outbound::close(SHUTDOWN_CLOSE_CODE, "client shutdown")).await;
                    return Ok(RunOutcome::Shutdown);
                }

                () = heartbeat.zombie() => {
                    warn!("Zombie connection detected, reconnecting");
                    self.shared.dispatcher().publish(GatewayEvent::Disconnected { code: None, terminal: false });
                    return Ok(self.resume_or_reidentify());
                }

                incoming = socket::next_incoming(reader) => incoming,
            };

            let text = match incoming {
                Ok(Incoming::Text(text)) => text,
                Ok(Incoming::Closed(code)) => return Err(GatewayError::Closed(code)),
                Err(e) => {
                    warn!(error = %e, "WebSocket read error");
                    shared.dispatcher().publish(GatewayEvent::Disconnected { code: None, terminal: false });
                    return Ok(self.resume_or_reidentify());
                }
            };

            let Some(message) = MessageDispatcher::decode(&text)? else {
                continue;
            };

            let ctx = HandlerContext {
                session: shared.session(),
                state: shared.state(),
                dispatcher: shared.dispatcher(),
                monitor: shared.heartbeat(),
                heartbeat,
            };

            match MessageDispatcher::dispatch(&ctx, message)? {
                Flow::Continue => {}
                Flow::Established => *established = true,
                Flow::Reconnect | Flow::InvalidSession { resumable: true } => {
                    return Ok(self.resume_or_reidentify());
                }
                Flow::InvalidSession { resumable: false } => return Ok(RunOutcome::Reidentify),
            }
        }
    }

    /// Sleep for `duration`; `false` if shutdown was requested meanwhile
    async fn sleep_or_shutdown(&self, duration: Duration) -> bool {
        tokio::select! {
            biased;
            () = self.shared.shutdown_token().cancelled() => false,
            () = tokio::time::sleep(duration) => true,
        }
    }
}

/// Skip frames until Hello arrives
async fn read_hello(reader: &mut WsSource) -> GatewayResult<HelloPayload> {
    loop {
        let text = match socket::next_incoming(reader).await? {
            Incoming::Text(text) => text,
            Incoming::Closed(code) => return Err(GatewayError::Closed(code)),
        };
        let Some(message) = MessageDispatcher::decode(&text)? else {
            continue;
        };
        if message.op != OpCode::Hello {
            debug!(op = %message.op, "Ignoring frame before Hello");
            continue;
        }

        let hello = message
            .as_hello()
            .ok_or_else(|| GatewayError::Protocol("Hello missing heartbeat interval".into()))?;
        if hello.heartbeat_interval == 0 {
            return Err(GatewayError::Protocol("Hello with zero heartbeat interval".into()));
        }
        return Ok(hello);
    }
}
