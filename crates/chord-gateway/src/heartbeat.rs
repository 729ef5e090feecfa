//! Heartbeat driver
//!
//! Runs as its own task next to the reader loop so a slow event handler can
//! never delay a beat. Each beat is queued on the connection's writer. If a
//! beat has gone a full interval without an ACK when the next one is due,
//! the connection is a zombie: the driver queues a close frame and fires the
//! zombie signal so the supervisor reconnects.

use crate::connection::Outbound;
use parking_lot::Mutex;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace, warn};

/// Close code sent when a zombie connection is torn down
pub const ZOMBIE_CLOSE_CODE: u16 = 4000;

/// Heartbeat bookkeeping for one connection
#[derive(Debug, Clone, Default)]
pub struct HeartbeatState {
    pub interval: Duration,
    pub last_sent: Option<Instant>,
    pub last_ack: Option<Instant>,
    /// Round trip of the most recent acknowledged beat
    pub latency: Option<Duration>,
    awaiting_ack: bool,
}

impl HeartbeatState {
    /// True while a sent beat has not been acknowledged
    #[must_use]
    pub fn is_awaiting_ack(&self) -> bool {
        self.awaiting_ack
    }
}

/// Shared view of the heartbeat state
///
/// Written by the driver on send and by the reader loop on ACK. Survives
/// reconnects so the latency readout stays available.
#[derive(Debug, Default)]
pub struct HeartbeatMonitor {
    state: Mutex<HeartbeatState>,
}

impl HeartbeatMonitor {
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Prepare for a new connection; the last latency is kept
    pub fn begin(&self, interval: Duration) {
        let mut state = self.state.lock();
        state.interval = interval;
        state.last_sent = None;
        state.last_ack = None;
        state.awaiting_ack = false;
    }

    pub fn record_sent(&self, at: Instant) {
        let mut state = self.state.lock();
        state.last_sent = Some(at);
        state.awaiting_ack = true;
    }

    /// Record an ACK, returning the round trip if it answers an outstanding beat
    pub fn record_ack(&self, at: Instant) -> Option<Duration> {
        let mut state = self.state.lock();
        state.last_ack = Some(at);
        if !state.awaiting_ack {
            return None;
        }
        state.awaiting_ack = false;
        let latency = state.last_sent.map(|sent| at.saturating_duration_since(sent));
        if latency.is_some() {
            state.latency = latency;
        }
        latency
    }

    /// Latency of the last completed round trip; `None` before the first ACK
    pub fn latency(&self) -> Option<Duration> {
        self.state.lock().latency
    }

    pub fn is_awaiting_ack(&self) -> bool {
        self.state.lock().awaiting_ack
    }

    /// An outstanding beat was sent at least `interval` before `now`
    pub fn is_ack_overdue(&self, now: Instant, interval: Duration) -> bool {
        let state = self.state.lock();
        state.awaiting_ack
            && state
                .last_sent
                .map_or(true, |sent| now.saturating_duration_since(sent) >= interval)
    }

    pub fn snapshot(&self) -> HeartbeatState {
        self.state.lock().clone()
    }
}

/// Random delay in `[0, interval)` for the first beat
#[must_use]
pub fn first_beat_delay(interval: Duration) -> Duration {
    interval.mul_f64(rand::thread_rng().gen::<f64>())
}

/// Handle to a running heartbeat driver
///
/// Dropping the handle stops the driver.
#[derive(Debug)]
pub struct HeartbeatHandle {
    cancel: CancellationToken,
    zombie: CancellationToken,
    beat_now: Arc<Notify>,
    task: JoinHandle<()>,
}

impl HeartbeatHandle {
    /// Start a driver
    ///
    /// `payload` builds each heartbeat frame at send time so it always
    /// carries the latest sequence or nonce.
    pub fn spawn<F>(
        interval: Duration,
        first_delay: Duration,
        monitor: Arc<HeartbeatMonitor>,
        outbound: mpsc::Sender<Outbound>,
        payload: F,
    ) -> Self
    where
        F: FnMut() -> Result<String, serde_json::Error> + Send + 'static,
    {
        monitor.begin(interval);

        let cancel = CancellationToken::new();
        let zombie = CancellationToken::new();
        let beat_now = Arc::new(Notify::new());

        let driver = Driver {
            interval,
            monitor,
            outbound,
            cancel: cancel.clone(),
            zombie: zombie.clone(),
            beat_now: Arc::clone(&beat_now),
        };
        let task = tokio::spawn(driver.run(first_delay, payload));

        Self {
            cancel,
            zombie,
            beat_now,
            task,
        }
    }

    /// Send a beat immediately, e.g. when the remote asks for one
    pub fn beat_now(&self) {
        self.beat_now.notify_one();
    }

    /// Stop the driver; calling it again is a no-op
    pub fn stop(&self) {
        if !self.cancel.is_cancelled() {
            debug!("Stopping heartbeat driver");
            self.cancel.cancel();
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled() || self.task.is_finished()
    }

    /// Resolves once the driver has declared the connection dead
    pub async fn zombie(&self) {
        self.zombie.cancelled().await;
    }

    pub fn is_zombie(&self) -> bool {
        self.zombie.is_cancelled()
    }
}

impl Drop for HeartbeatHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Driver {
    interval: Duration,
    monitor: Arc<HeartbeatMonitor>,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    zombie: CancellationToken,
    beat_now: Arc<Notify>,
}

impl Driver {
    async fn run<F>(self, first_delay: Duration, mut payload: F)
    where
        F: FnMut() -> Result<String, serde_json::Error>,
    {
        let interval_ms = self.interval.as_millis();
        debug!(interval_ms, first_delay_ms = first_delay.as_millis(), "Heartbeat task started");

        let mut next_beat = Instant::now() + first_delay;
        loop {
            let scheduled = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    debug!("Heartbeat task shutting down");
                    return;
                }
                () = tokio::time::sleep_until(next_beat) => true,
                () = self.beat_now.notified() => false,
            };

            if scheduled {
                next_beat += self.interval;
                if self.monitor.is_ack_overdue(Instant::now(), self.interval) {
                    warn!(interval_ms, "Heartbeat ACK missed, closing zombie connection");
                    // The supervisor also reacts to the zombie signal, so a full queue is fine
                    let _ = self
                        .outbound
                        .try_send(Outbound::close(ZOMBIE_CLOSE_CODE, "heartbeat ack missed"));
                    self.zombie.cancel();
                    return;
                }
                if self.monitor.is_awaiting_ack() {
                    // A requested beat went out less than an interval ago
                    trace!("Skipping scheduled beat while a recent one is unanswered");
                    continue;
                }
            }

            let frame = match payload() {
                Ok(frame) => frame,
                Err(e) => {
                    error!(error = %e, "Failed to serialize heartbeat");
                    continue;
                }
            };

            self.monitor.record_sent(Instant::now());
            if self.outbound.send(Outbound::Frame(frame)).await.is_err() {
                debug!("Writer closed, heartbeat task exiting");
                return;
            }
            trace!(scheduled, "Heartbeat sent");
        }
    }
}
