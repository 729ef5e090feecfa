//! `WebSocket` plumbing shared by the gateway and voice connections
//!
//! Connecting, the single writer task that serializes all outbound frames,
//! and reading the next meaningful inbound message.

use crate::error::GatewayError;
use futures::stream::{SplitSink, SplitStream};
use futures::{Sink, SinkExt, Stream, StreamExt};
use std::fmt::Display;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

/// Type alias for the `WebSocket` stream
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
/// Write half
pub type WsSink = SplitSink<WsStream, Message>;
/// Read half
pub type WsSource = SplitStream<WsStream>;

/// Capacity of the outbound queue per connection
pub const OUTBOUND_CAPACITY: usize = 64;

/// How long the writer gets to flush after its queue closes
const WRITER_FLUSH_GRACE: Duration = Duration::from_secs(2);

/// Frame queued for the writer task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Serialized JSON text frame
    Frame(String),
    /// Close the socket with this code; nothing after it is sent
    Close { code: u16, reason: String },
}

impl Outbound {
    pub fn close(code: u16, reason: impl Into<String>) -> Self {
        Self::Close {
            code,
            reason: reason.into(),
        }
    }
}

/// What the reader saw next
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Incoming {
    Text(String),
    /// Close frame code, or `None` if the stream ended without one
    Closed(Option<u16>),
}

/// Open a `WebSocket` and split it into its halves
pub async fn connect(url: &str) -> Result<(WsSink, WsSource), GatewayError> {
    let (ws, _response) = connect_async(url).await?;
    Ok(ws.split())
}

/// Spawn the writer task
///
/// Every outbound frame, heartbeat or otherwise, goes through the returned
/// sender so frames are never interleaved on the socket.
pub fn spawn_writer<S>(sink: S) -> (mpsc::Sender<Outbound>, WriterHandle)
where
    S: Sink<Message> + Unpin + Send + 'static,
    S::Error: Display,
{
    let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
    let task = tokio::spawn(run_writer(sink, rx));
    (tx, WriterHandle { task })
}

async fn run_writer<S>(mut sink: S, mut rx: mpsc::Receiver<Outbound>)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Frame(text) => {
                if let Err(e) = sink.send(Message::Text(text.into())).await {
                    tracing::debug!(error = %e, "Writer task: send failed");
                    break;
                }
            }
            Outbound::Close { code, reason } => {
                tracing::debug!(code, reason = %reason, "Writer task: sending close frame");
                let frame = CloseFrame {
                    code: code.into(),
                    reason: reason.into(),
                };
                if let Err(e) = sink.send(Message::Close(Some(frame))).await {
                    tracing::debug!(error = %e, "Writer task: close failed");
                }
                break;
            }
        }
    }
    let _ = sink.close().await;
}

/// Join handle of a writer task
pub struct WriterHandle {
    task: JoinHandle<()>,
}

impl WriterHandle {
    /// Wait for the writer to drain, aborting it after a grace period
    ///
    /// Every sender for its queue must be dropped first or this always
    /// hits the grace period.
    pub async fn finish(mut self) {
        tokio::select! {
            _ = &mut self.task => {}
            () = tokio::time::sleep(WRITER_FLUSH_GRACE) => {
                self.task.abort();
            }
        }
    }
}

/// Read until the next text frame or the end of the connection
///
/// Ping/pong is answered by tungstenite; binary frames are skipped because
/// compression is never requested.
pub async fn next_incoming<R, E>(reader: &mut R) -> Result<Incoming, GatewayError>
where
    R: Stream<Item = Result<Message, E>> + Unpin,
    GatewayError: From<E>,
{
    loop {
        match reader.next().await {
            Some(Ok(Message::Text(text))) => return Ok(Incoming::Text(text.to_string())),
            Some(Ok(Message::Close(frame))) => {
                return Ok(Incoming::Closed(frame.map(|f| u16::from(f.code))));
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => return Err(e.into()),
            None => return Ok(Incoming::Closed(None)),
        }
    }
}
