//! Test helpers for integration tests
//!
//! A scripted `WebSocket` server: every accepted socket is handed to the
//! test, which then plays the remote side frame by frame.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use axum::extract::ws::{CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use chord_gateway::voice::{discovery_response, DISCOVERY_PACKET_LEN};
use chord_gateway::GatewayEvent;
use serde_json::Value;
use tokio::net::{TcpListener, UdpSocket};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Upper bound on any single step of a scripted exchange
pub const STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Mock server that accepts `WebSocket` connections
pub struct MockServer {
    pub addr: SocketAddr,
    accepted: mpsc::UnboundedReceiver<WebSocket>,
    _handle: JoinHandle<()>,
}

impl MockServer {
    /// Start a new mock server on a free local port
    pub async fn start() -> Result<Self> {
        let (tx, accepted) = mpsc::unbounded_channel();
        let app = Router::new().route("/", get(upgrade)).with_state(tx);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.ok();
        });

        Ok(Self {
            addr,
            accepted,
            _handle: handle,
        })
    }

    /// Base URL for the client to connect to
    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Wait for the client to open the next connection
    pub async fn accept(&mut self) -> Result<MockConnection> {
        let socket = tokio::time::timeout(STEP_TIMEOUT, self.accepted.recv())
            .await
            .map_err(|_| anyhow!("no connection within {STEP_TIMEOUT:?}"))?
            .ok_or_else(|| anyhow!("mock server stopped"))?;
        Ok(MockConnection { socket })
    }

    /// Check that no connection arrives within `wait`
    pub async fn expect_no_connection(&mut self, wait: Duration) -> Result<()> {
        match tokio::time::timeout(wait, self.accepted.recv()).await {
            Err(_) | Ok(None) => Ok(()),
            Ok(Some(_)) => bail!("unexpected connection"),
        }
    }
}

async fn upgrade(ws: WebSocketUpgrade, State(tx): State<mpsc::UnboundedSender<WebSocket>>) -> Response {
    ws.on_upgrade(move |socket| async move {
        let _ = tx.send(socket);
    })
}

/// Server side of one client connection
pub struct MockConnection {
    socket: WebSocket,
}

impl MockConnection {
    /// Send a JSON frame
    pub async fn send(&mut self, frame: Value) -> Result<()> {
        self.socket.send(Message::Text(frame.to_string())).await?;
        Ok(())
    }

    /// Send raw text, e.g. a malformed frame
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        self.socket.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    /// Receive the next JSON frame
    pub async fn recv(&mut self) -> Result<Value> {
        tokio::time::timeout(STEP_TIMEOUT, self.next_text())
            .await
            .map_err(|_| anyhow!("no frame within {STEP_TIMEOUT:?}"))?
    }

    /// Receive frames until one with op code `op` arrives
    ///
    /// Heartbeats and anything else in between are skipped.
    pub async fn recv_op(&mut self, op: u64) -> Result<Value> {
        let wait = async {
            loop {
                let frame = self.next_text().await?;
                if frame["op"].as_u64() == Some(op) {
                    return anyhow::Ok(frame);
                }
            }
        };
        tokio::time::timeout(STEP_TIMEOUT, wait)
            .await
            .map_err(|_| anyhow!("no op {op} frame within {STEP_TIMEOUT:?}"))?
    }

    /// Read until the client closes, returning its close code
    pub async fn recv_close(&mut self) -> Result<Option<u16>> {
        let wait = async {
            loop {
                match self.socket.recv().await {
                    Some(Ok(Message::Close(frame))) => return Ok(frame.map(|f| f.code)),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => return Err(anyhow!(e)),
                    None => return Ok(None),
                }
            }
        };
        tokio::time::timeout(STEP_TIMEOUT, wait)
            .await
            .map_err(|_| anyhow!("client did not close within {STEP_TIMEOUT:?}"))?
    }

    /// Close the connection with `code`
    pub async fn close(mut self, code: u16) -> Result<()> {
        let frame = CloseFrame {
            code,
            reason: "".into(),
        };
        self.socket.send(Message::Close(Some(frame))).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Result<Value> {
        loop {
            match self.socket.recv().await {
                Some(Ok(Message::Text(text))) => return Ok(serde_json::from_str(&text)?),
                Some(Ok(Message::Close(frame))) => {
                    bail!("client closed the socket: {:?}", frame.map(|f| f.code))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(anyhow!(e)),
                None => bail!("connection ended"),
            }
        }
    }
}

/// UDP endpoint that answers IP discovery requests
pub struct UdpResponder {
    pub port: u16,
    _handle: JoinHandle<()>,
}

impl UdpResponder {
    pub async fn start() -> Result<Self> {
        let socket = UdpSocket::bind("127.0.0.1:0").await?;
        let port = socket.local_addr()?.port();

        let handle = tokio::spawn(async move {
            let mut buf = [0u8; 1500];
            while let Ok((len, from)) = socket.recv_from(&mut buf).await {
                // Only discovery requests get an answer
                if len != DISCOVERY_PACKET_LEN || buf[0..2] != [0, 1] {
                    continue;
                }
                let ssrc = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
                let reply = discovery_response(ssrc, &from.ip().to_string(), from.port());
                if socket.send_to(&reply, from).await.is_err() {
                    break;
                }
            }
        });

        Ok(Self {
            port,
            _handle: handle,
        })
    }
}

/// Receive events until one matches `predicate`
pub async fn next_event<F>(events: &mut broadcast::Receiver<GatewayEvent>, mut predicate: F) -> Result<GatewayEvent>
where
    F: FnMut(&GatewayEvent) -> bool,
{
    let wait = async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Ok(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => bail!("event stream closed"),
            }
        }
    };
    tokio::time::timeout(STEP_TIMEOUT, wait)
        .await
        .map_err(|_| anyhow!("no matching event within {STEP_TIMEOUT:?}"))?
}

/// A local port with nothing listening on it
pub fn unused_port() -> Result<u16> {
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
