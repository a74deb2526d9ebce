//! WebSocket client transport.
//!
//! [`WsConnector`] dials a `ws://host:port` endpoint (a router, a dashboard
//! or a rosbridge-style relay) and returns a [`WsSession`] that forwards
//! every publish as one JSON text frame:
//!
//! ```json
//! {"key": "dwm/position", "payload": {"ts": 1700000000.5, "x_m": 1.0, "y_m": 2.0, "z_m": 3.0}}
//! ```
//!
//! Inbound frames are drained by a background task so that ping/pong and the
//! closing handshake keep working; their content is ignored.
//!
//! The endpoint must be a WebSocket relay.  A Zenoh router's native port
//! (7447) does not speak WebSocket and the handshake fails there.
//!
//! `close` is bounded by the connect timeout: a peer that stops reading can
//! wedge the sink, and the session is then dropped without the handshake.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bridge_types::BridgeError;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, info, warn};

use crate::session::{BusConnector, BusSession};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Default bound on the TCP + WebSocket handshake.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Dials WebSocket endpoints.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl WsConnector {
    /// Dial `endpoint` and return the concrete session.
    pub async fn connect_session(&self, endpoint: &str) -> Result<WsSession, BridgeError> {
        let connect_error = |details: String| BridgeError::TransportConnect {
            endpoint: endpoint.to_string(),
            details,
        };

        let (stream, _response) = tokio::time::timeout(self.connect_timeout, connect_async(endpoint))
            .await
            .map_err(|_| connect_error(format!("timed out after {:?}", self.connect_timeout)))?
            .map_err(|e| connect_error(e.to_string()))?;

        let (sink, mut inbound) = stream.split();
        let peer = endpoint.to_string();
        let drain = tokio::spawn(async move {
            while let Some(frame) = inbound.next().await {
                match frame {
                    Ok(Message::Close(_)) => break,
                    Ok(_) => {}
                    Err(e) => {
                        debug!(endpoint = %peer, error = %e, "ws inbound stream ended");
                        break;
                    }
                }
            }
        });

        info!(endpoint, "ws bus session opened");
        Ok(WsSession {
            endpoint: endpoint.to_string(),
            sink: Mutex::new(sink),
            drain,
            closed: AtomicBool::new(false),
            close_timeout: self.connect_timeout,
        })
    }
}

#[async_trait]
impl BusConnector for WsConnector {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn BusSession>, BridgeError> {
        Ok(Arc::new(self.connect_session(endpoint).await?))
    }
}

/// Session handed out by [`WsConnector::connect`].
pub struct WsSession {
    endpoint: String,
    sink: Mutex<WsSink>,
    drain: JoinHandle<()>,
    closed: AtomicBool,
    close_timeout: Duration,
}

impl WsSession {
    /// Wrap `payload` in the `{key, payload}` envelope.  Payloads that are not
    /// JSON travel as a string.
    fn envelope(key: &str, payload: &[u8]) -> String {
        let payload = serde_json::from_slice::<Value>(payload)
            .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(payload).into_owned()));
        json!({ "key": key, "payload": payload }).to_string()
    }
}

#[async_trait]
impl BusSession for WsSession {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(BridgeError::Publish {
                key: key.to_string(),
                details: "session is closed".to_string(),
            });
        }
        let frame = Self::envelope(key, &payload);
        self.sink
            .lock()
            .await
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| BridgeError::Publish {
                key: key.to_string(),
                details: e.to_string(),
            })
    }

    async fn close(&self) -> Result<(), BridgeError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let handshake = async { self.sink.lock().await.close().await };
        match tokio::time::timeout(self.close_timeout, handshake).await {
            Ok(Ok(())) => {}
            // The peer may already be gone; nothing left to release.
            Ok(Err(e)) => warn!(endpoint = %self.endpoint, error = %e, "ws close handshake failed"),
            Err(_) => warn!(
                endpoint = %self.endpoint,
                timeout = ?self.close_timeout,
                "ws close handshake timed out; dropping connection"
            ),
        }
        self.drain.abort();
        info!(endpoint = %self.endpoint, "ws bus session closed");
        Ok(())
    }
}

impl Drop for WsSession {
    fn drop(&mut self) {
        self.drain.abort();
    }
}
