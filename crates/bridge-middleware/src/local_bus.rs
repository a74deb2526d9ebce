//! In-process, topic-keyed publish/subscribe bus.
//!
//! Uses one [`tokio::sync::broadcast`] channel per topic key so that every
//! subscriber of a key receives every message without any single slow
//! subscriber blocking the publisher.  Channels are created lazily the first
//! time a key is subscribed to or published on.
//!
//! Publishing to a key nobody listens on is not an error: the bridge is
//! latest-wins, and the next cycle carries fresher data anyway.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bridge_types::BridgeError;
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::session::{BusConnector, BusSession};

/// Default channel capacity (number of buffered messages per key before the
/// oldest are dropped for slow subscribers).
const DEFAULT_CAPACITY: usize = 64;

/// One message as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusMessage {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Shared in-process bus.  Clone it cheaply – all clones share the same
/// channels.
#[derive(Clone, Debug)]
pub struct LocalBus {
    capacity: usize,
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<BusMessage>>>>,
}

impl LocalBus {
    /// Create a new bus; `capacity` applies to every key independently.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            channels: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Subscribe to every message published under `key`.
    pub fn subscribe(&self, key: &str) -> BusReceiver {
        BusReceiver {
            key: key.to_string(),
            receiver: self.sender(key).subscribe(),
        }
    }

    /// Publish `payload` under `key`.
    ///
    /// Returns the number of subscribers handed the message; `0` when nobody
    /// is listening.
    pub fn send(&self, key: &str, payload: Vec<u8>) -> usize {
        let message = BusMessage {
            key: key.to_string(),
            payload,
        };
        match self.sender(key).send(message) {
            Ok(n) => n,
            Err(broadcast::error::SendError(_)) => {
                trace!(key, "no subscribers; message dropped");
                0
            }
        }
    }

    fn sender(&self, key: &str) -> broadcast::Sender<BusMessage> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(key.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

impl Default for LocalBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

#[async_trait]
impl BusConnector for LocalBus {
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn BusSession>, BridgeError> {
        debug!(endpoint, "local bus session opened");
        Ok(Arc::new(LocalSession {
            bus: self.clone(),
            closed: AtomicBool::new(false),
        }))
    }
}

/// Session handed out by [`LocalBus::connect`].
pub struct LocalSession {
    bus: LocalBus,
    closed: AtomicBool,
}

impl LocalSession {
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[async_trait]
impl BusSession for LocalSession {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BridgeError> {
        if self.is_closed() {
            return Err(BridgeError::Publish {
                key: key.to_string(),
                details: "session is closed".to_string(),
            });
        }
        self.bus.send(key, payload);
        Ok(())
    }

    async fn close(&self) -> Result<(), BridgeError> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Receiver
// ---------------------------------------------------------------------------

/// An async receiver bound to a single topic key.
///
/// Obtained via [`LocalBus::subscribe`].
pub struct BusReceiver {
    key: String,
    receiver: broadcast::Receiver<BusMessage>,
}

impl BusReceiver {
    /// Wait for the next message on this key.
    ///
    /// * `Err(RecvError::Lagged(n))` – the subscriber fell behind and `n`
    ///   messages were dropped.
    /// * `Err(RecvError::Closed)` – every bus handle was dropped.
    pub async fn recv(&mut self) -> Result<BusMessage, broadcast::error::RecvError> {
        self.receiver.recv().await
    }

    /// Non-blocking variant of [`recv`][Self::recv].
    pub fn try_recv(&mut self) -> Result<BusMessage, broadcast::error::TryRecvError> {
        self.receiver.try_recv()
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
