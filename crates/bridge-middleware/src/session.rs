//! Bus session seam.
//!
//! The bridge never speaks a transport protocol directly.  It asks a
//! [`BusConnector`] for a [`BusSession`] at startup, publishes opaque
//! payloads under topic keys while running, and closes the session on
//! shutdown.
//!
//! # Implementations
//!
//! - [`LocalBus`][crate::local_bus::LocalBus] – in-process fan-out, used by
//!   tests and by consumers living in the same process.
//! - [`WsConnector`][crate::ws::WsConnector] – WebSocket client that forwards
//!   every publish as one JSON text frame.

use std::sync::Arc;

use async_trait::async_trait;
use bridge_types::BridgeError;

/// An open connection to the pub/sub bus.
///
/// # Contract
///
/// * `publish` – deliver `payload` under `key`.  Fire-and-forget: a failure
///   is reported as [`BridgeError::Publish`] and the caller decides whether
///   to retry on its next cycle.  Implementations do not buffer.
/// * `close` – release the connection.  Must be idempotent; publishing after
///   close fails with [`BridgeError::Publish`].
#[async_trait]
pub trait BusSession: Send + Sync {
    async fn publish(&self, key: &str, payload: Vec<u8>) -> Result<(), BridgeError>;

    async fn close(&self) -> Result<(), BridgeError>;
}

/// Opens [`BusSession`]s.
#[async_trait]
pub trait BusConnector: Send + Sync {
    /// Connect to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::TransportConnect`] when the bus is unreachable.
    async fn connect(&self, endpoint: &str) -> Result<Arc<dyn BusSession>, BridgeError>;
}
