//! `bridge-middleware` – the bus side of the sensor bridge.
//!
//! Moves opaque payloads from the publisher to the outside world without
//! caring about their meaning.
//!
//! # Modules
//!
//! - [`session`] – [`BusConnector`] / [`BusSession`], the seam the runtime
//!   publishes through.
//! - [`local_bus`] – in-process topic-keyed fan-out built on Tokio broadcast
//!   channels.
//! - [`ws`] – WebSocket client transport sending one JSON frame per publish.

pub mod local_bus;
pub mod session;
pub mod ws;

pub use local_bus::{BusMessage, BusReceiver, LocalBus, LocalSession};
pub use session::{BusConnector, BusSession};
pub use ws::{WsConnector, WsSession};
