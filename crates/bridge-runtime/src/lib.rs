//! `bridge-runtime` – the concurrent core of the sensor bridge.
//!
//! One [`SensorWorker`] per enabled sensor polls its driver and overwrites
//! its field on the shared [`Blackboard`].  A single [`PublisherLoop`]
//! snapshots the blackboard on a fixed interval and publishes each present
//! field as JSON.  [`BridgeController`] wires these together, owns the bus
//! session and drives the `Created → Running → Stopping → Closed` lifecycle.
//!
//! # Modules
//!
//! - [`blackboard`] – latest-value store with atomic whole-store snapshots.
//! - [`config`] – [`BridgeConfig`] and its defaults.
//! - [`worker`] – per-sensor poll loop.
//! - [`publisher`] – periodic snapshot-and-publish loop.
//! - [`controller`] – lifecycle, startup policy and bounded shutdown.
//! - [`monitor`] – optional orientation stability observer.
//! - [`telemetry`] – tracing subscriber and OTLP export.

pub mod blackboard;
pub mod config;
pub mod controller;
pub mod monitor;
pub mod publisher;
pub mod telemetry;
pub mod worker;

pub use blackboard::{Blackboard, BlackboardSnapshot, NEVER_SET, Stamped};
pub use config::BridgeConfig;
pub use controller::{BridgeController, BridgeHandle, BridgeState, SensorSet, ShutdownReport};
pub use monitor::{OrientationMonitor, Stability};
pub use publisher::PublisherLoop;
pub use worker::SensorWorker;
