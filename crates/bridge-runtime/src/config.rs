//! [`BridgeConfig`] – the read-only settings the bridge runs with.
//!
//! Loading is the caller's job (the CLI reads a TOML file); the runtime only
//! consumes the parsed value.  Every section and key is optional: a missing
//! section takes the defaults below, and a key omitted inside a present
//! sensor section falls back to the generic [`SensorConfig::default`].
//!
//! | Key | Default |
//! |---|---|
//! | `bus.endpoint` | `ws://localhost:9090` |
//! | `publisher.interval_ms` | `1000` |
//! | `orientation.poll_interval_ms` | `50` |
//! | `orientation.device` | `/dev/ttyUSB0` |
//! | `position.poll_interval_ms` | `100` |
//! | `position.read_timeout_ms` | `1000` |
//! | `position.device` | `/dev/ttyACM0` |
//! | `*.baud_rate` | `115200` |
//! | `monitor.period_ms` | `500` |
//! | `monitor.stable_w_threshold` | `0.5` |
//!
//! The bus endpoint is a WebSocket relay speaking `{"key", "payload"}` text
//! frames, not a Zenoh router (whose default port is 7447).  Simulation is
//! opt-in: set a sensor's `device` to `"sim"`.

use std::time::Duration;

use bridge_hal::line::DEFAULT_BAUD_RATE;
use bridge_types::{BridgeError, FieldId};
use serde::{Deserialize, Serialize};

/// Topic used for orientation when the config leaves it empty.
pub const DEFAULT_ORIENTATION_TOPIC: &str = "imu/orientation";
/// Topic used for position when the config leaves it empty.
pub const DEFAULT_POSITION_TOPIC: &str = "dwm/position";
/// Device identifier that selects the simulated driver.
pub const SIM_DEVICE: &str = "sim";
/// WebSocket relay the bridge publishes to by default.
pub const DEFAULT_ENDPOINT: &str = "ws://localhost:9090";
/// Serial node of the orientation bridge board.
pub const DEFAULT_ORIENTATION_DEVICE: &str = "/dev/ttyUSB0";
/// Serial node of the ranging tag.
pub const DEFAULT_POSITION_DEVICE: &str = "/dev/ttyACM0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    pub bus: BusConfig,
    pub publisher: PublisherConfig,
    pub orientation: SensorConfig,
    pub position: SensorConfig,
    pub monitor: MonitorConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub endpoint: String,
    pub connect_timeout_ms: u64,
    /// Upper bound on a single publish call.
    pub publish_timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherConfig {
    pub interval_ms: u64,
}

/// Settings of one sensor worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    pub enabled: bool,
    /// Topic key the field is published under.
    pub topic: String,
    pub poll_interval_ms: u64,
    /// Upper bound on a single `try_read`.
    pub read_timeout_ms: u64,
    /// Upper bound on device bring-up.
    pub open_timeout_ms: u64,
    /// Device path, or `"sim"` for the simulated driver.
    pub device: String,
    /// Line speed when `device` is a serial port.
    pub baud_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub enabled: bool,
    pub period_ms: u64,
    /// Orientation counts as stable while `w >= stable_w_threshold`.
    pub stable_w_threshold: f64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_ENDPOINT.to_string(),
            connect_timeout_ms: 2_000,
            publish_timeout_ms: 500,
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self { interval_ms: 1_000 }
    }
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            topic: String::new(),
            poll_interval_ms: 100,
            read_timeout_ms: 500,
            open_timeout_ms: 5_000,
            device: SIM_DEVICE.to_string(),
            baud_rate: DEFAULT_BAUD_RATE,
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            period_ms: 500,
            stable_w_threshold: 0.5,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            publisher: PublisherConfig::default(),
            orientation: SensorConfig {
                topic: DEFAULT_ORIENTATION_TOPIC.to_string(),
                poll_interval_ms: 50,
                read_timeout_ms: 200,
                device: DEFAULT_ORIENTATION_DEVICE.to_string(),
                ..SensorConfig::default()
            },
            position: SensorConfig {
                topic: DEFAULT_POSITION_TOPIC.to_string(),
                poll_interval_ms: 100,
                read_timeout_ms: 1_000,
                device: DEFAULT_POSITION_DEVICE.to_string(),
                ..SensorConfig::default()
            },
            monitor: MonitorConfig::default(),
        }
    }
}

impl SensorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn open_timeout(&self) -> Duration {
        Duration::from_millis(self.open_timeout_ms)
    }

    pub fn is_simulated(&self) -> bool {
        self.device == SIM_DEVICE
    }
}

impl BridgeConfig {
    pub fn sensor(&self, field: FieldId) -> &SensorConfig {
        match field {
            FieldId::Orientation => &self.orientation,
            FieldId::Position => &self.position,
        }
    }

    pub fn sensor_mut(&mut self, field: FieldId) -> &mut SensorConfig {
        match field {
            FieldId::Orientation => &mut self.orientation,
            FieldId::Position => &mut self.position,
        }
    }

    /// Topic key for `field`, falling back to the built-in default.
    pub fn topic(&self, field: FieldId) -> &str {
        let topic = self.sensor(field).topic.as_str();
        if !topic.is_empty() {
            return topic;
        }
        match field {
            FieldId::Orientation => DEFAULT_ORIENTATION_TOPIC,
            FieldId::Position => DEFAULT_POSITION_TOPIC,
        }
    }

    /// Fields whose sensor is enabled, in publish order.
    pub fn enabled_fields(&self) -> Vec<FieldId> {
        FieldId::ALL
            .into_iter()
            .filter(|f| self.sensor(*f).enabled)
            .collect()
    }

    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publisher.interval_ms)
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.bus.publish_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.bus.connect_timeout_ms)
    }

    pub fn monitor_period(&self) -> Duration {
        Duration::from_millis(self.monitor.period_ms)
    }

    /// Reject settings the loops cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Config`] naming the first offending key.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if self.bus.endpoint.trim().is_empty() {
            return Err(BridgeError::Config("bus.endpoint must not be empty".into()));
        }
        if self.publisher.interval_ms == 0 {
            return Err(BridgeError::Config("publisher.interval_ms must be > 0".into()));
        }
        if self.bus.connect_timeout_ms == 0 {
            return Err(BridgeError::Config("bus.connect_timeout_ms must be > 0".into()));
        }
        if self.bus.publish_timeout_ms == 0 {
            return Err(BridgeError::Config("bus.publish_timeout_ms must be > 0".into()));
        }
        for field in self.enabled_fields() {
            let sensor = self.sensor(field);
            if sensor.poll_interval_ms == 0 {
                return Err(BridgeError::Config(format!("{field}.poll_interval_ms must be > 0")));
            }
            if sensor.read_timeout_ms == 0 {
                return Err(BridgeError::Config(format!("{field}.read_timeout_ms must be > 0")));
            }
            if sensor.open_timeout_ms == 0 {
                return Err(BridgeError::Config(format!("{field}.open_timeout_ms must be > 0")));
            }
            if sensor.baud_rate == 0 {
                return Err(BridgeError::Config(format!("{field}.baud_rate must be > 0")));
            }
            if sensor.device.trim().is_empty() {
                return Err(BridgeError::Config(format!("{field}.device must not be empty")));
            }
        }
        if self.monitor.enabled && self.monitor.period_ms == 0 {
            return Err(BridgeError::Config("monitor.period_ms must be > 0".into()));
        }
        Ok(())
    }

    /// Longest interval any bridge loop sleeps between iterations.
    pub fn longest_interval(&self) -> Duration {
        self.enabled_fields()
            .into_iter()
            .map(|f| self.sensor(f).poll_interval())
            .chain(std::iter::once(self.publish_interval()))
            .max()
            .unwrap_or_default()
    }
}
