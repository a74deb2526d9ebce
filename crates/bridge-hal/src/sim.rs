//! Simulated drivers for running the bridge without hardware.
//!
//! [`SimOrientationDriver`] and [`SimPositionDriver`] produce plausible
//! motion so the full bridge can run headless (device identifier `"sim"`).
//! [`ScriptedDriver`] replays a fixed list of read outcomes and counts every
//! call, which is what the runtime tests use to provoke transient errors,
//! failed bring-up and slow reads.
//!
//! # Example
//!
//! ```rust
//! use bridge_hal::sim::ScriptedDriver;
//! use bridge_types::{PositionSample, ReadError};
//!
//! let driver = ScriptedDriver::<PositionSample>::new("dwm-test")
//!     .then_sample(PositionSample::cartesian(1.0, 2.0, 3.0))
//!     .then_error(ReadError::Transient("crc mismatch".into()))
//!     .repeating(PositionSample::cartesian(1.5, 2.0, 3.0));
//! let stats = driver.stats();
//! assert_eq!(stats.reads(), 0);
//! ```

use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bridge_types::{FieldSample, OrientationSample, PositionSample, ReadError};

use crate::sensor::SensorDriver;

// ────────────────────────────────────────────────────────────────────────────
// Simulated orientation sensor
// ────────────────────────────────────────────────────────────────────────────

/// Yaw-only rotation that advances by a fixed step on every read.
pub struct SimOrientationDriver {
    id: String,
    yaw_rad: f64,
    step_rad: f64,
}

impl SimOrientationDriver {
    pub fn new(id: impl Into<String>, step_rad: f64) -> Self {
        Self {
            id: id.into(),
            yaw_rad: 0.0,
            step_rad,
        }
    }
}

#[async_trait]
impl SensorDriver for SimOrientationDriver {
    type Sample = OrientationSample;

    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self) -> Result<(), ReadError> {
        self.yaw_rad = 0.0;
        Ok(())
    }

    async fn try_read(&mut self) -> Result<Option<OrientationSample>, ReadError> {
        self.yaw_rad = (self.yaw_rad + self.step_rad) % TAU;
        let half = self.yaw_rad / 2.0;
        Ok(Some(OrientationSample::new(0.0, 0.0, half.sin(), half.cos())))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Simulated ranging tag
// ────────────────────────────────────────────────────────────────────────────

/// Tag walking a circle of `radius_m` around the origin at a fixed height.
pub struct SimPositionDriver {
    id: String,
    radius_m: f64,
    height_m: f64,
    angle_rad: f64,
    step_rad: f64,
}

impl SimPositionDriver {
    pub fn new(id: impl Into<String>, radius_m: f64, height_m: f64, step_rad: f64) -> Self {
        Self {
            id: id.into(),
            radius_m,
            height_m,
            angle_rad: 0.0,
            step_rad,
        }
    }
}

#[async_trait]
impl SensorDriver for SimPositionDriver {
    type Sample = PositionSample;

    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self) -> Result<(), ReadError> {
        self.angle_rad = 0.0;
        Ok(())
    }

    async fn try_read(&mut self) -> Result<Option<PositionSample>, ReadError> {
        let (sin, cos) = self.angle_rad.sin_cos();
        let sample = PositionSample::cartesian(
            self.radius_m * cos,
            self.radius_m * sin,
            self.height_m,
        );
        self.angle_rad = (self.angle_rad + self.step_rad) % TAU;
        Ok(Some(sample))
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Scripted driver
// ────────────────────────────────────────────────────────────────────────────

/// Shared call counters of a [`ScriptedDriver`].  Clones observe the same
/// counts, so a test can keep one after the driver moved into a worker.
#[derive(Debug, Clone, Default)]
pub struct DriverStats {
    opens: Arc<AtomicUsize>,
    reads: Arc<AtomicUsize>,
    closes: Arc<AtomicUsize>,
}

impl DriverStats {
    pub fn opens(&self) -> usize {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

/// Driver that replays a queue of read outcomes.
///
/// Once the queue is drained it keeps returning the `repeating` sample, or
/// `Ok(None)` when none was set.
pub struct ScriptedDriver<S> {
    id: String,
    open_error: Option<ReadError>,
    script: VecDeque<Result<Option<S>, ReadError>>,
    repeat: Option<S>,
    read_delay: Duration,
    stats: DriverStats,
}

impl<S: Clone> ScriptedDriver<S> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            open_error: None,
            script: VecDeque::new(),
            repeat: None,
            read_delay: Duration::ZERO,
            stats: DriverStats::default(),
        }
    }

    /// Make `open` fail with [`ReadError::Fatal`].
    pub fn failing_open(mut self, details: impl Into<String>) -> Self {
        self.open_error = Some(ReadError::Fatal(details.into()));
        self
    }

    pub fn then_sample(mut self, sample: S) -> Self {
        self.script.push_back(Ok(Some(sample)));
        self
    }

    pub fn then_empty(mut self) -> Self {
        self.script.push_back(Ok(None));
        self
    }

    pub fn then_error(mut self, err: ReadError) -> Self {
        self.script.push_back(Err(err));
        self
    }

    pub fn repeating(mut self, sample: S) -> Self {
        self.repeat = Some(sample);
        self
    }

    /// Sleep this long inside every `try_read`, emulating a slow bus.
    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = delay;
        self
    }

    pub fn stats(&self) -> DriverStats {
        self.stats.clone()
    }
}

#[async_trait]
impl<S> SensorDriver for ScriptedDriver<S>
where
    S: FieldSample + Clone + Send + Sync + 'static,
{
    type Sample = S;

    fn id(&self) -> &str {
        &self.id
    }

    async fn open(&mut self) -> Result<(), ReadError> {
        self.stats.opens.fetch_add(1, Ordering::SeqCst);
        match &self.open_error {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }

    async fn try_read(&mut self) -> Result<Option<S>, ReadError> {
        if !self.read_delay.is_zero() {
            tokio::time::sleep(self.read_delay).await;
        }
        self.stats.reads.fetch_add(1, Ordering::SeqCst);
        match self.script.pop_front() {
            Some(outcome) => outcome,
            None => Ok(self.repeat.clone()),
        }
    }

    async fn close(&mut self) {
        self.stats.closes.fetch_add(1, Ordering::SeqCst);
    }
}
