//! `bridge-types` – shared vocabulary of the sensor bridge.
//!
//! Every other crate in the workspace speaks in these types: the samples a
//! driver produces, the field identifiers the blackboard is keyed by, and the
//! error taxonomy that separates per-cycle hiccups from startup failures.
//!
//! # Modules
//!
//! - [`wire`] – JSON payloads published on the bus, one object per message.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod wire;

// ─────────────────────────────────────────────────────────────────────────────
// Samples
// ─────────────────────────────────────────────────────────────────────────────

/// Unit quaternion reported by the orientation sensor.
///
/// The four components are always captured together; a sample never mixes
/// components from two different reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientationSample {
    pub i: f64,
    pub j: f64,
    pub k: f64,
    /// Real (scalar) part.
    pub w: f64,
}

impl OrientationSample {
    /// The "no rotation" quaternion.
    pub const IDENTITY: Self = Self {
        i: 0.0,
        j: 0.0,
        k: 0.0,
        w: 1.0,
    };

    pub fn new(i: f64, j: f64, k: f64, w: f64) -> Self {
        Self { i, j, k, w }
    }

    /// Euclidean norm; `1.0` for a well-formed rotation.
    pub fn norm(&self) -> f64 {
        (self.i * self.i + self.j * self.j + self.k * self.k + self.w * self.w).sqrt()
    }
}

impl From<(f64, f64, f64, f64)> for OrientationSample {
    fn from((i, j, k, w): (f64, f64, f64, f64)) -> Self {
        Self { i, j, k, w }
    }
}

/// The named axes a ranging tag exposed for one fix, in metres.
///
/// Tags do not always report every axis (a 2-D anchor layout yields no `z`),
/// so each axis is optional.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct CartesianPosition {
    pub x_m: Option<f64>,
    pub y_m: Option<f64>,
    pub z_m: Option<f64>,
}

impl CartesianPosition {
    /// `true` when at least one axis is populated.
    pub fn has_axis(&self) -> bool {
        self.x_m.is_some() || self.y_m.is_some() || self.z_m.is_some()
    }
}

/// Position reported by the ranging tag.
///
/// The shape is decided once, at the driver boundary: a fix with recognised
/// axis fields becomes [`PositionSample::Cartesian`], anything else is kept
/// verbatim as [`PositionSample::Raw`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PositionSample {
    Cartesian(CartesianPosition),
    Raw(String),
}

impl PositionSample {
    /// A fully populated Cartesian fix.
    pub fn cartesian(x_m: f64, y_m: f64, z_m: f64) -> Self {
        Self::Cartesian(CartesianPosition {
            x_m: Some(x_m),
            y_m: Some(y_m),
            z_m: Some(z_m),
        })
    }

    /// Pick the structured form when `axes` carries anything, otherwise fall
    /// back to the raw text the driver saw.
    pub fn from_axes(axes: CartesianPosition, raw: impl Into<String>) -> Self {
        if axes.has_axis() {
            Self::Cartesian(axes)
        } else {
            Self::Raw(raw.into())
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Fields
// ─────────────────────────────────────────────────────────────────────────────

/// Identifies one slot of the blackboard and the sensor that owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldId {
    Orientation,
    Position,
}

impl FieldId {
    /// Every field, in publish order.
    pub const ALL: [FieldId; 2] = [FieldId::Orientation, FieldId::Position];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldId::Orientation => "orientation",
            FieldId::Position => "position",
        }
    }
}

impl fmt::Display for FieldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A sample tagged with the field it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub enum Reading {
    Orientation(OrientationSample),
    Position(PositionSample),
}

impl Reading {
    pub fn field(&self) -> FieldId {
        match self {
            Reading::Orientation(_) => FieldId::Orientation,
            Reading::Position(_) => FieldId::Position,
        }
    }
}

impl From<OrientationSample> for Reading {
    fn from(sample: OrientationSample) -> Self {
        Reading::Orientation(sample)
    }
}

impl From<PositionSample> for Reading {
    fn from(sample: PositionSample) -> Self {
        Reading::Position(sample)
    }
}

/// A sample type that always lands in the same blackboard field.
pub trait FieldSample: Into<Reading> {
    const FIELD: FieldId;
}

impl FieldSample for OrientationSample {
    const FIELD: FieldId = FieldId::Orientation;
}

impl FieldSample for PositionSample {
    const FIELD: FieldId = FieldId::Position;
}

// ─────────────────────────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reported by a sensor driver.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReadError {
    /// This cycle's read failed; the next one may succeed.
    #[error("transient read failure: {0}")]
    Transient(String),
    /// The device cannot be opened or configured.
    #[error("fatal device failure: {0}")]
    Fatal(String),
}

/// One sensor that failed to come up during bridge creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitFailure {
    pub field: FieldId,
    pub details: String,
}

impl fmt::Display for InitFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.details)
    }
}

fn join_failures(failures: &[InitFailure]) -> String {
    failures
        .iter()
        .map(InitFailure::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Error type spanning device bring-up, transport and bridge lifecycle.
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Transient read on {field}: {details}")]
    TransientRead { field: FieldId, details: String },

    #[error("Fatal read on {field}: {details}")]
    FatalRead { field: FieldId, details: String },

    #[error("Transport connect to {endpoint} failed: {details}")]
    TransportConnect { endpoint: String, details: String },

    #[error("Publish on '{key}' failed: {details}")]
    Publish { key: String, details: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Bridge startup failed: {}", join_failures(.0))]
    Startup(Vec<InitFailure>),

    #[error("Invalid bridge state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },
}

impl BridgeError {
    /// Lift a driver error into the bridge taxonomy for `field`.
    pub fn from_read(field: FieldId, err: ReadError) -> Self {
        match err {
            ReadError::Transient(details) => BridgeError::TransientRead { field, details },
            ReadError::Fatal(details) => BridgeError::FatalRead { field, details },
        }
    }
}
