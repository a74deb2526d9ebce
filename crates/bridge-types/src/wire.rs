//! JSON payloads published on the bus.
//!
//! One JSON object per publish, keyed by field:
//!
//! | Field | Payload |
//! |---|---|
//! | orientation | `{"ts": f, "quat": {"i": f, "j": f, "k": f, "w": f}}` |
//! | position (structured) | `{"ts": f, "x_m": f, "y_m": f, "z_m": f}` (only the axes present) |
//! | position (fallback) | `{"ts": f, "raw": "<string form>"}` |
//!
//! `ts` is the capture time in Unix seconds with microsecond resolution.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BridgeError, CartesianPosition, OrientationSample, PositionSample, Reading};

/// Capture time as fractional Unix seconds.
pub fn unix_seconds(ts: DateTime<Utc>) -> f64 {
    ts.timestamp_micros() as f64 / 1_000_000.0
}

/// Orientation topic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrientationPayload {
    pub ts: f64,
    pub quat: OrientationSample,
}

/// Position topic payload.
///
/// Untagged on the wire: the presence of `raw` marks the fallback form, so
/// the two shapes never collide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PositionPayload {
    Raw {
        ts: f64,
        raw: String,
    },
    Cartesian {
        ts: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        x_m: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        y_m: Option<f64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        z_m: Option<f64>,
    },
}

impl PositionPayload {
    pub fn new(sample: &PositionSample, captured_at: DateTime<Utc>) -> Self {
        let ts = unix_seconds(captured_at);
        match sample {
            PositionSample::Cartesian(axes) => PositionPayload::Cartesian {
                ts,
                x_m: axes.x_m,
                y_m: axes.y_m,
                z_m: axes.z_m,
            },
            PositionSample::Raw(raw) => PositionPayload::Raw {
                ts,
                raw: raw.clone(),
            },
        }
    }

    pub fn ts(&self) -> f64 {
        match self {
            PositionPayload::Raw { ts, .. } | PositionPayload::Cartesian { ts, .. } => *ts,
        }
    }

    /// Recover the sample this payload was built from.
    pub fn into_sample(self) -> PositionSample {
        match self {
            PositionPayload::Raw { raw, .. } => PositionSample::Raw(raw),
            PositionPayload::Cartesian { x_m, y_m, z_m, .. } => {
                PositionSample::Cartesian(CartesianPosition { x_m, y_m, z_m })
            }
        }
    }
}

fn non_finite(field: &str) -> BridgeError {
    BridgeError::Serialization(format!("non-finite {field} cannot be encoded as JSON"))
}

pub fn encode_orientation(
    sample: &OrientationSample,
    captured_at: DateTime<Utc>,
) -> Result<Vec<u8>, BridgeError> {
    if ![sample.i, sample.j, sample.k, sample.w].iter().all(|c| c.is_finite()) {
        return Err(non_finite("quaternion"));
    }
    let payload = OrientationPayload {
        ts: unix_seconds(captured_at),
        quat: *sample,
    };
    serde_json::to_vec(&payload).map_err(|e| BridgeError::Serialization(e.to_string()))
}

pub fn encode_position(
    sample: &PositionSample,
    captured_at: DateTime<Utc>,
) -> Result<Vec<u8>, BridgeError> {
    if let PositionSample::Cartesian(axes) = sample {
        if [axes.x_m, axes.y_m, axes.z_m].into_iter().flatten().any(|v| !v.is_finite()) {
            return Err(non_finite("position"));
        }
    }
    serde_json::to_vec(&PositionPayload::new(sample, captured_at))
        .map_err(|e| BridgeError::Serialization(e.to_string()))
}

/// Encode whichever field `reading` carries.
pub fn encode_reading(reading: &Reading, captured_at: DateTime<Utc>) -> Result<Vec<u8>, BridgeError> {
    match reading {
        Reading::Orientation(q) => encode_orientation(q, captured_at),
        Reading::Position(p) => encode_position(p, captured_at),
    }
}

pub fn decode_orientation(bytes: &[u8]) -> Result<OrientationPayload, BridgeError> {
    serde_json::from_slice(bytes).map_err(|e| BridgeError::Serialization(e.to_string()))
}

pub fn decode_position(bytes: &[u8]) -> Result<PositionPayload, BridgeError> {
    serde_json::from_slice(bytes).map_err(|e| BridgeError::Serialization(e.to_string()))
}
