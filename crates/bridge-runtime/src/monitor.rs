//! Orientation stability monitor.
//!
//! A read-only consumer of the blackboard: every period it snapshots the
//! store through a [`BridgeHandle`] and classifies the orientation.  Only
//! transitions are logged, so a steady rig produces one line, not one per
//! period.

use std::time::Duration;

use bridge_types::{FieldId, OrientationSample};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::blackboard::BlackboardSnapshot;
use crate::config::BridgeConfig;
use crate::controller::BridgeHandle;

/// Coarse classification of the current orientation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stability {
    /// Close to the reference attitude (`w` at or above the threshold).
    Stable,
    /// Rotated away from the reference attitude.
    Changed,
    /// No orientation sample yet.
    NoData,
}

impl Stability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stability::Stable => "stable",
            Stability::Changed => "changed",
            Stability::NoData => "no_data",
        }
    }
}

/// Classify a quaternion against a `w` threshold.
pub fn classify_sample(sample: &OrientationSample, stable_w_threshold: f64) -> Stability {
    if sample.w >= stable_w_threshold {
        Stability::Stable
    } else {
        Stability::Changed
    }
}

/// Classify the orientation held in `snapshot`.
pub fn classify(snapshot: &BlackboardSnapshot, stable_w_threshold: f64) -> Stability {
    match &snapshot.orientation {
        Some(stamped) => classify_sample(&stamped.sample, stable_w_threshold),
        None => Stability::NoData,
    }
}

/// Counts of observations made by a finished monitor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub observations: u64,
    pub transitions: u64,
    pub last: Option<Stability>,
}

pub struct OrientationMonitor {
    period: Duration,
    threshold: f64,
}

impl OrientationMonitor {
    pub fn new(config: &BridgeConfig) -> Self {
        Self {
            period: config.monitor_period(),
            threshold: config.monitor.stable_w_threshold,
        }
    }

    /// Observe until `cancel` fires or the bridge shuts down.
    pub async fn run(self, bridge: BridgeHandle, cancel: CancellationToken) -> MonitorReport {
        let mut report = MonitorReport::default();
        let mut ticker = tokio::time::interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = bridge.closed() => break,
                _ = ticker.tick() => {}
            }
            let Ok(snapshot) = bridge.snapshot() else {
                break;
            };

            let state = classify(&snapshot, self.threshold);
            report.observations += 1;
            if report.last != Some(state) {
                report.transitions += 1;
                match state {
                    Stability::Stable => info!(state = state.as_str(), "orientation stable"),
                    Stability::Changed => {
                        let w = snapshot.orientation.as_ref().map(|s| s.sample.w);
                        warn!(state = state.as_str(), ?w, "orientation changed")
                    }
                    Stability::NoData => info!(state = state.as_str(), "waiting for orientation data"),
                }
                report.last = Some(state);
            } else {
                debug!(
                    state = state.as_str(),
                    ts = %snapshot.timestamp(FieldId::Orientation),
                    "orientation unchanged"
                );
            }
        }
        report
    }

    pub fn spawn(self, bridge: BridgeHandle, cancel: CancellationToken) -> JoinHandle<MonitorReport> {
        tokio::spawn(self.run(bridge, cancel).instrument(info_span!("orientation_monitor")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blackboard::Blackboard;
    use crate::controller::{BridgeController, SensorSet};
    use bridge_hal::ScriptedDriver;
    use bridge_middleware::LocalBus;

    #[test]
    fn classification_follows_w_threshold() {
        let board = Blackboard::new();
        assert_eq!(classify(&board.snapshot(), 0.5), Stability::NoData);

        board.write(OrientationSample::IDENTITY);
        assert_eq!(classify(&board.snapshot(), 0.5), Stability::Stable);

        // 90 degrees about z: w = cos(45°) ≈ 0.707, still stable.
        let half = std::f64::consts::FRAC_PI_4;
        board.write(OrientationSample::new(0.0, 0.0, half.sin(), half.cos()));
        assert_eq!(classify(&board.snapshot(), 0.5), Stability::Stable);

        board.write(OrientationSample::new(0.0, 0.0, 1.0, 0.0));
        assert_eq!(classify(&board.snapshot(), 0.5), Stability::Changed);
    }

    #[test]
    fn threshold_is_inclusive() {
        let q = OrientationSample::new(0.0, 0.0, 0.0, 0.5);
        assert_eq!(classify_sample(&q, 0.5), Stability::Stable);
        assert_eq!(classify_sample(&q, 0.51), Stability::Changed);
    }

    #[tokio::test]
    async fn monitor_stops_with_the_bridge() {
        let mut cfg = BridgeConfig::default();
        cfg.position.enabled = false;
        cfg.orientation.poll_interval_ms = 5;
        cfg.orientation.device = "scripted".to_string();
        cfg.publisher.interval_ms = 20;
        cfg.monitor.period_ms = 5;

        let driver = ScriptedDriver::new("imu").repeating(OrientationSample::new(0.0, 0.0, 1.0, 0.0));
        let mut bridge = BridgeController::new(cfg.clone(), SensorSet::new().with_orientation(Box::new(driver)));
        bridge.create_bridge(&LocalBus::default()).await.unwrap();

        let monitor = OrientationMonitor::new(&cfg).spawn(bridge.handle(), CancellationToken::new());
        tokio::time::sleep(Duration::from_millis(60)).await;
        bridge.close_bridge().await.unwrap();

        let report = tokio::time::timeout(Duration::from_secs(1), monitor)
            .await
            .unwrap()
            .unwrap();
        assert!(report.observations >= 2);
        assert_eq!(report.last, Some(Stability::Changed));
        assert!(report.transitions <= 2);
    }
}
