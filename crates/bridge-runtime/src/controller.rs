//! [`BridgeController`] – owns the bridge lifecycle.
//!
//! ```text
//! Created ──create_bridge──▶ Running ──close_bridge──▶ Stopping ──▶ Closed
//!    │                                                               ▲
//!    ├──create_bridge fails (connect / startup) ─────────────────────┤
//!    └──close_bridge (never started) ────────────────────────────────┘
//! ```
//!
//! `create_bridge` connects to the bus, opens every enabled sensor and only
//! reports success once each driver has come up.  If any driver fails to
//! open, everything already started is torn down again and the caller gets
//! [`BridgeError::Startup`] naming the failed fields.  A bridge that failed
//! to start is `Closed` and cannot be retried; build a new controller.
//!
//! `close_bridge` cancels every loop, waits for them within
//! [`BridgeController::shutdown_bound`] (aborting stragglers), closes the
//! bus session within the publish timeout and is idempotent.  A close that
//! was interrupted (its future dropped while `Stopping`) is finished by the
//! next `close_bridge` call.

use std::sync::Arc;
use std::time::Duration;

use bridge_hal::{OrientationDriver, PositionDriver, SensorDriver};
use bridge_middleware::{BusConnector, BusSession};
use bridge_types::{BridgeError, FieldId, FieldSample, InitFailure};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::blackboard::{Blackboard, BlackboardSnapshot};
use crate::config::BridgeConfig;
use crate::publisher::{PublisherLoop, PublisherReport};
use crate::worker::{SensorWorker, WorkerHandle, WorkerReport};

/// Lifecycle state of a [`BridgeController`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    Created,
    Running,
    Stopping,
    Closed,
}

impl BridgeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BridgeState::Created => "created",
            BridgeState::Running => "running",
            BridgeState::Stopping => "stopping",
            BridgeState::Closed => "closed",
        }
    }
}

impl std::fmt::Display for BridgeState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drivers handed to the controller, one slot per field.
#[derive(Default)]
pub struct SensorSet {
    pub orientation: Option<OrientationDriver>,
    pub position: Option<PositionDriver>,
}

impl SensorSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_orientation(mut self, driver: OrientationDriver) -> Self {
        self.orientation = Some(driver);
        self
    }

    pub fn with_position(mut self, driver: PositionDriver) -> Self {
        self.position = Some(driver);
        self
    }
}

/// Cheap, cloneable read access to a running bridge.
///
/// Stops serving snapshots as soon as shutdown begins.
#[derive(Clone)]
pub struct BridgeHandle {
    blackboard: Arc<Blackboard>,
    cancel: CancellationToken,
}

impl BridgeHandle {
    pub fn snapshot(&self) -> Result<BlackboardSnapshot, BridgeError> {
        if self.cancel.is_cancelled() {
            return Err(BridgeError::InvalidState {
                expected: BridgeState::Running.as_str(),
                actual: BridgeState::Stopping.as_str(),
            });
        }
        Ok(self.blackboard.snapshot())
    }

    pub fn is_running(&self) -> bool {
        !self.cancel.is_cancelled()
    }

    /// Resolves once the bridge starts shutting down.
    pub async fn closed(&self) {
        self.cancel.cancelled().await
    }
}

/// Summary returned by [`BridgeController::close_bridge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub workers: Vec<WorkerReport>,
    pub publisher: Option<PublisherReport>,
    /// Tasks that missed the shutdown deadline and were aborted.
    pub aborted: usize,
}

pub struct BridgeController {
    config: BridgeConfig,
    sensors: SensorSet,
    state: BridgeState,
    blackboard: Arc<Blackboard>,
    cancel: CancellationToken,
    session: Option<Arc<dyn BusSession>>,
    workers: Vec<JoinHandle<WorkerReport>>,
    publisher: Option<JoinHandle<PublisherReport>>,
}

impl BridgeController {
    pub fn new(config: BridgeConfig, sensors: SensorSet) -> Self {
        Self {
            config,
            sensors,
            state: BridgeState::Created,
            blackboard: Arc::new(Blackboard::new()),
            cancel: CancellationToken::new(),
            session: None,
            workers: Vec::new(),
            publisher: None,
        }
    }

    pub fn state(&self) -> BridgeState {
        self.state
    }

    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Connect to the bus, bring every enabled sensor up and start the loops.
    ///
    /// # Errors
    ///
    /// - [`BridgeError::InvalidState`] unless the bridge is `Created`.
    /// - [`BridgeError::Config`] when the configuration does not validate.
    /// - [`BridgeError::TransportConnect`] when the bus is unreachable; no
    ///   sensor has been opened.
    /// - [`BridgeError::Startup`] when one or more drivers failed to open;
    ///   every loop has been stopped and the session closed.
    pub async fn create_bridge(&mut self, connector: &dyn BusConnector) -> Result<(), BridgeError> {
        self.expect_state(BridgeState::Created)?;
        if let Err(e) = self.config.validate() {
            self.state = BridgeState::Closed;
            return Err(e);
        }

        let endpoint = self.config.bus.endpoint.clone();
        let connect_timeout = self.config.connect_timeout();
        let session = match tokio::time::timeout(connect_timeout, connector.connect(&endpoint)).await {
            Ok(Ok(session)) => session,
            Ok(Err(e)) => {
                error!(endpoint = %endpoint, error = %e, "bus connect failed");
                self.state = BridgeState::Closed;
                return Err(e);
            }
            Err(_) => {
                error!(endpoint = %endpoint, "bus connect timed out");
                self.state = BridgeState::Closed;
                return Err(BridgeError::TransportConnect {
                    endpoint,
                    details: format!("timed out after {connect_timeout:?}"),
                });
            }
        };
        info!(endpoint = %endpoint, "bus session established");

        let (handles, mut failures) = self.spawn_workers();
        let mut ready = Vec::with_capacity(handles.len());
        for WorkerHandle { field, ready: signal, join } in handles {
            match signal.await {
                Ok(Ok(())) => {}
                Ok(Err(failure)) => failures.push(failure),
                Err(_) => failures.push(InitFailure {
                    field,
                    details: "worker exited during bring-up".to_string(),
                }),
            }
            ready.push(join);
        }
        self.workers = ready;

        if !failures.is_empty() {
            failures.sort_by_key(|f| f.field);
            for failure in &failures {
                error!(field = %failure.field, error = %failure.details, "sensor failed to start");
            }
            self.session = Some(session);
            self.shutdown().await;
            return Err(BridgeError::Startup(failures));
        }

        let topics = self
            .config
            .enabled_fields()
            .into_iter()
            .map(|f| (f, self.config.topic(f).to_string()))
            .collect();
        let publisher = PublisherLoop::new(
            Arc::clone(&self.blackboard),
            Arc::clone(&session),
            topics,
            self.config.publish_interval(),
            self.config.publish_timeout(),
        );
        self.publisher = Some(publisher.spawn(self.cancel.clone()));
        self.session = Some(session);
        self.state = BridgeState::Running;
        info!(fields = ?self.config.enabled_fields(), "bridge running");
        Ok(())
    }

    /// Current blackboard contents.
    ///
    /// # Errors
    ///
    /// [`BridgeError::InvalidState`] unless the bridge is `Running`.
    pub fn snapshot(&self) -> Result<BlackboardSnapshot, BridgeError> {
        self.expect_state(BridgeState::Running)?;
        Ok(self.blackboard.snapshot())
    }

    /// Read handle for tasks that outlive a borrow of the controller.
    pub fn handle(&self) -> BridgeHandle {
        BridgeHandle {
            blackboard: Arc::clone(&self.blackboard),
            cancel: self.cancel.clone(),
        }
    }

    /// Upper bound on how long `close_bridge` waits for the loops.
    pub fn shutdown_bound(&self) -> Duration {
        let longest_timeout = self
            .config
            .enabled_fields()
            .into_iter()
            .map(|f| self.config.sensor(f).read_timeout())
            .chain([self.config.publish_timeout()])
            .max()
            .unwrap_or_default();
        self.config.longest_interval() * 2 + longest_timeout
    }

    /// Stop every loop and close the bus session.  Safe to call repeatedly.
    pub async fn close_bridge(&mut self) -> Result<ShutdownReport, BridgeError> {
        match self.state {
            BridgeState::Closed => Ok(ShutdownReport::default()),
            BridgeState::Stopping => {
                info!("resuming interrupted shutdown");
                Ok(self.shutdown().await)
            }
            BridgeState::Created => {
                self.cancel.cancel();
                self.sensors = SensorSet::default();
                self.state = BridgeState::Closed;
                info!("bridge closed before start");
                Ok(ShutdownReport::default())
            }
            BridgeState::Running => {
                info!("bridge stopping");
                let report = self.shutdown().await;
                info!(aborted = report.aborted, "bridge closed");
                Ok(report)
            }
        }
    }

    /// Start a worker per enabled field; disabled drivers are dropped unopened.
    fn spawn_workers(&mut self) -> (Vec<WorkerHandle>, Vec<InitFailure>) {
        let mut handles = Vec::new();
        let mut failures = Vec::new();
        let SensorSet {
            orientation,
            position,
        } = std::mem::take(&mut self.sensors);

        if self.config.orientation.enabled {
            match orientation {
                Some(driver) => handles.push(self.spawn_worker(driver)),
                None => failures.push(missing_driver(FieldId::Orientation)),
            }
        }
        if self.config.position.enabled {
            match position {
                Some(driver) => handles.push(self.spawn_worker(driver)),
                None => failures.push(missing_driver(FieldId::Position)),
            }
        }
        (handles, failures)
    }

    fn spawn_worker<D>(&self, driver: D) -> WorkerHandle
    where
        D: SensorDriver + 'static,
    {
        let field = <D::Sample as FieldSample>::FIELD;
        SensorWorker::new(driver, self.config.sensor(field), Arc::clone(&self.blackboard))
            .spawn(self.cancel.clone())
    }

    /// Cancel, join within the bound, close the session, mark `Closed`.
    async fn shutdown(&mut self) -> ShutdownReport {
        self.state = BridgeState::Stopping;
        self.cancel.cancel();

        let deadline = tokio::time::Instant::now() + self.shutdown_bound();
        let mut report = ShutdownReport::default();

        for mut join in self.workers.drain(..) {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(worker)) => report.workers.push(worker),
                Ok(Err(e)) => warn!(error = %e, "sensor worker task failed"),
                Err(_) => {
                    join.abort();
                    report.aborted += 1;
                }
            }
        }
        if let Some(mut join) = self.publisher.take() {
            match tokio::time::timeout_at(deadline, &mut join).await {
                Ok(Ok(totals)) => report.publisher = Some(totals),
                Ok(Err(e)) => warn!(error = %e, "publisher task failed"),
                Err(_) => {
                    join.abort();
                    report.aborted += 1;
                }
            }
        }
        if report.aborted > 0 {
            warn!(aborted = report.aborted, "loops missed the shutdown deadline");
        }

        // Released only once close has run, so an interrupted shutdown retries it.
        if let Some(session) = self.session.clone() {
            let close_timeout = self.config.publish_timeout();
            match tokio::time::timeout(close_timeout, session.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, "bus session close failed"),
                Err(_) => warn!(timeout = ?close_timeout, "bus session close timed out; dropping session"),
            }
            self.session = None;
        }
        self.state = BridgeState::Closed;
        report
    }

    fn expect_state(&self, expected: BridgeState) -> Result<(), BridgeError> {
        if self.state == expected {
            Ok(())
        } else {
            Err(BridgeError::InvalidState {
                expected: expected.as_str(),
                actual: self.state.as_str(),
            })
        }
    }
}

fn missing_driver(field: FieldId) -> InitFailure {
    InitFailure {
        field,
        details: "no driver configured".to_string(),
    }
}

impl Drop for BridgeController {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_hal::{DriverStats, ScriptedDriver};
    use bridge_middleware::{BusReceiver, LocalBus};
    use bridge_types::wire::{PositionPayload, decode_orientation, decode_position};
    use bridge_types::{OrientationSample, PositionSample, ReadError};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    fn fast_config() -> BridgeConfig {
        let mut cfg = BridgeConfig::default();
        cfg.publisher.interval_ms = 20;
        cfg.bus.publish_timeout_ms = 50;
        for field in FieldId::ALL {
            let sensor = cfg.sensor_mut(field);
            sensor.poll_interval_ms = 5;
            sensor.read_timeout_ms = 50;
            sensor.open_timeout_ms = 200;
            sensor.device = "scripted".to_string();
        }
        cfg
    }

    fn imu(sample: OrientationSample) -> (OrientationDriver, DriverStats) {
        let driver = ScriptedDriver::new("imu").repeating(sample);
        let stats = driver.stats();
        (Box::new(driver), stats)
    }

    fn dwm(sample: PositionSample) -> (PositionDriver, DriverStats) {
        let driver = ScriptedDriver::new("dwm").repeating(sample);
        let stats = driver.stats();
        (Box::new(driver), stats)
    }

    async fn next(rx: &mut BusReceiver) -> Vec<u8> {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("no message within 1s")
            .expect("bus closed")
            .payload
    }

    /// Hands out `LocalSession`s and remembers the last one.
    #[derive(Default)]
    struct TrackingConnector {
        bus: LocalBus,
        last: Mutex<Option<Arc<dyn BusSession>>>,
    }

    #[async_trait]
    impl BusConnector for TrackingConnector {
        async fn connect(&self, endpoint: &str) -> Result<Arc<dyn BusSession>, BridgeError> {
            let session = self.bus.connect(endpoint).await?;
            *self.last.lock().unwrap() = Some(Arc::clone(&session));
            Ok(session)
        }
    }

    impl TrackingConnector {
        async fn last_session_rejects_publish(&self) -> bool {
            let session = self.last.lock().unwrap().clone().expect("never connected");
            session.publish("after-close", Vec::new()).await.is_err()
        }
    }

    struct RefusingConnector {
        attempted: AtomicBool,
    }

    #[async_trait]
    impl BusConnector for RefusingConnector {
        async fn connect(&self, endpoint: &str) -> Result<Arc<dyn BusSession>, BridgeError> {
            self.attempted.store(true, Ordering::SeqCst);
            Err(BridgeError::TransportConnect {
                endpoint: endpoint.to_string(),
                details: "connection refused".to_string(),
            })
        }
    }

    /// Session whose `close` takes `close_delay`, or never finishes.
    struct SlowCloseSession {
        close_delay: Option<Duration>,
        closes: AtomicUsize,
    }

    #[async_trait]
    impl BusSession for SlowCloseSession {
        async fn publish(&self, _key: &str, _payload: Vec<u8>) -> Result<(), BridgeError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), BridgeError> {
            match self.close_delay {
                Some(delay) => tokio::time::sleep(delay).await,
                None => std::future::pending::<()>().await,
            }
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct SlowCloseConnector(Arc<SlowCloseSession>);

    impl SlowCloseConnector {
        fn new(close_delay: Option<Duration>) -> Self {
            Self(Arc::new(SlowCloseSession {
                close_delay,
                closes: AtomicUsize::new(0),
            }))
        }

        fn closes(&self) -> usize {
            self.0.closes.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BusConnector for SlowCloseConnector {
        async fn connect(&self, _endpoint: &str) -> Result<Arc<dyn BusSession>, BridgeError> {
            Ok(Arc::clone(&self.0) as Arc<dyn BusSession>)
        }
    }

    #[tokio::test]
    async fn running_bridge_publishes_both_fields() {
        let connector = TrackingConnector::default();
        let mut imu_rx = connector.bus.subscribe("imu/orientation");
        let mut dwm_rx = connector.bus.subscribe("dwm/position");

        let (imu, _) = imu(OrientationSample::new(0.0, 0.0, 0.0, 1.0));
        let (dwm, _) = dwm(PositionSample::cartesian(1.0, 2.0, 3.0));
        let mut bridge = BridgeController::new(
            fast_config(),
            SensorSet::new().with_orientation(imu).with_position(dwm),
        );
        bridge.create_bridge(&connector).await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Running);

        let quat = decode_orientation(&next(&mut imu_rx).await).unwrap();
        assert_eq!(quat.quat, OrientationSample::IDENTITY);
        assert!(quat.ts > 0.0);

        match decode_position(&next(&mut dwm_rx).await).unwrap() {
            PositionPayload::Cartesian { x_m, y_m, z_m, .. } => {
                assert_eq!((x_m, y_m, z_m), (Some(1.0), Some(2.0), Some(3.0)));
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let snap = bridge.snapshot().unwrap();
        assert!(snap.orientation.is_some() && snap.position.is_some());

        let report = bridge.close_bridge().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert_eq!(report.workers.len(), 2);
        assert_eq!(report.aborted, 0);
        assert!(connector.last_session_rejects_publish().await);
    }

    #[tokio::test]
    async fn field_without_samples_is_never_published() {
        let connector = TrackingConnector::default();
        let mut dwm_rx = connector.bus.subscribe("dwm/position");
        let mut imu_rx = connector.bus.subscribe("imu/orientation");

        let (imu, _) = imu(OrientationSample::IDENTITY);
        let silent: PositionDriver = Box::new(ScriptedDriver::<PositionSample>::new("dwm"));
        let mut bridge = BridgeController::new(
            fast_config(),
            SensorSet::new().with_orientation(imu).with_position(silent),
        );
        bridge.create_bridge(&connector).await.unwrap();

        // Several publish cycles go by with orientation only.
        for _ in 0..3 {
            next(&mut imu_rx).await;
        }
        assert!(dwm_rx.try_recv().is_err());
        assert!(bridge.snapshot().unwrap().position.is_none());
        bridge.close_bridge().await.unwrap();
    }

    #[tokio::test]
    async fn no_writes_land_after_close() {
        let connector = TrackingConnector::default();
        let (imu, imu_stats) = imu(OrientationSample::IDENTITY);
        let (dwm, dwm_stats) = dwm(PositionSample::cartesian(0.0, 0.0, 0.0));
        let mut bridge = BridgeController::new(
            fast_config(),
            SensorSet::new().with_orientation(imu).with_position(dwm),
        );
        bridge.create_bridge(&connector).await.unwrap();
        let handle = bridge.handle();
        tokio::time::sleep(Duration::from_millis(30)).await;

        bridge.close_bridge().await.unwrap();
        let reads_at_close = imu_stats.reads() + dwm_stats.reads();
        let board_at_close = bridge.blackboard.snapshot();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(imu_stats.reads() + dwm_stats.reads(), reads_at_close);
        assert_eq!(bridge.blackboard.snapshot(), board_at_close);
        assert_eq!(imu_stats.closes(), 1);
        assert_eq!(dwm_stats.closes(), 1);
        assert!(!handle.is_running());
        assert!(matches!(handle.snapshot(), Err(BridgeError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn close_returns_within_bound_despite_blocked_reads() {
        let connector = TrackingConnector::default();
        let stuck: OrientationDriver = Box::new(
            ScriptedDriver::new("imu")
                .repeating(OrientationSample::IDENTITY)
                .with_read_delay(Duration::from_secs(60)),
        );
        let mut cfg = fast_config();
        cfg.position.enabled = false;
        let mut bridge = BridgeController::new(cfg, SensorSet::new().with_orientation(stuck));
        bridge.create_bridge(&connector).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        let bound = bridge.shutdown_bound();
        let started = tokio::time::Instant::now();
        bridge.close_bridge().await.unwrap();
        assert!(started.elapsed() <= bound, "close took {:?}", started.elapsed());
        assert_eq!(bridge.state(), BridgeState::Closed);
    }

    #[tokio::test]
    async fn hung_session_close_does_not_hang_shutdown() {
        let connector = SlowCloseConnector::new(None);
        let (imu, _) = imu(OrientationSample::IDENTITY);
        let mut cfg = fast_config();
        cfg.position.enabled = false;
        let mut bridge = BridgeController::new(cfg, SensorSet::new().with_orientation(imu));
        bridge.create_bridge(&connector).await.unwrap();

        let bound = bridge.shutdown_bound() + bridge.config().publish_timeout();
        let started = tokio::time::Instant::now();
        tokio::time::timeout(bound + Duration::from_millis(100), bridge.close_bridge())
            .await
            .expect("close_bridge must not wait on a hung session close")
            .unwrap();
        assert!(started.elapsed() <= bound + Duration::from_millis(20));
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert_eq!(connector.closes(), 0);
    }

    #[tokio::test]
    async fn interrupted_close_is_finished_by_the_next_call() {
        let connector = SlowCloseConnector::new(Some(Duration::from_millis(30)));
        let (imu, imu_stats) = imu(OrientationSample::IDENTITY);
        let mut cfg = fast_config();
        cfg.position.enabled = false;
        let mut bridge = BridgeController::new(cfg, SensorSet::new().with_orientation(imu));
        bridge.create_bridge(&connector).await.unwrap();

        // The session close alone outlasts this, so the first call is dropped mid-way.
        let first = tokio::time::timeout(Duration::from_millis(10), bridge.close_bridge()).await;
        assert!(first.is_err());
        assert_eq!(bridge.state(), BridgeState::Stopping);
        assert_eq!(connector.closes(), 0);

        bridge.close_bridge().await.unwrap();
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert_eq!(connector.closes(), 1);
        assert_eq!(imu_stats.closes(), 1);

        // Closed is terminal; nothing is closed twice.
        bridge.close_bridge().await.unwrap();
        assert_eq!(connector.closes(), 1);
    }

    #[tokio::test]
    async fn failed_open_aborts_startup() {
        let connector = TrackingConnector::default();
        let (imu, imu_stats) = imu(OrientationSample::IDENTITY);
        let broken = ScriptedDriver::<PositionSample>::new("dwm").failing_open("/dev/ttyACM0: no such device");
        let broken_stats = broken.stats();

        let mut bridge = BridgeController::new(
            fast_config(),
            SensorSet::new()
                .with_orientation(imu)
                .with_position(Box::new(broken)),
        );
        let err = bridge.create_bridge(&connector).await.unwrap_err();

        match &err {
            BridgeError::Startup(failures) => {
                assert_eq!(failures.len(), 1);
                assert_eq!(failures[0].field, FieldId::Position);
                assert!(failures[0].details.contains("no such device"));
            }
            other => panic!("unexpected error {other}"),
        }
        assert!(err.to_string().contains("position"));
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert_eq!(broken_stats.reads(), 0);

        // The healthy worker was stopped again and the session released.
        let reads = imu_stats.reads();
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(imu_stats.reads(), reads);
        assert_eq!(imu_stats.closes(), 1);
        assert!(connector.last_session_rejects_publish().await);
        assert!(matches!(bridge.snapshot(), Err(BridgeError::InvalidState { .. })));
    }

    #[tokio::test]
    async fn enabled_field_without_driver_fails_startup() {
        let connector = TrackingConnector::default();
        let (imu, _) = imu(OrientationSample::IDENTITY);
        let mut bridge = BridgeController::new(fast_config(), SensorSet::new().with_orientation(imu));

        let err = bridge.create_bridge(&connector).await.unwrap_err();
        assert!(matches!(&err, BridgeError::Startup(f) if f[0].field == FieldId::Position));
        assert_eq!(bridge.state(), BridgeState::Closed);
    }

    #[tokio::test]
    async fn connect_failure_opens_no_sensor() {
        let connector = RefusingConnector {
            attempted: AtomicBool::new(false),
        };
        let (imu, imu_stats) = imu(OrientationSample::IDENTITY);
        let (dwm, dwm_stats) = dwm(PositionSample::cartesian(0.0, 0.0, 0.0));
        let mut bridge = BridgeController::new(
            fast_config(),
            SensorSet::new().with_orientation(imu).with_position(dwm),
        );

        let err = bridge.create_bridge(&connector).await.unwrap_err();
        assert!(matches!(err, BridgeError::TransportConnect { .. }));
        assert!(connector.attempted.load(Ordering::SeqCst));
        assert_eq!(imu_stats.opens() + dwm_stats.opens(), 0);
        assert_eq!(bridge.state(), BridgeState::Closed);
        // Closing a bridge that never started is a no-op.
        bridge.close_bridge().await.unwrap();
    }

    #[tokio::test]
    async fn disabled_sensor_is_neither_opened_nor_published() {
        let connector = TrackingConnector::default();
        let mut dwm_rx = connector.bus.subscribe("dwm/position");
        let mut imu_rx = connector.bus.subscribe("imu/orientation");

        let (imu, _) = imu(OrientationSample::IDENTITY);
        let (dwm, dwm_stats) = dwm(PositionSample::cartesian(1.0, 1.0, 1.0));
        let mut cfg = fast_config();
        cfg.position.enabled = false;
        let mut bridge = BridgeController::new(
            cfg,
            SensorSet::new().with_orientation(imu).with_position(dwm),
        );
        bridge.create_bridge(&connector).await.unwrap();

        next(&mut imu_rx).await;
        next(&mut imu_rx).await;
        assert!(dwm_rx.try_recv().is_err());
        assert_eq!(dwm_stats.opens(), 0);
        bridge.close_bridge().await.unwrap();
    }

    #[tokio::test]
    async fn lifecycle_misuse_is_rejected() {
        let connector = TrackingConnector::default();
        let (imu, _) = imu(OrientationSample::IDENTITY);
        let mut cfg = fast_config();
        cfg.position.enabled = false;
        let mut bridge = BridgeController::new(cfg, SensorSet::new().with_orientation(imu));

        assert!(matches!(
            bridge.snapshot(),
            Err(BridgeError::InvalidState { actual: "created", .. })
        ));
        bridge.create_bridge(&connector).await.unwrap();
        assert!(matches!(
            bridge.create_bridge(&connector).await,
            Err(BridgeError::InvalidState { actual: "running", .. })
        ));

        bridge.close_bridge().await.unwrap();
        bridge.close_bridge().await.unwrap();
        assert!(matches!(
            bridge.create_bridge(&connector).await,
            Err(BridgeError::InvalidState { actual: "closed", .. })
        ));
    }

    #[tokio::test]
    async fn close_before_start_never_touches_drivers() {
        let (imu, imu_stats) = imu(OrientationSample::IDENTITY);
        let mut bridge = BridgeController::new(fast_config(), SensorSet::new().with_orientation(imu));
        let report = bridge.close_bridge().await.unwrap();
        assert_eq!(report, ShutdownReport::default());
        assert_eq!(bridge.state(), BridgeState::Closed);
        assert_eq!(imu_stats.opens(), 0);
    }

    #[tokio::test]
    async fn transient_errors_keep_last_value_published() {
        let connector = TrackingConnector::default();
        let mut dwm_rx = connector.bus.subscribe("dwm/position");
        let flaky: PositionDriver = Box::new(
            ScriptedDriver::new("dwm")
                .then_sample(PositionSample::cartesian(4.0, 5.0, 6.0))
                .then_error(ReadError::Transient("checksum".into())),
        );
        let mut cfg = fast_config();
        cfg.orientation.enabled = false;
        let mut bridge = BridgeController::new(cfg, SensorSet::new().with_position(flaky));
        bridge.create_bridge(&connector).await.unwrap();

        for _ in 0..2 {
            let payload = decode_position(&next(&mut dwm_rx).await).unwrap();
            assert_eq!(payload.into_sample(), PositionSample::cartesian(4.0, 5.0, 6.0));
        }
        bridge.close_bridge().await.unwrap();
    }
}
