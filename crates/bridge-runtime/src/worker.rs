//! [`SensorWorker`] – polls one driver and feeds one blackboard field.
//!
//! # Lifecycle
//!
//! 1. **Bring-up** – `open` the driver (bounded by the open timeout) and
//!    report the outcome on a oneshot channel.  A failure is never swallowed:
//!    the controller receives it as an [`InitFailure`] and decides what to do.
//! 2. **Steady state** – every poll interval, call `try_read` (bounded by the
//!    read timeout).  A sample is written to the field; `None`, a transient
//!    error or a timeout leave the field as it was.
//! 3. **Exit** – on cancellation, return at the next `.await` point (an
//!    in-flight read is dropped) and `close` the driver.
//!
//! A fatal error mid-run stops this worker only; the other loops keep going
//! and the field simply goes stale.
//!
//! The field a worker feeds is fixed by its driver's sample type, so an
//! orientation driver can never write the position slot.

use std::sync::Arc;
use std::time::Duration;

use bridge_hal::SensorDriver;
use bridge_types::{BridgeError, FieldId, FieldSample, InitFailure, ReadError};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::blackboard::Blackboard;
use crate::config::SensorConfig;

/// Outcome of driver bring-up, sent once per worker.
pub type ReadySignal = Result<(), InitFailure>;

/// How a worker's polling loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// The driver never came up.
    InitFailed,
    /// Cancellation was observed.
    Cancelled,
    /// The driver reported a fatal error while running.
    DeviceLost,
}

/// Counters returned when a worker exits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerReport {
    pub field: FieldId,
    pub exit: WorkerExit,
    pub samples: u64,
    pub empty_reads: u64,
    pub transient_errors: u64,
    pub timeouts: u64,
}

/// A spawned worker: its bring-up signal and its task.
pub struct WorkerHandle {
    pub field: FieldId,
    pub ready: oneshot::Receiver<ReadySignal>,
    pub join: JoinHandle<WorkerReport>,
}

/// Poll loop for one sensor.
pub struct SensorWorker<D> {
    field: FieldId,
    driver: D,
    blackboard: Arc<Blackboard>,
    poll_interval: Duration,
    read_timeout: Duration,
    open_timeout: Duration,
}

impl<D> SensorWorker<D>
where
    D: SensorDriver + 'static,
{
    pub fn new(driver: D, settings: &SensorConfig, blackboard: Arc<Blackboard>) -> Self {
        Self {
            field: <D::Sample as FieldSample>::FIELD,
            driver,
            blackboard,
            poll_interval: settings.poll_interval(),
            read_timeout: settings.read_timeout(),
            open_timeout: settings.open_timeout(),
        }
    }

    pub fn field(&self) -> FieldId {
        self.field
    }

    /// Spawn the worker on the current Tokio runtime.
    pub fn spawn(self, cancel: CancellationToken) -> WorkerHandle {
        let field = self.field;
        let span = info_span!("sensor_worker", %field, device = %self.driver.id());
        let (ready_tx, ready) = oneshot::channel();
        let join = tokio::spawn(self.run(cancel, ready_tx).instrument(span));
        WorkerHandle { field, ready, join }
    }

    /// Bring the driver up, then poll until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken, ready: oneshot::Sender<ReadySignal>) -> WorkerReport {
        let mut report = WorkerReport {
            field: self.field,
            exit: WorkerExit::Cancelled,
            samples: 0,
            empty_reads: 0,
            transient_errors: 0,
            timeouts: 0,
        };

        let opened = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                let _ = ready.send(Err(self.init_failure("cancelled during bring-up")));
                report.exit = WorkerExit::InitFailed;
                return report;
            }
            opened = tokio::time::timeout(self.open_timeout, self.driver.open()) => opened,
        };
        let failure = match opened {
            Ok(Ok(())) => None,
            Ok(Err(ReadError::Fatal(details) | ReadError::Transient(details))) => Some(details),
            Err(_) => Some(format!("open timed out after {:?}", self.open_timeout)),
        };
        if let Some(details) = failure {
            error!(error = %details, "sensor bring-up failed");
            let _ = ready.send(Err(self.init_failure(details)));
            report.exit = WorkerExit::InitFailed;
            return report;
        }
        if ready.send(Ok(())).is_err() {
            // Nobody is waiting for this worker any more.
            self.driver.close().await;
            return report;
        }
        info!(interval = ?self.poll_interval, "worker started");

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut degraded = false;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let outcome = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                outcome = tokio::time::timeout(self.read_timeout, self.driver.try_read()) => outcome,
            };

            match outcome {
                Ok(Ok(Some(sample))) => {
                    self.blackboard.write(sample);
                    report.samples += 1;
                    if degraded {
                        info!("sensor recovered");
                        degraded = false;
                    }
                }
                Ok(Ok(None)) => report.empty_reads += 1,
                Ok(Err(err @ ReadError::Transient(_))) => {
                    report.transient_errors += 1;
                    let err = BridgeError::from_read(self.field, err);
                    if degraded {
                        debug!(error = %err, "read failed");
                    } else {
                        warn!(error = %err, "read failed; keeping last value");
                        degraded = true;
                    }
                }
                Ok(Err(err @ ReadError::Fatal(_))) => {
                    let err = BridgeError::from_read(self.field, err);
                    error!(error = %err, "device lost; worker stopping");
                    report.exit = WorkerExit::DeviceLost;
                    break;
                }
                Err(_) => {
                    report.timeouts += 1;
                    if !degraded {
                        warn!(timeout = ?self.read_timeout, "read timed out; keeping last value");
                        degraded = true;
                    }
                }
            }
        }

        self.driver.close().await;
        info!(
            samples = report.samples,
            transient_errors = report.transient_errors,
            timeouts = report.timeouts,
            "worker stopping"
        );
        report
    }

    fn init_failure(&self, details: impl Into<String>) -> InitFailure {
        InitFailure {
            field: self.field,
            details: details.into(),
        }
    }
}
