//! [`PublisherLoop`] – periodic snapshot-and-publish.
//!
//! Once per publish interval the loop snapshots the blackboard and, for each
//! configured field that is present, encodes it and hands it to the bus
//! session.  Absent fields are skipped, never published as null.  A failed
//! encode or publish is logged and the loop continues with the next field.
//!
//! Fields are published in the order they were configured.  Delivery is
//! at-most-once: a publish that fails is not retried on the next cycle, the
//! next cycle simply sends the then-current value.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use bridge_middleware::BusSession;
use bridge_types::{BridgeError, FieldId, wire};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::blackboard::Blackboard;

/// What one publish cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub published: Vec<FieldId>,
    pub skipped_absent: Vec<FieldId>,
    pub failed: Vec<FieldId>,
}

/// Totals over the lifetime of a [`PublisherLoop`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherReport {
    pub cycles: u64,
    pub published: u64,
    pub failed: u64,
}

pub struct PublisherLoop {
    blackboard: Arc<Blackboard>,
    session: Arc<dyn BusSession>,
    topics: Vec<(FieldId, String)>,
    interval: Duration,
    publish_timeout: Duration,
    failing: HashSet<FieldId>,
}

impl PublisherLoop {
    pub fn new(
        blackboard: Arc<Blackboard>,
        session: Arc<dyn BusSession>,
        topics: Vec<(FieldId, String)>,
        interval: Duration,
        publish_timeout: Duration,
    ) -> Self {
        Self {
            blackboard,
            session,
            topics,
            interval,
            publish_timeout,
            failing: HashSet::new(),
        }
    }

    /// Run a single cycle against the current blackboard contents.
    pub async fn publish_once(&mut self) -> CycleReport {
        let snapshot = self.blackboard.snapshot();
        let mut report = CycleReport::default();

        for (field, topic) in &self.topics {
            let Some((reading, captured_at)) = snapshot.reading(*field) else {
                report.skipped_absent.push(*field);
                continue;
            };

            let result = match wire::encode_reading(&reading, captured_at) {
                Ok(payload) => {
                    match tokio::time::timeout(self.publish_timeout, self.session.publish(topic, payload)).await {
                        Ok(result) => result,
                        Err(_) => Err(BridgeError::Publish {
                            key: topic.clone(),
                            details: format!("timed out after {:?}", self.publish_timeout),
                        }),
                    }
                }
                Err(e) => Err(e),
            };

            match result {
                Ok(()) => {
                    if self.failing.remove(field) {
                        info!(%field, topic = %topic, "publishing recovered");
                    }
                    debug!(%field, topic = %topic, "published");
                    report.published.push(*field);
                }
                Err(e) => {
                    if self.failing.insert(*field) {
                        warn!(%field, topic = %topic, error = %e, "publish failed");
                    } else {
                        debug!(%field, topic = %topic, error = %e, "publish still failing");
                    }
                    report.failed.push(*field);
                }
            }
        }
        report
    }

    /// Publish every interval until `cancel` fires.
    ///
    /// The first cycle runs one full interval after start, giving the
    /// workers a chance to fill the blackboard.
    pub async fn run(mut self, cancel: CancellationToken) -> PublisherReport {
        let mut totals = PublisherReport::default();
        let start = tokio::time::Instant::now() + self.interval;
        let mut ticker = tokio::time::interval_at(start, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interval = ?self.interval, fields = self.topics.len(), "publisher started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let cycle = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                cycle = self.publish_once() => cycle,
            };
            totals.cycles += 1;
            totals.published += cycle.published.len() as u64;
            totals.failed += cycle.failed.len() as u64;
        }
        info!(cycles = totals.cycles, published = totals.published, "publisher stopping");
        totals
    }

    pub fn spawn(self, cancel: CancellationToken) -> JoinHandle<PublisherReport> {
        tokio::spawn(self.run(cancel).instrument(info_span!("publisher")))
    }
}
