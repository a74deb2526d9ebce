//! [`Blackboard`] – latest-value store shared by the bridge loops.
//!
//! Each sensor worker owns exactly one field and overwrites it on every
//! successful read; the publisher and any other consumer take whole-store
//! snapshots.  One mutex guards the entire store, so a snapshot reflects a
//! joint state that really existed at some instant and never mixes a
//! half-applied write with an older value.  The critical sections are plain
//! assignment and clone; no I/O ever happens under the lock.
//!
//! Fields are not cross-field linearizable with capture time: the
//! orientation and position entries carry their own timestamps because they
//! were captured at different instants.
//!
//! # Example
//!
//! ```rust
//! use bridge_runtime::blackboard::{Blackboard, NEVER_SET};
//! use bridge_types::{FieldId, OrientationSample};
//!
//! let board = Blackboard::new();
//! assert_eq!(board.snapshot().timestamp(FieldId::Orientation), NEVER_SET);
//!
//! board.write(OrientationSample::IDENTITY);
//! let snap = board.snapshot();
//! assert_eq!(snap.orientation.unwrap().sample, OrientationSample::IDENTITY);
//! assert!(snap.position.is_none());
//! ```

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use bridge_types::{FieldId, OrientationSample, PositionSample, Reading};
use chrono::{DateTime, Utc};

/// Timestamp reported for a field that has never been written.
pub const NEVER_SET: DateTime<Utc> = DateTime::UNIX_EPOCH;

/// A sample paired with its wall-clock capture time.
#[derive(Debug, Clone, PartialEq)]
pub struct Stamped<T> {
    pub sample: T,
    pub captured_at: DateTime<Utc>,
}

impl<T> Stamped<T> {
    /// Time elapsed between capture and `now`; zero if `now` is earlier.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        (now - self.captured_at).to_std().unwrap_or_default()
    }
}

/// Immutable copy of every field at one instant.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BlackboardSnapshot {
    pub orientation: Option<Stamped<OrientationSample>>,
    pub position: Option<Stamped<PositionSample>>,
}

impl BlackboardSnapshot {
    pub fn is_present(&self, field: FieldId) -> bool {
        match field {
            FieldId::Orientation => self.orientation.is_some(),
            FieldId::Position => self.position.is_some(),
        }
    }

    /// Capture time of `field`, or [`NEVER_SET`] while it is absent.
    pub fn timestamp(&self, field: FieldId) -> DateTime<Utc> {
        let ts = match field {
            FieldId::Orientation => self.orientation.as_ref().map(|s| s.captured_at),
            FieldId::Position => self.position.as_ref().map(|s| s.captured_at),
        };
        ts.unwrap_or(NEVER_SET)
    }

    /// The field's sample as a [`Reading`] with its capture time.
    pub fn reading(&self, field: FieldId) -> Option<(Reading, DateTime<Utc>)> {
        match field {
            FieldId::Orientation => self
                .orientation
                .as_ref()
                .map(|s| (Reading::Orientation(s.sample), s.captured_at)),
            FieldId::Position => self
                .position
                .as_ref()
                .map(|s| (Reading::Position(s.sample.clone()), s.captured_at)),
        }
    }

    /// `true` when `field` is present and no older than `max_age` at `now`.
    ///
    /// The bridge itself never expires values; this is for consumers that
    /// need a freshness guarantee.
    pub fn is_fresh(&self, field: FieldId, max_age: Duration, now: DateTime<Utc>) -> bool {
        let age = match field {
            FieldId::Orientation => self.orientation.as_ref().map(|s| s.age(now)),
            FieldId::Position => self.position.as_ref().map(|s| s.age(now)),
        };
        age.is_some_and(|age| age <= max_age)
    }
}

/// Thread-safe store of the latest sample per field.
#[derive(Debug, Default)]
pub struct Blackboard {
    store: Mutex<BlackboardSnapshot>,
}

impl Blackboard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `reading` stamped with the current wall-clock time.
    ///
    /// Returns the timestamp actually recorded.
    pub fn write(&self, reading: impl Into<Reading>) -> DateTime<Utc> {
        self.write_at(reading, Utc::now())
    }

    /// Store `reading` captured at `at`.
    ///
    /// A field's timestamp never moves backwards: if the wall clock stepped
    /// back since the previous write, the previous timestamp is reused.
    pub fn write_at(&self, reading: impl Into<Reading>, at: DateTime<Utc>) -> DateTime<Utc> {
        let mut store = self.lock();
        match reading.into() {
            Reading::Orientation(sample) => {
                let captured_at = monotonic(store.orientation.as_ref(), at);
                store.orientation = Some(Stamped {
                    sample,
                    captured_at,
                });
                captured_at
            }
            Reading::Position(sample) => {
                let captured_at = monotonic(store.position.as_ref(), at);
                store.position = Some(Stamped {
                    sample,
                    captured_at,
                });
                captured_at
            }
        }
    }

    /// Atomic copy of the whole store.
    pub fn snapshot(&self) -> BlackboardSnapshot {
        self.lock().clone()
    }

    // A writer that panicked mid-assignment cannot leave a torn value behind
    // (assignment of a whole `Option<Stamped<_>>` is the only mutation), so
    // a poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, BlackboardSnapshot> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn monotonic<T>(previous: Option<&Stamped<T>>, at: DateTime<Utc>) -> DateTime<Utc> {
    match previous {
        Some(prev) if prev.captured_at > at => prev.captured_at,
        _ => at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;
    use std::time::Instant;

    #[test]
    fn absent_fields_report_never_set() {
        let board = Blackboard::new();
        let snap = board.snapshot();
        for field in FieldId::ALL {
            assert!(!snap.is_present(field));
            assert_eq!(snap.timestamp(field), NEVER_SET);
            assert!(snap.reading(field).is_none());
        }
    }

    #[test]
    fn latest_write_wins() {
        let board = Blackboard::new();
        board.write(PositionSample::cartesian(1.0, 1.0, 1.0));
        board.write(PositionSample::Raw("DIST".to_string()));
        let snap = board.snapshot();
        assert_eq!(
            snap.position.unwrap().sample,
            PositionSample::Raw("DIST".to_string())
        );
        assert!(snap.orientation.is_none());
    }

    #[test]
    fn timestamps_never_regress() {
        let board = Blackboard::new();
        let later = Utc::now();
        let earlier = later - chrono::Duration::seconds(5);

        assert_eq!(board.write_at(OrientationSample::IDENTITY, later), later);
        assert_eq!(board.write_at(OrientationSample::IDENTITY, earlier), later);
        assert_eq!(board.snapshot().timestamp(FieldId::Orientation), later);

        // Each field keeps its own clock.
        assert_eq!(
            board.write_at(PositionSample::cartesian(0.0, 0.0, 0.0), earlier),
            earlier
        );
    }

    #[test]
    fn snapshot_is_independent_of_later_writes() {
        let board = Blackboard::new();
        board.write(OrientationSample::new(0.0, 0.0, 0.0, 1.0));
        let before = board.snapshot();
        board.write(OrientationSample::new(0.0, 0.0, 1.0, 0.0));
        assert_eq!(
            before.orientation.unwrap().sample,
            OrientationSample::new(0.0, 0.0, 0.0, 1.0)
        );
    }

    #[test]
    fn freshness_is_judged_per_field() {
        let board = Blackboard::new();
        let now = Utc::now();
        board.write_at(OrientationSample::IDENTITY, now - chrono::Duration::milliseconds(200));
        board.write_at(PositionSample::cartesian(1.0, 2.0, 3.0), now);

        let snap = board.snapshot();
        let max_age = Duration::from_millis(100);
        assert!(!snap.is_fresh(FieldId::Orientation, max_age, now));
        assert!(snap.is_fresh(FieldId::Position, max_age, now));
        assert!(
            !Blackboard::new()
                .snapshot()
                .is_fresh(FieldId::Position, Duration::MAX, now)
        );
    }

    #[test]
    fn age_saturates_at_zero() {
        let now = Utc::now();
        let stamped = Stamped {
            sample: (),
            captured_at: now + chrono::Duration::seconds(1),
        };
        assert_eq!(stamped.age(now), Duration::ZERO);
    }

    /// Writers store quaternions whose four components are all equal; a torn
    /// read would show mixed components.
    #[test]
    fn concurrent_writes_never_tear() {
        let board = Arc::new(Blackboard::new());
        let stop = Arc::new(AtomicBool::new(false));

        let writers: Vec<_> = (0..2)
            .map(|offset| {
                let board = Arc::clone(&board);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut n = offset as f64;
                    while !stop.load(Ordering::Relaxed) {
                        board.write(OrientationSample::new(n, n, n, n));
                        board.write(PositionSample::cartesian(n, n, n));
                        n += 2.0;
                    }
                })
            })
            .collect();

        for _ in 0..20_000 {
            let snap = board.snapshot();
            if let Some(q) = snap.orientation {
                let q = q.sample;
                assert!(q.i == q.j && q.j == q.k && q.k == q.w, "torn quaternion {q:?}");
            }
            if let Some(p) = snap.position {
                assert!(matches!(p.sample, PositionSample::Cartesian(_)));
            }
        }

        stop.store(true, Ordering::Relaxed);
        for w in writers {
            w.join().unwrap();
        }
    }

    /// Writers at 20 Hz and 10 Hz for five seconds while a reader snapshots
    /// continuously: every snapshot completes quickly and nothing deadlocks.
    #[test]
    fn snapshots_stay_bounded_under_rate_limited_writers() {
        let board = Arc::new(Blackboard::new());
        let stop = Arc::new(AtomicBool::new(false));

        let spawn_writer = |period: Duration, position: bool| {
            let board = Arc::clone(&board);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut n = 0.0;
                while !stop.load(Ordering::Relaxed) {
                    if position {
                        board.write(PositionSample::cartesian(n, n, n));
                    } else {
                        board.write(OrientationSample::new(0.0, 0.0, 0.0, n));
                    }
                    n += 1.0;
                    thread::sleep(period);
                }
            })
        };
        let imu = spawn_writer(Duration::from_millis(50), false);
        let dwm = spawn_writer(Duration::from_millis(100), true);

        let started = Instant::now();
        let mut worst = Duration::ZERO;
        while started.elapsed() < Duration::from_secs(5) {
            let t = Instant::now();
            let _ = board.snapshot();
            worst = worst.max(t.elapsed());
            thread::sleep(Duration::from_millis(1));
        }
        stop.store(true, Ordering::Relaxed);
        imu.join().unwrap();
        dwm.join().unwrap();

        assert!(
            worst < Duration::from_millis(50),
            "snapshot took {worst:?}"
        );
        let snap = board.snapshot();
        assert!(snap.orientation.is_some() && snap.position.is_some());
    }
}
