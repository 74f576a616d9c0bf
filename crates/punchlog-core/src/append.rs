//! The append engine.
//!
//! Every attendance event enters the ledger through [`AppendEngine::append`].
//! An attempt reads a snapshot (tail plus the subject's last event),
//! resolves the timestamp and status, seals the event against the tail, and
//! asks the store to insert it only if that tail is still current. A moved
//! tail means another writer won the race; the attempt is thrown away and
//! the whole read-compute-write sequence runs again against the new tail.
//!
//! Retries are bounded by [`AppendConfig::max_retries`] and the whole intent
//! by [`AppendConfig::timeout`]. The deadline is handed to the store, which
//! caps its lock waits by it and refuses to commit once it has passed.

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::crypto::GENESIS_PREV_HASH;
use crate::event::{NewEvent, StoredEvent, SubjectId};
use crate::ledger::{LedgerError, LedgerStore};
use crate::resolver::StatusResolver;
use crate::time::{Clock, LedgerTime, TimeError};

/// Default number of retries after a lost race.
pub const DEFAULT_MAX_RETRIES: u32 = 16;

/// Default bound on a whole append intent.
pub const DEFAULT_APPEND_TIMEOUT: Duration = Duration::from_millis(5000);

/// Errors returned by [`AppendEngine::append`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AppendError {
    /// The requested timestamp sorts before the current ledger tail.
    #[error("timestamp {timestamp} is earlier than the ledger tail at {tail_timestamp}")]
    TimestampBeforeTail {
        /// Requested timestamp.
        timestamp: LedgerTime,
        /// Timestamp of the tail at the time of the attempt.
        tail_timestamp: LedgerTime,
    },

    /// Every attempt lost the race for the tail.
    #[error("gave up after {attempts} attempts: ledger tail kept moving")]
    Contention {
        /// Attempts made, including the first.
        attempts: u32,
    },

    /// The append did not complete in time. Nothing was written by the
    /// failed attempt; the caller may retry the whole intent.
    #[error("append timed out after {elapsed:?}")]
    Timeout {
        /// Time spent before giving up.
        elapsed: Duration,
    },

    /// The clock returned an instant the ledger cannot represent.
    #[error("clock error: {0}")]
    Clock(#[from] TimeError),

    /// Storage failure.
    #[error("ledger store error: {0}")]
    Store(#[from] LedgerError),
}

impl AppendError {
    /// Returns `true` if retrying the same request may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        match self {
            Self::Contention { .. } | Self::Timeout { .. } => true,
            Self::Store(e) => e.is_transient(),
            Self::TimestampBeforeTail { .. } | Self::Clock(_) => false,
        }
    }
}

/// Engine settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppendConfig {
    /// Retries after a lost race before reporting contention.
    pub max_retries: u32,
    /// Bound on one call to [`AppendEngine::append`].
    pub timeout: Duration,
}

impl Default for AppendConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_APPEND_TIMEOUT,
        }
    }
}

/// A request to record one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    /// Subject that scanned.
    pub subject: SubjectId,
    /// Explicit timestamp; `None` uses the engine's clock.
    pub timestamp: Option<LedgerTime>,
    /// Provenance marker; `None` stores an empty tag.
    pub device_tag: Option<String>,
}

impl AppendRequest {
    /// A scan happening now.
    #[must_use]
    pub const fn now(subject: SubjectId) -> Self {
        Self {
            subject,
            timestamp: None,
            device_tag: None,
        }
    }

    /// A scan at an explicit time.
    #[must_use]
    pub const fn at(subject: SubjectId, timestamp: LedgerTime) -> Self {
        Self {
            subject,
            timestamp: Some(timestamp),
            device_tag: None,
        }
    }

    /// Sets the device tag.
    #[must_use]
    pub fn with_device_tag(mut self, device_tag: impl Into<String>) -> Self {
        self.device_tag = Some(device_tag.into());
        self
    }
}

/// Appends events with optimistic concurrency control.
pub struct AppendEngine {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: AppendConfig,
}

impl AppendEngine {
    /// Creates an engine over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>, clock: Arc<dyn Clock>, config: AppendConfig) -> Self {
        Self {
            store,
            clock,
            config,
        }
    }

    /// The store this engine writes to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn LedgerStore> {
        &self.store
    }

    /// Records one scan and returns the persisted event.
    pub fn append(&self, request: AppendRequest) -> Result<StoredEvent, AppendError> {
        let started = Instant::now();
        let deadline = started + self.config.timeout;
        let device_tag = request.device_tag.clone().unwrap_or_default();
        let mut attempts: u32 = 0;

        loop {
            if Instant::now() >= deadline {
                let elapsed = started.elapsed();
                warn!(subject = %request.subject, attempts, ?elapsed, "append timed out");
                return Err(AppendError::Timeout { elapsed });
            }
            attempts += 1;

            let snapshot = self
                .store
                .snapshot(request.subject, deadline)
                .map_err(|e| Self::store_failure(e, started))?;
            let tail = snapshot.tail.as_ref();

            let timestamp = match (request.timestamp, tail) {
                (Some(requested), Some(tip)) if requested < tip.timestamp => {
                    return Err(AppendError::TimestampBeforeTail {
                        timestamp: requested,
                        tail_timestamp: tip.timestamp,
                    });
                },
                (Some(requested), _) => requested,
                // The tail may carry a client timestamp ahead of our clock.
                (None, tip) => {
                    let now = LedgerTime::from_datetime(self.clock.now())?;
                    tip.map_or(now, |tip| now.max(tip.timestamp))
                },
            };

            let status = StatusResolver::next_status(snapshot.last_for_subject.as_ref());
            let previous_hash = tail.map_or(GENESIS_PREV_HASH, |tip| tip.hash.as_str());
            let event = NewEvent::sealed(
                request.subject,
                timestamp,
                status,
                previous_hash,
                device_tag.as_str(),
            );

            match self.store.append_if_tail(&event, tail, deadline) {
                Ok(stored) => {
                    info!(
                        subject = %stored.subject,
                        status = %stored.status,
                        seq_id = stored.seq_id,
                        timestamp = %stored.timestamp,
                        attempts,
                        "attendance event appended"
                    );
                    return Ok(stored);
                },
                Err(LedgerError::TailMoved { .. }) if attempts > self.config.max_retries => {
                    warn!(subject = %request.subject, attempts, "append contention, giving up");
                    return Err(AppendError::Contention { attempts });
                },
                Err(LedgerError::TailMoved { expected, actual }) => {
                    debug!(
                        subject = %request.subject,
                        attempts,
                        ?expected,
                        ?actual,
                        "ledger tail moved, retrying append"
                    );
                },
                Err(LedgerError::OutOfOrder {
                    timestamp,
                    tail_timestamp,
                }) => {
                    return Err(AppendError::TimestampBeforeTail {
                        timestamp,
                        tail_timestamp,
                    });
                },
                Err(e) => return Err(Self::store_failure(e, started)),
            }
        }
    }

    fn store_failure(err: LedgerError, started: Instant) -> AppendError {
        if matches!(err, LedgerError::Busy { .. } | LedgerError::DeadlineExceeded) {
            let elapsed = started.elapsed();
            warn!(error = %err, ?elapsed, "ledger stayed locked, append timed out");
            return AppendError::Timeout { elapsed };
        }
        error!(error = %err, "ledger store failure during append");
        AppendError::Store(err)
    }
}

#[cfg(test)]
mod tests {
    use std::ops::ControlFlow;
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::event::{AttendanceStatus, ChainTip};
    use crate::ledger::{AppendSnapshot, LedgerStats, ScannedRow, SqliteLedgerStore};
    use crate::time::ManualClock;

    const MARCH_FIRST: i64 = 1_709_283_600_000;

    fn engine_at(millis: i64) -> (AppendEngine, Arc<SqliteLedgerStore>, Arc<ManualClock>) {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        let clock = Arc::new(ManualClock::at_millis(millis));
        let engine = AppendEngine::new(store.clone(), clock.clone(), AppendConfig::default());
        (engine, store, clock)
    }

    fn at(millis: i64) -> LedgerTime {
        LedgerTime::from_millis(millis).unwrap()
    }

    /// Delegates to a real store but reports a moved tail a fixed number of
    /// times first.
    struct RacingStore {
        inner: SqliteLedgerStore,
        losses: AtomicU32,
        attempts: AtomicU32,
    }

    impl RacingStore {
        fn losing(times: u32) -> Self {
            Self {
                inner: SqliteLedgerStore::in_memory().unwrap(),
                losses: AtomicU32::new(times),
                attempts: AtomicU32::new(0),
            }
        }
    }

    impl LedgerStore for RacingStore {
        fn snapshot(
            &self,
            subject: SubjectId,
            deadline: Instant,
        ) -> Result<AppendSnapshot, LedgerError> {
            self.inner.snapshot(subject, deadline)
        }

        fn tail(&self) -> Result<Option<ChainTip>, LedgerError> {
            self.inner.tail()
        }

        fn last_for_subject(
            &self,
            subject: SubjectId,
        ) -> Result<Option<StoredEvent>, LedgerError> {
            self.inner.last_for_subject(subject)
        }

        fn append_if_tail(
            &self,
            event: &NewEvent,
            expected_tail: Option<&ChainTip>,
            deadline: Instant,
        ) -> Result<StoredEvent, LedgerError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let remaining = self.losses.load(Ordering::SeqCst);
            if remaining > 0 {
                self.losses.store(remaining - 1, Ordering::SeqCst);
                return Err(LedgerError::TailMoved {
                    expected: None,
                    actual: Some("someone-else".to_string()),
                });
            }
            self.inner.append_if_tail(event, expected_tail, deadline)
        }

        fn scan(
            &self,
            visit: &mut dyn FnMut(ScannedRow) -> ControlFlow<()>,
        ) -> Result<u64, LedgerError> {
            self.inner.scan(visit)
        }

        fn read_recent(&self, limit: usize) -> Result<Vec<StoredEvent>, LedgerError> {
            self.inner.read_recent(limit)
        }

        fn read_one(&self, seq_id: u64) -> Result<StoredEvent, LedgerError> {
            self.inner.read_one(seq_id)
        }

        fn predecessor(&self, event: &StoredEvent) -> Result<Option<StoredEvent>, LedgerError> {
            self.inner.predecessor(event)
        }

        fn stats(&self) -> Result<LedgerStats, LedgerError> {
            self.inner.stats()
        }
    }

    /// A store whose write lock never frees up.
    struct LockedStore;

    impl LedgerStore for LockedStore {
        fn snapshot(
            &self,
            _subject: SubjectId,
            _deadline: Instant,
        ) -> Result<AppendSnapshot, LedgerError> {
            Ok(AppendSnapshot::default())
        }

        fn tail(&self) -> Result<Option<ChainTip>, LedgerError> {
            Ok(None)
        }

        fn last_for_subject(
            &self,
            _subject: SubjectId,
        ) -> Result<Option<StoredEvent>, LedgerError> {
            Ok(None)
        }

        fn append_if_tail(
            &self,
            _event: &NewEvent,
            _expected_tail: Option<&ChainTip>,
            _deadline: Instant,
        ) -> Result<StoredEvent, LedgerError> {
            Err(LedgerError::Busy {
                details: "database is locked".to_string(),
            })
        }

        fn scan(
            &self,
            _visit: &mut dyn FnMut(ScannedRow) -> ControlFlow<()>,
        ) -> Result<u64, LedgerError> {
            Ok(0)
        }

        fn read_recent(&self, _limit: usize) -> Result<Vec<StoredEvent>, LedgerError> {
            Ok(Vec::new())
        }

        fn read_one(&self, seq_id: u64) -> Result<StoredEvent, LedgerError> {
            Err(LedgerError::EventNotFound { seq_id })
        }

        fn predecessor(&self, _event: &StoredEvent) -> Result<Option<StoredEvent>, LedgerError> {
            Ok(None)
        }

        fn stats(&self) -> Result<LedgerStats, LedgerError> {
            Ok(LedgerStats::default())
        }
    }

    #[test]
    fn first_event_checks_in_against_genesis() {
        let (engine, _store, _clock) = engine_at(MARCH_FIRST);

        let event = engine.append(AppendRequest::now(SubjectId(7))).unwrap();

        assert_eq!(event.status, AttendanceStatus::CheckIn);
        assert_eq!(event.previous_hash, GENESIS_PREV_HASH);
        assert_eq!(event.timestamp, at(MARCH_FIRST));
        assert_eq!(event.device_tag, "");
    }

    #[test]
    fn second_event_toggles_and_links() {
        let (engine, _store, clock) = engine_at(MARCH_FIRST);

        let first = engine.append(AppendRequest::now(SubjectId(7))).unwrap();
        clock.advance_millis(60_000);
        let second = engine
            .append(AppendRequest::now(SubjectId(7)).with_device_tag("ESP32_DEV_V1"))
            .unwrap();

        assert_eq!(second.status, AttendanceStatus::CheckOut);
        assert_eq!(second.previous_hash, first.hash);
        assert_eq!(second.device_tag, "ESP32_DEV_V1");
    }

    #[test]
    fn implicit_timestamp_never_sorts_before_tail() {
        let (engine, _store, clock) = engine_at(MARCH_FIRST);

        let ahead = engine
            .append(AppendRequest::at(SubjectId(1), at(MARCH_FIRST + 10_000)))
            .unwrap();
        let clamped = engine.append(AppendRequest::now(SubjectId(2))).unwrap();
        assert_eq!(clamped.timestamp, ahead.timestamp);
        assert_eq!(clamped.previous_hash, ahead.hash);

        clock.set_millis(MARCH_FIRST + 20_000);
        let later = engine.append(AppendRequest::now(SubjectId(2))).unwrap();
        assert_eq!(later.timestamp, at(MARCH_FIRST + 20_000));
    }

    #[test]
    fn backdated_timestamp_is_rejected_without_writing() {
        let (engine, store, _clock) = engine_at(MARCH_FIRST);
        engine.append(AppendRequest::now(SubjectId(7))).unwrap();

        let err = engine
            .append(AppendRequest::at(SubjectId(8), at(MARCH_FIRST - 1)))
            .unwrap_err();

        assert!(matches!(err, AppendError::TimestampBeforeTail { .. }));
        assert!(!err.is_transient());
        assert_eq!(store.stats().unwrap().event_count, 1);
    }

    #[test]
    fn equal_timestamp_is_accepted() {
        let (engine, _store, _clock) = engine_at(MARCH_FIRST);
        let first = engine.append(AppendRequest::now(SubjectId(7))).unwrap();
        let second = engine
            .append(AppendRequest::at(SubjectId(8), first.timestamp))
            .unwrap();
        assert_eq!(second.previous_hash, first.hash);
    }

    #[test]
    fn lost_races_are_retried() {
        let store = Arc::new(RacingStore::losing(3));
        let engine = AppendEngine::new(
            store.clone(),
            Arc::new(ManualClock::at_millis(MARCH_FIRST)),
            AppendConfig::default(),
        );

        let event = engine.append(AppendRequest::now(SubjectId(7))).unwrap();

        assert_eq!(event.previous_hash, GENESIS_PREV_HASH);
        assert_eq!(store.attempts.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn retries_are_bounded() {
        let store = Arc::new(RacingStore::losing(u32::MAX));
        let engine = AppendEngine::new(
            store.clone(),
            Arc::new(ManualClock::at_millis(MARCH_FIRST)),
            AppendConfig {
                max_retries: 2,
                ..AppendConfig::default()
            },
        );

        let err = engine.append(AppendRequest::now(SubjectId(7))).unwrap_err();

        assert!(matches!(err, AppendError::Contention { attempts: 3 }));
        assert!(err.is_transient());
        assert_eq!(store.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(store.stats().unwrap().event_count, 0);
    }

    #[test]
    fn busy_store_times_out() {
        let engine = AppendEngine::new(
            Arc::new(LockedStore),
            Arc::new(ManualClock::at_millis(MARCH_FIRST)),
            AppendConfig::default(),
        );

        let err = engine.append(AppendRequest::now(SubjectId(7))).unwrap_err();
        assert!(matches!(err, AppendError::Timeout { .. }));
        assert!(err.is_transient());
    }

    #[test]
    fn missed_store_deadline_is_a_timeout() {
        let err = AppendEngine::store_failure(LedgerError::DeadlineExceeded, Instant::now());
        assert!(matches!(err, AppendError::Timeout { .. }));

        let err = AppendEngine::store_failure(LedgerError::LockPoisoned, Instant::now());
        assert!(matches!(err, AppendError::Store(LedgerError::LockPoisoned)));
    }

    #[test]
    fn exhausted_deadline_times_out_before_writing() {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        let engine = AppendEngine::new(
            store.clone(),
            Arc::new(ManualClock::at_millis(MARCH_FIRST)),
            AppendConfig {
                timeout: Duration::ZERO,
                ..AppendConfig::default()
            },
        );

        let err = engine.append(AppendRequest::now(SubjectId(7))).unwrap_err();
        assert!(matches!(err, AppendError::Timeout { .. }));
        assert_eq!(store.stats().unwrap().event_count, 0);
    }

    #[test]
    fn clock_outside_ledger_range_is_an_error() {
        let (engine, _store, clock) = engine_at(0);
        clock.set_millis(crate::time::MAX_MILLIS + 1);

        let err = engine.append(AppendRequest::now(SubjectId(7))).unwrap_err();
        assert!(matches!(err, AppendError::Clock(_)));
    }
}
