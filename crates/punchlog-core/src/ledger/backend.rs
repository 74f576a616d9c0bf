//! Storage abstraction for the attendance ledger.
//!
//! The append engine and the verifier talk to storage only through
//! [`LedgerStore`]. The trait is synchronous; async callers run it on a
//! blocking thread.

use std::ops::ControlFlow;
use std::time::Instant;

use super::storage::{LedgerError, LedgerStats};
use crate::event::{ChainTip, NewEvent, StoredEvent, SubjectId};
use crate::time::LedgerTime;

/// Everything an append attempt needs to read, taken at one point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendSnapshot {
    /// The current ledger tail, or `None` for an empty ledger.
    pub tail: Option<ChainTip>,
    /// The subject's most recent event, if any.
    pub last_for_subject: Option<StoredEvent>,
}

/// A stored row that no longer decodes into an event.
///
/// Only a tampered file produces these; the append path never writes one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorruptRow {
    /// Storage sequence number.
    pub seq_id: u64,
    /// Subject, if the stored value is still a valid id.
    pub subject: Option<SubjectId>,
    /// Timestamp, if the stored value is still in range.
    pub timestamp: Option<LedgerTime>,
    /// What could not be decoded.
    pub details: String,
}

impl From<CorruptRow> for LedgerError {
    fn from(row: CorruptRow) -> Self {
        Self::CorruptRecord {
            seq_id: row.seq_id,
            details: row.details,
        }
    }
}

/// One row delivered by [`LedgerStore::scan`].
pub type ScannedRow = Result<StoredEvent, CorruptRow>;

/// Ordered, append-only persistence of attendance events.
///
/// Ledger order is `timestamp` ascending with ties broken by `seq_id`.
pub trait LedgerStore: Send + Sync {
    /// Reads the tail and the subject's last event in one consistent read.
    ///
    /// Gives up with [`LedgerError::DeadlineExceeded`] or
    /// [`LedgerError::Busy`] rather than wait past `deadline`.
    fn snapshot(
        &self,
        subject: SubjectId,
        deadline: Instant,
    ) -> Result<AppendSnapshot, LedgerError>;

    /// The chronologically last event, or `None` for an empty ledger.
    fn tail(&self) -> Result<Option<ChainTip>, LedgerError>;

    /// The most recent event recorded for `subject`.
    fn last_for_subject(&self, subject: SubjectId) -> Result<Option<StoredEvent>, LedgerError>;

    /// Inserts `event` only if the ledger tail still equals `expected_tail`.
    ///
    /// Returns [`LedgerError::TailMoved`] when another writer got there
    /// first. Nothing is written in that case, nor when the insert cannot
    /// commit before `deadline`.
    fn append_if_tail(
        &self,
        event: &NewEvent,
        expected_tail: Option<&ChainTip>,
        deadline: Instant,
    ) -> Result<StoredEvent, LedgerError>;

    /// Streams every row in ledger order to `visit`.
    ///
    /// The scan is a single point-in-time read. Rows that fail to decode
    /// are delivered as [`CorruptRow`] rather than ending the scan. Once
    /// `visit` breaks, the remaining rows are counted but not decoded.
    ///
    /// Returns the number of rows in the snapshot.
    fn scan(
        &self,
        visit: &mut dyn FnMut(ScannedRow) -> ControlFlow<()>,
    ) -> Result<u64, LedgerError>;

    /// Up to `limit` events, newest first.
    fn read_recent(&self, limit: usize) -> Result<Vec<StoredEvent>, LedgerError>;

    /// A single event by sequence number.
    fn read_one(&self, seq_id: u64) -> Result<StoredEvent, LedgerError>;

    /// The event immediately before `event` in ledger order.
    fn predecessor(&self, event: &StoredEvent) -> Result<Option<StoredEvent>, LedgerError>;

    /// Counters describing the ledger.
    fn stats(&self) -> Result<LedgerStats, LedgerError>;
}
