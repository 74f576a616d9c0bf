//! Full-chain verification.
//!
//! The verifier walks the ledger in the order the append engine chains it
//! and checks two things for every record: that its `previous_hash` names
//! the record before it (or the genesis sentinel for the first record), and
//! that its own fields still hash to its stored `hash`. The first failure is
//! reported; later records are counted but not checked.
//!
//! Integrity problems are never errors. A row that no longer decodes at all
//! is reported as tampered content at its position. [`ChainVerifier::verify`]
//! only fails when the ledger cannot be read.

use std::fmt;
use std::ops::ControlFlow;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::crypto::{EventHasher, GENESIS_PREV_HASH, HashChainError};
use crate::event::{StoredEvent, SubjectId};
use crate::ledger::{CorruptRow, LedgerError, LedgerStore};
use crate::time::LedgerTime;

/// Why verification stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BreakReason {
    /// `previous_hash` does not match the preceding record's `hash`.
    BrokenLink,
    /// The record's fields no longer hash to its stored `hash`.
    TamperedContent,
}

impl BreakReason {
    /// Classifies a hash-chain error.
    #[must_use]
    pub const fn of(error: &HashChainError) -> Self {
        match error {
            HashChainError::ChainBroken { .. } => Self::BrokenLink,
            HashChainError::HashMismatch { .. } => Self::TamperedContent,
        }
    }
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BrokenLink => f.write_str("BrokenLink"),
            Self::TamperedContent => f.write_str("TamperedContent"),
        }
    }
}

/// The record at which verification stopped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BrokenRecord {
    /// Storage sequence number.
    pub seq_id: u64,
    /// Subject as stored; `None` when the stored value is not a valid id.
    #[serde(rename = "uid", default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<SubjectId>,
    /// Timestamp as stored; `None` when the stored value is out of range.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<LedgerTime>,
}

impl From<&StoredEvent> for BrokenRecord {
    fn from(event: &StoredEvent) -> Self {
        Self {
            seq_id: event.seq_id,
            subject: Some(event.subject),
            timestamp: Some(event.timestamp),
        }
    }
}

impl From<&CorruptRow> for BrokenRecord {
    fn from(row: &CorruptRow) -> Self {
        Self {
            seq_id: row.seq_id,
            subject: row.subject,
            timestamp: row.timestamp,
        }
    }
}

/// Outcome of a full-chain verification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerificationReport {
    /// `true` if every record links and hashes correctly.
    pub valid: bool,
    /// Number of records in the ledger at the time of the scan.
    pub total_records: u64,
    /// Zero-based position of the first bad record in ledger order.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_at_index: Option<u64>,
    /// What was wrong with it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<BreakReason>,
    /// Which stored row it was.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub broken_record: Option<BrokenRecord>,
}

impl VerificationReport {
    /// One-line verdict for humans.
    #[must_use]
    pub const fn message(&self) -> &'static str {
        if self.valid {
            "Chain is valid"
        } else {
            "Chain integrity compromised"
        }
    }
}

/// Incremental replay of a chain, one record at a time.
#[derive(Debug)]
pub struct ChainReplay {
    expected_prev: String,
    seen: u64,
    first_break: Option<(u64, BreakReason, BrokenRecord)>,
}

impl Default for ChainReplay {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainReplay {
    /// Starts a replay expecting the genesis sentinel.
    #[must_use]
    pub fn new() -> Self {
        Self {
            expected_prev: GENESIS_PREV_HASH.to_string(),
            seen: 0,
            first_break: None,
        }
    }

    /// Feeds the next record in ledger order.
    pub fn push(&mut self, event: &StoredEvent) {
        let index = self.seen;
        self.seen += 1;
        if self.first_break.is_some() {
            return;
        }

        if let Err(error) = ChainVerifier::verify_event(event, &self.expected_prev) {
            let reason = BreakReason::of(&error);
            warn!(
                index,
                seq_id = event.seq_id,
                subject = %event.subject,
                %reason,
                %error,
                "attendance chain break detected"
            );
            self.first_break = Some((index, reason, BrokenRecord::from(event)));
            return;
        }
        self.expected_prev.clone_from(&event.hash);
    }

    /// Feeds a row that could not be decoded. It counts as tampered content.
    pub fn push_corrupt(&mut self, row: &CorruptRow) {
        let index = self.seen;
        self.seen += 1;
        if self.first_break.is_some() {
            return;
        }

        warn!(
            index,
            seq_id = row.seq_id,
            details = %row.details,
            "undecodable attendance record"
        );
        self.first_break = Some((index, BreakReason::TamperedContent, BrokenRecord::from(row)));
    }

    /// Returns `true` once a break has been recorded.
    #[must_use]
    pub const fn is_broken(&self) -> bool {
        self.first_break.is_some()
    }

    /// Produces the report.
    #[must_use]
    pub fn finish(self) -> VerificationReport {
        match self.first_break {
            None => VerificationReport {
                valid: true,
                total_records: self.seen,
                broken_at_index: None,
                reason: None,
                broken_record: None,
            },
            Some((index, reason, record)) => VerificationReport {
                valid: false,
                total_records: self.seen,
                broken_at_index: Some(index),
                reason: Some(reason),
                broken_record: Some(record),
            },
        }
    }
}

/// Verifies the ledger behind a store.
pub struct ChainVerifier {
    store: Arc<dyn LedgerStore>,
}

impl ChainVerifier {
    /// Creates a verifier over `store`.
    #[must_use]
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Scans the whole ledger and reports the first break, if any.
    ///
    /// Rows after the first break are counted but not decoded.
    ///
    /// # Errors
    ///
    /// Returns an error only if the ledger cannot be read.
    pub fn verify(&self) -> Result<VerificationReport, LedgerError> {
        let mut replay = ChainReplay::new();
        let total = self.store.scan(&mut |row| {
            match row {
                Ok(event) => replay.push(&event),
                Err(corrupt) => replay.push_corrupt(&corrupt),
            }
            if replay.is_broken() {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        })?;
        let mut report = replay.finish();
        report.total_records = total;

        if report.valid {
            info!(total_records = report.total_records, "attendance chain verified");
        } else {
            warn!(
                total_records = report.total_records,
                broken_at_index = report.broken_at_index,
                reason = ?report.reason,
                "attendance chain integrity compromised"
            );
        }
        Ok(report)
    }

    /// Replays records that are already in ledger order.
    #[must_use]
    pub fn replay(events: impl IntoIterator<Item = StoredEvent>) -> VerificationReport {
        let mut replay = ChainReplay::new();
        for event in events {
            replay.push(&event);
        }
        replay.finish()
    }

    /// Checks one record against the hash it should link to.
    ///
    /// The link is checked first, so a record that is both mislinked and
    /// altered is reported as a broken link.
    pub fn verify_event(event: &StoredEvent, expected_prev: &str) -> Result<(), HashChainError> {
        EventHasher::verify_chain_link(&event.previous_hash, expected_prev)?;
        EventHasher::verify_hash(
            event.subject,
            &event.timestamp,
            event.status,
            &event.previous_hash,
            &event.hash,
        )
    }
}
