//! Check-in / check-out resolution.
//!
//! A subject's next status is the opposite of their most recent event
//! anywhere in the ledger, or `In` if they have none. There is no daily
//! reset: a subject who forgets to check out starts the next day with
//! `Out`.

use crate::event::{AttendanceStatus, StoredEvent, SubjectId};
use crate::ledger::{LedgerError, LedgerStore};

/// Derives a subject's next status from the ledger.
pub struct StatusResolver;

impl StatusResolver {
    /// Status for the next event given the subject's last one.
    #[must_use]
    pub fn next_status(last: Option<&StoredEvent>) -> AttendanceStatus {
        last.map_or(AttendanceStatus::CheckIn, |event| event.status.toggled())
    }

    /// Looks up the subject's last event and resolves the next status.
    ///
    /// The answer is only as fresh as the read; the append engine re-resolves
    /// on every attempt from the same snapshot it writes against.
    pub fn resolve(
        store: &dyn LedgerStore,
        subject: SubjectId,
    ) -> Result<AttendanceStatus, LedgerError> {
        let last = store.last_for_subject(subject)?;
        Ok(Self::next_status(last.as_ref()))
    }
}
