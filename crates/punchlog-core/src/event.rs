//! Attendance event types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::EventHasher;
use crate::time::LedgerTime;

/// Identifier of the tracked person, as enrolled on the terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectId(pub u32);

impl fmt::Display for SubjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<u32> for SubjectId {
    fn from(value: u32) -> Self {
        Self(value)
    }
}

/// Direction of a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AttendanceStatus {
    /// Arrival.
    #[serde(rename = "In")]
    CheckIn,
    /// Departure.
    #[serde(rename = "Out")]
    CheckOut,
}

/// A status label that is neither `In` nor `Out`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown attendance status label '{0}'")]
pub struct UnknownStatus(pub String);

impl AttendanceStatus {
    /// The persisted and hashed label.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::CheckIn => "In",
            Self::CheckOut => "Out",
        }
    }

    /// The opposite direction.
    #[must_use]
    pub const fn toggled(self) -> Self {
        match self {
            Self::CheckIn => Self::CheckOut,
            Self::CheckOut => Self::CheckIn,
        }
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.label())
    }
}

impl FromStr for AttendanceStatus {
    type Err = UnknownStatus;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "In" => Ok(Self::CheckIn),
            "Out" => Ok(Self::CheckOut),
            other => Err(UnknownStatus(other.to_string())),
        }
    }
}

/// A fully formed event that has not been persisted yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    /// Subject the scan belongs to.
    pub subject: SubjectId,
    /// When the scan happened.
    pub timestamp: LedgerTime,
    /// Resolved direction.
    pub status: AttendanceStatus,
    /// Hash over the four fields above plus `previous_hash`.
    pub hash: String,
    /// Hash of the ledger tail at the time of append, or the genesis
    /// sentinel.
    pub previous_hash: String,
    /// Provenance marker; not covered by the hash.
    pub device_tag: String,
}

impl NewEvent {
    /// Builds an event, computing its hash.
    #[must_use]
    pub fn sealed(
        subject: SubjectId,
        timestamp: LedgerTime,
        status: AttendanceStatus,
        previous_hash: impl Into<String>,
        device_tag: impl Into<String>,
    ) -> Self {
        let previous_hash = previous_hash.into();
        let hash = EventHasher::hash_event(subject, &timestamp, status, &previous_hash);
        Self {
            subject,
            timestamp,
            status,
            hash,
            previous_hash,
            device_tag: device_tag.into(),
        }
    }

    /// Attaches the storage-assigned sequence number.
    #[must_use]
    pub fn into_stored(self, seq_id: u64) -> StoredEvent {
        StoredEvent {
            seq_id,
            subject: self.subject,
            timestamp: self.timestamp,
            status: self.status,
            hash: self.hash,
            previous_hash: self.previous_hash,
            device_tag: self.device_tag,
        }
    }
}

/// An event as read back from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredEvent {
    /// Insertion sequence number; breaks timestamp ties.
    pub seq_id: u64,
    /// Subject the scan belongs to.
    #[serde(rename = "uid")]
    pub subject: SubjectId,
    /// When the scan happened.
    pub timestamp: LedgerTime,
    /// Direction.
    pub status: AttendanceStatus,
    /// Stored hash.
    pub hash: String,
    /// Stored link to the predecessor.
    pub previous_hash: String,
    /// Provenance marker.
    pub device_tag: String,
}

impl StoredEvent {
    /// Recomputes the hash from the stored fields.
    #[must_use]
    pub fn recompute_hash(&self) -> String {
        EventHasher::hash_event(
            self.subject,
            &self.timestamp,
            self.status,
            &self.previous_hash,
        )
    }

    /// Position of this event as the chain tail.
    #[must_use]
    pub fn as_tip(&self) -> ChainTip {
        ChainTip {
            seq_id: self.seq_id,
            hash: self.hash.clone(),
            timestamp: self.timestamp,
        }
    }
}

/// The chronologically last event of the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChainTip {
    /// Sequence number of the tail event.
    pub seq_id: u64,
    /// Hash of the tail event; the next event's `previous_hash`.
    pub hash: String,
    /// Timestamp of the tail event.
    pub timestamp: LedgerTime,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_labels_round_trip() {
        for status in [AttendanceStatus::CheckIn, AttendanceStatus::CheckOut] {
            assert_eq!(status.label().parse::<AttendanceStatus>().unwrap(), status);
        }
        assert!("in".parse::<AttendanceStatus>().is_err());
    }

    #[test]
    fn status_toggles() {
        assert_eq!(AttendanceStatus::CheckIn.toggled(), AttendanceStatus::CheckOut);
        assert_eq!(AttendanceStatus::CheckOut.toggled(), AttendanceStatus::CheckIn);
    }

    #[test]
    fn status_serializes_as_label() {
        assert_eq!(
            serde_json::to_string(&AttendanceStatus::CheckOut).unwrap(),
            "\"Out\""
        );
    }

    #[test]
    fn sealed_event_hash_matches_recompute() {
        let ts = LedgerTime::from_millis(1_709_283_600_000).unwrap();
        let event = NewEvent::sealed(
            SubjectId(7),
            ts,
            AttendanceStatus::CheckIn,
            crate::GENESIS_PREV_HASH,
            "",
        )
        .into_stored(1);
        assert_eq!(event.recompute_hash(), event.hash);
    }

    #[test]
    fn device_tag_is_outside_the_hash() {
        let ts = LedgerTime::from_millis(1_709_283_600_000).unwrap();
        let a = NewEvent::sealed(SubjectId(7), ts, AttendanceStatus::CheckIn, "p", "ESP32_DEV_V1");
        let b = NewEvent::sealed(SubjectId(7), ts, AttendanceStatus::CheckIn, "p", "");
        assert_eq!(a.hash, b.hash);
    }
}
