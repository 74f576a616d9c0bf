//! Millisecond-precision ledger time.
//!
//! Event hashes cover the textual form of the timestamp, so the ledger only
//! deals in instants that render to exactly one canonical string:
//! `YYYY-MM-DDTHH:MM:SS.mmmZ`. Sub-millisecond precision is dropped when a
//! [`LedgerTime`] is built, and instants outside years 0000-9999 are
//! rejected because they would need an expanded year format.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// `0000-01-01T00:00:00.000Z` in milliseconds since the Unix epoch.
pub const MIN_MILLIS: i64 = -62_167_219_200_000;

/// `9999-12-31T23:59:59.999Z` in milliseconds since the Unix epoch.
pub const MAX_MILLIS: i64 = 253_402_300_799_999;

/// Errors building a [`LedgerTime`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimeError {
    /// The instant cannot be rendered with a four-digit year.
    #[error("timestamp {millis}ms is outside the supported range (years 0000-9999)")]
    OutOfRange {
        /// Milliseconds since the Unix epoch.
        millis: i64,
    },

    /// The text is not an RFC 3339 timestamp.
    #[error("invalid timestamp '{input}': {reason}")]
    Unparseable {
        /// The rejected input.
        input: String,
        /// Parser message.
        reason: String,
    },
}

/// A UTC instant truncated to whole milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LedgerTime(DateTime<Utc>);

impl LedgerTime {
    /// Builds a ledger time from milliseconds since the Unix epoch.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` outside years 0000-9999.
    pub fn from_millis(millis: i64) -> Result<Self, TimeError> {
        if !(MIN_MILLIS..=MAX_MILLIS).contains(&millis) {
            return Err(TimeError::OutOfRange { millis });
        }
        DateTime::from_timestamp_millis(millis)
            .map(Self)
            .ok_or(TimeError::OutOfRange { millis })
    }

    /// Truncates a `DateTime` to millisecond precision.
    ///
    /// # Errors
    ///
    /// Returns `OutOfRange` outside years 0000-9999.
    pub fn from_datetime(instant: DateTime<Utc>) -> Result<Self, TimeError> {
        Self::from_millis(instant.timestamp_millis())
    }

    /// Parses an RFC 3339 timestamp with any offset.
    ///
    /// # Errors
    ///
    /// Returns `Unparseable` for malformed input and `OutOfRange` for
    /// instants the ledger cannot represent.
    pub fn parse_rfc3339(input: &str) -> Result<Self, TimeError> {
        let parsed =
            DateTime::parse_from_rfc3339(input.trim()).map_err(|e| TimeError::Unparseable {
                input: input.to_string(),
                reason: e.to_string(),
            })?;
        Self::from_datetime(parsed.with_timezone(&Utc))
    }

    /// Milliseconds since the Unix epoch.
    #[must_use]
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// The underlying `DateTime`.
    #[must_use]
    pub const fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// The canonical text form covered by event hashes.
    #[must_use]
    pub fn canonical(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}

impl fmt::Display for LedgerTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}

impl TryFrom<String> for LedgerTime {
    type Error = TimeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse_rfc3339(&value)
    }
}

impl From<LedgerTime> for String {
    fn from(value: LedgerTime) -> Self {
        value.canonical()
    }
}

/// Timestamp as sent by a terminal: RFC 3339 text or epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimestampInput {
    /// Milliseconds since the Unix epoch.
    Millis(i64),
    /// RFC 3339 text.
    Text(String),
}

impl TimestampInput {
    /// Resolves the input to a ledger time.
    ///
    /// # Errors
    ///
    /// Propagates parse and range errors.
    pub fn resolve(&self) -> Result<LedgerTime, TimeError> {
        match self {
            Self::Millis(millis) => LedgerTime::from_millis(*millis),
            Self::Text(text) => LedgerTime::parse_rfc3339(text),
        }
    }
}

/// Source of ingestion time.
pub trait Clock: Send + Sync {
    /// Current wall-clock instant.
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Clock that only moves when told to. Used by tests and replays.
#[derive(Debug)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    /// Creates a clock frozen at `millis` since the Unix epoch.
    #[must_use]
    pub const fn at_millis(millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(millis),
        }
    }

    /// Moves the clock forward.
    pub fn advance_millis(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::SeqCst);
    }

    /// Sets the clock to an absolute value (may move backwards).
    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        DateTime::from_timestamp_millis(self.millis.load(Ordering::SeqCst)).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn canonical_form_has_fixed_millisecond_precision() {
        let t = LedgerTime::from_millis(1_709_283_600_000).unwrap();
        assert_eq!(t.canonical(), "2024-03-01T09:00:00.000Z");

        let t = LedgerTime::from_millis(1_709_283_600_007).unwrap();
        assert_eq!(t.canonical(), "2024-03-01T09:00:00.007Z");
    }

    #[test]
    fn sub_millisecond_precision_is_truncated() {
        let instant = Utc.timestamp_opt(1_709_283_600, 123_456_789).unwrap();
        let t = LedgerTime::from_datetime(instant).unwrap();
        assert_eq!(t.as_millis(), 1_709_283_600_123);
        assert_eq!(t.canonical(), "2024-03-01T09:00:00.123Z");
    }

    #[test]
    fn parse_normalizes_offsets_to_utc() {
        let t = LedgerTime::parse_rfc3339("2024-03-01T10:00:00+01:00").unwrap();
        assert_eq!(t.canonical(), "2024-03-01T09:00:00.000Z");
    }

    #[test]
    fn parse_rejects_garbage() {
        let err = LedgerTime::parse_rfc3339("yesterday").unwrap_err();
        assert!(matches!(err, TimeError::Unparseable { .. }));
    }

    #[test]
    fn range_is_bounded_to_four_digit_years() {
        assert_eq!(
            LedgerTime::from_millis(MIN_MILLIS).unwrap().canonical(),
            "0000-01-01T00:00:00.000Z"
        );
        assert_eq!(
            LedgerTime::from_millis(MAX_MILLIS).unwrap().canonical(),
            "9999-12-31T23:59:59.999Z"
        );
        assert!(LedgerTime::from_millis(MIN_MILLIS - 1).is_err());
        assert!(LedgerTime::from_millis(MAX_MILLIS + 1).is_err());
    }

    #[test]
    fn timestamp_input_accepts_text_and_millis() {
        let from_text: TimestampInput = serde_json::from_str("\"2024-03-01T09:00:00Z\"").unwrap();
        let from_millis: TimestampInput = serde_json::from_str("1709283600000").unwrap();
        assert_eq!(from_text.resolve().unwrap(), from_millis.resolve().unwrap());
    }

    #[test]
    fn serde_uses_canonical_text() {
        let t = LedgerTime::from_millis(0).unwrap();
        assert_eq!(
            serde_json::to_string(&t).unwrap(),
            "\"1970-01-01T00:00:00.000Z\""
        );
        let back: LedgerTime = serde_json::from_str("\"1970-01-01T00:00:00.000Z\"").unwrap();
        assert_eq!(back, t);
    }

    #[test]
    fn manual_clock_moves_only_when_told() {
        let clock = ManualClock::at_millis(1_000);
        assert_eq!(clock.now().timestamp_millis(), 1_000);
        clock.advance_millis(500);
        assert_eq!(clock.now().timestamp_millis(), 1_500);
        clock.set_millis(10);
        assert_eq!(clock.now().timestamp_millis(), 10);
    }
}
