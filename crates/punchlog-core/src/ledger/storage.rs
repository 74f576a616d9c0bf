//! `SQLite`-backed ledger storage implementation.
//!
//! The [`SqliteLedgerStore`] struct implements the [`LedgerStore`] trait.
//! File-backed stores keep two connections: the writer, which also serves
//! the small reads an append needs, and a read-only connection for scans
//! and listings so a long verification never holds the writer.

// SQLite returns i64 for row IDs and counts, but they're always non-negative.
#![allow(clippy::cast_sign_loss, clippy::cast_possible_wrap)]

use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, TryLockError};
use std::thread;
use std::time::{Duration, Instant};

use rusqlite::types::Value;
use rusqlite::{
    Connection, ErrorCode, OpenFlags, OptionalExtension, Row, TransactionBehavior, params,
};
use thiserror::Error;
use tracing::{debug, warn};

use super::backend::{AppendSnapshot, CorruptRow, LedgerStore, ScannedRow};
use crate::crypto::GENESIS_PREV_HASH;
use crate::event::{AttendanceStatus, ChainTip, NewEvent, StoredEvent, SubjectId};
use crate::time::LedgerTime;

/// Schema SQL embedded at compile time.
const SCHEMA_SQL: &str = include_str!("schema.sql");

const EVENT_COLUMNS: &str =
    "seq_id, subject, timestamp_ms, status, hash, previous_hash, device_tag";

/// How often a deadline-bound call re-checks a busy writer connection.
const WRITER_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Errors that can occur during ledger operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The database stayed locked by another writer past the busy timeout.
    #[error("ledger is busy: {details}")]
    Busy {
        /// `SQLite` message.
        details: String,
    },

    /// The caller's deadline passed before the operation could finish.
    /// Nothing was written.
    #[error("ledger operation did not finish before its deadline")]
    DeadlineExceeded,

    /// The tail changed between snapshot and write.
    #[error("ledger tail moved (expected {expected:?}, found {actual:?})")]
    TailMoved {
        /// Tail hash the append was computed against.
        expected: Option<String>,
        /// Tail hash found at write time, when known.
        actual: Option<String>,
    },

    /// The event would sort before the current tail.
    #[error("event timestamp {timestamp} is earlier than the ledger tail {tail_timestamp}")]
    OutOfOrder {
        /// Timestamp of the rejected event.
        timestamp: LedgerTime,
        /// Timestamp of the current tail.
        tail_timestamp: LedgerTime,
    },

    /// The event does not link to the tail it claims to follow.
    #[error("event previous_hash {previous_hash} does not match the expected tail {expected}")]
    LinkMismatch {
        /// `previous_hash` carried by the event.
        previous_hash: String,
        /// Hash of the expected tail, or the genesis sentinel.
        expected: String,
    },

    /// Event not found.
    #[error("event not found: seq_id={seq_id}")]
    EventNotFound {
        /// The sequence ID that was not found.
        seq_id: u64,
    },

    /// A stored row cannot be decoded into an event.
    #[error("corrupt record at seq_id={seq_id}: {details}")]
    CorruptRecord {
        /// The sequence ID of the row.
        seq_id: u64,
        /// What could not be decoded.
        details: String,
    },

    /// A thread panicked while holding a connection.
    #[error("ledger connection lock poisoned")]
    LockPoisoned,
}

impl LedgerError {
    /// Returns `true` if retrying the same operation may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Database(_)
                | Self::Busy { .. }
                | Self::DeadlineExceeded
                | Self::TailMoved { .. }
        )
    }
}

/// Statistics about the ledger.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerStats {
    /// Total number of events.
    pub event_count: u64,

    /// Highest sequence ID (0 if empty).
    pub max_seq_id: u64,

    /// Database file size in bytes.
    pub db_size_bytes: u64,
}

/// Connection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// How long a connection waits on another writer's lock.
    pub busy_timeout: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            busy_timeout: Duration::from_millis(5000),
        }
    }
}

/// The append-only attendance ledger backed by `SQLite`.
pub struct SqliteLedgerStore {
    conn: Mutex<Connection>,
    reader: Option<Mutex<Connection>>,
    path: Option<PathBuf>,
    busy_timeout: Duration,
}

impl SqliteLedgerStore {
    /// Opens or creates a ledger at the specified path.
    ///
    /// If the database doesn't exist, it will be created with the
    /// appropriate schema. WAL mode is enabled for concurrent reads.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or initialized.
    pub fn open(path: impl AsRef<Path>, options: &StoreOptions) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(options.busy_timeout)?;
        Self::initialize_connection(&conn)?;

        let reader = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        reader.busy_timeout(options.busy_timeout)?;

        debug!(path = %path.display(), "opened attendance ledger");

        Ok(Self {
            conn: Mutex::new(conn),
            reader: Some(Mutex::new(reader)),
            path: Some(path.to_path_buf()),
            busy_timeout: options.busy_timeout,
        })
    }

    /// Opens an existing ledger without write access.
    ///
    /// Every write operation on the returned store fails. Used by audit
    /// tooling that must not create or modify the file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file does not exist or cannot be opened.
    pub fn open_read_only(
        path: impl AsRef<Path>,
        options: &StoreOptions,
    ) -> Result<Self, LedgerError> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.busy_timeout(options.busy_timeout)?;

        Ok(Self {
            conn: Mutex::new(conn),
            reader: None,
            path: Some(path.to_path_buf()),
            busy_timeout: options.busy_timeout,
        })
    }

    /// Creates an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn in_memory() -> Result<Self, LedgerError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_connection(&conn)?;

        Ok(Self {
            conn: Mutex::new(conn),
            reader: None,
            path: None,
            busy_timeout: StoreOptions::default().busy_timeout,
        })
    }

    /// Path of the database file, `None` for in-memory ledgers.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Verifies that WAL mode is enabled.
    ///
    /// # Errors
    ///
    /// Returns an error if the journal mode cannot be queried.
    pub fn verify_wal_mode(&self) -> Result<bool, LedgerError> {
        let conn = self.writer()?;
        let mode: String = conn.query_row("PRAGMA journal_mode", [], |row| row.get(0))?;
        Ok(mode.eq_ignore_ascii_case("wal"))
    }

    fn initialize_connection(conn: &Connection) -> Result<(), LedgerError> {
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(())
    }

    fn writer(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.conn.lock().map_err(|_| LedgerError::LockPoisoned)
    }

    /// Waits for the writer connection, but not past `deadline`.
    fn writer_until(&self, deadline: Instant) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        loop {
            match self.conn.try_lock() {
                Ok(conn) => return Ok(conn),
                Err(TryLockError::Poisoned(_)) => return Err(LedgerError::LockPoisoned),
                Err(TryLockError::WouldBlock) if Instant::now() >= deadline => {
                    return Err(LedgerError::DeadlineExceeded);
                },
                Err(TryLockError::WouldBlock) => thread::sleep(WRITER_POLL_INTERVAL),
            }
        }
    }

    /// Runs `op` on the writer with `SQLite`'s lock wait capped at whatever
    /// is left before `deadline`.
    fn with_deadline<T>(
        &self,
        deadline: Instant,
        op: impl FnOnce(&mut Connection) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut conn = self.writer_until(deadline)?;
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(LedgerError::DeadlineExceeded);
        }
        conn.busy_timeout(remaining.min(self.busy_timeout))?;

        let result = op(&mut *conn);
        if let Err(e) = conn.busy_timeout(self.busy_timeout) {
            warn!(error = %e, "failed to restore ledger busy timeout");
        }
        result
    }

    fn reader(&self) -> Result<MutexGuard<'_, Connection>, LedgerError> {
        self.reader
            .as_ref()
            .unwrap_or(&self.conn)
            .lock()
            .map_err(|_| LedgerError::LockPoisoned)
    }
}

impl LedgerStore for SqliteLedgerStore {
    fn snapshot(
        &self,
        subject: SubjectId,
        deadline: Instant,
    ) -> Result<AppendSnapshot, LedgerError> {
        self.with_deadline(deadline, |conn| {
            let tx = conn.transaction().map_err(classify)?;
            let tail = query_tail(&tx)?;
            let last_for_subject = query_last_for_subject(&tx, subject)?;
            tx.commit().map_err(classify)?;

            Ok(AppendSnapshot {
                tail,
                last_for_subject,
            })
        })
    }

    fn tail(&self) -> Result<Option<ChainTip>, LedgerError> {
        let conn = self.writer()?;
        query_tail(&conn)
    }

    fn last_for_subject(&self, subject: SubjectId) -> Result<Option<StoredEvent>, LedgerError> {
        let conn = self.writer()?;
        query_last_for_subject(&conn, subject)
    }

    fn append_if_tail(
        &self,
        event: &NewEvent,
        expected_tail: Option<&ChainTip>,
        deadline: Instant,
    ) -> Result<StoredEvent, LedgerError> {
        let expected_link = expected_tail.map_or(GENESIS_PREV_HASH, |tip| tip.hash.as_str());
        if event.previous_hash != expected_link {
            return Err(LedgerError::LinkMismatch {
                previous_hash: event.previous_hash.clone(),
                expected: expected_link.to_string(),
            });
        }
        if let Some(tip) = expected_tail {
            if event.timestamp < tip.timestamp {
                return Err(LedgerError::OutOfOrder {
                    timestamp: event.timestamp,
                    tail_timestamp: tip.timestamp,
                });
            }
        }

        self.with_deadline(deadline, |conn| {
            // Dropping the transaction without commit rolls it back.
            let tx = conn
                .transaction_with_behavior(TransactionBehavior::Immediate)
                .map_err(classify)?;

            let current = query_tail(&tx)?;
            let unchanged = match (expected_tail, current.as_ref()) {
                (None, None) => true,
                (Some(expected), Some(current)) => {
                    expected.seq_id == current.seq_id && expected.hash == current.hash
                },
                _ => false,
            };
            if !unchanged {
                return Err(LedgerError::TailMoved {
                    expected: expected_tail.map(|tip| tip.hash.clone()),
                    actual: current.map(|tip| tip.hash),
                });
            }

            tx.execute(
                "INSERT INTO attendance_events (subject, timestamp_ms, status, hash, previous_hash, device_tag)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    i64::from(event.subject.0),
                    event.timestamp.as_millis(),
                    event.status.label(),
                    event.hash,
                    event.previous_hash,
                    event.device_tag,
                ],
            )
            .map_err(|e| match classify(e) {
                LedgerError::TailMoved { actual, .. } => LedgerError::TailMoved {
                    expected: expected_tail.map(|tip| tip.hash.clone()),
                    actual,
                },
                other => other,
            })?;
            let seq_id = tx.last_insert_rowid() as u64;

            if Instant::now() >= deadline {
                return Err(LedgerError::DeadlineExceeded);
            }
            tx.commit().map_err(classify)?;

            Ok(event.clone().into_stored(seq_id))
        })
    }

    fn scan(
        &self,
        visit: &mut dyn FnMut(ScannedRow) -> ControlFlow<()>,
    ) -> Result<u64, LedgerError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events ORDER BY timestamp_ms ASC, seq_id ASC"
        ))?;
        let mut rows = stmt.query([]).map_err(classify)?;
        let mut total = 0;
        let mut decoding = true;
        while let Some(row) = rows.next().map_err(classify)? {
            total += 1;
            if decoding {
                decoding = visit(RawEvent::from_row(row)?.decode()).is_continue();
            }
        }
        Ok(total)
    }

    fn read_recent(&self, limit: usize) -> Result<Vec<StoredEvent>, LedgerError> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM attendance_events
             ORDER BY timestamp_ms DESC, seq_id DESC
             LIMIT ?1"
        ))?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let raw = stmt
            .query_map(params![limit], RawEvent::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raw.into_iter()
            .map(|raw| raw.decode().map_err(LedgerError::from))
            .collect()
    }

    fn read_one(&self, seq_id: u64) -> Result<StoredEvent, LedgerError> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM attendance_events WHERE seq_id = ?1"),
                params![seq_id as i64],
                RawEvent::from_row,
            )
            .optional()?
            .ok_or(LedgerError::EventNotFound { seq_id })?;
        Ok(raw.decode()?)
    }

    fn predecessor(&self, event: &StoredEvent) -> Result<Option<StoredEvent>, LedgerError> {
        let conn = self.reader()?;
        let raw = conn
            .query_row(
                &format!(
                    "SELECT {EVENT_COLUMNS} FROM attendance_events
                     WHERE timestamp_ms < ?1 OR (timestamp_ms = ?1 AND seq_id < ?2)
                     ORDER BY timestamp_ms DESC, seq_id DESC
                     LIMIT 1"
                ),
                params![event.timestamp.as_millis(), event.seq_id as i64],
                RawEvent::from_row,
            )
            .optional()?;
        Ok(raw.map(RawEvent::decode).transpose()?)
    }

    fn stats(&self) -> Result<LedgerStats, LedgerError> {
        let conn = self.reader()?;

        let event_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM attendance_events", [], |row| row.get(0))?;
        let max_seq_id: Option<i64> =
            conn.query_row("SELECT MAX(seq_id) FROM attendance_events", [], |row| {
                row.get(0)
            })?;

        let page_count: i64 = conn.query_row("PRAGMA page_count", [], |row| row.get(0))?;
        let page_size: i64 = conn.query_row("PRAGMA page_size", [], |row| row.get(0))?;

        Ok(LedgerStats {
            event_count: event_count as u64,
            max_seq_id: max_seq_id.unwrap_or(0) as u64,
            db_size_bytes: (page_count * page_size) as u64,
        })
    }
}

fn query_tail(conn: &Connection) -> Result<Option<ChainTip>, LedgerError> {
    let row = conn
        .query_row(
            "SELECT seq_id, hash, timestamp_ms FROM attendance_events
             ORDER BY timestamp_ms DESC, seq_id DESC
             LIMIT 1",
            [],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            },
        )
        .optional()
        .map_err(classify)?;

    row.map(|(seq_id, hash, timestamp_ms)| {
        let seq_id = seq_id as u64;
        let timestamp =
            LedgerTime::from_millis(timestamp_ms).map_err(|e| LedgerError::CorruptRecord {
                seq_id,
                details: e.to_string(),
            })?;
        Ok(ChainTip {
            seq_id,
            hash,
            timestamp,
        })
    })
    .transpose()
}

fn query_last_for_subject(
    conn: &Connection,
    subject: SubjectId,
) -> Result<Option<StoredEvent>, LedgerError> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {EVENT_COLUMNS} FROM attendance_events
                 WHERE subject = ?1
                 ORDER BY timestamp_ms DESC, seq_id DESC
                 LIMIT 1"
            ),
            params![i64::from(subject.0)],
            RawEvent::from_row,
        )
        .optional()
        .map_err(classify)?;
    Ok(raw.map(RawEvent::decode).transpose()?)
}

/// Maps lock contention and the `previous_hash` uniqueness backstop to
/// their ledger-level meaning.
fn classify(err: rusqlite::Error) -> LedgerError {
    if let rusqlite::Error::SqliteFailure(failure, message) = &err {
        if matches!(
            failure.code,
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
        ) {
            return LedgerError::Busy {
                details: message.clone().unwrap_or_else(|| failure.to_string()),
            };
        }
        if failure.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE {
            return LedgerError::TailMoved {
                expected: None,
                actual: None,
            };
        }
    }
    LedgerError::Database(err)
}

/// A row as stored, before validation.
///
/// Columns are read as dynamic values so a row rewritten with the wrong
/// storage class still reaches [`RawEvent::decode`].
struct RawEvent {
    seq_id: i64,
    subject: Value,
    timestamp_ms: Value,
    status: Value,
    hash: Value,
    previous_hash: Value,
    device_tag: Value,
}

impl RawEvent {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            seq_id: row.get(0)?,
            subject: row.get(1)?,
            timestamp_ms: row.get(2)?,
            status: row.get(3)?,
            hash: row.get(4)?,
            previous_hash: row.get(5)?,
            device_tag: row.get(6)?,
        })
    }

    fn decode(self) -> Result<StoredEvent, CorruptRow> {
        let seq_id = self.seq_id as u64;
        let subject = integer(&self.subject)
            .and_then(|value| u32::try_from(value).ok())
            .map(SubjectId);
        let timestamp =
            integer(&self.timestamp_ms).and_then(|millis| LedgerTime::from_millis(millis).ok());
        let corrupt = move |details: String| CorruptRow {
            seq_id,
            subject,
            timestamp,
            details,
        };

        let Some(subject) = subject else {
            return Err(corrupt(format!(
                "subject {} is not a valid id",
                describe(&self.subject)
            )));
        };
        let millis = integer(&self.timestamp_ms).ok_or_else(|| {
            corrupt(format!(
                "timestamp_ms {} is not an integer",
                describe(&self.timestamp_ms)
            ))
        })?;
        let timestamp = LedgerTime::from_millis(millis).map_err(|e| corrupt(e.to_string()))?;
        let status = text(self.status, "status")
            .map_err(&corrupt)?
            .parse::<AttendanceStatus>()
            .map_err(|e| corrupt(e.to_string()))?;

        Ok(StoredEvent {
            seq_id,
            subject,
            timestamp,
            status,
            hash: text(self.hash, "hash").map_err(&corrupt)?,
            previous_hash: text(self.previous_hash, "previous_hash").map_err(&corrupt)?,
            device_tag: text(self.device_tag, "device_tag").map_err(&corrupt)?,
        })
    }
}

const fn integer(value: &Value) -> Option<i64> {
    match value {
        Value::Integer(v) => Some(*v),
        _ => None,
    }
}

fn text(value: Value, column: &str) -> Result<String, String> {
    match value {
        Value::Text(v) => Ok(v),
        other => Err(format!("{column} {} is not text", describe(&other))),
    }
}

fn describe(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Integer(v) => v.to_string(),
        Value::Real(v) => v.to_string(),
        Value::Text(v) => format!("{v:?}"),
        Value::Blob(v) => format!("<{} byte blob>", v.len()),
    }
}
