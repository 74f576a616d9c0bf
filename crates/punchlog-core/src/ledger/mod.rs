//! Ledger storage layer.
//!
//! This module provides the append-only attendance ledger backed by
//! `SQLite` with WAL mode, so the verifier can scan a consistent snapshot
//! while terminals keep appending.
//!
//! # Features
//!
//! - **Append-only semantics**: triggers abort any `UPDATE` or `DELETE`
//! - **Conditional append**: an insert only lands if the tail it was
//!   computed against is still the tail
//! - **Single chain**: `previous_hash` is `UNIQUE`, so two events can never
//!   claim the same predecessor
//! - **Ordered scans**: `timestamp` then `seq_id`, the order hashes chain in
//!
//! # Example
//!
//! ```rust,no_run
//! use punchlog_core::ledger::{LedgerStore, SqliteLedgerStore, StoreOptions};
//!
//! # fn example() -> Result<(), punchlog_core::ledger::LedgerError> {
//! let store = SqliteLedgerStore::open("/var/lib/punchlog/ledger.db", &StoreOptions::default())?;
//!
//! if let Some(tip) = store.tail()? {
//!     println!("tail #{} {}", tip.seq_id, tip.hash);
//! }
//! for event in store.read_recent(10)? {
//!     println!("{} {} {}", event.timestamp, event.subject, event.status);
//! }
//! # Ok(())
//! # }
//! ```

mod backend;
mod storage;


pub use backend::{AppendSnapshot, CorruptRow, LedgerStore, ScannedRow};
pub use storage::{LedgerError, LedgerStats, SqliteLedgerStore, StoreOptions};
