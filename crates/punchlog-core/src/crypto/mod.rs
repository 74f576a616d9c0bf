//! Hash-chain primitives for the attendance ledger.
//!
//! Each event in the ledger stores a hash of its content and the hash of
//! the event before it, forming a single chain ordered by timestamp. Any
//! edit to a historical event changes its recomputed hash, and any removal
//! or reordering breaks a `previous_hash` link.
//!
//! # Example
//!
//! ```rust
//! use punchlog_core::crypto::{EventHasher, GENESIS_PREV_HASH};
//! use punchlog_core::{AttendanceStatus, LedgerTime, SubjectId};
//!
//! let ts = LedgerTime::parse_rfc3339("2024-03-01T09:00:00Z").unwrap();
//! let first = EventHasher::hash_event(SubjectId(7), &ts, AttendanceStatus::CheckIn, GENESIS_PREV_HASH);
//! EventHasher::verify_hash(SubjectId(7), &ts, AttendanceStatus::CheckIn, GENESIS_PREV_HASH, &first)
//!     .unwrap();
//! ```

mod hash;

pub use hash::{EventHasher, GENESIS_PREV_HASH, HASH_SIZE, HashChainError, is_genesis_prev_hash};
