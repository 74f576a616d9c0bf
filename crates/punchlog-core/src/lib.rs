//! punchlog-core - append-only, hash-chained attendance ledger.
//!
//! Terminals report fingerprint scans; each scan becomes an immutable
//! [`StoredEvent`] whose hash covers its own fields and the hash of the event
//! before it. An auditor can later replay the whole ledger with
//! [`ChainVerifier`] and learn whether, and where, history was altered.
//!
//! # Modules
//!
//! - [`crypto`]: canonical event encoding and SHA-256 hash chaining
//! - [`ledger`]: `SQLite`-backed append-only storage with conditional append
//! - [`resolver`]: check-in / check-out toggle per subject
//! - [`append`]: the append engine (optimistic, bounded-retry writes)
//! - [`verify`]: full-chain verification reports
//! - [`ingest`]: the authenticated append boundary used by terminals
//! - [`directory`]: read-only subject lookup
//! - [`auth`]: shared-secret caller check
//! - [`config`]: TOML configuration
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use punchlog_core::append::{AppendConfig, AppendEngine, AppendRequest};
//! use punchlog_core::ledger::{SqliteLedgerStore, StoreOptions};
//! use punchlog_core::time::SystemClock;
//! use punchlog_core::verify::ChainVerifier;
//! use punchlog_core::SubjectId;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(SqliteLedgerStore::open("punchlog.db", &StoreOptions::default())?);
//! let engine = AppendEngine::new(store.clone(), Arc::new(SystemClock), AppendConfig::default());
//!
//! let event = engine.append(AppendRequest::now(SubjectId(7)))?;
//! println!("{} -> {}", event.status, event.hash);
//!
//! let report = ChainVerifier::new(store).verify()?;
//! assert!(report.valid);
//! # Ok(())
//! # }
//! ```

pub mod append;
pub mod auth;
pub mod config;
pub mod crypto;
pub mod directory;
pub mod event;
pub mod ingest;
pub mod ledger;
pub mod resolver;
pub mod time;
pub mod verify;

pub use crypto::GENESIS_PREV_HASH;
pub use event::{AttendanceStatus, ChainTip, NewEvent, StoredEvent, SubjectId};
pub use time::LedgerTime;
pub use verify::{BreakReason, ChainVerifier, VerificationReport};
