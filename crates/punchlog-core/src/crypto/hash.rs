//! SHA-256 hashing and hash-chain primitives.

use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::event::{AttendanceStatus, SubjectId};
use crate::time::LedgerTime;

/// Size of a SHA-256 digest in bytes.
pub const HASH_SIZE: usize = 32;

/// `previous_hash` of the first event in the ledger.
pub const GENESIS_PREV_HASH: &str = "GENESIS_BLOCK";

/// Errors that can occur during hash chain operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HashChainError {
    /// The previous hash doesn't match the expected value.
    #[error("hash chain broken: expected {expected}, got {actual}")]
    ChainBroken {
        /// Hash of the preceding event (or the genesis sentinel).
        expected: String,
        /// The `previous_hash` found on the event.
        actual: String,
    },

    /// The event hash doesn't match the computed value.
    #[error("event hash mismatch: expected {expected}, got {actual}")]
    HashMismatch {
        /// The stored hash.
        expected: String,
        /// The hash recomputed from the stored fields.
        actual: String,
    },
}

/// Hasher for attendance events.
///
/// An event hash is the lowercase hex SHA-256 of the compact JSON object
/// `{"uid":..,"timestamp":..,"status":..,"previousHash":..}` with keys in
/// exactly that order. The encoding is written by hand so the byte stream
/// never depends on a serializer's map ordering or float formatting.
pub struct EventHasher;

impl EventHasher {
    /// Canonical bytes covered by the event hash.
    #[must_use]
    pub fn canonical_bytes(
        subject: SubjectId,
        timestamp: &LedgerTime,
        status: AttendanceStatus,
        previous_hash: &str,
    ) -> Vec<u8> {
        let mut out = Vec::with_capacity(96 + previous_hash.len());
        out.extend_from_slice(b"{\"uid\":");
        out.extend_from_slice(subject.0.to_string().as_bytes());
        out.extend_from_slice(b",\"timestamp\":\"");
        out.extend_from_slice(timestamp.canonical().as_bytes());
        out.extend_from_slice(b"\",\"status\":\"");
        out.extend_from_slice(status.label().as_bytes());
        out.extend_from_slice(b"\",\"previousHash\":");
        write_json_string(&mut out, previous_hash);
        out.push(b'}');
        out
    }

    /// Hashes an event's fields with chain linking.
    #[must_use]
    pub fn hash_event(
        subject: SubjectId,
        timestamp: &LedgerTime,
        status: AttendanceStatus,
        previous_hash: &str,
    ) -> String {
        let bytes = Self::canonical_bytes(subject, timestamp, status, previous_hash);
        Self::hash_content(&bytes)
    }

    /// Hex SHA-256 of raw content.
    #[must_use]
    pub fn hash_content(content: &[u8]) -> String {
        hex::encode(Sha256::digest(content))
    }

    /// Verifies that a stored hash matches the event's fields.
    ///
    /// # Errors
    ///
    /// Returns `HashMismatch` if the computed hash doesn't match.
    pub fn verify_hash(
        subject: SubjectId,
        timestamp: &LedgerTime,
        status: AttendanceStatus,
        previous_hash: &str,
        expected_hash: &str,
    ) -> Result<(), HashChainError> {
        let computed = Self::hash_event(subject, timestamp, status, previous_hash);
        if computed != expected_hash {
            return Err(HashChainError::HashMismatch {
                expected: expected_hash.to_string(),
                actual: computed,
            });
        }
        Ok(())
    }

    /// Verifies the chain link between two consecutive events.
    ///
    /// # Arguments
    ///
    /// * `current_prev_hash` - The previous hash stored in the current event
    /// * `previous_event_hash` - The stored hash of the previous event, or
    ///   [`GENESIS_PREV_HASH`] for the first event
    ///
    /// # Errors
    ///
    /// Returns `ChainBroken` if the hashes don't match.
    pub fn verify_chain_link(
        current_prev_hash: &str,
        previous_event_hash: &str,
    ) -> Result<(), HashChainError> {
        if current_prev_hash != previous_event_hash {
            return Err(HashChainError::ChainBroken {
                expected: previous_event_hash.to_string(),
                actual: current_prev_hash.to_string(),
            });
        }
        Ok(())
    }
}

/// Returns `true` if `previous_hash` marks the first event of a ledger.
#[must_use]
pub fn is_genesis_prev_hash(previous_hash: &str) -> bool {
    previous_hash == GENESIS_PREV_HASH
}

/// Appends `value` as a JSON string literal.
fn write_json_string(out: &mut Vec<u8>, value: &str) {
    const HEX: &[u8; 16] = b"0123456789abcdef";

    out.push(b'"');
    for ch in value.chars() {
        match ch {
            '"' => out.extend_from_slice(b"\\\""),
            '\\' => out.extend_from_slice(b"\\\\"),
            '\u{08}' => out.extend_from_slice(b"\\b"),
            '\u{0c}' => out.extend_from_slice(b"\\f"),
            '\n' => out.extend_from_slice(b"\\n"),
            '\r' => out.extend_from_slice(b"\\r"),
            '\t' => out.extend_from_slice(b"\\t"),
            c if (c as u32) < 0x20 => {
                let code = c as u32 as usize;
                out.extend_from_slice(b"\\u00");
                out.push(HEX[code >> 4]);
                out.push(HEX[code & 0xf]);
            },
            c => {
                let mut buf = [0u8; 4];
                out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            },
        }
    }
    out.push(b'"');
}
