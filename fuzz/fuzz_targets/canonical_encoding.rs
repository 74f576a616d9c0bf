//! Fuzz harness for the canonical event encoding.
//!
//! The first twelve bytes pick a subject and a timestamp; the rest is used
//! as the previous-hash field. The encoding must always be valid JSON that
//! round-trips every field, and hashing must be deterministic.

#![no_main]
use libfuzzer_sys::fuzz_target;
use punchlog_core::crypto::EventHasher;
use punchlog_core::{AttendanceStatus, LedgerTime, SubjectId};

fuzz_target!(|data: &[u8]| {
    if data.len() < 12 {
        return;
    }
    let (head, tail) = data.split_at(12);
    let subject = SubjectId(u32::from_le_bytes([head[0], head[1], head[2], head[3]]));
    let millis = i64::from_le_bytes([
        head[4], head[5], head[6], head[7], head[8], head[9], head[10], head[11],
    ]);
    let Ok(timestamp) = LedgerTime::from_millis(millis) else {
        return;
    };
    let status = if millis & 1 == 0 {
        AttendanceStatus::CheckIn
    } else {
        AttendanceStatus::CheckOut
    };
    let previous_hash = String::from_utf8_lossy(tail);

    let bytes = EventHasher::canonical_bytes(subject, &timestamp, status, &previous_hash);
    let value: serde_json::Value =
        serde_json::from_slice(&bytes).expect("canonical encoding must be valid JSON");
    assert_eq!(value["uid"].as_u64(), Some(u64::from(subject.0)));
    assert_eq!(value["status"].as_str(), Some(status.label()));
    assert_eq!(value["previousHash"].as_str(), Some(previous_hash.as_ref()));

    let text = value["timestamp"].as_str().expect("timestamp is a string");
    let reparsed = LedgerTime::parse_rfc3339(text).expect("canonical timestamp must parse");
    assert_eq!(reparsed.as_millis(), millis);

    let first = EventHasher::hash_event(subject, &timestamp, status, &previous_hash);
    let second = EventHasher::hash_event(subject, &timestamp, status, &previous_hash);
    assert_eq!(first, second);
    assert!(
        EventHasher::verify_hash(subject, &timestamp, status, &previous_hash, &first).is_ok()
    );
});
