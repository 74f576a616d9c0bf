//! Runs the `punchlog` binary against temporary ledgers.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn punchlog(dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_punchlog"))
        .arg("--config")
        .arg(dir.join("absent.toml"))
        .arg("--db")
        .arg(dir.join("ledger.db"))
        .args(args)
        .output()
        .expect("failed to run punchlog")
}

fn stdout_json(output: &Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is not JSON")
}

fn seeded() -> (TempDir, PathBuf) {
    let dir = TempDir::new().unwrap();
    for at in ["2024-03-01T09:00:00Z", "2024-03-01T17:00:00Z", "2024-03-02T09:00:00Z"] {
        let output = punchlog(dir.path(), &["append", "7", "--at", at]);
        assert!(output.status.success(), "{output:?}");
    }
    let path = dir.path().join("ledger.db");
    (dir, path)
}

#[test]
fn verify_missing_ledger_is_an_operational_error() {
    let dir = TempDir::new().unwrap();
    let output = punchlog(dir.path(), &["verify"]);
    assert_eq!(output.status.code(), Some(2));
    assert!(!dir.path().join("ledger.db").exists());
}

#[test]
fn append_then_verify() {
    let (dir, _) = seeded();

    let output = punchlog(dir.path(), &["verify", "--json"]);
    assert_eq!(output.status.code(), Some(0));
    let report = stdout_json(&output);
    assert_eq!(report["valid"], true);
    assert_eq!(report["totalRecords"], 3);
    assert_eq!(report["message"], "Chain is valid");
}

#[test]
fn append_json_reports_the_event() {
    let dir = TempDir::new().unwrap();
    let output = punchlog(
        dir.path(),
        &["append", "7", "--at", "1709283600000", "--json"],
    );
    assert!(output.status.success(), "{output:?}");
    let event = stdout_json(&output);
    assert_eq!(event["status"], "In");
    assert_eq!(event["previousHash"], "GENESIS_BLOCK");
    assert_eq!(
        event["hash"],
        "0a3bb7f430f183c9990ff4ae6df0572e1a8097edd1d1068b75adc6adab07b23e"
    );
    assert_eq!(event["deviceTag"], "CLI");
}

#[test]
fn backdated_append_fails() {
    let (dir, _) = seeded();
    let output = punchlog(dir.path(), &["append", "8", "--at", "2024-03-01T12:00:00Z"]);
    assert!(!output.status.success());

    let output = punchlog(dir.path(), &["tail", "--json"]);
    assert_eq!(stdout_json(&output)["eventCount"], 3);
}

#[test]
fn tampering_makes_verify_exit_one() {
    let (dir, path) = seeded();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "DROP TRIGGER attendance_events_no_update;
         UPDATE attendance_events SET status = 'In' WHERE seq_id = 2;",
    )
    .unwrap();
    drop(conn);

    let output = punchlog(dir.path(), &["verify", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let report = stdout_json(&output);
    assert_eq!(report["valid"], false);
    assert_eq!(report["brokenAtIndex"], 1);
    assert_eq!(report["reason"], "TamperedContent");

    let output = punchlog(dir.path(), &["show", "2", "--json"]);
    assert!(output.status.success(), "{output:?}");
    let shown = stdout_json(&output);
    assert_eq!(shown["intact"], false);
    assert_eq!(shown["reason"], "TamperedContent");

    let output = punchlog(dir.path(), &["show", "3", "--json"]);
    assert_eq!(stdout_json(&output)["intact"], true);
}

#[test]
fn undecodable_subject_makes_verify_exit_one() {
    let (dir, path) = seeded();

    let conn = rusqlite::Connection::open(&path).unwrap();
    conn.execute_batch(
        "DROP TRIGGER attendance_events_no_update;
         UPDATE attendance_events SET subject = 'seven' WHERE seq_id = 2;",
    )
    .unwrap();
    drop(conn);

    let output = punchlog(dir.path(), &["verify", "--json"]);
    assert_eq!(output.status.code(), Some(1));
    let report = stdout_json(&output);
    assert_eq!(report["brokenAtIndex"], 1);
    assert_eq!(report["reason"], "TamperedContent");
    assert_eq!(report["totalRecords"], 3);
    assert_eq!(report["brokenRecord"]["seqId"], 2);

    let output = punchlog(dir.path(), &["verify"]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).contains("uid ?"));
}

#[test]
fn log_lists_newest_first() {
    let (dir, _) = seeded();

    let output = punchlog(dir.path(), &["log", "-n", "2", "--json"]);
    assert!(output.status.success(), "{output:?}");
    let events = stdout_json(&output);
    let events = events.as_array().unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0]["seqId"], 3);
    assert_eq!(events[0]["status"], "In");
    assert_eq!(events[1]["status"], "Out");
}

#[test]
fn tail_reports_last_event() {
    let (dir, _) = seeded();

    let output = punchlog(dir.path(), &["tail", "--json"]);
    let tail = stdout_json(&output);
    assert_eq!(tail["tail"]["seqId"], 3);
    assert_eq!(tail["tail"]["timestamp"], "2024-03-02T09:00:00.000Z");
    assert_eq!(tail["maxSeqId"], 3);
}
