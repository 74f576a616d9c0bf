//! `punchlog show`

use anyhow::{Context as _, Result};
use punchlog_core::ledger::LedgerStore;
use punchlog_core::{BreakReason, ChainVerifier, GENESIS_PREV_HASH, StoredEvent};
use serde::Serialize;

use super::{Context, print_json};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ShowOutput {
    event: StoredEvent,
    expected_previous_hash: String,
    intact: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    reason: Option<BreakReason>,
}

/// Prints one event and whether it links to, and hashes over, its
/// predecessor.
pub fn run(ctx: &Context, seq_id: u64, json: bool) -> Result<()> {
    let store = ctx.open_read_only()?;
    let event = store
        .read_one(seq_id)
        .with_context(|| format!("failed to read event #{seq_id}"))?;
    let expected_previous_hash = store
        .predecessor(&event)
        .context("failed to read predecessor")?
        .map_or_else(|| GENESIS_PREV_HASH.to_string(), |prev| prev.hash);

    let reason = ChainVerifier::verify_event(&event, &expected_previous_hash)
        .err()
        .map(|e| BreakReason::of(&e));
    let output = ShowOutput {
        intact: reason.is_none(),
        event,
        expected_previous_hash,
        reason,
    };

    if json {
        return print_json(&output);
    }

    let ShowOutput { event, .. } = &output;
    println!("event #{}", event.seq_id);
    println!("  uid:        {}", event.subject);
    println!("  timestamp:  {}", event.timestamp.canonical());
    println!("  status:     {}", event.status);
    println!("  device:     {}", event.device_tag);
    println!("  hash:       {}", event.hash);
    println!("  previous:   {}", event.previous_hash);
    match output.reason {
        None => println!("  check:      ok"),
        Some(reason) => println!(
            "  check:      {reason} (expected previous {})",
            output.expected_previous_hash
        ),
    }
    Ok(())
}
