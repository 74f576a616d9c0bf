//! `punchlog tail`

use anyhow::{Context as _, Result};
use punchlog_core::ChainTip;
use punchlog_core::ledger::{LedgerStats, LedgerStore};
use serde::Serialize;

use super::{Context, print_json};

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TailOutput {
    tail: Option<ChainTip>,
    event_count: u64,
    max_seq_id: u64,
    db_size_bytes: u64,
}

/// Prints the chain tail and ledger statistics.
pub fn run(ctx: &Context, json: bool) -> Result<()> {
    let store = ctx.open_read_only()?;
    let tail = store.tail().context("failed to read chain tail")?;
    let LedgerStats {
        event_count,
        max_seq_id,
        db_size_bytes,
    } = store.stats().context("failed to read ledger stats")?;

    if json {
        return print_json(&TailOutput {
            tail,
            event_count,
            max_seq_id,
            db_size_bytes,
        });
    }

    match &tail {
        Some(tip) => {
            println!("tail:     #{} at {}", tip.seq_id, tip.timestamp.canonical());
            println!("hash:     {}", tip.hash);
        },
        None => println!("tail:     (empty ledger)"),
    }
    println!("events:   {event_count}");
    println!("last seq: {max_seq_id}");
    println!("db size:  {db_size_bytes} bytes");
    Ok(())
}
