//! `punchlog log`

use anyhow::{Context as _, Result};
use punchlog_core::ledger::LedgerStore;

use super::append::print_event;
use super::{Context, print_json};

/// Lists the most recent events, newest first.
pub fn run(ctx: &Context, limit: usize, json: bool) -> Result<()> {
    let store = ctx.open_read_only()?;
    let events = store
        .read_recent(limit)
        .context("failed to read recent events")?;

    if json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("ledger is empty");
    }
    for event in &events {
        print_event(event);
    }
    Ok(())
}
