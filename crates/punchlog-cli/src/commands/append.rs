//! `punchlog append`

use std::sync::Arc;

use anyhow::{Context as _, Result};
use punchlog_core::append::{AppendEngine, AppendRequest};
use punchlog_core::time::{SystemClock, TimestampInput};
use punchlog_core::{StoredEvent, SubjectId};

use super::{Context, print_json};

/// Appends one scan through the append engine.
///
/// Local file access is the authorization here, so neither the API key nor
/// the subject directory is consulted.
pub fn run(ctx: &Context, uid: u32, at: Option<&str>, device_tag: &str, json: bool) -> Result<()> {
    let (store, config) = ctx.open_store()?;
    let engine = AppendEngine::new(
        Arc::new(store),
        Arc::new(SystemClock),
        config.ledger.append_config(),
    );

    let subject = SubjectId(uid);
    let request = match at {
        Some(text) => AppendRequest::at(subject, parse_timestamp(text).resolve()?),
        None => AppendRequest::now(subject),
    }
    .with_device_tag(device_tag);

    let event = engine
        .append(request)
        .with_context(|| format!("failed to append scan for uid {uid}"))?;

    if json {
        print_json(&event)
    } else {
        print_event(&event);
        Ok(())
    }
}

/// Epoch milliseconds when the text is an integer, RFC 3339 otherwise.
fn parse_timestamp(text: &str) -> TimestampInput {
    text.parse::<i64>()
        .map_or_else(|_| TimestampInput::Text(text.to_string()), TimestampInput::Millis)
}

pub fn print_event(event: &StoredEvent) {
    println!(
        "#{:<6} {}  uid {:<6} {:<3}  {}",
        event.seq_id,
        event.timestamp.canonical(),
        event.subject,
        event.status,
        event.hash
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_input_is_millis() {
        assert_eq!(
            parse_timestamp("1709283600000"),
            TimestampInput::Millis(1_709_283_600_000)
        );
        assert_eq!(
            parse_timestamp("2024-03-01T09:00:00Z"),
            TimestampInput::Text("2024-03-01T09:00:00Z".to_string())
        );
    }
}
