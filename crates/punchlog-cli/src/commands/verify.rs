//! `punchlog verify`

use std::sync::Arc;

use punchlog_core::ChainVerifier;
use punchlog_core::verify::VerificationReport;
use tracing::{error, warn};

use super::{Context, print_json};

/// Exit codes for `punchlog verify`.
pub mod exit_codes {
    /// Every record links and hashes correctly.
    pub const VALID: u8 = 0;
    /// The chain is broken.
    pub const BROKEN: u8 = 1;
    /// The ledger could not be read.
    pub const ERROR: u8 = 2;
}

/// Runs a full verification and returns the process exit code.
pub fn run(ctx: &Context, json: bool) -> u8 {
    let report = match ctx
        .open_read_only()
        .and_then(|store| {
            ChainVerifier::new(Arc::new(store))
                .verify()
                .map_err(anyhow::Error::from)
        })
    {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "verification could not read the ledger");
            eprintln!("Error: {e:#}");
            return exit_codes::ERROR;
        },
    };

    if json {
        if let Err(e) = print_json(&VerifyOutput::from(&report)) {
            eprintln!("Error: {e:#}");
            return exit_codes::ERROR;
        }
    } else {
        print_report(&report);
    }

    if report.valid {
        exit_codes::VALID
    } else {
        warn!(
            broken_at = ?report.broken_at_index,
            reason = ?report.reason,
            "chain integrity compromised"
        );
        exit_codes::BROKEN
    }
}

#[derive(serde::Serialize)]
struct VerifyOutput<'a> {
    #[serde(flatten)]
    report: &'a VerificationReport,
    message: &'static str,
}

impl<'a> From<&'a VerificationReport> for VerifyOutput<'a> {
    fn from(report: &'a VerificationReport) -> Self {
        Self {
            report,
            message: report.message(),
        }
    }
}

fn print_report(report: &VerificationReport) {
    println!("{}", report.message());
    println!("  records:  {}", report.total_records);
    if let (Some(index), Some(reason)) = (report.broken_at_index, report.reason) {
        println!("  broken at index {index}: {reason}");
    }
    if let Some(record) = &report.broken_record {
        // Undecodable rows carry no usable subject or timestamp.
        let subject = record
            .subject
            .map_or_else(|| "?".to_string(), |subject| subject.to_string());
        let timestamp = record
            .timestamp
            .map_or_else(|| "?".to_string(), |timestamp| timestamp.canonical());
        println!(
            "  record:   seq {} uid {subject} at {timestamp}",
            record.seq_id
        );
    }
}
