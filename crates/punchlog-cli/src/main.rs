//! punchlog - attendance ledger tools
//!
//! Works directly on the ledger file; no daemon is needed. `verify` opens
//! the file read-only and is safe to run against a live ledger.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

/// punchlog - hash-chained attendance ledger tools
#[derive(Parser, Debug)]
#[command(name = "punchlog")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "punchlog.toml", global = true)]
    config: PathBuf,

    /// Path to the ledger database (overrides `daemon.ledger_db`)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Verify the whole chain
    ///
    /// Exit codes: 0 valid, 1 broken, 2 could not read the ledger.
    Verify {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Record a scan (operator back-fill)
    Append {
        /// Subject id
        uid: u32,

        /// RFC 3339 timestamp or epoch milliseconds; defaults to now
        #[arg(long)]
        at: Option<String>,

        /// Device tag to record
        #[arg(long, default_value = "CLI")]
        device_tag: String,

        /// Print the stored event as JSON
        #[arg(long)]
        json: bool,
    },

    /// List the most recent events, newest first
    Log {
        /// Number of events to show
        #[arg(short = 'n', long, default_value = "20")]
        limit: usize,

        /// Print events as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the chain tail and ledger statistics
    Tail {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show one event and check it against its predecessor
    Show {
        /// Sequence id of the event
        seq_id: u64,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let ctx = commands::Context::new(&cli.config, cli.db.as_deref());

    match cli.command {
        Commands::Verify { json } => {
            // Verification uses exit codes 0=valid, 1=broken, 2=error; exit
            // directly so anyhow does not flatten them to 1.
            let exit_code = commands::verify::run(&ctx, json);
            std::process::exit(i32::from(exit_code));
        },
        Commands::Append {
            uid,
            at,
            device_tag,
            json,
        } => commands::append::run(&ctx, uid, at.as_deref(), &device_tag, json),
        Commands::Log { limit, json } => commands::log::run(&ctx, limit, json),
        Commands::Tail { json } => commands::tail::run(&ctx, json),
        Commands::Show { seq_id, json } => commands::show::run(&ctx, seq_id, json),
    }
}
