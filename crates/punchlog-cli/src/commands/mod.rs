//! Subcommand implementations.

pub mod append;
pub mod log;
pub mod show;
pub mod tail;
pub mod verify;

use std::path::{Path, PathBuf};

use anyhow::{Context as _, Result};
use punchlog_core::config::PunchlogConfig;
use punchlog_core::ledger::SqliteLedgerStore;

/// Where the ledger lives and how to open it.
#[derive(Debug)]
pub struct Context {
    config_path: PathBuf,
    db_override: Option<PathBuf>,
}

impl Context {
    pub fn new(config_path: &Path, db_override: Option<&Path>) -> Self {
        Self {
            config_path: config_path.to_path_buf(),
            db_override: db_override.map(Path::to_path_buf),
        }
    }

    /// Loads the configuration file, or defaults when it does not exist.
    pub fn config(&self) -> Result<PunchlogConfig> {
        if self.config_path.exists() {
            PunchlogConfig::from_file(&self.config_path).with_context(|| {
                format!("failed to load config from {}", self.config_path.display())
            })
        } else {
            Ok(PunchlogConfig::default())
        }
    }

    /// Opens the ledger for appending, creating it if needed.
    pub fn open_store(&self) -> Result<(SqliteLedgerStore, PunchlogConfig)> {
        let config = self.config()?;
        let path = self.ledger_path(&config);
        let store = SqliteLedgerStore::open(&path, &config.ledger.store_options())
            .with_context(|| format!("failed to open ledger at {}", path.display()))?;
        Ok((store, config))
    }

    /// Opens an existing ledger without write access.
    pub fn open_read_only(&self) -> Result<SqliteLedgerStore> {
        let config = self.config()?;
        let path = self.ledger_path(&config);
        SqliteLedgerStore::open_read_only(&path, &config.ledger.store_options())
            .with_context(|| format!("failed to open ledger at {}", path.display()))
    }

    fn ledger_path(&self, config: &PunchlogConfig) -> PathBuf {
        self.db_override
            .clone()
            .unwrap_or_else(|| config.daemon.ledger_db.clone())
    }
}

/// Prints a value as pretty JSON.
pub fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value).context("failed to serialize output")?;
    println!("{text}");
    Ok(())
}
