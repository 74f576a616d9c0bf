//! Shared handler state.

use std::sync::Arc;

use punchlog_core::append::AppendEngine;
use punchlog_core::auth::ApiKeyAuthorizer;
use punchlog_core::config::PunchlogConfig;
use punchlog_core::directory::{StaticDirectory, SubjectDirectory};
use punchlog_core::ingest::IngestService;
use punchlog_core::ledger::LedgerStore;
use punchlog_core::time::Clock;
use punchlog_core::verify::ChainVerifier;

use crate::metrics::SharedMetricsRegistry;

/// Everything a request handler needs. Cheap to clone.
#[derive(Clone)]
pub struct AppState {
    /// Authenticated append path.
    pub ingest: Arc<IngestService>,
    /// Full-chain verifier.
    pub verifier: Arc<ChainVerifier>,
    /// Store for read-only listings.
    pub store: Arc<dyn LedgerStore>,
    /// Subject names for listings.
    pub directory: Arc<dyn SubjectDirectory>,
    /// `None` when metrics are disabled.
    pub metrics: Option<SharedMetricsRegistry>,
}

impl AppState {
    /// Wires the core services from configuration.
    #[must_use]
    pub fn from_config(
        config: &PunchlogConfig,
        store: Arc<dyn LedgerStore>,
        clock: Arc<dyn Clock>,
        authorizer: ApiKeyAuthorizer,
        metrics: Option<SharedMetricsRegistry>,
    ) -> Self {
        let directory: Arc<dyn SubjectDirectory> =
            Arc::new(StaticDirectory::from_config(&config.subjects));
        let engine = Arc::new(AppendEngine::new(
            Arc::clone(&store),
            clock,
            config.ledger.append_config(),
        ));
        let ingest = IngestService::new(engine, Arc::clone(&directory), authorizer)
            .with_default_device_tag(config.daemon.default_device_tag.clone());

        Self {
            ingest: Arc::new(ingest),
            verifier: Arc::new(ChainVerifier::new(Arc::clone(&store))),
            store,
            directory,
            metrics,
        }
    }
}
