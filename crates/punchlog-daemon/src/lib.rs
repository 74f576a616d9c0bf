//! punchlog-daemon - HTTP front end for the attendance ledger.
//!
//! Terminals post scans to `POST /api/ingest`; auditors call
//! `GET /api/verify-chain`. The daemon holds no ledger state of its own:
//! every request goes through the core services in [`state::AppState`].
//!
//! | Route | Purpose |
//! |-------|---------|
//! | `POST /api/ingest` | Append a scan (requires `x-api-key`) |
//! | `GET /api/verify-chain` | Verify the whole chain |
//! | `GET /api/attendance` | Most recent records, newest first |
//! | `GET /healthz` | Liveness |
//! | `GET /metrics` | Prometheus metrics, when enabled |

pub mod error;
pub mod handlers;
pub mod metrics;
pub mod state;

use axum::Router;
use axum::routing::{get, post};

pub use crate::error::ApiError;
pub use crate::state::AppState;

/// Builds the daemon router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/ingest", post(handlers::ingest))
        .route("/api/verify-chain", get(handlers::verify_chain))
        .route("/api/attendance", get(handlers::attendance))
        .route("/healthz", get(handlers::healthz))
        .route("/metrics", get(handlers::metrics))
        .with_state(state)
}
