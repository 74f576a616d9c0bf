//! HTTP handlers.
//!
//! Ledger calls are synchronous `SQLite` work, so every handler that
//! touches the store runs it on the blocking pool.

use std::time::Instant;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use punchlog_core::directory::{SubjectRecord, UNKNOWN_SUBJECT_NAME};
use punchlog_core::ingest::{IngestError, IngestReceipt, IngestRequest};
use punchlog_core::verify::VerificationReport;
use punchlog_core::{AttendanceStatus, LedgerTime, SubjectId};
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::ApiError;
use crate::state::AppState;

/// Header carrying the terminal's API key.
pub const API_KEY_HEADER: &str = "x-api-key";

/// Default number of records returned by `GET /api/attendance`.
pub const DEFAULT_ATTENDANCE_LIMIT: usize = 20;

/// Upper bound for `GET /api/attendance?limit=`.
pub const MAX_ATTENDANCE_LIMIT: usize = 500;

/// Body of a successful ingest.
#[derive(Debug, Serialize)]
pub struct IngestResponse {
    /// Always `"Success"`.
    pub message: &'static str,
    /// The receipt.
    #[serde(flatten)]
    pub receipt: IngestReceipt,
}

/// `POST /api/ingest`
pub async fn ingest(
    State(state): State<AppState>,
    headers: HeaderMap,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let started = Instant::now();
    let result = ingest_inner(&state, &headers, payload).await;

    if let Some(metrics) = &state.metrics {
        let metrics = metrics.ledger_metrics();
        metrics.observe_append_latency(started.elapsed().as_secs_f64());
        match &result {
            Ok(response) => metrics.event_appended(response.receipt.resolved_status.label()),
            Err(err) => metrics.append_rejected(err.code()),
        }
    }
    result
}

async fn ingest_inner(
    state: &AppState,
    headers: &HeaderMap,
    payload: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, ApiError> {
    let credential = headers
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);

    let request = match payload {
        Ok(Json(request)) => request,
        // A caller without a valid key learns nothing about the body format.
        Err(_) if !state.ingest.authorizes(credential.as_deref()) => {
            warn!("rejected malformed ingest with missing or invalid API key");
            return Err(ApiError::Unauthorized);
        },
        Err(rejection) => return Err(ApiError::BadRequest(rejection.body_text())),
    };

    let service = state.ingest.clone();
    let receipt = tokio::task::spawn_blocking(move || {
        service.ingest(credential.as_deref(), request)
    })
    .await
    .map_err(|e| {
        error!(error = %e, "ingest task failed");
        ApiError::Internal(e.to_string())
    })?
    .map_err(|e| {
        if let IngestError::StoreUnavailable { source } = &e {
            error!(error = %source, "ingest could not reach the ledger");
        }
        ApiError::from(e)
    })?;

    Ok(Json(IngestResponse {
        message: "Success",
        receipt,
    }))
}

/// Body of `GET /api/verify-chain`.
#[derive(Debug, Serialize)]
pub struct VerifyResponse {
    /// The verification report.
    #[serde(flatten)]
    pub report: VerificationReport,
    /// Human-readable verdict.
    pub message: &'static str,
}

/// `GET /api/verify-chain`
pub async fn verify_chain(State(state): State<AppState>) -> Result<Json<VerifyResponse>, ApiError> {
    let verifier = state.verifier.clone();
    let outcome = tokio::task::spawn_blocking(move || verifier.verify())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let metrics = state.metrics.as_ref().map(|m| m.ledger_metrics());
    match outcome {
        Ok(report) => {
            if let Some(metrics) = metrics {
                metrics.verification_completed(if report.valid { "valid" } else { "broken" });
            }
            Ok(Json(VerifyResponse {
                message: report.message(),
                report,
            }))
        },
        Err(e) => {
            error!(error = %e, "chain verification could not read the ledger");
            if let Some(metrics) = metrics {
                metrics.verification_completed("error");
            }
            Err(ApiError::StoreUnavailable(e.to_string()))
        },
    }
}

/// Query string of `GET /api/attendance`.
#[derive(Debug, Default, Deserialize)]
pub struct AttendanceQuery {
    /// Number of records, newest first.
    pub limit: Option<usize>,
}

/// One row of `GET /api/attendance`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRow {
    /// Storage sequence number.
    pub seq_id: u64,
    /// Subject id.
    pub uid: SubjectId,
    /// Directory name, `"Unknown"` when absent.
    pub name: String,
    /// Directory department, `"N/A"` when absent.
    pub department: String,
    /// Recorded timestamp.
    pub timestamp: LedgerTime,
    /// Recorded status.
    pub status: AttendanceStatus,
    /// Event hash.
    pub hash: String,
    /// Hash of the preceding event.
    pub previous_hash: String,
    /// Terminal that reported the scan.
    pub device_tag: String,
}

/// Body of `GET /api/attendance`.
#[derive(Debug, Serialize)]
pub struct AttendanceResponse {
    /// Always `true`.
    pub success: bool,
    /// Most recent records.
    pub data: Vec<AttendanceRow>,
}

/// `GET /api/attendance`
pub async fn attendance(
    State(state): State<AppState>,
    Query(query): Query<AttendanceQuery>,
) -> Result<Json<AttendanceResponse>, ApiError> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ATTENDANCE_LIMIT)
        .min(MAX_ATTENDANCE_LIMIT);

    let store = state.store.clone();
    let events = tokio::task::spawn_blocking(move || store.read_recent(limit))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| {
            error!(error = %e, "failed to list attendance");
            ApiError::StoreUnavailable(e.to_string())
        })?;

    let data = events
        .into_iter()
        .map(|event| {
            let record = state.directory.lookup(event.subject);
            let (name, department) = match record {
                Some(SubjectRecord {
                    name, department, ..
                }) => (name, department.unwrap_or_else(|| "N/A".to_string())),
                None => (UNKNOWN_SUBJECT_NAME.to_string(), "N/A".to_string()),
            };
            AttendanceRow {
                seq_id: event.seq_id,
                uid: event.subject,
                name,
                department,
                timestamp: event.timestamp,
                status: event.status,
                hash: event.hash,
                previous_hash: event.previous_hash,
                device_tag: event.device_tag,
            }
        })
        .collect();

    Ok(Json(AttendanceResponse {
        success: true,
        data,
    }))
}

/// `GET /healthz`
pub async fn healthz() -> &'static str {
    "ok"
}

/// `GET /metrics`
pub async fn metrics(State(state): State<AppState>) -> Response {
    let Some(registry) = state.metrics.as_ref() else {
        return StatusCode::NOT_FOUND.into_response();
    };
    match registry.encode_text() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!("Failed to encode metrics: {}", e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Failed to encode metrics: {e}"),
            )
                .into_response()
        },
    }
}
