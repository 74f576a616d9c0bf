//! The authenticated append boundary used by terminals.
//!
//! [`IngestService::ingest`] runs the checks that belong outside the ledger
//! (credential, enrolled subject, well-formed timestamp) and then hands the
//! scan to the [`AppendEngine`]. Its error type is deliberately coarse:
//! terminals only need to know whether to fix the request or retry later.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::append::{AppendEngine, AppendError, AppendRequest};
use crate::auth::ApiKeyAuthorizer;
use crate::directory::SubjectDirectory;
use crate::event::{AttendanceStatus, SubjectId};
use crate::time::{LedgerTime, TimestampInput};

/// A scan as reported by a terminal.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestRequest {
    /// Terminal slot id.
    #[serde(rename = "uid")]
    pub subject: SubjectId,
    /// When the scan happened; omitted means now.
    #[serde(default)]
    pub timestamp: Option<TimestampInput>,
    /// Terminal identifier.
    #[serde(default)]
    pub device_tag: Option<String>,
}

/// What the terminal shows after a successful scan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReceipt {
    /// Name from the directory.
    pub subject_display_name: String,
    /// Status the ledger assigned.
    pub resolved_status: AttendanceStatus,
    /// Timestamp recorded.
    pub timestamp: LedgerTime,
    /// Hash of the new event.
    pub hash: String,
}

/// Errors returned to terminals.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum IngestError {
    /// Missing or wrong credential.
    #[error("unauthorized")]
    Unauthorized,

    /// The subject is not enrolled.
    #[error("unknown subject {subject}")]
    UnknownSubject {
        /// The rejected id.
        subject: SubjectId,
    },

    /// The timestamp is malformed, out of range, or before the ledger tail.
    #[error("invalid timestamp: {reason}")]
    InvalidTimestamp {
        /// Why it was rejected.
        reason: String,
    },

    /// The ledger could not take the event right now. Safe to retry.
    #[error("ledger unavailable: {source}")]
    StoreUnavailable {
        /// Underlying append failure.
        #[source]
        source: AppendError,
    },
}

/// Authenticated entry point for terminal scans.
pub struct IngestService {
    engine: Arc<AppendEngine>,
    directory: Arc<dyn SubjectDirectory>,
    authorizer: ApiKeyAuthorizer,
    default_device_tag: Option<String>,
}

impl IngestService {
    /// Creates the service.
    #[must_use]
    pub fn new(
        engine: Arc<AppendEngine>,
        directory: Arc<dyn SubjectDirectory>,
        authorizer: ApiKeyAuthorizer,
    ) -> Self {
        Self {
            engine,
            directory,
            authorizer,
            default_device_tag: None,
        }
    }

    /// Tag recorded when the terminal sends none.
    #[must_use]
    pub fn with_default_device_tag(mut self, tag: impl Into<String>) -> Self {
        self.default_device_tag = Some(tag.into());
        self
    }

    /// The directory used for subject checks.
    #[must_use]
    pub fn directory(&self) -> &Arc<dyn SubjectDirectory> {
        &self.directory
    }

    /// Checks a credential without touching the ledger.
    #[must_use]
    pub fn authorizes(&self, credential: Option<&str>) -> bool {
        self.authorizer.authorize(credential)
    }

    /// Authenticates, validates, and appends one scan.
    pub fn ingest(
        &self,
        credential: Option<&str>,
        request: IngestRequest,
    ) -> Result<IngestReceipt, IngestError> {
        if !self.authorizer.authorize(credential) {
            warn!(subject = %request.subject, "rejected ingest with missing or invalid API key");
            return Err(IngestError::Unauthorized);
        }

        let Some(record) = self.directory.lookup(request.subject) else {
            warn!(subject = %request.subject, "rejected ingest for unknown subject");
            return Err(IngestError::UnknownSubject {
                subject: request.subject,
            });
        };

        let timestamp = request
            .timestamp
            .as_ref()
            .map(TimestampInput::resolve)
            .transpose()
            .map_err(|e| IngestError::InvalidTimestamp {
                reason: e.to_string(),
            })?;

        let device_tag = request
            .device_tag
            .filter(|tag| !tag.is_empty())
            .or_else(|| self.default_device_tag.clone());

        let append = AppendRequest {
            subject: request.subject,
            timestamp,
            device_tag,
        };
        let event = self.engine.append(append).map_err(|e| match e {
            AppendError::TimestampBeforeTail { .. } => IngestError::InvalidTimestamp {
                reason: e.to_string(),
            },
            other => IngestError::StoreUnavailable { source: other },
        })?;

        Ok(IngestReceipt {
            subject_display_name: record.name,
            resolved_status: event.status,
            timestamp: event.timestamp,
            hash: event.hash,
        })
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;
    use crate::append::AppendConfig;
    use crate::config::SubjectConfig;
    use crate::directory::StaticDirectory;
    use crate::ledger::{LedgerStore, SqliteLedgerStore};
    use crate::time::ManualClock;

    const KEY: &str = "terminal-key";

    fn service() -> (IngestService, Arc<SqliteLedgerStore>) {
        let store = Arc::new(SqliteLedgerStore::in_memory().unwrap());
        let engine = Arc::new(AppendEngine::new(
            store.clone(),
            Arc::new(ManualClock::at_millis(1_709_283_600_000)),
            AppendConfig::default(),
        ));
        let directory = Arc::new(StaticDirectory::from_config(&[SubjectConfig {
            uid: 7,
            name: "Ada Lovelace".to_string(),
            department: None,
        }]));
        let authorizer = ApiKeyAuthorizer::new(Some(SecretString::from(KEY.to_string())));
        let service =
            IngestService::new(engine, directory, authorizer).with_default_device_tag("ESP32_DEV_V1");
        (service, store)
    }

    fn scan(subject: u32) -> IngestRequest {
        IngestRequest {
            subject: SubjectId(subject),
            timestamp: None,
            device_tag: None,
        }
    }

    #[test]
    fn ingest_returns_receipt() {
        let (service, store) = service();

        let receipt = service.ingest(Some(KEY), scan(7)).unwrap();

        assert_eq!(receipt.subject_display_name, "Ada Lovelace");
        assert_eq!(receipt.resolved_status, AttendanceStatus::CheckIn);
        assert_eq!(receipt.timestamp.canonical(), "2024-03-01T09:00:00.000Z");

        let stored = store.tail().unwrap().unwrap();
        assert_eq!(stored.hash, receipt.hash);
        assert_eq!(store.read_one(stored.seq_id).unwrap().device_tag, "ESP32_DEV_V1");
    }

    #[test]
    fn terminal_device_tag_wins_over_default() {
        let (service, store) = service();
        let mut request = scan(7);
        request.device_tag = Some("LOBBY".to_string());

        service.ingest(Some(KEY), request).unwrap();
        assert_eq!(store.read_recent(1).unwrap()[0].device_tag, "LOBBY");
    }

    #[test]
    fn wrong_key_is_unauthorized_and_writes_nothing() {
        let (service, store) = service();

        assert!(matches!(
            service.ingest(Some("guess"), scan(7)),
            Err(IngestError::Unauthorized)
        ));
        assert!(matches!(
            service.ingest(None, scan(7)),
            Err(IngestError::Unauthorized)
        ));
        assert_eq!(store.stats().unwrap().event_count, 0);

        assert!(service.authorizes(Some(KEY)));
        assert!(!service.authorizes(Some("guess")));
        assert!(!service.authorizes(None));
    }

    #[test]
    fn unknown_subject_is_rejected() {
        let (service, store) = service();

        let err = service.ingest(Some(KEY), scan(8)).unwrap_err();
        assert!(matches!(
            err,
            IngestError::UnknownSubject {
                subject: SubjectId(8)
            }
        ));
        assert_eq!(store.stats().unwrap().event_count, 0);
    }

    #[test]
    fn malformed_timestamp_is_invalid() {
        let (service, _store) = service();
        let mut request = scan(7);
        request.timestamp = Some(TimestampInput::Text("not a time".to_string()));

        assert!(matches!(
            service.ingest(Some(KEY), request),
            Err(IngestError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn backdated_timestamp_is_invalid() {
        let (service, _store) = service();
        service.ingest(Some(KEY), scan(7)).unwrap();

        let mut request = scan(7);
        request.timestamp = Some(TimestampInput::Text("2024-02-29T09:00:00Z".to_string()));
        assert!(matches!(
            service.ingest(Some(KEY), request),
            Err(IngestError::InvalidTimestamp { .. })
        ));
    }

    #[test]
    fn request_deserializes_terminal_payload() {
        let request: IngestRequest = serde_json::from_str(
            r#"{"uid": 7, "timestamp": 1709283600000, "deviceTag": "ESP32_DEV_V1"}"#,
        )
        .unwrap();
        assert_eq!(request.subject, SubjectId(7));
        assert_eq!(request.timestamp, Some(TimestampInput::Millis(1_709_283_600_000)));
        assert_eq!(request.device_tag.as_deref(), Some("ESP32_DEV_V1"));

        let minimal: IngestRequest = serde_json::from_str(r#"{"uid": 7}"#).unwrap();
        assert_eq!(minimal.timestamp, None);
    }

    #[test]
    fn receipt_serializes_camel_case() {
        let (service, _store) = service();
        let receipt = service.ingest(Some(KEY), scan(7)).unwrap();
        let json = serde_json::to_value(&receipt).unwrap();
        assert_eq!(json["subjectDisplayName"], "Ada Lovelace");
        assert_eq!(json["resolvedStatus"], "In");
        assert_eq!(json["timestamp"], "2024-03-01T09:00:00.000Z");
    }
}
