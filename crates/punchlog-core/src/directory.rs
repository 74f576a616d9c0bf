//! Read-only subject lookup.
//!
//! Subjects are managed elsewhere; the ledger only needs to know whether a
//! scanned id is enrolled and what to call them in receipts and listings.

use std::collections::HashMap;

use serde::Serialize;

use crate::config::SubjectConfig;
use crate::event::SubjectId;

/// Display name used when a subject is not in the directory.
pub const UNKNOWN_SUBJECT_NAME: &str = "Unknown";

/// A known subject.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SubjectRecord {
    /// Terminal slot id.
    pub uid: SubjectId,
    /// Display name.
    pub name: String,
    /// Optional department.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
}

/// Registry of known subjects.
pub trait SubjectDirectory: Send + Sync {
    /// Looks a subject up by id.
    fn lookup(&self, subject: SubjectId) -> Option<SubjectRecord>;

    /// Display name for listings, falling back to [`UNKNOWN_SUBJECT_NAME`].
    fn display_name(&self, subject: SubjectId) -> String {
        self.lookup(subject)
            .map_or_else(|| UNKNOWN_SUBJECT_NAME.to_string(), |record| record.name)
    }
}

/// Directory loaded once from configuration.
#[derive(Debug, Clone, Default)]
pub struct StaticDirectory {
    subjects: HashMap<SubjectId, SubjectRecord>,
}

impl StaticDirectory {
    /// Builds a directory from configured subjects. Later duplicates win;
    /// configuration validation rejects them before this point.
    #[must_use]
    pub fn from_config(subjects: &[SubjectConfig]) -> Self {
        let subjects = subjects
            .iter()
            .map(|s| {
                let uid = SubjectId(s.uid);
                (
                    uid,
                    SubjectRecord {
                        uid,
                        name: s.name.clone(),
                        department: s.department.clone(),
                    },
                )
            })
            .collect();
        Self { subjects }
    }

    /// Number of enrolled subjects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subjects.len()
    }

    /// Returns `true` if nobody is enrolled.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.subjects.is_empty()
    }
}

impl SubjectDirectory for StaticDirectory {
    fn lookup(&self, subject: SubjectId) -> Option<SubjectRecord> {
        self.subjects.get(&subject).cloned()
    }
}
