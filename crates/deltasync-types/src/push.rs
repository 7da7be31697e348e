//! Target push result model.

use serde::{Deserialize, Serialize};

use crate::record::Field;

/// Aggregate outcome of a batch push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PushStatus {
    Success,
    Partial,
    Failure,
}

/// Outcome of a single-record push.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SingleStatus {
    Success,
    Failure,
}

/// The CRUD operation a push entry carried.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrudKind {
    Create,
    Update,
    Delete,
}

impl CrudKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

impl std::fmt::Display for CrudKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One record's identity inside a batch result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushEntry {
    /// The record's primary-key fields, in schema key order.
    pub primary_key: Vec<Field>,
    pub crud: CrudKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PushEntry {
    /// The key tuple joined by `|`, matching the stored pk column format.
    #[must_use]
    pub fn pk_string(&self) -> String {
        self.primary_key
            .iter()
            .map(|f| crate::record::scalar_key_text(&f.value))
            .collect::<Vec<_>>()
            .join("|")
    }
}

/// Result of a single-record push operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleResult {
    pub status: SingleStatus,
    pub primary_key: Vec<Field>,
    pub crud: CrudKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a batch push across the three delta groups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchResult {
    pub status: PushStatus,
    pub successes: Vec<PushEntry>,
    pub failures: Vec<PushEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl BatchResult {
    /// Fold per-record results into a batch result, deriving the aggregate
    /// status from the success/failure split.
    #[must_use]
    pub fn from_singles(results: Vec<SingleResult>) -> Self {
        let mut successes = Vec::new();
        let mut failures = Vec::new();
        for r in results {
            let entry = PushEntry {
                primary_key: r.primary_key,
                crud: r.crud,
                message: r.message,
            };
            match r.status {
                SingleStatus::Success => successes.push(entry),
                SingleStatus::Failure => failures.push(entry),
            }
        }
        let status = match (successes.is_empty(), failures.is_empty()) {
            (_, true) => PushStatus::Success,
            (true, false) => PushStatus::Failure,
            (false, false) => PushStatus::Partial,
        };
        Self {
            status,
            successes,
            failures,
            message: None,
        }
    }

    /// An empty all-success result, used when there was nothing to push.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: PushStatus::Success,
            successes: Vec::new(),
            failures: Vec::new(),
            message: None,
        }
    }
}
