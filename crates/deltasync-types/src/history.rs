//! Delta-cycle history rows (relational backend only).

use serde::{Deserialize, Serialize};

/// Metadata attached to one history row.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeltaMetadata {
    pub computation_time_ms: u64,
    pub total_current: u64,
    pub total_previous: u64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notes: Vec<String>,
}

/// One audit row of the `delta_history` table.
///
/// `created_at` is an ISO-8601 UTC string; backends handle timestamp
/// formatting internally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: String,
    pub client_id: String,
    pub added_count: u64,
    pub updated_count: u64,
    pub removed_count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<DeltaMetadata>,
    pub created_at: String,
}
