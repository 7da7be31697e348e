//! Relational baseline backends.
//!
//! Per client, two dynamic tables — `client_{id}_current` and
//! `client_{id}_previous`, each `(pk, hash, created_at)` — plus the static
//! `delta_history` audit table. The pk column holds the record's
//! primary-key tuple joined by `|`, which keeps the delta computation a
//! plain three-way join.

use deltasync_types::{FieldSet, Result, SyncError};

#[cfg(feature = "mysql")]
pub mod mysql;
#[cfg(feature = "postgres")]
pub mod postgres;
#[cfg(feature = "sqlite")]
pub mod sqlite;

/// Which per-client table a statement targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    Current,
    Previous,
}

impl TableKind {
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::Current => "current",
            Self::Previous => "previous",
        }
    }
}

/// Replace every non-alphanumeric character with `_` to produce a SQL-safe
/// identifier fragment.
#[must_use]
pub fn sanitize_client_id(client_id: &str) -> String {
    client_id
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Per-client table name, e.g. `client_acme_corp_previous`.
#[must_use]
pub fn table_name(client_id: &str, kind: TableKind) -> String {
    format!("client_{}_{}", sanitize_client_id(client_id), kind.suffix())
}

/// Reject an empty primary key: the pk column would collapse every row onto
/// the empty tuple.
pub(crate) fn require_pk_fields(pk_fields: &[String]) -> Result<()> {
    if pk_fields.is_empty() {
        Err(SyncError::config(
            "relational store requires at least one primary-key field",
        ))
    } else {
        Ok(())
    }
}

/// Project records onto `(pk, hash)` rows, skipping records without a hash.
pub(crate) fn projection_rows(data: &[FieldSet], pk_fields: &[String]) -> Vec<(String, String)> {
    data.iter()
        .filter_map(|record| {
            let hash = record.hash.as_deref()?;
            if hash.is_empty() {
                return None;
            }
            Some((record.pk_string(pk_fields), hash.to_string()))
        })
        .collect()
}
