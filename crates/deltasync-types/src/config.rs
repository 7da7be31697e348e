//! Baseline-store configuration.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SyncError};

/// Which relational dialect a [`RelationalConfig`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationalKind {
    Sqlite,
    Postgres,
    Mysql,
}

impl RelationalKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sqlite => "sqlite",
            Self::Postgres => "postgres",
            Self::Mysql => "mysql",
        }
    }
}

/// Connection settings for the relational backend.
///
/// `filename` applies to sqlite; host/port/credentials to the server
/// dialects. `auto_sync` controls whether `initialize()` runs the
/// idempotent DDL; `logging` enables statement-level debug events.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RelationalConfig {
    #[serde(rename = "type")]
    pub kind: Option<RelationalKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filename: Option<String>,
    #[serde(default)]
    pub ssl: bool,
    #[serde(default = "default_true")]
    pub auto_sync: bool,
    #[serde(default)]
    pub logging: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RelationalConfig {
    fn default() -> Self {
        Self {
            kind: None,
            host: None,
            port: None,
            username: None,
            password: None,
            database: None,
            filename: None,
            ssl: false,
            auto_sync: true,
            logging: false,
        }
    }
}

/// Backend selection for the baseline store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum StoreConfig {
    /// All client data under `{path}/{client_id}/previous-input.ndjson`.
    Filesystem { path: String },
    /// Objects at `{key_prefix}/{client_id}/previous-input.ndjson`.
    ObjectBucket {
        bucket: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key_prefix: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        region: Option<String>,
    },
    /// Per-client `current`/`previous` tables plus the history table.
    Relational(RelationalConfig),
}

impl StoreConfig {
    /// Reject configurations the backends cannot operate with.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] for an empty path or bucket name, a
    /// relational config without a dialect, or a sqlite config without a
    /// filename.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Filesystem { path } if path.trim().is_empty() => {
                Err(SyncError::config("filesystem store path must not be empty"))
            }
            Self::ObjectBucket { bucket, .. } if bucket.trim().is_empty() => {
                Err(SyncError::config("bucket name must not be empty"))
            }
            Self::Relational(rel) => match rel.kind {
                None => Err(SyncError::config("relational store requires a database type")),
                Some(RelationalKind::Sqlite) if rel.filename.as_deref().map_or(true, str::is_empty) => {
                    Err(SyncError::config("sqlite store requires a filename"))
                }
                Some(_) => Ok(()),
            },
            _ => Ok(()),
        }
    }
}
