//! Baseline persistence for the deltasync engine.
//!
//! Provides the [`BaselineStore`] trait and backend implementations that
//! hold, per client, the key+hash projection of the last committed cycle.
//!
//! # Feature flags
//!
//! | Feature    | Default | Description |
//! |------------|---------|-------------|
//! | `sqlite`   | **yes** | Relational backend via `rusqlite` |
//! | `postgres` | no      | Relational backend via `postgres` |
//! | `mysql`    | no      | Relational backend via `mysql` |

#![warn(clippy::pedantic)]

pub mod backend;
pub mod bucket;
pub mod filesystem;
pub mod ndjson;
pub mod region;
pub mod relational;

pub use backend::{BaselineStore, RelationalStoreExt};
pub use bucket::ObjectBucketStore;
pub use filesystem::FilesystemStore;
#[cfg(feature = "mysql")]
pub use relational::mysql::MysqlStore;
#[cfg(feature = "postgres")]
pub use relational::postgres::PostgresStore;
#[cfg(feature = "sqlite")]
pub use relational::sqlite::SqliteStore;

use std::sync::Arc;

use deltasync_types::{Result, StoreConfig, SyncError};

/// Build a baseline store from configuration.
///
/// The store still needs [`BaselineStore::initialize`] before use.
///
/// # Errors
///
/// Returns [`SyncError::Config`] for invalid settings or a relational kind
/// whose driver feature is not compiled in.
pub fn open_store(config: &StoreConfig) -> Result<Arc<dyn BaselineStore>> {
    config.validate()?;
    match config {
        StoreConfig::Filesystem { path } => Ok(Arc::new(FilesystemStore::new(path)?)),
        StoreConfig::ObjectBucket {
            bucket,
            key_prefix,
            region,
        } => Ok(Arc::new(ObjectBucketStore::new(
            bucket,
            key_prefix.clone(),
            region.clone(),
        )?)),
        StoreConfig::Relational(rel) => match rel.kind {
            #[cfg(feature = "sqlite")]
            Some(deltasync_types::RelationalKind::Sqlite) => {
                Ok(Arc::new(SqliteStore::from_config(rel)?))
            }
            #[cfg(feature = "postgres")]
            Some(deltasync_types::RelationalKind::Postgres) => {
                Ok(Arc::new(PostgresStore::from_config(rel)?))
            }
            #[cfg(feature = "mysql")]
            Some(deltasync_types::RelationalKind::Mysql) => {
                Ok(Arc::new(MysqlStore::from_config(rel)?))
            }
            // Reachable only when the matching driver feature is off.
            #[allow(unreachable_patterns)]
            Some(kind) => Err(SyncError::config(format!(
                "relational backend '{}' is not compiled into this build",
                kind.as_str()
            ))),
            None => Err(SyncError::config("relational store requires a database type")),
        },
    }
}

/// Common imports for typical usage.
pub mod prelude {
    pub use crate::backend::{BaselineStore, RelationalStoreExt};
    pub use crate::open_store;
    pub use deltasync_types::{Delta, FieldSet, HistoryEntry, Result, StoreConfig, SyncError};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_store_rejects_invalid_config() {
        let cfg = StoreConfig::Filesystem { path: String::new() };
        assert!(open_store(&cfg).is_err());
    }

    #[cfg(feature = "sqlite")]
    #[test]
    fn open_store_builds_sqlite() {
        use deltasync_types::RelationalConfig;

        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig::Relational(RelationalConfig {
            kind: Some(deltasync_types::RelationalKind::Sqlite),
            filename: Some(
                dir.path()
                    .join("baseline.db")
                    .to_string_lossy()
                    .into_owned(),
            ),
            ..RelationalConfig::default()
        });
        let store = open_store(&cfg).unwrap();
        assert!(store.as_relational().is_some());
    }

    #[test]
    fn open_store_builds_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = StoreConfig::Filesystem {
            path: dir.path().to_string_lossy().into_owned(),
        };
        let store = open_store(&cfg).unwrap();
        assert!(store.as_relational().is_none());
    }
}
