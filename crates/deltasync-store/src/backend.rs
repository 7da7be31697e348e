//! Baseline store trait definition.
//!
//! [`BaselineStore`] defines the storage contract for per-client key+hash
//! baselines. The relational extension ([`RelationalStoreExt`]) adds the
//! staging and SQL-delta operations only database backends can offer;
//! callers discover it through [`BaselineStore::as_relational`].

use async_trait::async_trait;
use deltasync_types::{Delta, FieldSet, HistoryEntry, Result};

/// Storage contract for the previous-cycle baseline.
///
/// Implementations must be `Send + Sync` for use behind
/// `Arc<dyn BaselineStore>`.
#[async_trait]
pub trait BaselineStore: Send + Sync {
    /// Prepare the backend (create the root directory, probe the bucket,
    /// run idempotent DDL). Must be called before any other operation.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`](deltasync_types::SyncError) for unusable
    /// settings, [`SyncError::Io`](deltasync_types::SyncError) on backend
    /// failure.
    async fn initialize(&self) -> Result<()>;

    /// Read the previous baseline projection for a client.
    ///
    /// Returns an empty sequence when the client has no committed baseline
    /// yet. `limit_to` is a server-side filter hint honored by relational
    /// backends; file-semantics backends return the full projection and the
    /// caller filters in memory.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInitialized`](deltasync_types::SyncError) if
    /// called before [`initialize`](Self::initialize), otherwise
    /// [`SyncError::Io`](deltasync_types::SyncError) /
    /// [`SyncError::Parse`](deltasync_types::SyncError) on backend failure.
    async fn fetch_previous(
        &self,
        client_id: &str,
        pk_fields: &[String],
        limit_to: Option<&[FieldSet]>,
    ) -> Result<Vec<FieldSet>>;

    /// Atomically replace the previous baseline with `data`, returning the
    /// stored record count.
    ///
    /// An empty `data` removes the baseline. `failure_count` is the number
    /// of repair restorations this cycle; file-semantics backends ignore it
    /// (the caller already holds the repaired projection), the relational
    /// backend uses it to choose between promoting `current` verbatim and
    /// rewriting both tables from `data`.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInitialized`](deltasync_types::SyncError) if
    /// called before [`initialize`](Self::initialize), otherwise
    /// [`SyncError::Io`](deltasync_types::SyncError) on backend failure.
    async fn update_previous(
        &self,
        client_id: &str,
        data: Vec<FieldSet>,
        pk_fields: &[String],
        failure_count: u64,
    ) -> Result<u64>;

    /// The relational extension, when this backend offers it.
    fn as_relational(&self) -> Option<&dyn RelationalStoreExt> {
        None
    }
}

/// Staging and SQL-delta operations of relational backends.
#[async_trait]
pub trait RelationalStoreExt: Send + Sync {
    /// Promote the staged `current` table to `previous` and stage `data`
    /// (rows with a non-empty hash) as the new `current`, in one
    /// transaction. Returns the staged row count.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`](deltasync_types::SyncError) when
    /// `pk_fields` is empty (the pk column would collapse every row onto
    /// one key), [`SyncError::NotInitialized`](deltasync_types::SyncError)
    /// before `initialize`, [`SyncError::Io`](deltasync_types::SyncError)
    /// on database failure.
    async fn store_current(
        &self,
        client_id: &str,
        data: &[FieldSet],
        pk_fields: &[String],
    ) -> Result<u64>;

    /// Compute `{added, updated, removed}` by joining `current` against
    /// `previous`, appending one history row.
    ///
    /// # Errors
    ///
    /// Same classes as [`store_current`](Self::store_current).
    async fn fetch_delta(&self, client_id: &str, pk_fields: &[String]) -> Result<Delta>;

    /// Most recent history rows for a client, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NotInitialized`](deltasync_types::SyncError)
    /// before `initialize`, [`SyncError::Io`](deltasync_types::SyncError)
    /// on database failure.
    async fn get_history(&self, client_id: &str, limit: u32) -> Result<Vec<HistoryEntry>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Verify the trait is object-safe (can be used as `dyn BaselineStore`).
    #[test]
    fn trait_is_object_safe() {
        fn _assert_object_safe(_: &dyn BaselineStore) {}
        fn _assert_ext_object_safe(_: &dyn RelationalStoreExt) {}
    }
}
