//! External collaborator contracts: source, mapper, target.
//!
//! The engine owns none of these; a deployment wires its own adapters into
//! a [`CycleContext`](crate::cycle::CycleContext). Only the shapes are
//! fixed here, plus the batch-push fallback every target gets for free.

use async_trait::async_trait;
use deltasync_types::{BatchResult, CrudKind, Delta, FieldSet, Result, Schema, SingleResult};

use crate::cancel::CancelToken;

/// Opaque payload handed from the source to the mapper.
pub type RawPayload = serde_json::Value;

/// The mapper's output: a schema and the full record population, in an
/// order the mapper chooses and fingerprinting respects.
#[derive(Debug)]
pub struct Mapped {
    pub schema: Schema,
    pub records: Vec<FieldSet>,
}

/// Produces the raw upstream payload for one cycle.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Fetch the complete population from the upstream system.
    ///
    /// # Errors
    ///
    /// Any error aborts the cycle; honor `cancel` and return
    /// [`SyncError::Cancelled`](deltasync_types::SyncError) when it fires.
    async fn fetch_raw(&self, cancel: &CancelToken) -> Result<RawPayload>;
}

/// Converts the raw payload into the canonical record model.
pub trait RecordMapper: Send + Sync {
    /// Map a raw payload to `(schema, records)`.
    ///
    /// # Errors
    ///
    /// Any error aborts the cycle.
    fn map(&self, raw: RawPayload) -> Result<Mapped>;
}

/// Accepts per-record create/update/delete operations.
///
/// `push_one` is required; `push_all` is optional — the default iterates
/// `push_one` over the groups in `added`, `updated`, `removed` order, which
/// is also the order targets must assume.
#[async_trait]
pub trait TargetAdapter: Send + Sync {
    /// Push a single key+hash record with its CRUD kind.
    ///
    /// Per-record rejections belong in the returned
    /// [`SingleResult`] with failure status; a returned error means the
    /// target itself is unusable and aborts the cycle before commit.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`](deltasync_types::SyncError) only for
    /// non-record-scoped failures (connection loss, cancellation).
    async fn push_one(
        &self,
        record: &FieldSet,
        crud: CrudKind,
        cancel: &CancelToken,
    ) -> Result<SingleResult>;

    /// Push the whole delta in one batch.
    ///
    /// # Errors
    ///
    /// Same contract as [`push_one`](Self::push_one): record-level failures
    /// go in the [`BatchResult`], returned errors abort the cycle.
    async fn push_all(&self, delta: &Delta, cancel: &CancelToken) -> Result<BatchResult> {
        let groups = [
            (&delta.added, CrudKind::Create),
            (&delta.updated, CrudKind::Update),
            (&delta.removed, CrudKind::Delete),
        ];
        let mut results = Vec::new();
        for (records, crud) in groups {
            for record in records.iter() {
                cancel.check("target push")?;
                results.push(self.push_one(record, crud, cancel).await?);
            }
        }
        Ok(BatchResult::from_singles(results))
    }
}
