//! Cycle orchestrator: pull, map, validate, project, delta, push, repair,
//! commit.

use std::sync::Arc;
use std::time::Instant;

use deltasync_store::BaselineStore;
use deltasync_types::{FieldSet, Result};

use crate::adapters::{Mapped, RecordMapper, SourceAdapter, TargetAdapter};
use crate::cancel::CancelToken;
use crate::diff::set_diff;
use crate::fingerprint::{fingerprint, FingerprintOptions};
use crate::locks::ClientLocks;
use crate::project::project;
use crate::repair::repair;
use crate::result::{CycleCounts, CycleReport};
use crate::validate::validate_record;

/// Wires the external collaborators to the delta core and runs cycles.
///
/// One context serves any number of clients; cycles for different clients
/// may run concurrently, while cycles for the same client serialize on the
/// per-client lock around the delta-through-commit steps.
pub struct CycleContext {
    source: Arc<dyn SourceAdapter>,
    mapper: Arc<dyn RecordMapper>,
    target: Arc<dyn TargetAdapter>,
    store: Arc<dyn BaselineStore>,
    locks: ClientLocks,
}

impl CycleContext {
    #[must_use]
    pub fn new(
        source: Arc<dyn SourceAdapter>,
        mapper: Arc<dyn RecordMapper>,
        target: Arc<dyn TargetAdapter>,
        store: Arc<dyn BaselineStore>,
    ) -> Self {
        Self {
            source,
            mapper,
            target,
            store,
            locks: ClientLocks::new(),
        }
    }

    /// The baseline store this context commits to.
    #[must_use]
    pub fn store(&self) -> &Arc<dyn BaselineStore> {
        &self.store
    }

    /// Run one full cycle for a client.
    ///
    /// # Errors
    ///
    /// Pull, map, and store errors before the push abort the cycle; a
    /// target error during push aborts before the commit (the staged
    /// `current` table and the baseline file are left untouched);
    /// [`SyncError::Cancelled`](deltasync_types::SyncError) is surfaced at
    /// any suspension point except the commit itself, which completes once
    /// begun to avoid torn state.
    #[allow(clippy::too_many_lines)]
    pub async fn run_cycle(&self, client_id: &str, cancel: &CancelToken) -> Result<CycleReport> {
        let start = Instant::now();
        tracing::info!(client_id, "Starting delta cycle");

        // 1. Pull.
        cancel.check("source pull")?;
        let raw = self.source.fetch_raw(cancel).await?;

        // 2. Map.
        let Mapped {
            schema,
            mut records,
        } = self.mapper.map(raw)?;
        let pk_fields = schema.primary_key_fields();
        tracing::debug!(
            client_id,
            records = records.len(),
            pk_fields = ?pk_fields,
            "Mapped source payload"
        );

        // 3. Validate & fingerprint. Never fatal: invalid rows carry their
        // messages and no hash.
        for record in &mut records {
            if validate_record(&schema, record) {
                record.hash = Some(fingerprint(record, FingerprintOptions { sort: false })?);
            }
        }

        // 4. Project onto key+hash.
        let current = project(&records, &pk_fields);
        drop(records);
        let invalid = count_invalid(&current);
        let total_current = current.len() as u64;

        // Steps 5-9 run under the per-client advisory lock.
        let _client_guard = self.locks.acquire(client_id).await;

        // 5. Compute the delta. Relational stores stage current and join in
        // SQL; file-semantics stores diff in memory against the full
        // previous projection, which is then reused for repair.
        let relational = self.store.as_relational();
        let (delta, prefetched_previous) = match relational {
            Some(rel) => {
                cancel
                    .guard(
                        "store current",
                        rel.store_current(client_id, &current, &pk_fields),
                    )
                    .await?;
                let delta = cancel
                    .guard("fetch delta", rel.fetch_delta(client_id, &pk_fields))
                    .await?;
                (delta, None)
            }
            None => {
                let previous = cancel
                    .guard(
                        "fetch previous",
                        self.store.fetch_previous(client_id, &pk_fields, None),
                    )
                    .await?;
                let delta = set_diff(&previous, &current, &pk_fields);
                (delta, Some(previous))
            }
        };

        if delta.is_empty() {
            tracing::info!(client_id, invalid, "No changes detected");
            return Ok(CycleReport {
                client_id: client_id.to_string(),
                counts: CycleCounts {
                    invalid,
                    total_current,
                    ..CycleCounts::default()
                },
                push_status: None,
                no_changes: true,
                duration_secs: start.elapsed().as_secs_f64(),
                message: None,
            });
        }

        let (added, updated, removed) = delta.counts();
        tracing::info!(client_id, added, updated, removed, "Delta computed");

        // 6. Push, in added -> updated -> removed order.
        cancel.check("target push")?;
        let push_result = self.target.push_all(&delta, cancel).await?;
        tracing::info!(
            client_id,
            status = ?push_result.status,
            successes = push_result.successes.len(),
            failures = push_result.failures.len(),
            "Target push finished"
        );

        // 7. Previous rows for repair: the in-memory diff already fetched
        // everything; relational stores fetch only the failure/invalid set.
        let previous_for_repair = match prefetched_previous {
            Some(previous) => previous,
            None => {
                let mut limit_to: Vec<FieldSet> = push_result
                    .failures
                    .iter()
                    .map(|f| FieldSet::new(f.primary_key.clone()))
                    .collect();
                limit_to.extend(current.iter().filter(|r| !r.is_valid()).cloned());
                if limit_to.is_empty() {
                    Vec::new()
                } else {
                    cancel
                        .guard(
                            "fetch previous",
                            self.store
                                .fetch_previous(client_id, &pk_fields, Some(&limit_to)),
                        )
                        .await?
                }
            }
        };

        // 8. Repair.
        let outcome = repair(current, &previous_for_repair, &push_result, &pk_fields);
        if outcome.restored > 0 {
            tracing::warn!(
                client_id,
                restored = outcome.restored,
                "Repair restored prior fingerprints"
            );
        }

        // 9. Commit. Checked before, never interrupted after: a torn
        // baseline is worse than a late one.
        cancel.check("baseline commit")?;
        let committed = self
            .store
            .update_previous(client_id, outcome.repaired, &pk_fields, outcome.restored)
            .await?;

        let duration_secs = start.elapsed().as_secs_f64();
        tracing::info!(
            client_id,
            committed,
            duration_secs,
            "Delta cycle completed"
        );

        Ok(CycleReport {
            client_id: client_id.to_string(),
            counts: CycleCounts {
                added: added as u64,
                updated: updated as u64,
                removed: removed as u64,
                invalid,
                restored: outcome.restored,
                total_current,
            },
            push_status: Some(push_result.status),
            no_changes: false,
            duration_secs,
            message: push_result.message,
        })
    }
}

fn count_invalid(records: &[FieldSet]) -> u64 {
    records.iter().filter(|r| !r.is_valid()).count() as u64
}
