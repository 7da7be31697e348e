//! Baseline repair after a push.
//!
//! Failed pushes and invalid rows must not advance the baseline, otherwise
//! the next cycle would consider them synchronized. Repair reverts their
//! fingerprints to the prior baseline (so they re-surface as changed) and
//! drops failed-new records (so they re-surface as added).

use std::collections::HashMap;

use deltasync_types::{BatchResult, FieldSet};

/// Result of a repair pass.
#[derive(Debug)]
pub struct RepairOutcome {
    /// The repaired projection, ready to commit.
    pub repaired: Vec<FieldSet>,
    /// Number of restorations (push failures plus invalid rows handled).
    pub restored: u64,
}

/// Repair the current projection against the prior baseline and a push
/// result. Idempotent: repairing an already-repaired projection changes
/// nothing.
///
/// `previous` may be the full prior baseline or just the rows matching the
/// failure/invalid set (the relational `limit_to` fetch).
#[must_use]
pub fn repair(
    current: Vec<FieldSet>,
    previous: &[FieldSet],
    push_result: &BatchResult,
    pk_fields: &[String],
) -> RepairOutcome {
    let mut current = current;
    let prev_by_pk: HashMap<String, &FieldSet> = previous
        .iter()
        .map(|r| (r.pk_string(pk_fields), r))
        .collect();

    let mut restored = 0u64;
    for failure in &push_result.failures {
        let pk = failure.pk_string();
        restored += 1;
        match prev_by_pk.get(&pk) {
            Some(prior) => {
                // Failed update or delete: revert to the prior fingerprint
                // so the next cycle re-detects the change and retries.
                match current.iter_mut().find(|r| r.pk_string(pk_fields) == pk) {
                    Some(record) => record.hash.clone_from(&prior.hash),
                    None => current.push((*prior).clone()),
                }
                tracing::debug!(pk, crud = %failure.crud, "restored prior fingerprint for failed push");
            }
            None => {
                // Failed new record: drop it so it is not promoted; the
                // source will yield it again next cycle.
                current.retain(|r| r.pk_string(pk_fields) != pk);
                tracing::debug!(pk, crud = %failure.crud, "dropped failed new record");
            }
        }
    }

    // Invalid rows (messages, no hash) were never pushed; treat them the
    // same way so the baseline keeps their last valid fingerprint.
    let mut kept = Vec::with_capacity(current.len());
    for mut record in current {
        if record.hash.is_none() && !record.validation_messages.is_empty() {
            let pk = record.pk_string(pk_fields);
            restored += 1;
            match prev_by_pk.get(&pk) {
                Some(prior) => {
                    record.hash.clone_from(&prior.hash);
                    tracing::debug!(pk, "restored prior fingerprint for invalid row");
                    kept.push(record);
                }
                None => {
                    tracing::debug!(pk, "dropped invalid row with no prior baseline entry");
                }
            }
        } else {
            kept.push(record);
        }
    }

    RepairOutcome {
        repaired: kept,
        restored,
    }
}
