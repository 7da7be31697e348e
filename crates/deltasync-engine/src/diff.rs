//! In-memory set-based delta strategy.
//!
//! Suitable up to roughly 200k records per side; larger populations should
//! use a relational store, whose delta is computed in SQL.

use std::collections::HashSet;

use deltasync_types::{Delta, FieldSet};

/// Compute `{added, updated, removed}` between two key+hash projections.
///
/// Records without a hash (invalid rows) take no part in the comparison.
/// With an empty primary key there is no way to pair changed records, so
/// everything new-hashed counts as added and everything gone-hashed as
/// removed.
#[must_use]
pub fn set_diff(previous: &[FieldSet], current: &[FieldSet], pk_fields: &[String]) -> Delta {
    let previous_hashes: HashSet<&str> = previous
        .iter()
        .filter_map(|r| r.hash.as_deref())
        .collect();
    let current_hashes: HashSet<&str> = current
        .iter()
        .filter_map(|r| r.hash.as_deref())
        .collect();

    let added_or_updated: Vec<&FieldSet> = current
        .iter()
        .filter(|r| {
            r.hash
                .as_deref()
                .is_some_and(|h| !previous_hashes.contains(h))
        })
        .collect();
    let mut removed_or_updated: Vec<Option<&FieldSet>> = previous
        .iter()
        .filter(|r| {
            r.hash
                .as_deref()
                .is_some_and(|h| !current_hashes.contains(h))
        })
        .map(Some)
        .collect();

    if pk_fields.is_empty() {
        return Delta {
            added: added_or_updated.into_iter().cloned().collect(),
            updated: Vec::new(),
            removed: removed_or_updated.into_iter().flatten().cloned().collect(),
        };
    }

    let mut added = Vec::new();
    let mut updated = Vec::new();
    for candidate in added_or_updated {
        let pk = candidate.pk_string(pk_fields);
        let matches = removed_or_updated
            .iter()
            .filter(|slot| slot.is_some_and(|r| r.pk_string(pk_fields) == pk))
            .count();
        if matches > 1 {
            // Invariant: primary keys are unique within a baseline. Break
            // the tie by insertion order, but make the corruption visible.
            tracing::error!(pk, "duplicate primary key in previous baseline");
        }
        let paired = removed_or_updated
            .iter_mut()
            .find(|slot| slot.is_some_and(|r| r.pk_string(pk_fields) == pk));
        match paired {
            Some(slot) => {
                slot.take();
                updated.push(candidate.clone());
            }
            None => added.push(candidate.clone()),
        }
    }

    Delta {
        added,
        updated,
        removed: removed_or_updated.into_iter().flatten().cloned().collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_types::Field;

    fn rec(id: i64, hash: &str) -> FieldSet {
        let mut r = FieldSet::new(vec![Field::new("id", id)]);
        r.hash = Some(hash.to_string());
        r
    }

    fn rec2(id: i64, username: &str, hash: &str) -> FieldSet {
        let mut r = FieldSet::new(vec![Field::new("id", id), Field::new("username", username)]);
        r.hash = Some(hash.to_string());
        r
    }

    fn pk() -> Vec<String> {
        vec!["id".to_string()]
    }

    fn pks(records: &[FieldSet], pk_fields: &[String]) -> Vec<String> {
        let mut out: Vec<String> = records.iter().map(|r| r.pk_string(pk_fields)).collect();
        out.sort();
        out
    }

    #[test]
    fn pure_add() {
        let delta = set_diff(&[], &[rec(1, "h1"), rec(2, "h2")], &pk());
        assert_eq!(pks(&delta.added, &pk()), vec!["1", "2"]);
        assert!(delta.updated.is_empty());
        assert!(delta.removed.is_empty());
    }

    #[test]
    fn pure_remove() {
        let delta = set_diff(&[rec(1, "h1")], &[], &pk());
        assert!(delta.added.is_empty());
        assert!(delta.updated.is_empty());
        assert_eq!(pks(&delta.removed, &pk()), vec!["1"]);
    }

    #[test]
    fn mixed_change() {
        let previous = vec![rec(1, "ha"), rec(2, "hb"), rec(3, "hc")];
        let current = vec![rec(1, "ha"), rec(3, "hc2"), rec(4, "hd")];
        let delta = set_diff(&previous, &current, &pk());

        assert_eq!(pks(&delta.added, &pk()), vec!["4"]);
        assert_eq!(pks(&delta.updated, &pk()), vec!["3"]);
        assert_eq!(delta.updated[0].hash.as_deref(), Some("hc2"));
        assert_eq!(pks(&delta.removed, &pk()), vec!["2"]);
    }

    #[test]
    fn composite_key_pairing() {
        let pk2 = vec!["id".to_string(), "username".to_string()];
        let previous = vec![
            rec2(6, "jane", "h0"),
            rec2(1, "alice", "h1"),
            rec2(2, "bob", "h2"),
            rec2(3, "charlie", "h3"),
        ];
        let current = vec![
            rec2(2, "bob", "h2"),
            rec2(3, "charlie", "h4"),
            rec2(4, "diana", "h5"),
            rec2(5, "jane", "h6"),
            rec2(6, "bob", "h7"),
        ];
        let delta = set_diff(&previous, &current, &pk2);

        assert_eq!(pks(&delta.added, &pk2), vec!["4|diana", "5|jane", "6|bob"]);
        assert_eq!(pks(&delta.updated, &pk2), vec!["3|charlie"]);
        assert_eq!(delta.updated[0].hash.as_deref(), Some("h4"));
        assert_eq!(pks(&delta.removed, &pk2), vec!["1|alice", "6|jane"]);
    }

    #[test]
    fn unchanged_records_stay_out() {
        let previous = vec![rec(1, "h1")];
        let current = vec![rec(1, "h1")];
        let delta = set_diff(&previous, &current, &pk());
        assert!(delta.is_empty());
    }

    #[test]
    fn unhashed_records_take_no_part() {
        let invalid = FieldSet::new(vec![Field::new("id", 5)]);
        let previous = vec![rec(1, "h1")];
        let current = vec![rec(1, "h1"), invalid];
        let delta = set_diff(&previous, &current, &pk());
        assert!(delta.is_empty());
    }

    #[test]
    fn empty_pk_degenerates() {
        let previous = vec![rec(1, "ha")];
        let current = vec![rec(1, "hb")];
        let delta = set_diff(&previous, &current, &[]);
        // No pairing possible: the change shows as one add and one remove.
        assert_eq!(delta.added.len(), 1);
        assert!(delta.updated.is_empty());
        assert_eq!(delta.removed.len(), 1);
    }

    #[test]
    fn duplicate_previous_pk_pairs_first_by_insertion_order() {
        let previous = vec![rec(1, "ha"), rec(1, "hb")];
        let current = vec![rec(1, "hc")];
        let delta = set_diff(&previous, &current, &pk());
        assert_eq!(delta.updated.len(), 1);
        assert_eq!(delta.updated[0].hash.as_deref(), Some("hc"));
        // The second duplicate stays behind as removed.
        assert_eq!(delta.removed.len(), 1);
        assert_eq!(delta.removed[0].hash.as_deref(), Some("hb"));
    }
}
