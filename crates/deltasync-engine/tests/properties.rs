//! Property suite for the delta core: fingerprint laws, delta
//! partitioning, and repair idempotence.

use std::collections::{BTreeMap, BTreeSet};

use deltasync_engine::{fingerprint, repair, set_diff, FingerprintOptions};
use deltasync_types::{BatchResult, CrudKind, Field, FieldSet, PushEntry, PushStatus, Value};
use proptest::prelude::*;

fn scalar_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::from),
        (-1_000_000i64..1_000_000).prop_map(Value::from),
        "[a-z0-9]{0,8}".prop_map(Value::from),
    ]
}

fn field_list() -> impl Strategy<Value = Vec<(String, Value)>> {
    proptest::collection::vec(("[a-z]{1,6}", scalar_value()), 0..6)
}

fn record_from(fields: &[(String, Value)]) -> FieldSet {
    FieldSet::new(
        fields
            .iter()
            .map(|(n, v)| Field::new(n.clone(), v.clone()))
            .collect(),
    )
}

fn nested(levels: usize) -> Value {
    let mut v = Value::from("leaf");
    for _ in 0..levels {
        v = serde_json::json!({ "k": v });
    }
    v
}

/// A population as `id -> version`; the hash `h{id}v{version}` is unique
/// per id, mirroring a faithful fingerprint.
fn population() -> impl Strategy<Value = BTreeMap<u8, u8>> {
    proptest::collection::btree_map(0u8..30, 0u8..4, 0..20)
}

fn population_records(population: &BTreeMap<u8, u8>) -> Vec<FieldSet> {
    population
        .iter()
        .map(|(id, version)| {
            let mut r = FieldSet::new(vec![Field::new("id", i64::from(*id))]);
            r.hash = Some(format!("h{id}v{version}"));
            r
        })
        .collect()
}

fn pk() -> Vec<String> {
    vec!["id".to_string()]
}

fn ids(records: &[FieldSet]) -> BTreeSet<String> {
    records.iter().map(|r| r.pk_string(&pk())).collect()
}

proptest! {
    #[test]
    fn hash_deterministic(fields in field_list()) {
        let record = record_from(&fields);
        let a = fingerprint(&record, FingerprintOptions::default()).unwrap();
        let b = fingerprint(&record.clone(), FingerprintOptions::default()).unwrap();
        prop_assert_eq!(a, b);
    }

    #[test]
    fn sorted_hash_is_permutation_invariant(fields in field_list(), rotation in 0usize..5) {
        let original = record_from(&fields);
        let mut rotated_fields = fields;
        if !rotated_fields.is_empty() {
            let k = rotation % rotated_fields.len();
            rotated_fields.rotate_left(k);
        }
        let rotated = record_from(&rotated_fields);

        let opts = FingerprintOptions { sort: true };
        prop_assert_eq!(
            fingerprint(&original, opts).unwrap(),
            fingerprint(&rotated, opts).unwrap()
        );
    }

    #[test]
    fn nested_map_key_order_is_irrelevant(
        pairs in proptest::collection::btree_map("[a-z]{1,4}", scalar_value(), 0..5),
        rotation in 0usize..5,
    ) {
        let forward: serde_json::Map<String, Value> =
            pairs.clone().into_iter().collect();
        let mut entries: Vec<(String, Value)> = pairs.into_iter().collect();
        if !entries.is_empty() {
            let k = rotation % entries.len();
            entries.rotate_left(k);
        }
        let rotated: serde_json::Map<String, Value> = entries.into_iter().collect();

        let a = FieldSet::new(vec![Field::new("m", Value::Object(forward))]);
        let b = FieldSet::new(vec![Field::new("m", Value::Object(rotated))]);
        prop_assert_eq!(
            fingerprint(&a, FingerprintOptions::default()).unwrap(),
            fingerprint(&b, FingerprintOptions::default()).unwrap()
        );
    }

    #[test]
    fn depth_bound_is_exactly_ten(levels in 0usize..12) {
        let record = FieldSet::new(vec![Field::new("deep", nested(levels))]);
        let result = fingerprint(&record, FingerprintOptions::default());
        // The field value sits at depth 1; `levels` wrappers below it.
        if levels <= 9 {
            prop_assert!(result.is_ok());
        } else {
            prop_assert!(result.is_err());
        }
    }

    #[test]
    fn delta_partitioning(prev in population(), cur in population()) {
        let previous = population_records(&prev);
        let current = population_records(&cur);
        let delta = set_diff(&previous, &current, &pk());

        let prev_ids: BTreeSet<String> = ids(&previous);
        let cur_ids: BTreeSet<String> = ids(&current);

        let expected_added: BTreeSet<String> =
            cur_ids.difference(&prev_ids).cloned().collect();
        let expected_removed: BTreeSet<String> =
            prev_ids.difference(&cur_ids).cloned().collect();
        let expected_updated: BTreeSet<String> = prev
            .iter()
            .filter(|&(id, version)| cur.get(id).is_some_and(|v| v != version))
            .map(|(id, _)| id.to_string())
            .collect();

        prop_assert_eq!(ids(&delta.added), expected_added);
        prop_assert_eq!(ids(&delta.removed), expected_removed);
        prop_assert_eq!(ids(&delta.updated), expected_updated);

        // Updated entries carry the new hash, different from the prior one.
        for record in &delta.updated {
            let id = record.pk_string(&pk());
            let prior = previous.iter().find(|r| r.pk_string(&pk()) == id).unwrap();
            prop_assert_ne!(&record.hash, &prior.hash);
        }

        // Groups are disjoint by pk.
        prop_assert!(ids(&delta.added).is_disjoint(&ids(&delta.updated)));
        prop_assert!(ids(&delta.added).is_disjoint(&ids(&delta.removed)));
        prop_assert!(ids(&delta.updated).is_disjoint(&ids(&delta.removed)));
    }

    #[test]
    fn repair_is_idempotent(
        prev in population(),
        cur in population(),
        failing in proptest::collection::btree_set(0u8..30, 0..8),
    ) {
        let previous = population_records(&prev);
        let current = population_records(&cur);
        let push = BatchResult {
            status: PushStatus::Partial,
            successes: Vec::new(),
            failures: failing
                .iter()
                .map(|id| PushEntry {
                    primary_key: vec![Field::new("id", i64::from(*id))],
                    crud: CrudKind::Update,
                    message: None,
                })
                .collect(),
            message: None,
        };

        let once = repair(current, &previous, &push, &pk());
        let twice = repair(once.repaired.clone(), &previous, &push, &pk());
        prop_assert_eq!(once.repaired, twice.repaired);
    }
}
