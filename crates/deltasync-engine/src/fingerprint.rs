//! Record fingerprinting.
//!
//! A fingerprint is the SHA-256 hex digest of a canonical serialization of
//! a record's ordered field values. Field names stay out of the digest —
//! ordering carries the identity — while mapping keys are sorted so
//! semantically equal payloads hash identically regardless of key order.

use deltasync_types::{FieldSet, Result, SyncError, Value};
use sha2::{Digest, Sha256};

/// Maximum nesting depth of a serializable value.
pub const MAX_DEPTH: usize = 10;

/// Options for [`fingerprint`].
#[derive(Debug, Clone, Copy, Default)]
pub struct FingerprintOptions {
    /// Sort fields ascending by name before serialization. Off by default:
    /// callers control top-level order, and skipping the sort is cheaper.
    pub sort: bool,
}

/// Compute the fingerprint of a record.
///
/// Serialization rules: primitives use their canonical textual form
/// (`true`/`false`, decimal numbers, raw strings, empty string for null),
/// sequences join their serialized elements with `,`, mappings sort keys
/// ascending and join `k:v` pairs with `;`, and top-level field
/// contributions join with `|`.
///
/// # Errors
///
/// Returns [`SyncError::DepthExceeded`] when nesting exceeds [`MAX_DEPTH`].
pub fn fingerprint(record: &FieldSet, options: FingerprintOptions) -> Result<String> {
    let mut fields: Vec<&deltasync_types::Field> = record.field_values.iter().collect();
    if options.sort {
        fields.sort_by(|a, b| a.name.cmp(&b.name));
    }

    let mut canonical = String::new();
    for (i, field) in fields.iter().enumerate() {
        if i > 0 {
            canonical.push('|');
        }
        serialize_value(&field.value, 1, &mut canonical)?;
    }

    let digest = Sha256::digest(canonical.as_bytes());
    Ok(hex::encode(digest))
}

fn serialize_value(value: &Value, depth: usize, out: &mut String) -> Result<()> {
    if depth > MAX_DEPTH {
        return Err(SyncError::DepthExceeded { limit: MAX_DEPTH });
    }
    match value {
        Value::Null => {}
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => out.push_str(&n.to_string()),
        Value::String(s) => out.push_str(s),
        Value::Array(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                serialize_value(item, depth + 1, out)?;
            }
        }
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(';');
                }
                out.push_str(key);
                out.push(':');
                serialize_value(&map[key.as_str()], depth + 1, out)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use deltasync_types::Field;
    use serde_json::json;

    fn record(pairs: &[(&str, Value)]) -> FieldSet {
        FieldSet::new(
            pairs
                .iter()
                .map(|(n, v)| Field::new(*n, v.clone()))
                .collect(),
        )
    }

    fn fp(record: &FieldSet) -> String {
        fingerprint(record, FingerprintOptions::default()).unwrap()
    }

    #[test]
    fn deterministic() {
        let rec = record(&[("id", json!(1)), ("name", json!("alice"))]);
        assert_eq!(fp(&rec), fp(&rec.clone()));
    }

    #[test]
    fn hex_sha256_width() {
        let hash = fp(&record(&[("id", json!(1))]));
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn field_order_matters_without_sort() {
        let ab = record(&[("a", json!(1)), ("b", json!(2))]);
        let ba = record(&[("b", json!(2)), ("a", json!(1))]);
        assert_ne!(fp(&ab), fp(&ba));
    }

    #[test]
    fn sort_flag_makes_order_irrelevant() {
        let ab = record(&[("a", json!(1)), ("b", json!(2))]);
        let ba = record(&[("b", json!(2)), ("a", json!(1))]);
        let opts = FingerprintOptions { sort: true };
        assert_eq!(
            fingerprint(&ab, opts).unwrap(),
            fingerprint(&ba, opts).unwrap()
        );
    }

    #[test]
    fn field_names_not_in_digest() {
        let a = record(&[("x", json!("v"))]);
        let b = record(&[("y", json!("v"))]);
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn null_and_empty_string_collide() {
        let a = record(&[("x", json!(null))]);
        let b = record(&[("x", json!(""))]);
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn nested_map_key_order_irrelevant() {
        let a = record(&[("m", json!({"x": 1, "y": 2}))]);
        let b = record(&[("m", json!({"y": 2, "x": 1}))]);
        assert_eq!(fp(&a), fp(&b));
    }

    #[test]
    fn sequences_keep_order() {
        let a = record(&[("s", json!([1, 2]))]);
        let b = record(&[("s", json!([2, 1]))]);
        assert_ne!(fp(&a), fp(&b));
    }

    fn nested(levels: usize) -> Value {
        let mut v = json!("leaf");
        for _ in 0..levels {
            v = json!({ "k": v });
        }
        v
    }

    #[test]
    fn depth_ten_is_allowed() {
        // Value at depth 1, nine wrapping objects below it.
        let rec = record(&[("deep", nested(9))]);
        assert!(fingerprint(&rec, FingerprintOptions::default()).is_ok());
    }

    #[test]
    fn depth_eleven_fails() {
        let rec = record(&[("deep", nested(10))]);
        let err = fingerprint(&rec, FingerprintOptions::default()).unwrap_err();
        assert!(matches!(err, SyncError::DepthExceeded { limit: MAX_DEPTH }));
    }

    #[test]
    fn canonical_separators() {
        // Two fields joined by '|'; a map joined by ';' with ':' pairs; a
        // sequence joined by ','. Equal canonical text means equal hashes.
        let composed = record(&[
            ("a", json!({"k1": "v1", "k2": "v2"})),
            ("b", json!([1, 2, 3])),
        ]);
        let hash = fp(&composed);

        let expected = {
            let digest = Sha256::digest("k1:v1;k2:v2|1,2,3".as_bytes());
            hex::encode(digest)
        };
        assert_eq!(hash, expected);
    }
}
