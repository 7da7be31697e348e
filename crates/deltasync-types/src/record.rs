//! Canonical record model.
//!
//! A [`FieldSet`] is an ordered sequence of [`Field`] entries plus two
//! optional attachments: validation messages keyed by field name, and a
//! fingerprint hash. Field order is semantically meaningful — it is the
//! order the mapper chose and the order fingerprinting respects.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Field values reuse the JSON data model: string, number, boolean, null,
/// ordered sequence, or string-keyed mapping (recursively).
pub type Value = serde_json::Value;

/// A single named field: the singleton mapping `{name: value}` on the wire.
#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub value: Value,
}

impl Field {
    /// Create a field from a name and any JSON-convertible value.
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Serialize for Field {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(&self.name, &self.value)?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for Field {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FieldVisitor;

        impl<'de> Visitor<'de> for FieldVisitor {
            type Value = Field;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a single-entry map of field name to value")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Field, A::Error> {
                let (name, value): (String, Value) = access
                    .next_entry()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                if access.next_entry::<String, Value>()?.is_some() {
                    return Err(serde::de::Error::custom(
                        "field object must contain exactly one entry",
                    ));
                }
                Ok(Field { name, value })
            }
        }

        deserializer.deserialize_map(FieldVisitor)
    }
}

/// An ordered record: fields plus optional validation messages and hash.
///
/// Wire shape (one NDJSON line):
/// `{"fieldValues":[{"id":1},{"name":"alice"}],"hash":"ab12..."}`.
/// An empty messages map is omitted from serialization.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldSet {
    pub field_values: Vec<Field>,
    /// Validation messages keyed by field name. Non-empty iff the record
    /// failed row validation; such a record must not carry a hash.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation_messages: BTreeMap<String, Vec<String>>,
    /// Fingerprint over the exact field sequence this record carries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

impl FieldSet {
    /// Create a record from an ordered field sequence.
    #[must_use]
    pub fn new(field_values: Vec<Field>) -> Self {
        Self {
            field_values,
            validation_messages: BTreeMap::new(),
            hash: None,
        }
    }

    /// Look up a field value by name (first match in order).
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.field_values
            .iter()
            .find(|f| f.name == name)
            .map(|f| &f.value)
    }

    /// True when row validation produced no messages.
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.validation_messages.is_empty()
    }

    /// Append a validation message for `field`, clearing any hash.
    pub fn add_message(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.validation_messages
            .entry(field.into())
            .or_default()
            .push(message.into());
        self.hash = None;
    }

    /// The ordered primary-key values for this record, as canonical text.
    ///
    /// Missing fields contribute an empty string, matching the treatment of
    /// null values.
    #[must_use]
    pub fn pk_values(&self, pk_fields: &[String]) -> Vec<String> {
        pk_fields
            .iter()
            .map(|name| self.get(name).map_or_else(String::new, scalar_key_text))
            .collect()
    }

    /// The primary-key tuple joined by `|`.
    ///
    /// Reversible by splitting on `|` because projection guarantees key
    /// values never contain the separator.
    #[must_use]
    pub fn pk_string(&self, pk_fields: &[String]) -> String {
        self.pk_values(pk_fields).join("|")
    }

    /// Rebuild a reduced record from a stored `pk` column value.
    ///
    /// The inverse of [`FieldSet::pk_string`]: values come back as strings
    /// in `pk_fields` order.
    #[must_use]
    pub fn from_pk_string(pk: &str, pk_fields: &[String], hash: Option<String>) -> Self {
        let field_values = pk
            .split('|')
            .zip(pk_fields.iter())
            .map(|(value, name)| Field::new(name.clone(), value))
            .collect();
        Self {
            field_values,
            validation_messages: BTreeMap::new(),
            hash,
        }
    }
}

/// Canonical text form of a scalar used in primary-key tuples:
/// raw strings, decimal numbers, `true`/`false`, empty string for null.
/// Compound values fall back to their JSON text.
#[must_use]
pub fn scalar_key_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}
