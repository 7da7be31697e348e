//! Schema model: ordered field definitions with restrictions.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::record::{FieldSet, Value};

/// Semantic type of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    String,
    Number,
    Boolean,
    Date,
    Email,
    Url,
    SingleChoice,
    MultiChoice,
    Object,
    Array,
}

impl FieldType {
    /// Wire-format string, also used in validation messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::Email => "email",
            Self::Url => "url",
            Self::SingleChoice => "single_choice",
            Self::MultiChoice => "multi_choice",
            Self::Object => "object",
            Self::Array => "array",
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A declarative restriction on a field's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Restriction {
    MinLength(usize),
    MaxLength(usize),
    MinValue(f64),
    MaxValue(f64),
    /// Regular expression the textual value must match.
    Pattern(String),
    /// Membership in a fixed option set.
    Choices {
        options: Vec<String>,
        case_sensitive: bool,
    },
}

/// A caller-supplied predicate with access to the entire row.
///
/// Predicates return `Err(message)` to fail the field. They are not part of
/// the serialized schema.
#[derive(Clone)]
pub struct CustomRule {
    pub label: String,
    check: Arc<dyn Fn(&Value, &FieldSet) -> Result<(), String> + Send + Sync>,
}

impl CustomRule {
    pub fn new(
        label: impl Into<String>,
        check: impl Fn(&Value, &FieldSet) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            label: label.into(),
            check: Arc::new(check),
        }
    }

    /// Run the predicate against a value and its containing row.
    ///
    /// # Errors
    ///
    /// Returns the predicate's message when the check fails.
    pub fn apply(&self, value: &Value, row: &FieldSet) -> Result<(), String> {
        (self.check)(value, row)
    }
}

impl fmt::Debug for CustomRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomRule")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// Definition of one schema field.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub name: String,
    pub field_type: FieldType,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub restrictions: Vec<Restriction>,
    #[serde(skip)]
    pub custom_rules: Vec<CustomRule>,
}

impl FieldDefinition {
    /// Create a plain optional, non-key definition.
    #[must_use]
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            default: None,
            primary_key: false,
            restrictions: Vec::new(),
            custom_rules: Vec::new(),
        }
    }

    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    #[must_use]
    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    #[must_use]
    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }

    #[must_use]
    pub fn restrict(mut self, restriction: Restriction) -> Self {
        self.restrictions.push(restriction);
        self
    }

    #[must_use]
    pub fn custom(
        mut self,
        label: impl Into<String>,
        check: impl Fn(&Value, &FieldSet) -> Result<(), String> + Send + Sync + 'static,
    ) -> Self {
        self.custom_rules.push(CustomRule::new(label, check));
        self
    }
}

/// An ordered sequence of field definitions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schema {
    pub fields: Vec<FieldDefinition>,
}

impl Schema {
    #[must_use]
    pub fn new(fields: Vec<FieldDefinition>) -> Self {
        Self { fields }
    }

    /// Ordered names of the fields flagged as primary key.
    ///
    /// May be empty (delta-update detection then degenerates) or composite.
    #[must_use]
    pub fn primary_key_fields(&self) -> Vec<String> {
        self.fields
            .iter()
            .filter(|d| d.primary_key)
            .map(|d| d.name.clone())
            .collect()
    }

    /// Look up a definition by field name.
    #[must_use]
    pub fn definition(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields.iter().find(|d| d.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Field;
    use serde_json::json;

    #[test]
    fn primary_key_fields_preserve_order() {
        let schema = Schema::new(vec![
            FieldDefinition::new("username", FieldType::String).primary_key(),
            FieldDefinition::new("age", FieldType::Number),
            FieldDefinition::new("id", FieldType::Number).primary_key(),
        ]);
        assert_eq!(schema.primary_key_fields(), vec!["username", "id"]);
    }

    #[test]
    fn empty_primary_key_allowed() {
        let schema = Schema::new(vec![FieldDefinition::new("x", FieldType::String)]);
        assert!(schema.primary_key_fields().is_empty());
    }

    #[test]
    fn custom_rule_sees_whole_row() {
        let rule = CustomRule::new("end_after_start", |value, row| {
            let start = row.get("start").and_then(Value::as_i64).unwrap_or(0);
            let end = value.as_i64().unwrap_or(0);
            if end >= start {
                Ok(())
            } else {
                Err("end must not precede start".into())
            }
        });
        let row = FieldSet::new(vec![Field::new("start", 5), Field::new("end", 3)]);
        assert!(rule.apply(&json!(3), &row).is_err());
        assert!(rule.apply(&json!(9), &row).is_ok());
    }

    #[test]
    fn restriction_serde_roundtrip() {
        let r = Restriction::Choices {
            options: vec!["a".into(), "b".into()],
            case_sensitive: false,
        };
        let json = serde_json::to_string(&r).unwrap();
        let back: Restriction = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn field_type_display() {
        assert_eq!(FieldType::SingleChoice.to_string(), "single_choice");
        assert_eq!(FieldType::Url.to_string(), "url");
    }
}
