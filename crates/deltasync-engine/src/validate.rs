//! Field and row validation against a schema.
//!
//! Validation is never fatal to a cycle: invalid rows carry their messages
//! forward without a hash and are handled by the repair step. The field
//! validator returns messages; the row validator writes them onto the
//! record.

use std::sync::OnceLock;

use deltasync_types::{FieldDefinition, FieldSet, FieldType, Restriction, Schema, Value};
use regex::Regex;
use url::Url;

/// Maximum nesting depth of a compound field value.
pub const MAX_VALUE_DEPTH: usize = 10;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email regex"))
}

fn is_valid_date(text: &str) -> bool {
    chrono::DateTime::parse_from_rfc3339(text).is_ok()
        || chrono::NaiveDate::parse_from_str(text, "%Y-%m-%d").is_ok()
}

fn value_depth_ok(value: &Value, depth: usize) -> bool {
    if depth > MAX_VALUE_DEPTH {
        return false;
    }
    match value {
        Value::Array(items) => items.iter().all(|v| value_depth_ok(v, depth + 1)),
        Value::Object(map) => map.values().all(|v| value_depth_ok(v, depth + 1)),
        _ => true,
    }
}

fn type_message(expected: FieldType) -> String {
    format!("expected a {expected} value")
}

fn check_type(field_type: FieldType, value: &Value, messages: &mut Vec<String>) {
    let compound = value.is_array() || value.is_object();
    match field_type {
        // Primitive checks are skipped for compound values of compound
        // types; nesting is covered by the depth bound.
        FieldType::Object => {
            if !value.is_object() {
                messages.push(type_message(field_type));
            }
        }
        FieldType::Array => {
            if !value.is_array() {
                messages.push(type_message(field_type));
            }
        }
        FieldType::Number => {
            if !value.is_number() {
                messages.push(type_message(field_type));
            }
        }
        FieldType::Boolean => {
            if !value.is_boolean() {
                messages.push(type_message(field_type));
            }
        }
        FieldType::MultiChoice => {
            if !value.is_array() {
                messages.push(type_message(field_type));
            }
        }
        FieldType::String | FieldType::Date | FieldType::Email | FieldType::Url
        | FieldType::SingleChoice => {
            if compound {
                messages.push(type_message(field_type));
            } else if let Some(text) = value.as_str() {
                match field_type {
                    FieldType::Email => {
                        if !email_regex().is_match(text) {
                            messages.push("value is not a valid email address".to_string());
                        }
                    }
                    FieldType::Url => {
                        if Url::parse(text).is_err() {
                            messages.push("value is not a valid url".to_string());
                        }
                    }
                    FieldType::Date => {
                        if !is_valid_date(text) {
                            messages.push("value is not a valid date".to_string());
                        }
                    }
                    _ => {}
                }
            } else {
                messages.push(type_message(field_type));
            }
        }
    }
}

fn choice_matches(options: &[String], case_sensitive: bool, candidate: &str) -> bool {
    options.iter().any(|option| {
        if case_sensitive {
            option == candidate
        } else {
            option.eq_ignore_ascii_case(candidate)
        }
    })
}

fn check_restriction(restriction: &Restriction, value: &Value, messages: &mut Vec<String>) {
    match restriction {
        Restriction::MinLength(min) => {
            let len = value_length(value);
            if let Some(len) = len {
                if len < *min {
                    messages.push(format!("length {len} is below the minimum of {min}"));
                }
            }
        }
        Restriction::MaxLength(max) => {
            let len = value_length(value);
            if let Some(len) = len {
                if len > *max {
                    messages.push(format!("length {len} exceeds the maximum of {max}"));
                }
            }
        }
        Restriction::MinValue(min) => {
            if let Some(n) = value.as_f64() {
                if n < *min {
                    messages.push(format!("value {n} is below the minimum of {min}"));
                }
            }
        }
        Restriction::MaxValue(max) => {
            if let Some(n) = value.as_f64() {
                if n > *max {
                    messages.push(format!("value {n} exceeds the maximum of {max}"));
                }
            }
        }
        Restriction::Pattern(pattern) => {
            if let Some(text) = value.as_str() {
                match Regex::new(pattern) {
                    Ok(re) => {
                        if !re.is_match(text) {
                            messages.push(format!("value does not match pattern '{pattern}'"));
                        }
                    }
                    Err(_) => messages.push(format!("invalid pattern restriction '{pattern}'")),
                }
            }
        }
        Restriction::Choices {
            options,
            case_sensitive,
        } => match value {
            Value::String(s) => {
                if !choice_matches(options, *case_sensitive, s) {
                    messages.push(format!("'{s}' is not one of the allowed options"));
                }
            }
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        if !choice_matches(options, *case_sensitive, s) {
                            messages.push(format!("'{s}' is not one of the allowed options"));
                        }
                    }
                }
            }
            _ => {}
        },
    }
}

fn value_length(value: &Value) -> Option<usize> {
    match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    }
}

/// Validate one field against its definition. Returns the messages; an
/// empty result means the field is valid.
///
/// `value` is the field's value as found on the row (absent fields pass
/// `None`); `row` gives custom predicates access to the whole record.
#[must_use]
pub fn validate_field(def: &FieldDefinition, value: Option<&Value>, row: &FieldSet) -> Vec<String> {
    let mut messages = Vec::new();

    let effective = match value {
        Some(v) if !v.is_null() => Some(v),
        _ => def.default.as_ref(),
    };
    let Some(effective) = effective else {
        if def.required {
            messages.push("field is required".to_string());
        }
        return messages;
    };

    if !value_depth_ok(effective, 1) {
        messages.push(format!(
            "nested value exceeds the maximum depth of {MAX_VALUE_DEPTH}"
        ));
        return messages;
    }

    check_type(def.field_type, effective, &mut messages);
    for restriction in &def.restrictions {
        check_restriction(restriction, effective, &mut messages);
    }
    for rule in &def.custom_rules {
        if let Err(message) = rule.apply(effective, row) {
            messages.push(message);
        }
    }
    messages
}

/// Validate a record against the schema, writing the messages-by-field map
/// onto it. Missing fields with a declared default get the default applied
/// first. Returns `true` iff the record is valid.
pub fn validate_record(schema: &Schema, record: &mut FieldSet) -> bool {
    // Apply defaults before validation so custom predicates and the
    // fingerprint both see them.
    for def in &schema.fields {
        let Some(default) = &def.default else {
            continue;
        };
        match record.field_values.iter_mut().find(|f| f.name == def.name) {
            Some(field) if field.value.is_null() => field.value = default.clone(),
            Some(_) => {}
            None => record
                .field_values
                .push(deltasync_types::Field::new(def.name.clone(), default.clone())),
        }
    }

    let mut collected: Vec<(String, String)> = Vec::new();
    for def in &schema.fields {
        for message in validate_field(def, record.get(&def.name), record) {
            collected.push((def.name.clone(), message));
        }
    }
    for (field, message) in collected {
        record.add_message(field, message);
    }
    record.is_valid()
}
