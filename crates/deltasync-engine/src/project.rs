//! Key+hash projection.
//!
//! Below the delta engine only the reduced form of a record travels: its
//! primary-key fields (in encountered order) plus the hash and any
//! validation messages.

use deltasync_types::FieldSet;

/// Reduce a record to its primary-key fields, carrying hash and validation
/// messages through unchanged.
#[must_use]
pub fn reduce(record: &FieldSet, pk_fields: &[String]) -> FieldSet {
    FieldSet {
        field_values: record
            .field_values
            .iter()
            .filter(|f| pk_fields.contains(&f.name))
            .cloned()
            .collect(),
        validation_messages: record.validation_messages.clone(),
        hash: record.hash.clone(),
    }
}

/// Project a population onto its key+hash form.
///
/// Records whose key values contain the `|` separator would make the
/// stored pk tuple ambiguous; they are demoted to invalid (message
/// attached, hash cleared) so the repair step keeps their prior baseline
/// entry and they resurface every cycle until fixed upstream.
#[must_use]
pub fn project(records: &[FieldSet], pk_fields: &[String]) -> Vec<FieldSet> {
    records
        .iter()
        .map(|record| {
            let mut reduced = reduce(record, pk_fields);
            let offending: Vec<String> = pk_fields
                .iter()
                .filter(|name| {
                    reduced
                        .get(name)
                        .map(deltasync_types::record::scalar_key_text)
                        .is_some_and(|text| text.contains('|'))
                })
                .cloned()
                .collect();
            for name in offending {
                reduced.add_message(name, "primary-key value contains the reserved character '|'");
            }
            reduced
        })
        .collect()
}
