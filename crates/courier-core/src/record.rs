//! # Record Shaping
//!
//! Turns an [`InstrumentInstance`] into the flat record layout the record
//! service imports, and builds the form parameters of a submission.
//!
//! ```text
//! InstrumentInstance { instrument: "survey", fields: {q1: 3, ...} }
//!         │
//!         ▼
//! {
//!   "record_id":                "<participant record>",
//!   "survey_created":           "2024-05-01 13:45:10",
//!   "survey_version":           "1.0",
//!   "survey_complete":          "2",
//!   "redcap_repeat_instance":   <sequence number>,
//!   "redcap_repeat_instrument": "survey",
//!   "q1": 3, ...
//! }
//! ```
//!
//! Base keys always win when an instance field uses the same name.

use chrono::Local;
use serde_json::Value;

use crate::types::{FieldMap, InstrumentInstance, SequenceNumber};

/// Timestamp layout expected by the record service, rendered in device-local
/// time.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Value of `<instrument>_complete` marking a finished form.
pub const COMPLETE_MARKER: &str = "2";

/// Builds the flat record for one instance.
pub fn build_record(
    record_id: &str,
    sequence_number: SequenceNumber,
    instance: &InstrumentInstance,
) -> FieldMap {
    let kind = instance.instrument.as_str();

    let mut record = FieldMap::new();
    record.insert("record_id".into(), Value::from(record_id));
    record.insert(
        format!("{kind}_created"),
        Value::from(
            instance
                .created_at
                .with_timezone(&Local)
                .format(CREATED_AT_FORMAT)
                .to_string(),
        ),
    );
    record.insert(
        format!("{kind}_version"),
        Value::from(instance.instrument_version.as_str()),
    );
    record.insert(format!("{kind}_complete"), Value::from(COMPLETE_MARKER));
    record.insert("redcap_repeat_instance".into(), Value::from(sequence_number));
    record.insert("redcap_repeat_instrument".into(), Value::from(kind));

    for (key, value) in &instance.fields {
        if !record.contains_key(key) {
            record.insert(key.clone(), value.clone());
        }
    }
    record
}

/// Builds the form parameters for a record import of a single record.
pub fn submission_params(api_token: &str, record: FieldMap) -> Vec<(&'static str, String)> {
    let data = Value::Array(vec![Value::Object(record)]).to_string();
    vec![
        ("token", api_token.to_string()),
        ("content", "record".to_string()),
        ("format", "json".to_string()),
        ("returnFormat", "json".to_string()),
        ("type", "flat".to_string()),
        ("overwriteBehavior", "normal".to_string()),
        ("data", data),
    ]
}
