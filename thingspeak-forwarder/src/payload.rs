//! ThingSpeak update request body.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use thingspeak_common::port::{NullablePortValue, display_nullable};

/// Number of data fields in a ThingSpeak channel.
pub const MAX_FIELDS: u32 = 8;

/// Format of the `created_at` request parameter.
pub const CREATED_AT_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Field number to value, ordered by field number.
pub type FieldValues = BTreeMap<u32, NullablePortValue>;

/// Render a timestamp the way the update API expects it.
pub fn format_created_at(created_at: &DateTime<Utc>) -> String {
    created_at.format(CREATED_AT_FORMAT).to_string()
}

/// Convert an event timestamp (Unix epoch milliseconds) to UTC.
pub fn created_at_from_millis(timestamp: i64) -> Option<DateTime<Utc>> {
    DateTime::<Utc>::from_timestamp_millis(timestamp)
}

/// Build the JSON body of an update request.
///
/// Field numbers are used as given, so out-of-range numbers produce keys
/// the API does not know about.
pub fn build_update_body(api_key: &str, values: &FieldValues, created_at: &DateTime<Utc>) -> Value {
    let mut body = Map::new();
    body.insert("api_key".to_string(), Value::from(api_key));
    body.insert(
        "created_at".to_string(),
        Value::from(format_created_at(created_at)),
    );

    for (field_no, value) in values {
        let value = serde_json::to_value(value).unwrap_or(Value::Null);
        body.insert(format!("field{}", field_no), value);
    }

    Value::Object(body)
}

/// Human-readable summary of the channel fields being sent.
///
/// Only fields 1..8 are listed.
pub fn describe_fields(values: &FieldValues) -> String {
    values
        .range(1..=MAX_FIELDS)
        .map(|(field_no, value)| format!("field{}={}", field_no, display_nullable(value)))
        .collect::<Vec<_>>()
        .join(", ")
}
