//! JSON-safety conversions at the envelope boundary.
//!
//! Every value crossing the engine boundary must be representable in plain
//! JSON: timestamps become ISO-8601 strings, binary becomes base64,
//! non-finite floats become `null`. Rich types that cannot be converted are
//! dropped field-by-field instead of failing the whole envelope.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::warn;

/// Convert an `f64` to a JSON number, mapping NaN and infinities to `null`.
///
/// `serde_json::Number` cannot represent non-finite floats; a `null` cell is
/// more useful downstream than a serialization error for the entire row.
pub fn json_float(value: f64) -> Value {
    serde_json::Number::from_f64(value).map_or(Value::Null, Value::Number)
}

/// Convert a UTC timestamp to an ISO-8601 string value.
pub fn json_timestamp(value: &DateTime<Utc>) -> Value {
    Value::String(value.to_rfc3339())
}

/// Convert a naive (timezone-less) timestamp to an ISO-8601 string value.
pub fn json_naive_datetime(value: &NaiveDateTime) -> Value {
    Value::String(value.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

/// Convert a calendar date to an ISO-8601 string value.
pub fn json_date(value: &NaiveDate) -> Value {
    Value::String(value.format("%Y-%m-%d").to_string())
}

/// Convert binary data to a base64 string value.
pub fn json_bytes(value: &[u8]) -> Value {
    Value::String(BASE64.encode(value))
}

/// Serialize any value to JSON, substituting `null` on failure.
///
/// The substitution is logged; callers that need per-field recovery should
/// convert field-by-field with the typed helpers above.
pub fn to_json_value<T: Serialize>(value: &T) -> Value {
    match serde_json::to_value(value) {
        Ok(v) => v,
        Err(e) => {
            warn!("Dropping unconvertible value at JSON boundary: {e}");
            Value::Null
        }
    }
}
