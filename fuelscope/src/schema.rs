//! Boundary decoding helpers for the loosely typed JSON the public APIs return.

use serde::de::{DeserializeOwned, Deserializer, Error as _};
use serde::Deserialize;
use serde_json::Value;

use crate::error::Error;

/// Decode `value` into `T`, mapping any mismatch to `Error::UnexpectedSchema`.
pub fn decode<T: DeserializeOwned>(api: &'static str, value: Value) -> Result<T, Error> {
    serde_json::from_value(value).map_err(|e| Error::UnexpectedSchema {
        api,
        detail: e.to_string(),
    })
}

/// Accepts `1650.5`, `"1650.5"` and `"+1.20"`.
pub fn number<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| D::Error::custom("number out of range")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| D::Error::custom(format!("expected a number, got {:?}", s))),
        other => Err(D::Error::custom(format!("expected a number, got {}", other))),
    }
}

/// Opinet's "Y"/"N" amenity flags.
pub fn yes_no<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(matches!(raw.as_deref().map(str::trim), Some("Y") | Some("y")))
}
