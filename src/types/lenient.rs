//!
//! Forgiving field deserializers for wire types.
//!
use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Deserializer};
use serde_json::Value;

fn as_f64(value: &Value) -> Option<f64> {
    let f: Option<f64> = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    };
    f.filter(|f| f.is_finite())
}

/// Any finite number, or a string holding one
pub(crate) fn number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let value = Option::<Value>::deserialize(d)?;
    Ok(value.as_ref().and_then(as_f64))
}

/// Non-negative integer, 0 when absent
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn unsigned<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    Ok(number(d)?.filter(|f| *f > 0.0).map_or(0, |f| f as u64))
}

/// Signed integer, 0 when absent
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn integer<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    Ok(number(d)?.map_or(0, |f| f as i64))
}

/// Float, 0.0 when absent
pub(crate) fn float<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
    Ok(number(d)?.unwrap_or(0.0))
}

/// String, empty when absent or not a string
pub(crate) fn text<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => s,
        _ => String::new(),
    })
}

/// String, `None` when absent or not a string
pub(crate) fn opt_text<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => Some(s),
        _ => None,
    })
}

/// Boolean, `false` when absent
pub(crate) fn flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    Ok(matches!(Option::<Value>::deserialize(d)?, Some(Value::Bool(true))))
}

/// RFC 3339 string or milliseconds since the epoch
pub(crate) fn timestamp<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<DateTime<Utc>>, D::Error> {
    Ok(match Option::<Value>::deserialize(d)? {
        Some(Value::String(s)) => parse_time(&s),
        #[allow(clippy::cast_possible_truncation)]
        Some(v) => as_f64(&v).and_then(|ms| Utc.timestamp_millis_opt(ms as i64).single()),
        None => None,
    })
}

/// Nested object, its `Default` when absent or malformed
pub(crate) fn group<'de, D, T>(d: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(match Option::<Value>::deserialize(d)? {
        Some(v @ Value::Object(_)) => T::deserialize(v).unwrap_or_default(),
        _ => T::default(),
    })
}

/// Parse a wire timestamp
pub(crate) fn parse_time(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
