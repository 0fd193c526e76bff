//! Parameter values bound into named queries.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::error::{FaylError, FaylResult};

/// Parameter set of a single call: name → value, last write wins.
pub type Params = HashMap<String, Value>;

/// Dynamic value type for query parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    /// Expanded into one placeholder per element.
    List(Vec<Value>),
    /// Structured value; bound as its JSON text.
    Json(JsonValue),
}

impl Value {
    /// Convert a JSON value, keeping arrays as lists and objects as JSON.
    pub fn from_json(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => Value::Null,
            JsonValue::Bool(b) => Value::Bool(b),
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => Value::Int(i),
                None => Value::Float(n.as_f64().unwrap_or_default()),
            },
            JsonValue::String(s) => Value::Text(s),
            JsonValue::Array(items) => Value::List(items.into_iter().map(Value::from_json).collect()),
            obj @ JsonValue::Object(_) => Value::Json(obj),
        }
    }

    /// The JSON form of this value (bytes become a lossy string).
    pub fn to_json(&self) -> JsonValue {
        match self {
            Value::Null => JsonValue::Null,
            Value::Bool(b) => JsonValue::Bool(*b),
            Value::Int(i) => JsonValue::from(*i),
            Value::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Value::Text(s) => JsonValue::String(s.clone()),
            Value::Bytes(b) => JsonValue::String(String::from_utf8_lossy(b).into_owned()),
            Value::List(items) => JsonValue::Array(items.iter().map(Value::to_json).collect()),
            Value::Json(v) => v.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Template truthiness: false, zero, null and empty values are false.
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Text(s) => !s.is_empty(),
            Value::Bytes(b) => !b.is_empty(),
            Value::List(items) => !items.is_empty(),
            Value::Json(JsonValue::Object(m)) => !m.is_empty(),
            Value::Json(JsonValue::Array(a)) => !a.is_empty(),
            Value::Json(JsonValue::Null) => false,
            Value::Json(_) => true,
        }
    }

    /// Length of a text, list or object value.
    pub fn len(&self) -> Option<usize> {
        match self {
            Value::Text(s) => Some(s.chars().count()),
            Value::Bytes(b) => Some(b.len()),
            Value::List(items) => Some(items.len()),
            Value::Json(JsonValue::Object(m)) => Some(m.len()),
            Value::Json(JsonValue::Array(a)) => Some(a.len()),
            _ => None,
        }
    }

    /// Look up a field of an object value.
    pub fn field(&self, name: &str) -> Option<Value> {
        match self {
            Value::Json(JsonValue::Object(m)) => m.get(name).cloned().map(Value::from_json),
            _ => None,
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    /// Loose equality: integers and floats compare numerically.
    pub fn loose_eq(&self, other: &Value) -> bool {
        match (self.as_f64(), other.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => self == other,
        }
    }

    /// Ordering between numbers or between strings.
    pub fn loose_cmp(&self, other: &Value) -> Option<std::cmp::Ordering> {
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            _ => self.as_f64()?.partial_cmp(&other.as_f64()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(v) => write!(f, "{}", v),
            Value::Text(s) => write!(f, "'{}'", s),
            Value::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            Value::List(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.to_string()).collect();
                write!(f, "[{}]", parts.join(", "))
            }
            Value::Json(v) => write!(f, "{}", v),
        }
    }
}

/// Decode a map or struct into a parameter set.
///
/// Serde field names (including `#[serde(rename = "...")]`) become parameter
/// names. Nested structs stay structured and time values keep their serialized
/// form rather than being flattened. Anything that does not serialize to an
/// object is rejected.
pub fn to_params<T: Serialize + ?Sized>(source: &T) -> FaylResult<Params> {
    let json = serde_json::to_value(source)
        .map_err(|e| FaylError::bind("", format!("failed to decode params: {}", e)))?;

    match json {
        JsonValue::Object(fields) => Ok(fields
            .into_iter()
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect()),
        other => Err(FaylError::bind(
            "",
            format!("params must be a map or a struct, got {}", json_kind(&other)),
        )),
    }
}

fn json_kind(v: &JsonValue) -> &'static str {
    match v {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "a bool",
        JsonValue::Number(_) => "a number",
        JsonValue::String(_) => "a string",
        JsonValue::Array(_) => "a sequence",
        JsonValue::Object(_) => "a map",
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<u32> for Value {
    fn from(v: u32) -> Self {
        Value::Int(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<JsonValue> for Value {
    fn from(v: JsonValue) -> Self {
        Value::from_json(v)
    }
}

impl<Tz: chrono::TimeZone> From<chrono::DateTime<Tz>> for Value
where
    Tz::Offset: fmt::Display,
{
    fn from(v: chrono::DateTime<Tz>) -> Self {
        Value::Text(v.to_rfc3339())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde::Serialize;

    #[derive(Serialize)]
    struct Filter {
        #[serde(rename = "user_name")]
        name: String,
        ids: Vec<i64>,
        created_at: chrono::DateTime<Utc>,
        address: Address,
    }

    #[derive(Serialize)]
    struct Address {
        city: String,
    }

    #[test]
    fn test_value_from() {
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from(42i32), Value::Int(42));
        assert_eq!(Value::from("hello"), Value::Text("hello".into()));
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(vec![1i64, 2]), Value::List(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn test_struct_to_params() {
        let created_at = Utc.with_ymd_and_hms(2024, 5, 1, 8, 30, 0).unwrap();
        let params = to_params(&Filter {
            name: "Ann".into(),
            ids: vec![1, 2],
            created_at,
            address: Address { city: "Bandung".into() },
        })
        .unwrap();

        assert_eq!(params["user_name"], Value::Text("Ann".into()));
        assert_eq!(params["ids"], Value::List(vec![Value::Int(1), Value::Int(2)]));
        assert_eq!(params["created_at"], Value::Text("2024-05-01T08:30:00Z".into()));
        assert_eq!(
            params["address"].field("city"),
            Some(Value::Text("Bandung".into()))
        );
    }

    #[test]
    fn test_scalar_params_rejected() {
        let err = to_params(&42).unwrap_err();
        assert!(err.to_string().contains("params must be a map or a struct"));

        assert!(to_params(&vec![1, 2]).is_err());
        assert!(to_params(&None::<i32>).is_err());
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Null.is_truthy());
        assert!(!Value::Int(0).is_truthy());
        assert!(!Value::Text(String::new()).is_truthy());
        assert!(!Value::List(vec![]).is_truthy());
        assert!(Value::Text("x".into()).is_truthy());
        assert!(Value::Int(1).loose_eq(&Value::Float(1.0)));
    }
}
