//! Result materialization: rows → records → caller destinations.

use serde::de::{self, DeserializeOwned, DeserializeSeed, Deserializer, MapAccess, SeqAccess, Visitor};
use serde::forward_to_deserialize_any;
use serde_json::{Map, Value as JsonValue};
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::error::{FaylError, FaylResult};

/// One decoded row: column name → JSON value, in column order.
pub type Record = Map<String, JsonValue>;

/// Column-name delimiter for nested struct paths (`address__city`).
pub const NESTED_DELIMITER: &str = "__";

type Decoder<'a> = Box<dyn FnOnce(&str, Vec<Record>) -> FaylResult<()> + Send + 'a>;

/// Where the rows of a read end up. Selected at most once per runner.
pub(crate) enum Scanner<'a> {
    /// Rows are drained without decoding.
    None,
    Map(&'a mut Record),
    Maps(&'a mut Vec<Record>),
    Struct(Decoder<'a>),
    Structs(Decoder<'a>),
    /// The whole page serialized as one JSON array.
    Writer(&'a mut (dyn AsyncWrite + Unpin + Send)),
}

impl<'a> Scanner<'a> {
    pub(crate) fn single_struct<T>(dest: &'a mut T) -> Self
    where
        T: DeserializeOwned + Send + 'a,
    {
        Scanner::Struct(Box::new(move |code, records| {
            let mut rows = records.into_iter();
            let first = rows.next().ok_or_else(|| FaylError::NotFound {
                code: code.to_string(),
            })?;
            if rows.next().is_some() {
                return Err(FaylError::decode(
                    code,
                    "expected exactly one row for a single struct, got more",
                ));
            }
            *dest = decode_record(code, first)?;
            Ok(())
        }))
    }

    pub(crate) fn struct_slice<T>(dest: &'a mut Vec<T>) -> Self
    where
        T: DeserializeOwned + Send + 'a,
    {
        Scanner::Structs(Box::new(move |code, records| {
            let decoded = records
                .into_iter()
                .map(|record| decode_record(code, record))
                .collect::<FaylResult<Vec<T>>>()?;
            dest.clear();
            dest.extend(decoded);
            Ok(())
        }))
    }

    pub(crate) fn is_none(&self) -> bool {
        matches!(self, Scanner::None)
    }

    /// Hand the final page of records to the destination.
    pub(crate) async fn deliver(self, code: &str, records: Vec<Record>) -> FaylResult<()> {
        tracing::debug!(code, rows = records.len(), "scanning rows");

        match self {
            Scanner::None => Ok(()),
            Scanner::Map(dest) => {
                let first = records.into_iter().next().ok_or_else(|| FaylError::NotFound {
                    code: code.to_string(),
                })?;
                *dest = first;
                Ok(())
            }
            Scanner::Maps(dest) => {
                dest.clear();
                dest.extend(records);
                Ok(())
            }
            Scanner::Struct(decode) | Scanner::Structs(decode) => decode(code, records),
            Scanner::Writer(out) => {
                let body = serde_json::to_vec(&records)
                    .map_err(|e| FaylError::decode(code, format!("failed to serialize rows: {}", e)))?;
                out.write_all(&body).await?;
                out.flush().await?;
                Ok(())
            }
        }
    }
}

/// Convert a driver row into a record.
pub(crate) fn row_to_record(row: &AnyRow) -> Record {
    let mut record = Record::new();

    for (i, column) in row.columns().iter().enumerate() {
        let name = column.name().to_string();

        // The value's own type is reliable even for computed columns.
        let type_name = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => "NULL".to_string(),
            Ok(raw) => raw.type_info().name().to_string(),
            Err(_) => column.type_info().name().to_string(),
        };

        let value = match type_name.as_str() {
            "NULL" => JsonValue::Null,
            "BOOL" | "BOOLEAN" => row
                .try_get::<bool, _>(i)
                .map(JsonValue::Bool)
                .unwrap_or(JsonValue::Null),
            "SMALLINT" | "INTEGER" | "BIGINT" => row
                .try_get::<i64, _>(i)
                .map(JsonValue::from)
                .unwrap_or(JsonValue::Null),
            "REAL" | "DOUBLE" => row
                .try_get::<f64, _>(i)
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            "BLOB" => row
                .try_get::<Vec<u8>, _>(i)
                .map(|bytes| normalize_blob(&bytes))
                .unwrap_or(JsonValue::Null),
            _ => row
                .try_get::<String, _>(i)
                .map(JsonValue::String)
                .unwrap_or(JsonValue::Null),
        };

        record.insert(name, value);
    }

    record
}

/// Binary values holding a JSON object or array are decoded; anything else
/// becomes (lossy) text.
pub(crate) fn normalize_blob(bytes: &[u8]) -> JsonValue {
    match serde_json::from_slice::<JsonValue>(bytes) {
        Ok(value @ (JsonValue::Object(_) | JsonValue::Array(_))) => value,
        _ => JsonValue::String(String::from_utf8_lossy(bytes).into_owned()),
    }
}

/// Fold `a__b` columns into `{"a": {"b": …}}`.
pub(crate) fn nest(record: Record) -> Result<JsonValue, String> {
    let mut root = Map::new();

    for (column, value) in record {
        let mut path = column.split(NESTED_DELIMITER).peekable();
        let mut node = &mut root;

        while let Some(segment) = path.next() {
            if path.peek().is_none() {
                if node.get(segment).is_some_and(JsonValue::is_object) {
                    return Err(format!("column '{}' conflicts with a nested path", column));
                }
                node.insert(segment.to_string(), value);
                break;
            }

            let entry = node
                .entry(segment.to_string())
                .or_insert_with(|| JsonValue::Object(Map::new()));
            node = match entry {
                JsonValue::Object(inner) => inner,
                _ => return Err(format!("column '{}' conflicts with column '{}'", column, segment)),
            };
        }
    }

    Ok(JsonValue::Object(root))
}

fn decode_record<T: DeserializeOwned>(code: &str, record: Record) -> FaylResult<T> {
    let nested = nest(record).map_err(|e| FaylError::decode(code, e))?;
    T::deserialize(Lenient(nested)).map_err(|e| FaylError::decode(code, e.to_string()))
}

/// Deserializer over a record value that also accepts the spellings drivers
/// use for booleans: `0`/`1` from integer columns and `t`/`false`/… from text.
struct Lenient(JsonValue);

impl<'de> Deserializer<'de> for Lenient {
    type Error = serde_json::Error;

    fn deserialize_any<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            JsonValue::Array(items) => visitor.visit_seq(Items(items.into_iter())),
            JsonValue::Object(map) => visitor.visit_map(Fields {
                iter: map.into_iter(),
                value: None,
            }),
            other => other.deserialize_any(visitor),
        }
    }

    fn deserialize_bool<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        let coerced = match &self.0 {
            JsonValue::Number(n) => match n.as_i64() {
                Some(0) => Some(false),
                Some(1) => Some(true),
                _ => None,
            },
            JsonValue::String(s) => parse_bool(s),
            _ => None,
        };
        match coerced {
            Some(b) => visitor.visit_bool(b),
            None => self.0.deserialize_bool(visitor),
        }
    }

    fn deserialize_option<V: Visitor<'de>>(self, visitor: V) -> Result<V::Value, Self::Error> {
        match self.0 {
            JsonValue::Null => visitor.visit_none(),
            other => visitor.visit_some(Lenient(other)),
        }
    }

    fn deserialize_newtype_struct<V: Visitor<'de>>(
        self,
        _name: &'static str,
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        visitor.visit_newtype_struct(self)
    }

    fn deserialize_enum<V: Visitor<'de>>(
        self,
        name: &'static str,
        variants: &'static [&'static str],
        visitor: V,
    ) -> Result<V::Value, Self::Error> {
        self.0.deserialize_enum(name, variants, visitor)
    }

    forward_to_deserialize_any! {
        i8 i16 i32 i64 i128 u8 u16 u32 u64 u128 f32 f64 char str string
        bytes byte_buf unit unit_struct seq tuple tuple_struct map struct
        identifier ignored_any
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}

struct Items(std::vec::IntoIter<JsonValue>);

impl<'de> SeqAccess<'de> for Items {
    type Error = serde_json::Error;

    fn next_element_seed<T: DeserializeSeed<'de>>(&mut self, seed: T) -> Result<Option<T::Value>, Self::Error> {
        self.0.next().map(|value| seed.deserialize(Lenient(value))).transpose()
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.0.len())
    }
}

struct Fields {
    iter: serde_json::map::IntoIter,
    value: Option<JsonValue>,
}

impl<'de> MapAccess<'de> for Fields {
    type Error = serde_json::Error;

    fn next_key_seed<K: DeserializeSeed<'de>>(&mut self, seed: K) -> Result<Option<K::Value>, Self::Error> {
        match self.iter.next() {
            Some((key, value)) => {
                self.value = Some(value);
                seed.deserialize(JsonValue::String(key)).map(Some)
            }
            None => Ok(None),
        }
    }

    fn next_value_seed<V: DeserializeSeed<'de>>(&mut self, seed: V) -> Result<V::Value, Self::Error> {
        let value = self
            .value
            .take()
            .ok_or_else(|| de::Error::custom("value requested before key"))?;
        seed.deserialize(Lenient(value))
    }

    fn size_hint(&self) -> Option<usize> {
        Some(self.iter.len())
    }
}
