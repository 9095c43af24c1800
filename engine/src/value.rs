//! The tagged value model.
//!
//! A [`Value`] is a JSON-like tree extended with byte sequences and a small
//! set of extended scalars (dates, regex-like patterns, typed numeric
//! arrays) that plain JSON cannot round-trip. Ownership makes the tree
//! acyclic by construction, so tree traversal never has to guard against
//! reference cycles.
//!
//! Values that plain JSON can represent serialize directly; everything else
//! goes through the **extended JSON** mapping, which wraps the extra shapes
//! in single-key `$` marker objects (`{"$bytes": ...}`, `{"$date": ...}`,
//! `{"$pattern": ...}`, `{"$typedArray": ...}`, `{"$number": ...}` for
//! non-finite floats). Literal objects containing `$`-prefixed keys are
//! escaped as `{"$escaped": {...}}` so the mapping stays unambiguous.

use std::collections::BTreeMap;

use data_encoding::BASE64;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{Error, Result};
use crate::path::Segment;

/// A typed numeric array, stored with its element kind.
#[derive(Debug, Clone, PartialEq)]
pub enum NumericArray {
    I8(Vec<i8>),
    U8(Vec<u8>),
    I16(Vec<i16>),
    U16(Vec<u16>),
    I32(Vec<i32>),
    U32(Vec<u32>),
    F32(Vec<f32>),
    F64(Vec<f64>),
}

impl NumericArray {
    fn kind(&self) -> &'static str {
        match self {
            NumericArray::I8(_) => "i8",
            NumericArray::U8(_) => "u8",
            NumericArray::I16(_) => "i16",
            NumericArray::U16(_) => "u16",
            NumericArray::I32(_) => "i32",
            NumericArray::U32(_) => "u32",
            NumericArray::F32(_) => "f32",
            NumericArray::F64(_) => "f64",
        }
    }

    fn to_le_bytes(&self) -> Vec<u8> {
        match self {
            NumericArray::I8(v) => v.iter().map(|n| *n as u8).collect(),
            NumericArray::U8(v) => v.clone(),
            NumericArray::I16(v) => v.iter().flat_map(|n| n.to_le_bytes()).collect(),
            NumericArray::U16(v) => v.iter().flat_map(|n| n.to_le_bytes()).collect(),
            NumericArray::I32(v) => v.iter().flat_map(|n| n.to_le_bytes()).collect(),
            NumericArray::U32(v) => v.iter().flat_map(|n| n.to_le_bytes()).collect(),
            NumericArray::F32(v) => v.iter().flat_map(|n| n.to_le_bytes()).collect(),
            NumericArray::F64(v) => v.iter().flat_map(|n| n.to_le_bytes()).collect(),
        }
    }

    fn from_le_bytes(kind: &str, bytes: &[u8]) -> Result<Self> {
        fn chunks<const N: usize>(bytes: &[u8]) -> Result<Vec<[u8; N]>> {
            if bytes.len() % N != 0 {
                return Err(Error::InvalidExtendedJson(format!(
                    "typed array data length {} is not a multiple of {N}",
                    bytes.len()
                )));
            }
            Ok(bytes
                .chunks_exact(N)
                .map(|c| {
                    let mut buf = [0u8; N];
                    buf.copy_from_slice(c);
                    buf
                })
                .collect())
        }

        Ok(match kind {
            "i8" => NumericArray::I8(bytes.iter().map(|b| *b as i8).collect()),
            "u8" => NumericArray::U8(bytes.to_vec()),
            "i16" => NumericArray::I16(chunks::<2>(bytes)?.into_iter().map(i16::from_le_bytes).collect()),
            "u16" => NumericArray::U16(chunks::<2>(bytes)?.into_iter().map(u16::from_le_bytes).collect()),
            "i32" => NumericArray::I32(chunks::<4>(bytes)?.into_iter().map(i32::from_le_bytes).collect()),
            "u32" => NumericArray::U32(chunks::<4>(bytes)?.into_iter().map(u32::from_le_bytes).collect()),
            "f32" => NumericArray::F32(chunks::<4>(bytes)?.into_iter().map(f32::from_le_bytes).collect()),
            "f64" => NumericArray::F64(chunks::<8>(bytes)?.into_iter().map(f64::from_le_bytes).collect()),
            other => {
                return Err(Error::InvalidExtendedJson(format!(
                    "unknown typed array kind {other:?}"
                )))
            }
        })
    }
}

/// A scalar that plain JSON cannot represent natively.
#[derive(Debug, Clone, PartialEq)]
pub enum ExtendedScalar {
    /// Milliseconds since the Unix epoch
    Date(i64),
    /// A regex-like pattern with flags
    Pattern { source: String, flags: String },
    /// A typed numeric array
    NumericArray(NumericArray),
}

/// A JSON-like tree value.
///
/// Serde serialization uses the extended JSON mapping, so any `Value` can
/// pass through `serde_json` losslessly and plain-JSON values keep their
/// natural shape.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Bytes(Vec<u8>),
    Extended(ExtendedScalar),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
}

impl Value {
    /// Whether this value is an array or object.
    pub fn is_container(&self) -> bool {
        matches!(self, Value::Array(_) | Value::Object(_))
    }

    /// Whether this value is an array or object with no children.
    pub fn is_empty_container(&self) -> bool {
        match self {
            Value::Array(items) => items.is_empty(),
            Value::Object(entries) => entries.is_empty(),
            _ => false,
        }
    }

    /// Index one level into this value.
    pub fn index(&self, segment: &Segment) -> Option<&Value> {
        match (self, segment) {
            (Value::Object(entries), Segment::Key(key)) => entries.get(key),
            (Value::Array(items), Segment::Index(index)) => items.get(*index as usize),
            _ => None,
        }
    }

    /// Index a relative sub-path into this value.
    pub fn index_path(&self, relative: &[Segment]) -> Option<&Value> {
        relative
            .iter()
            .try_fold(self, |value, segment| value.index(segment))
    }

    /// Whether plain JSON can round-trip this value.
    ///
    /// Byte sequences, extended scalars, non-finite numbers and objects
    /// with `$`-prefixed keys all require the extended JSON mapping.
    pub fn is_json_representable(&self) -> bool {
        match self {
            Value::Null | Value::Bool(_) | Value::String(_) => true,
            Value::Number(n) => n.is_finite(),
            Value::Bytes(_) | Value::Extended(_) => false,
            Value::Array(items) => items.iter().all(Value::is_json_representable),
            Value::Object(entries) => entries
                .iter()
                .all(|(key, value)| !key.starts_with('$') && value.is_json_representable()),
        }
    }

    /// Convert to a plain JSON value, or `None` when the value needs the
    /// extended mapping.
    pub fn to_plain_json(&self) -> Option<serde_json::Value> {
        match self {
            Value::Null => Some(serde_json::Value::Null),
            Value::Bool(b) => Some(json!(b)),
            Value::Number(n) => serde_json::Number::from_f64(*n).map(serde_json::Value::Number),
            Value::String(s) => Some(json!(s)),
            Value::Bytes(_) | Value::Extended(_) => None,
            Value::Array(items) => items
                .iter()
                .map(Value::to_plain_json)
                .collect::<Option<Vec<_>>>()
                .map(serde_json::Value::Array),
            Value::Object(entries) => {
                let mut map = serde_json::Map::new();
                for (key, value) in entries {
                    if key.starts_with('$') {
                        return None;
                    }
                    map.insert(key.clone(), value.to_plain_json()?);
                }
                Some(serde_json::Value::Object(map))
            }
        }
    }

    /// Convert to extended JSON. Total: every value has a representation.
    pub fn to_extended_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => json!(b),
            Value::Number(n) => match serde_json::Number::from_f64(*n) {
                Some(num) => serde_json::Value::Number(num),
                None => json!({ "$number": non_finite_name(*n) }),
            },
            Value::String(s) => json!(s),
            Value::Bytes(bytes) => json!({ "$bytes": BASE64.encode(bytes) }),
            Value::Extended(ExtendedScalar::Date(ms)) => json!({ "$date": ms }),
            Value::Extended(ExtendedScalar::Pattern { source, flags }) => {
                json!({ "$pattern": { "source": source, "flags": flags } })
            }
            Value::Extended(ExtendedScalar::NumericArray(array)) => json!({
                "$typedArray": { "kind": array.kind(), "data": BASE64.encode(&array.to_le_bytes()) }
            }),
            Value::Array(items) => {
                serde_json::Value::Array(items.iter().map(Value::to_extended_json).collect())
            }
            Value::Object(entries) => {
                let escaped = entries.keys().any(|key| key.starts_with('$'));
                let map: serde_json::Map<String, serde_json::Value> = entries
                    .iter()
                    .map(|(key, value)| (key.clone(), value.to_extended_json()))
                    .collect();
                if escaped {
                    json!({ "$escaped": map })
                } else {
                    serde_json::Value::Object(map)
                }
            }
        }
    }

    /// Decode a plain JSON value.
    pub fn from_plain_json(json: &serde_json::Value) -> Value {
        match json {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(*b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s.clone()),
            serde_json::Value::Array(items) => {
                Value::Array(items.iter().map(Value::from_plain_json).collect())
            }
            serde_json::Value::Object(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Value::from_plain_json(value)))
                    .collect(),
            ),
        }
    }

    /// Decode an extended JSON value, unwrapping `$` markers.
    pub fn from_extended_json(json: &serde_json::Value) -> Result<Value> {
        match json {
            serde_json::Value::Array(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(Value::from_extended_json)
                    .collect::<Result<Vec<_>>>()?,
            )),
            serde_json::Value::Object(entries) => {
                if entries.len() == 1 {
                    let (key, inner) = entries.iter().next().expect("len checked");
                    if key.starts_with('$') {
                        return decode_marker(key, inner);
                    }
                }
                if entries.keys().any(|key| key.starts_with('$')) {
                    return Err(Error::InvalidExtendedJson(
                        "unescaped $-prefixed key".into(),
                    ));
                }
                Ok(Value::Object(
                    entries
                        .iter()
                        .map(|(key, value)| Ok((key.clone(), Value::from_extended_json(value)?)))
                        .collect::<Result<BTreeMap<_, _>>>()?,
                ))
            }
            other => Ok(Value::from_plain_json(other)),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.to_extended_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let json = serde_json::Value::deserialize(deserializer)?;
        Value::from_extended_json(&json).map_err(serde::de::Error::custom)
    }
}

fn non_finite_name(n: f64) -> &'static str {
    if n.is_nan() {
        "NaN"
    } else if n > 0.0 {
        "Infinity"
    } else {
        "-Infinity"
    }
}

fn decode_marker(key: &str, inner: &serde_json::Value) -> Result<Value> {
    match key {
        "$bytes" => {
            let text = inner
                .as_str()
                .ok_or_else(|| Error::InvalidExtendedJson("$bytes expects a string".into()))?;
            let bytes = BASE64
                .decode(text.as_bytes())
                .map_err(|e| Error::InvalidExtendedJson(format!("$bytes: {e}")))?;
            Ok(Value::Bytes(bytes))
        }
        "$date" => {
            let ms = inner
                .as_i64()
                .ok_or_else(|| Error::InvalidExtendedJson("$date expects an integer".into()))?;
            Ok(Value::Extended(ExtendedScalar::Date(ms)))
        }
        "$pattern" => {
            let source = inner
                .get("source")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| Error::InvalidExtendedJson("$pattern expects a source".into()))?;
            let flags = inner
                .get("flags")
                .and_then(serde_json::Value::as_str)
                .unwrap_or_default();
            Ok(Value::Extended(ExtendedScalar::Pattern {
                source: source.to_string(),
                flags: flags.to_string(),
            }))
        }
        "$typedArray" => {
            let kind = inner
                .get("kind")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| Error::InvalidExtendedJson("$typedArray expects a kind".into()))?;
            let data = inner
                .get("data")
                .and_then(serde_json::Value::as_str)
                .ok_or_else(|| Error::InvalidExtendedJson("$typedArray expects data".into()))?;
            let bytes = BASE64
                .decode(data.as_bytes())
                .map_err(|e| Error::InvalidExtendedJson(format!("$typedArray: {e}")))?;
            Ok(Value::Extended(ExtendedScalar::NumericArray(
                NumericArray::from_le_bytes(kind, &bytes)?,
            )))
        }
        "$number" => match inner.as_str() {
            Some("NaN") => Ok(Value::Number(f64::NAN)),
            Some("Infinity") => Ok(Value::Number(f64::INFINITY)),
            Some("-Infinity") => Ok(Value::Number(f64::NEG_INFINITY)),
            _ => Err(Error::InvalidExtendedJson("$number expects a name".into())),
        },
        "$escaped" => {
            let entries = inner
                .as_object()
                .ok_or_else(|| Error::InvalidExtendedJson("$escaped expects an object".into()))?;
            Ok(Value::Object(
                entries
                    .iter()
                    .map(|(key, value)| Ok((key.clone(), Value::from_extended_json(value)?)))
                    .collect::<Result<BTreeMap<_, _>>>()?,
            ))
        }
        other => Err(Error::InvalidExtendedJson(format!(
            "unknown marker {other:?}"
        ))),
    }
}

/// Shorthand for building object values in tests and call sites.
#[macro_export]
macro_rules! object {
    ($($key:expr => $value:expr),* $(,)?) => {{
        let mut entries = ::std::collections::BTreeMap::new();
        $(entries.insert(::std::string::String::from($key), $value);)*
        $crate::value::Value::Object(entries)
    }};
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Number(n as f64)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn representability() {
        assert!(Value::Number(1.5).is_json_representable());
        assert!(!Value::Number(f64::NAN).is_json_representable());
        assert!(!Value::Bytes(vec![1]).is_json_representable());
        assert!(!object! { "$weird" => Value::Null }.is_json_representable());
        assert!(object! { "a" => Value::Array(vec![Value::Null]) }.is_json_representable());
    }

    #[test]
    fn plain_json_roundtrip() {
        let value = object! {
            "name" => Value::from("Alice"),
            "age" => Value::from(30),
            "tags" => Value::Array(vec![Value::from("x"), Value::Bool(true)]),
        };
        let json = value.to_plain_json().unwrap();
        assert_eq!(Value::from_plain_json(&json), value);
    }

    #[test]
    fn extended_json_roundtrip() {
        let value = object! {
            "blob" => Value::Bytes(vec![0, 1, 254, 255]),
            "when" => Value::Extended(ExtendedScalar::Date(1706745600000)),
            "match" => Value::Extended(ExtendedScalar::Pattern {
                source: "^a+$".into(),
                flags: "i".into(),
            }),
            "samples" => Value::Extended(ExtendedScalar::NumericArray(
                NumericArray::F32(vec![1.0, -2.5]),
            )),
        };
        let json = value.to_extended_json();
        assert_eq!(Value::from_extended_json(&json).unwrap(), value);
    }

    #[test]
    fn escaped_dollar_keys_roundtrip() {
        let value = object! { "$date" => Value::from("not a marker") };
        assert!(value.to_plain_json().is_none());
        let json = value.to_extended_json();
        assert_eq!(json.get("$escaped").unwrap().get("$date").unwrap(), "not a marker");
        assert_eq!(Value::from_extended_json(&json).unwrap(), value);
    }

    #[test]
    fn typed_array_kinds_roundtrip() {
        for array in [
            NumericArray::I8(vec![-1, 2]),
            NumericArray::U8(vec![7]),
            NumericArray::I16(vec![-300]),
            NumericArray::U16(vec![65000]),
            NumericArray::I32(vec![-70000]),
            NumericArray::U32(vec![3_000_000_000]),
            NumericArray::F32(vec![1.5]),
            NumericArray::F64(vec![-0.25]),
        ] {
            let value = Value::Extended(ExtendedScalar::NumericArray(array));
            let json = value.to_extended_json();
            assert_eq!(Value::from_extended_json(&json).unwrap(), value);
        }
    }

    #[test]
    fn serde_uses_the_extended_mapping() {
        let value = object! {
            "blob" => Value::Bytes(vec![1, 2]),
            "n" => Value::Number(f64::NEG_INFINITY),
            "plain" => Value::from("text"),
        };
        let text = serde_json::to_string(&value).unwrap();
        assert!(text.contains("\"$bytes\""));
        assert!(text.contains("\"-Infinity\""));
        assert!(text.contains("\"plain\":\"text\""));
        let back: Value = serde_json::from_str(&text).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn index_path() {
        let value = object! {
            "a" => Value::Array(vec![Value::from(1), Value::from(2)]),
        };
        let path: Vec<Segment> = vec!["a".into(), 1u64.into()];
        assert_eq!(value.index_path(&path), Some(&Value::Number(2.0)));
        let missing: Vec<Segment> = vec!["b".into()];
        assert_eq!(value.index_path(&missing), None);
    }
}
