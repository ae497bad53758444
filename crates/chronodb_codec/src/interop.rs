//! Bridges between [`Value`] and the serde data model.
//!
//! Typed Rust structs become documents through [`to_value`] and come back
//! through [`from_value`]; ciborium does the struct walking and the result
//! is normalized into canonical form. `Value` itself implements
//! `Serialize`/`Deserialize`, so JSON fixtures can be read with any serde
//! format crate.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;
use ciborium::value::{Integer, Value as Cbor};
use serde::de::{self, DeserializeOwned, MapAccess, SeqAccess, Visitor};
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Converts any serializable value into a canonical [`Value`].
///
/// # Errors
///
/// [`CodecError::FloatForbidden`] for floating point fields,
/// [`CodecError::IntegerOverflow`] for integers outside `i64`,
/// [`CodecError::Serde`] when serialization itself fails.
pub fn to_value<T: Serialize + ?Sized>(value: &T) -> CodecResult<Value> {
    let raw = Cbor::serialized(value).map_err(CodecError::serde)?;
    from_ciborium(raw)
}

/// Rebuilds a typed value from a [`Value`].
///
/// # Errors
///
/// [`CodecError::Serde`] if the shape does not match `T`.
pub fn from_value<T: DeserializeOwned>(value: &Value) -> CodecResult<T> {
    into_ciborium(value).deserialized().map_err(CodecError::serde)
}

fn from_ciborium(raw: Cbor) -> CodecResult<Value> {
    Ok(match raw {
        Cbor::Null => Value::Null,
        Cbor::Bool(b) => Value::Bool(b),
        Cbor::Integer(n) => {
            let wide = i128::from(n);
            Value::Integer(i64::try_from(wide).map_err(|_| CodecError::IntegerOverflow)?)
        }
        Cbor::Bytes(bytes) => Value::Bytes(bytes),
        Cbor::Text(text) => Value::Text(text),
        Cbor::Float(_) => return Err(CodecError::FloatForbidden),
        Cbor::Tag(tag, _) => return Err(CodecError::unsupported_type(format!("tag {tag}"))),
        Cbor::Array(items) => Value::Array(
            items
                .into_iter()
                .map(from_ciborium)
                .collect::<CodecResult<_>>()?,
        ),
        Cbor::Map(entries) => {
            let mut pairs = Vec::with_capacity(entries.len());
            for (k, v) in entries {
                pairs.push((from_ciborium(k)?, from_ciborium(v)?));
            }
            Value::map(pairs)
        }
        _ => return Err(CodecError::unsupported_type("unknown CBOR item")),
    })
}

fn into_ciborium(value: &Value) -> Cbor {
    match value {
        Value::Null => Cbor::Null,
        Value::Bool(b) => Cbor::Bool(*b),
        Value::Integer(n) => Cbor::Integer(Integer::from(*n)),
        Value::Bytes(bytes) => Cbor::Bytes(bytes.clone()),
        Value::Text(text) => Cbor::Text(text.clone()),
        Value::Array(items) => Cbor::Array(items.iter().map(into_ciborium).collect()),
        Value::Map(pairs) => Cbor::Map(
            pairs
                .iter()
                .map(|(k, v)| (into_ciborium(k), into_ciborium(v)))
                .collect(),
        ),
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(b) => serializer.serialize_bool(*b),
            Value::Integer(n) => serializer.serialize_i64(*n),
            Value::Bytes(bytes) => serializer.serialize_bytes(bytes),
            Value::Text(text) => serializer.serialize_str(text),
            Value::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Value::Map(pairs) => {
                let mut map = serializer.serialize_map(Some(pairs.len()))?;
                for (k, v) in pairs {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a float-free CBOR-compatible value")
    }

    fn visit_unit<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_none<E: de::Error>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_some<D: Deserializer<'de>>(self, deserializer: D) -> Result<Value, D::Error> {
        Value::deserialize(deserializer)
    }

    fn visit_bool<E: de::Error>(self, b: bool) -> Result<Value, E> {
        Ok(Value::Bool(b))
    }

    fn visit_i64<E: de::Error>(self, n: i64) -> Result<Value, E> {
        Ok(Value::Integer(n))
    }

    fn visit_u64<E: de::Error>(self, n: u64) -> Result<Value, E> {
        i64::try_from(n)
            .map(Value::Integer)
            .map_err(|_| E::custom(CodecError::IntegerOverflow))
    }

    fn visit_f64<E: de::Error>(self, _: f64) -> Result<Value, E> {
        Err(E::custom(CodecError::FloatForbidden))
    }

    fn visit_str<E: de::Error>(self, s: &str) -> Result<Value, E> {
        Ok(Value::Text(s.to_owned()))
    }

    fn visit_string<E: de::Error>(self, s: String) -> Result<Value, E> {
        Ok(Value::Text(s))
    }

    fn visit_bytes<E: de::Error>(self, bytes: &[u8]) -> Result<Value, E> {
        Ok(Value::Bytes(bytes.to_vec()))
    }

    fn visit_byte_buf<E: de::Error>(self, bytes: Vec<u8>) -> Result<Value, E> {
        Ok(Value::Bytes(bytes))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0).min(1024));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Array(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Value, A::Error> {
        let mut pairs = Vec::new();
        while let Some((k, v)) = access.next_entry::<Value, Value>()? {
            pairs.push((k, v));
        }
        Ok(Value::map(pairs))
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}
