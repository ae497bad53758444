//! The dynamic [`Value`] model.

use crate::encoder::to_canonical_cbor;
use std::cmp::Ordering;
use std::fmt;

/// A document field value.
///
/// The model is the float-free subset of CBOR: every `Value` has exactly one
/// canonical encoding, which is what makes content hashing stable.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// CBOR null.
    Null,
    /// Boolean.
    Bool(bool),
    /// Signed 64-bit integer.
    Integer(i64),
    /// Byte string.
    Bytes(Vec<u8>),
    /// UTF-8 text.
    Text(String),
    /// Ordered array.
    Array(Vec<Value>),
    /// Map; construct with [`Value::map`] to keep keys in canonical order.
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Builds a map with keys in canonical order.
    ///
    /// Later duplicates replace earlier ones.
    #[must_use]
    pub fn map(pairs: Vec<(Value, Value)>) -> Self {
        let mut sorted: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            match sorted.iter_mut().find(|(k, _)| *k == key) {
                Some(slot) => slot.1 = value,
                None => sorted.push((key, value)),
            }
        }
        sorted.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(sorted)
    }

    /// Builds a text value.
    #[must_use]
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Orders two values the way their canonical encodings sort:
    /// shorter encoding first, then bytewise.
    #[must_use]
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        match (to_canonical_cbor(self), to_canonical_cbor(other)) {
            (Ok(a), Ok(b)) => a.len().cmp(&b.len()).then_with(|| a.cmp(&b)),
            // only maps with duplicate keys fail to encode; order them last
            (Ok(_), Err(_)) => Ordering::Less,
            (Err(_), Ok(_)) => Ordering::Greater,
            (Err(_), Err(_)) => Ordering::Equal,
        }
    }

    /// Short name of the variant, used in error messages.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Returns `true` for [`Value::Null`].
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// The boolean, if this is one.
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The integer, if this is one.
    #[must_use]
    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// The bytes, if this is a byte string.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// The text, if this is a text string.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// The elements, if this is an array.
    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(items) => Some(items),
            _ => None,
        }
    }

    /// The entries, if this is a map.
    #[must_use]
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(pairs) => Some(pairs),
            _ => None,
        }
    }

    /// Looks up a text key in a map value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k.as_text() == Some(key))
            .map(|(_, v)| v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Bytes(bytes) => {
                f.write_str("h'")?;
                for byte in bytes {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("'")
            }
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::Bytes(bytes)
    }
}

impl From<&[u8]> for Value {
    fn from(bytes: &[u8]) -> Self {
        Value::Bytes(bytes.to_vec())
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_orders_keys_by_encoded_length_then_bytes() {
        let map = Value::map(vec![
            (Value::text("title"), Value::Integer(1)),
            (Value::text("b"), Value::Integer(2)),
            (Value::text("a"), Value::Integer(3)),
            (Value::Integer(7), Value::Null),
        ]);
        let keys: Vec<String> = map
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.to_string())
            .collect();
        assert_eq!(keys, vec!["7", "\"a\"", "\"b\"", "\"title\""]);
    }

    #[test]
    fn map_keeps_last_duplicate() {
        let map = Value::map(vec![
            (Value::text("k"), Value::Integer(1)),
            (Value::text("k"), Value::Integer(2)),
        ]);
        assert_eq!(map.as_map().unwrap().len(), 1);
        assert_eq!(map.get("k"), Some(&Value::Integer(2)));
    }

    #[test]
    fn negative_integers_sort_after_positive() {
        let mut values = vec![
            Value::Integer(-1),
            Value::Integer(300),
            Value::Integer(0),
            Value::Integer(-300),
        ];
        values.sort_by(Value::cmp_canonical);
        assert_eq!(
            values,
            vec![
                Value::Integer(0),
                Value::Integer(-1),
                Value::Integer(300),
                Value::Integer(-300),
            ]
        );
    }

    #[test]
    fn accessors_match_variants() {
        assert!(Value::Null.is_null());
        assert_eq!(Value::Bool(true).as_bool(), Some(true));
        assert_eq!(Value::Integer(4).as_integer(), Some(4));
        assert_eq!(Value::text("x").as_text(), Some("x"));
        assert_eq!(Value::Bytes(vec![1]).as_bytes(), Some(&[1u8][..]));
        assert_eq!(Value::text("x").as_integer(), None);
        assert_eq!(Value::Integer(1).get("x"), None);
        assert_eq!(Value::Array(vec![]).type_name(), "array");
    }

    #[test]
    fn display_is_readable() {
        let value = Value::map(vec![
            (Value::text("tags"), Value::Array(vec![1.into(), "a".into()])),
            (Value::text("id"), Value::Bytes(vec![0xab, 0x01])),
        ]);
        assert_eq!(value.to_string(), r#"{"id": h'ab01', "tags": [1, "a"]}"#);
    }

    #[test]
    fn option_converts_to_null() {
        assert_eq!(Value::from(None::<i64>), Value::Null);
        assert_eq!(Value::from(Some("x")), Value::text("x"));
    }
}
