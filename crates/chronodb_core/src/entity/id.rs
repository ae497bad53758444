//! Entity identifier.

use crate::error::{CoreError, CoreResult};
use chronodb_codec::Value;
use std::fmt;
use uuid::Uuid;

/// Caller-supplied identifier of an entity.
///
/// Every dynamic value entering the system goes through [`EntityId::coerce`],
/// and the typed `From` impls apply the same rules, so `"x"` given as a
/// `&str` and `Value::Text("x")` name the same entity.
///
/// | input | id |
/// |---|---|
/// | text starting with `:` | keyword (`:film/spectre`) |
/// | other text | string |
/// | integer | integer |
/// | 16-byte byte string | UUID |
///
/// Ids order by kind (keyword, string, integer, UUID), then by value.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityId {
    /// Keyword id, stored without its leading colon.
    Keyword(String),
    /// String id.
    Text(String),
    /// Integer id.
    Integer(i64),
    /// UUID id.
    Uuid(Uuid),
}

impl EntityId {
    /// Canonicalizes a dynamic value into an id.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] for values with no id form (null,
    /// booleans, arrays, maps, byte strings that are not 16 bytes long, an
    /// empty keyword).
    pub fn coerce(value: &Value) -> CoreResult<Self> {
        match value {
            Value::Text(s) => Self::parse_text(s),
            Value::Integer(n) => Ok(Self::Integer(*n)),
            Value::Bytes(bytes) => Uuid::from_slice(bytes).map(Self::Uuid).map_err(|_| {
                CoreError::invalid_argument(format!(
                    "byte string entity id must be 16 bytes, got {}",
                    bytes.len()
                ))
            }),
            other => Err(CoreError::invalid_argument(format!(
                "{} cannot be used as an entity id",
                other.type_name()
            ))),
        }
    }

    /// Creates a keyword id. A leading colon is optional.
    ///
    /// # Errors
    ///
    /// [`CoreError::InvalidArgument`] if the name is empty.
    pub fn keyword(name: &str) -> CoreResult<Self> {
        let name = name.strip_prefix(':').unwrap_or(name);
        if name.is_empty() {
            return Err(CoreError::invalid_argument("keyword entity id is empty"));
        }
        Ok(Self::Keyword(name.to_owned()))
    }

    /// Creates a random UUID id.
    #[must_use]
    pub fn random() -> Self {
        Self::Uuid(Uuid::new_v4())
    }

    /// The value this id is persisted as; [`coerce`](Self::coerce) maps it
    /// back to the same id.
    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Keyword(name) => Value::Text(format!(":{name}")),
            Self::Text(s) => Value::Text(s.clone()),
            Self::Integer(n) => Value::Integer(*n),
            Self::Uuid(uuid) => Value::Bytes(uuid.as_bytes().to_vec()),
        }
    }

    fn parse_text(s: &str) -> CoreResult<Self> {
        if s.starts_with(':') {
            Self::keyword(s)
        } else {
            Ok(Self::Text(s.to_owned()))
        }
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({self})")
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword(name) => write!(f, ":{name}"),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Integer(n) => write!(f, "{n}"),
            Self::Uuid(uuid) => write!(f, "#uuid {uuid}"),
        }
    }
}

impl From<&str> for EntityId {
    /// `":"` alone has no keyword name and becomes the string id `":"`.
    fn from(s: &str) -> Self {
        Self::parse_text(s).unwrap_or_else(|_| Self::Text(s.to_owned()))
    }
}

impl From<String> for EntityId {
    fn from(s: String) -> Self {
        Self::from(s.as_str())
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self::Integer(n)
    }
}

impl From<Uuid> for EntityId {
    fn from(uuid: Uuid) -> Self {
        Self::Uuid(uuid)
    }
}

impl TryFrom<&Value> for EntityId {
    type Error = CoreError;

    fn try_from(value: &Value) -> CoreResult<Self> {
        Self::coerce(value)
    }
}
