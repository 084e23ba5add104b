//! Id resolution policies.
//!
//! A set turns each member value into the id it is indexed by. The policy is
//! chosen per set at construction; every policy is plain data so a forest
//! snapshot carries it along with the contents.
//!
//!   - `ById`: the member type knows its own id (`Identified`).
//!   - `JsonField`: read a configured field off a `serde_json::Value`.
//!   - `Stringified<S>`: any policy above, with the id coerced to text so large
//!     integers survive serialization boundaries intact.
//!   - `SelfId`: the member is its own id (must be totally ordered).

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Resolve an id for a candidate member.
pub trait IdStrategy<V> {
    type Id: Ord + Clone + fmt::Debug;

    fn resolve(&self, member: &V) -> Result<Self::Id>;
}

/// Member types that carry their own id field.
pub trait Identified {
    type Id: Ord + Clone + fmt::Debug;

    /// `None` when the member has no id (the field is "missing").
    fn id(&self) -> Option<Self::Id>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ById;

impl<V: Identified> IdStrategy<V> for ById {
    type Id = V::Id;

    fn resolve(&self, member: &V) -> Result<Self::Id> {
        member
            .id()
            .ok_or_else(|| Error::invariant("member has no id"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelfId;

impl<V: Ord + Clone + fmt::Debug> IdStrategy<V> for SelfId {
    type Id = V;

    fn resolve(&self, member: &V) -> Result<V> {
        Ok(member.clone())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stringified<S>(pub S);

impl<V, S> IdStrategy<V> for Stringified<S>
where
    S: IdStrategy<V>,
    S::Id: fmt::Display,
{
    type Id = String;

    fn resolve(&self, member: &V) -> Result<String> {
        self.0.resolve(member).map(|id| id.to_string())
    }
}

/// Orderable id read out of a JSON member.
///
/// Serialized untagged, so ids travel as plain JSON numbers or strings.
/// Integers above `i64::MAX` land in `UInt` and sort after every `Int`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JsonKey {
    Int(i64),
    UInt(u64),
    Text(String),
}

impl fmt::Display for JsonKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JsonKey::Int(n) => write!(f, "{n}"),
            JsonKey::UInt(n) => write!(f, "{n}"),
            JsonKey::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for JsonKey {
    fn from(n: i64) -> Self {
        JsonKey::Int(n)
    }
}

impl From<&str> for JsonKey {
    fn from(s: &str) -> Self {
        JsonKey::Text(s.to_string())
    }
}

impl TryFrom<&Value> for JsonKey {
    type Error = Error;

    fn try_from(v: &Value) -> Result<Self> {
        match v {
            Value::String(s) => Ok(JsonKey::Text(s.clone())),
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(JsonKey::Int(i))
                } else if let Some(u) = n.as_u64() {
                    Ok(JsonKey::UInt(u))
                } else {
                    Err(Error::invariant(format!("non-integer id {n}")))
                }
            }
            other => Err(Error::invariant(format!("id must be a string or integer, got {other}"))),
        }
    }
}

/// Attribute-based policy over JSON objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JsonField {
    pub name: String,
}

impl JsonField {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for JsonField {
    fn default() -> Self {
        Self::new("id")
    }
}

impl IdStrategy<Value> for JsonField {
    type Id = JsonKey;

    fn resolve(&self, member: &Value) -> Result<JsonKey> {
        let Some(field) = member.get(&self.name) else {
            return Err(Error::invariant(format!("member has no `{}` field", self.name)));
        };
        JsonKey::try_from(field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Clone)]
    struct Doc {
        id: Option<u64>,
    }

    impl Identified for Doc {
        type Id = u64;
        fn id(&self) -> Option<u64> {
            self.id
        }
    }

    #[test]
    fn by_id_reads_the_field_and_rejects_missing() {
        assert_eq!(ById.resolve(&Doc { id: Some(7) }).unwrap(), 7);
        assert!(matches!(
            ById.resolve(&Doc { id: None }),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn stringified_keeps_large_integers_exact() {
        let big = json!({ "id": u64::MAX });
        let s = Stringified(JsonField::default()).resolve(&big).unwrap();
        assert_eq!(s, u64::MAX.to_string());
    }

    #[test]
    fn json_field_accepts_strings_and_integers_only() {
        let f = JsonField::new("key");
        assert_eq!(f.resolve(&json!({"key": "a"})).unwrap(), JsonKey::from("a"));
        assert_eq!(f.resolve(&json!({"key": -3})).unwrap(), JsonKey::Int(-3));
        assert!(f.resolve(&json!({"key": 1.5})).is_err());
        assert!(f.resolve(&json!({"other": 1})).is_err());
        assert!(f.resolve(&json!(4)).is_err());
    }

    #[test]
    fn self_id_is_the_value() {
        assert_eq!(SelfId.resolve(&"x".to_string()).unwrap(), "x");
    }

    #[test]
    fn json_keys_order_unsigned_overflow_last() {
        assert!(JsonKey::Int(i64::MAX) < JsonKey::UInt(u64::MAX));
    }
}
