use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::CoreError;

macro_rules! uuid_id {
    ($name:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                let s = self.0.to_string();
                write!(f, "{}({})", stringify!($name), s.get(..8).unwrap_or(&s))
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

uuid_id!(MutationId);
uuid_id!(NotificationId);

/// Server-assigned identifier. The REST API hands out integers for most
/// collections but string ids are accepted as-is.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityId {
    Int(i64),
    Text(String),
}

impl EntityId {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, CoreError> {
        match value {
            serde_json::Value::Number(n) => n
                .as_i64()
                .map(Self::Int)
                .ok_or_else(|| CoreError::InvalidData(format!("non-integer id: {n}"))),
            serde_json::Value::String(s) => Ok(Self::Text(s.clone())),
            other => Err(CoreError::InvalidData(format!("unsupported id: {other}"))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Int(n) => serde_json::Value::from(*n),
            Self::Text(s) => serde_json::Value::from(s.as_str()),
        }
    }

    /// Key used for storage rows. Integer and string ids never collide.
    pub fn storage_key(&self) -> String {
        match self {
            Self::Int(n) => format!("i:{n}"),
            Self::Text(s) => format!("s:{s}"),
        }
    }
}

impl From<i64> for EntityId {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<&str> for EntityId {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(n) => write!(f, "{n}"),
            Self::Text(s) => write!(f, "{s}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Order,
    Product,
    User,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Order => "order",
            Self::Product => "product",
            Self::User => "user",
        }
    }

    /// Capitalized label used in user-facing messages ("Order #7").
    pub fn label(&self) -> &'static str {
        match self {
            Self::Order => "Order",
            Self::Product => "Product",
            Self::User => "User",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one entity across all canonical collections.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityKey {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityKey {
    pub fn new(kind: EntityKind, id: impl Into<EntityId>) -> Self {
        Self { kind, id: id.into() }
    }

    pub fn order(id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::Order, id)
    }

    pub fn product(id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::Product, id)
    }

    pub fn user(id: impl Into<EntityId>) -> Self {
        Self::new(EntityKind::User, id)
    }
}

impl fmt::Display for EntityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.kind.label(), self.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_id_from_json_accepts_numbers_and_strings() {
        let n = EntityId::from_json(&serde_json::json!(7)).unwrap();
        assert_eq!(n, EntityId::Int(7));
        let s = EntityId::from_json(&serde_json::json!("ord-7")).unwrap();
        assert_eq!(s, EntityId::Text("ord-7".into()));
        assert!(EntityId::from_json(&serde_json::json!(1.5)).is_err());
        assert!(EntityId::from_json(&serde_json::json!(null)).is_err());
    }

    #[test]
    fn storage_keys_distinguish_id_types() {
        assert_ne!(EntityId::Int(7).storage_key(), EntityId::from("7").storage_key());
    }

    #[test]
    fn key_display_matches_message_format() {
        assert_eq!(EntityKey::order(7).to_string(), "Order #7");
    }

    #[test]
    fn mutation_ids_are_unique() {
        assert_ne!(MutationId::new(), MutationId::new());
    }
}
