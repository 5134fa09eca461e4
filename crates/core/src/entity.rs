use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::field_value::FieldValue;
use crate::ids::{EntityId, EntityKey, EntityKind};

pub type Fields = BTreeMap<String, FieldValue>;

/// Version assumed when the server omits one.
pub const DEFAULT_VERSION: u64 = 1;

pub mod field {
    pub const ID: &str = "id";
    pub const VERSION: &str = "version";
    pub const CREATED_AT: &str = "createdAt";
    pub const STATUS: &str = "status";
    pub const CUSTOMER: &str = "customer";
    pub const NAME: &str = "name";
    pub const EMAIL: &str = "email";
    pub const ROLE: &str = "role";
    pub const DESCRIPTION: &str = "description";
    pub const PRICE: &str = "price";
    pub const STOCK: &str = "stock";
    pub const CATEGORY: &str = "category";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Shipped,
    Delivered,
}

impl OrderStatus {
    pub const SEQUENCE: [OrderStatus; 4] =
        [Self::Pending, Self::Processing, Self::Shipped, Self::Delivered];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Shipped => "shipped",
            Self::Delivered => "delivered",
        }
    }

    pub fn parse(s: &str) -> Result<Self, CoreError> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "shipped" => Ok(Self::Shipped),
            "delivered" => Ok(Self::Delivered),
            _ => Err(CoreError::InvalidData(format!("unknown order status: {s}"))),
        }
    }

    /// Next status in the fulfilment sequence; `None` once delivered.
    pub fn next(&self) -> Option<Self> {
        let pos = Self::SEQUENCE.iter().position(|s| s == self)?;
        Self::SEQUENCE.get(pos + 1).copied()
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum UserRole {
    #[default]
    Customer,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Admin => "admin",
        }
    }
}

/// A canonical record of one order, product or user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub key: EntityKey,
    pub version: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub fields: Fields,
}

impl Entity {
    pub fn new(key: EntityKey, version: u64, fields: Fields) -> Self {
        Self {
            key,
            version,
            created_at: None,
            fields,
        }
    }

    /// Parse a REST representation. `id` is required, `version` defaults to
    /// [`DEFAULT_VERSION`], every other key becomes a field.
    pub fn from_json(kind: EntityKind, value: &serde_json::Value) -> Result<Self, CoreError> {
        let object = value
            .as_object()
            .ok_or_else(|| CoreError::InvalidData(format!("{kind} payload is not an object")))?;
        let id = object
            .get(field::ID)
            .ok_or_else(|| CoreError::InvalidData(format!("{kind} payload has no id")))
            .and_then(EntityId::from_json)?;
        let patch = EntityPatch::from_json(value);
        Ok(Self {
            key: EntityKey { kind, id },
            version: patch.version.unwrap_or(DEFAULT_VERSION),
            created_at: patch.created_at,
            fields: patch.fields,
        })
    }

    pub fn to_json(&self) -> serde_json::Value {
        let mut object: serde_json::Map<String, serde_json::Value> = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        object.insert(field::ID.to_string(), self.key.id.to_json());
        object.insert(field::VERSION.to_string(), serde_json::Value::from(self.version));
        if let Some(created_at) = self.created_at {
            object.insert(
                field::CREATED_AT.to_string(),
                serde_json::Value::from(created_at.to_rfc3339()),
            );
        }
        serde_json::Value::Object(object)
    }

    pub fn field(&self, key: &str) -> Option<&FieldValue> {
        self.fields.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(FieldValue::as_text)
    }

    /// Order status, if this is an order carrying a recognised one.
    pub fn order_status(&self) -> Option<OrderStatus> {
        if self.key.kind != EntityKind::Order {
            return None;
        }
        self.text(field::STATUS).and_then(|s| OrderStatus::parse(s).ok())
    }

    /// Copy of this entity with `patch` written over its fields.
    pub fn with_fields(&self, patch: &Fields) -> Self {
        let mut next = self.clone();
        for (k, v) in patch {
            next.fields.insert(k.clone(), v.clone());
        }
        next
    }

    /// Merge an authoritative server patch. Applying the same patch twice
    /// is the same as applying it once.
    pub fn apply_patch(&mut self, patch: &EntityPatch) {
        if let Some(version) = patch.version {
            self.version = version;
        }
        if patch.created_at.is_some() {
            self.created_at = patch.created_at;
        }
        for (k, v) in &patch.fields {
            self.fields.insert(k.clone(), v.clone());
        }
    }

    /// Content hash over version and fields, used to spot server-side drift.
    pub fn fingerprint(&self) -> Result<[u8; 32], CoreError> {
        let bytes = rmp_serde::to_vec(&(self.version, &self.fields))
            .map_err(|e| CoreError::Serialization(e.to_string()))?;
        Ok(*blake3::hash(&bytes).as_bytes())
    }

    /// Case-insensitive list filter. Orders match on id, customer name or
    /// status, products on name or category, users on name, email or role.
    pub fn matches_search(&self, term: &str) -> bool {
        let term = term.trim().to_lowercase();
        if term.is_empty() {
            return true;
        }
        let contains = |value: Option<&str>| {
            value.is_some_and(|v| v.to_lowercase().contains(&term))
        };
        match self.key.kind {
            EntityKind::Order => {
                self.key.id.to_string().to_lowercase().contains(&term)
                    || contains(
                        self.field(field::CUSTOMER)
                            .and_then(|c| c.get(field::NAME))
                            .and_then(FieldValue::as_text),
                    )
                    || contains(self.text(field::STATUS))
            }
            EntityKind::Product => {
                contains(self.text(field::NAME)) || contains(self.text(field::CATEGORY))
            }
            EntityKind::User => {
                contains(self.text(field::NAME))
                    || contains(self.text(field::EMAIL))
                    || contains(self.text(field::ROLE))
            }
        }
    }
}

/// Partial entity returned by the server after a mutation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityPatch {
    pub version: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
    pub fields: Fields,
}

impl EntityPatch {
    /// Lenient parse: anything that isn't an object yields an empty patch.
    pub fn from_json(value: &serde_json::Value) -> Self {
        let Some(object) = value.as_object() else {
            return Self::default();
        };
        let mut patch = Self::default();
        for (k, v) in object {
            match k.as_str() {
                field::ID => {}
                field::VERSION => patch.version = v.as_u64(),
                field::CREATED_AT => patch.created_at = parse_timestamp(v),
                _ => {
                    patch.fields.insert(k.clone(), FieldValue::from_json(v));
                }
            }
        }
        patch
    }

}

/// Accepts RFC 3339 strings or epoch milliseconds.
fn parse_timestamp(value: &serde_json::Value) -> Option<DateTime<Utc>> {
    match value {
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|dt| dt.with_timezone(&Utc)),
        serde_json::Value::Number(n) => n
            .as_i64()
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single()),
        _ => None,
    }
}
