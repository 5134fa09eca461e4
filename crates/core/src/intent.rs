use serde::{Deserialize, Serialize};

use crate::entity::{field, Fields, OrderStatus, UserRole};
use crate::field_value::FieldValue;
use crate::ids::{EntityId, EntityKey, EntityKind};

/// Partial product edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProductChanges {
    pub name: Option<String>,
    pub description: Option<String>,
    pub price: Option<f64>,
    pub stock: Option<i64>,
    pub category: Option<String>,
}

impl ProductChanges {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(name) = &self.name {
            fields.insert(field::NAME.into(), FieldValue::from(name.as_str()));
        }
        if let Some(description) = &self.description {
            fields.insert(field::DESCRIPTION.into(), FieldValue::from(description.as_str()));
        }
        if let Some(price) = self.price {
            fields.insert(field::PRICE.into(), FieldValue::Float(price));
        }
        if let Some(stock) = self.stock {
            fields.insert(field::STOCK.into(), FieldValue::Integer(stock));
        }
        if let Some(category) = &self.category {
            fields.insert(field::CATEGORY.into(), FieldValue::from(category.as_str()));
        }
        fields
    }
}

/// Partial user edit; `None` leaves the field untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChanges {
    pub name: Option<String>,
    pub email: Option<String>,
    pub role: Option<UserRole>,
}

impl UserChanges {
    pub fn to_fields(&self) -> Fields {
        let mut fields = Fields::new();
        if let Some(name) = &self.name {
            fields.insert(field::NAME.into(), FieldValue::from(name.as_str()));
        }
        if let Some(email) = &self.email {
            fields.insert(field::EMAIL.into(), FieldValue::from(email.as_str()));
        }
        if let Some(role) = self.role {
            fields.insert(field::ROLE.into(), FieldValue::from(role.as_str()));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub description: String,
    pub price: f64,
    pub stock: i64,
    pub category: String,
}

impl NewProduct {
    pub fn to_fields(&self) -> Fields {
        ProductChanges {
            name: Some(self.name.clone()),
            description: Some(self.description.clone()),
            price: Some(self.price),
            stock: Some(self.stock),
            category: Some(self.category.clone()),
        }
        .to_fields()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub role: UserRole,
}

impl NewUser {
    pub fn to_fields(&self) -> Fields {
        UserChanges {
            name: Some(self.name.clone()),
            email: Some(self.email.clone()),
            role: Some(self.role),
        }
        .to_fields()
    }
}

/// Everything the presentation layer can ask the coordinator to do.
#[derive(Debug, Clone, PartialEq)]
pub enum MutationIntent {
    SetOrderStatus { id: EntityId, status: OrderStatus },
    UpdateProduct { id: EntityId, changes: ProductChanges },
    UpdateUser { id: EntityId, changes: UserChanges },
    CreateProduct(NewProduct),
    CreateUser(NewUser),
    DeleteProduct { id: EntityId },
    DeleteUser { id: EntityId },
}

impl MutationIntent {
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::SetOrderStatus { .. } => EntityKind::Order,
            Self::UpdateProduct { .. } | Self::CreateProduct(_) | Self::DeleteProduct { .. } => {
                EntityKind::Product
            }
            Self::UpdateUser { .. } | Self::CreateUser(_) | Self::DeleteUser { .. } => EntityKind::User,
        }
    }

    /// Target entity; creates have none until the server assigns an id.
    pub fn key(&self) -> Option<EntityKey> {
        match self {
            Self::SetOrderStatus { id, .. } => Some(EntityKey::order(id.clone())),
            Self::UpdateProduct { id, .. } | Self::DeleteProduct { id } => {
                Some(EntityKey::product(id.clone()))
            }
            Self::UpdateUser { id, .. } | Self::DeleteUser { id } => Some(EntityKey::user(id.clone())),
            Self::CreateProduct(_) | Self::CreateUser(_) => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::SetOrderStatus { .. } => "set_order_status",
            Self::UpdateProduct { .. } => "update_product",
            Self::UpdateUser { .. } => "update_user",
            Self::CreateProduct(_) => "create_product",
            Self::CreateUser(_) => "create_user",
            Self::DeleteProduct { .. } => "delete_product",
            Self::DeleteUser { .. } => "delete_user",
        }
    }
}

/// JSON body of an update: the changed fields plus the version token.
pub fn update_body(fields: &Fields, version: u64) -> serde_json::Value {
    let mut object: serde_json::Map<String, serde_json::Value> =
        fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect();
    object.insert(field::VERSION.to_string(), serde_json::Value::from(version));
    serde_json::Value::Object(object)
}

pub fn create_body(fields: &Fields) -> serde_json::Value {
    serde_json::Value::Object(fields.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
}
