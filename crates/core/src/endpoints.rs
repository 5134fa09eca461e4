//! REST paths for each entity kind.

use crate::ids::{EntityId, EntityKey, EntityKind};

pub fn collection(kind: EntityKind) -> &'static str {
    match kind {
        EntityKind::Order => "/orders",
        EntityKind::Product => "/products",
        EntityKind::User => "/users",
    }
}

pub fn item(key: &EntityKey) -> String {
    format!("{}/{}", collection(key.kind), key.id)
}

pub fn order_status(id: &EntityId) -> String {
    format!("{}/{}/status", collection(EntityKind::Order), id)
}
