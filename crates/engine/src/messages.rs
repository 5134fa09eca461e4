//! Banner texts shown to the user for each stage of a mutation.

use shopdesk_core::entity::field;
use shopdesk_core::{ConflictKind, Entity, EntityKey, EntityKind, MutationIntent};

pub struct Text {
    pub title: String,
    pub message: String,
}

impl Text {
    fn new(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self { title: title.into(), message: message.into() }
    }
}

fn what_changed(intent: &MutationIntent) -> &'static str {
    match intent {
        MutationIntent::SetOrderStatus { .. } => "status",
        _ => "details",
    }
}

pub fn pending(intent: &MutationIntent, key: &EntityKey, current: &Entity) -> Text {
    match intent {
        MutationIntent::SetOrderStatus { status, .. } => {
            let from = current.text(field::STATUS).unwrap_or("unknown");
            Text::new(
                "Updating order status",
                format!("Changing {key} from {from} to {}", status.as_str()),
            )
        }
        _ => Text::new(
            format!("Updating {}", key.kind.as_str()),
            format!("Saving changes to {key}"),
        ),
    }
}

pub fn committed(intent: &MutationIntent, key: &EntityKey) -> Text {
    match intent {
        MutationIntent::SetOrderStatus { status, .. } => Text::new(
            "Order updated",
            format!("{key} status changed to {}", status.as_str()),
        ),
        _ => Text::new(format!("{} updated", key.kind.label()), format!("{key} saved")),
    }
}

pub fn update_failed(intent: &MutationIntent, key: &EntityKey, conflict: ConflictKind) -> Text {
    let noun = key.kind.as_str();
    match conflict {
        ConflictKind::StaleVersion => Text::new(
            "Update Conflict",
            format!("This {noun} has been modified by someone else. The list has been refreshed."),
        ),
        ConflictKind::NotFound => Text::new(
            format!("{} not found", key.kind.label()),
            format!("{key} no longer exists."),
        ),
        ConflictKind::Generic => Text::new(
            "Update failed",
            format!("Failed to update {key} {}", what_changed(intent)),
        ),
    }
}

pub fn already_in_flight(key: &EntityKey) -> Text {
    Text::new("Update in progress", format!("{key} is still being updated"))
}

pub fn created(entity: &Entity) -> Text {
    Text::new(format!("{} created", entity.key.kind.label()), format!("{} created", entity.key))
}

pub fn create_failed(kind: EntityKind) -> Text {
    Text::new("Create failed", format!("Failed to create {}", kind.as_str()))
}

pub fn deleted(key: &EntityKey, already_removed: bool) -> Text {
    if already_removed {
        Text::new(
            format!("{} deleted", key.kind.label()),
            format!("{key} had already been removed"),
        )
    } else {
        Text::new(format!("{} deleted", key.kind.label()), format!("{key} deleted"))
    }
}

pub fn delete_failed(key: &EntityKey) -> Text {
    Text::new("Delete failed", format!("Failed to delete {key}"))
}

pub fn refresh_failed(kind: EntityKind) -> Text {
    Text::new("Refresh failed", format!("Could not load {}s", kind.as_str()))
}
