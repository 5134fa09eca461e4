use shopdesk_core::{Entity, EntityKey, EntityKind};

use crate::error::StorageError;

/// Canonical collections: one mapping from id to entity per kind.
pub trait Storage {
    fn get_entity(&self, key: &EntityKey) -> Result<Option<Entity>, StorageError>;

    /// Insert or overwrite a single entity.
    fn put_entity(&mut self, entity: &Entity) -> Result<(), StorageError>;

    /// Returns whether a row was removed.
    fn remove_entity(&mut self, key: &EntityKey) -> Result<bool, StorageError>;

    /// Entities of `kind` in the order they were first stored.
    fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>, StorageError>;

    /// Atomically replace the whole collection for `kind`.
    fn replace_kind(&mut self, kind: EntityKind, entities: &[Entity]) -> Result<(), StorageError>;

    fn entity_count(&self, kind: EntityKind) -> Result<u64, StorageError>;
}
