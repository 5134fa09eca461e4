use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};
use std::rc::Rc;

use shopdesk_core::{Entity, EntityKey, EntityKind, EntityPatch, Fields, MutationId};
use shopdesk_storage::{SqliteStorage, Storage};
use tracing::{debug, warn};

use crate::error::EngineError;
use crate::overlay::{OverlayEntry, OverlayManager};

/// Handle shared between the coordinator and the presentation layer.
pub type SharedStore = Rc<RefCell<EntityStore>>;

/// Canonical collections plus the overlay of in-flight optimistic changes.
///
/// Canonical state always reflects pending changes: readers never consult
/// the overlay directly.
pub struct EntityStore {
    storage: SqliteStorage,
    overlays: OverlayManager,
    revisions: BTreeMap<EntityKind, u64>,
}

impl EntityStore {
    pub fn new(storage: SqliteStorage) -> Self {
        Self {
            storage,
            overlays: OverlayManager::new(),
            revisions: BTreeMap::new(),
        }
    }

    pub fn open_in_memory() -> Result<Self, EngineError> {
        Ok(Self::new(SqliteStorage::open_in_memory()?))
    }

    pub fn into_shared(self) -> SharedStore {
        Rc::new(RefCell::new(self))
    }

    pub fn storage(&self) -> &SqliteStorage {
        &self.storage
    }

    fn bump(&mut self, kind: EntityKind) {
        *self.revisions.entry(kind).or_insert(0) += 1;
    }

    // ========================================================================
    // Optimistic lifecycle
    // ========================================================================

    /// Write `next_fields` into canonical state ahead of the server and
    /// remember the prior value.
    pub fn apply_optimistic(
        &mut self,
        key: &EntityKey,
        next_fields: Fields,
        mutation_id: MutationId,
    ) -> Result<OverlayEntry, EngineError> {
        if self.overlays.contains(key) {
            return Err(EngineError::MutationInFlight(key.to_string()));
        }
        let current = self
            .storage
            .get_entity(key)?
            .ok_or_else(|| EngineError::EntityNotFound(key.to_string()))?;

        let entry = OverlayEntry::new(mutation_id, current, next_fields)?;
        self.storage.put_entity(&entry.tentative)?;
        if self.overlays.insert(entry.clone()).is_err() {
            return Err(EngineError::MutationInFlight(key.to_string()));
        }
        self.bump(key.kind);
        debug!(%key, mutation = %mutation_id, version = entry.submitted_version, "optimistic change applied");
        Ok(entry)
    }

    /// Merge the server's authoritative patch and drop the overlay. The
    /// overlay is only dropped once the write has landed, so a failed
    /// commit can still be reverted.
    pub fn commit(&mut self, key: &EntityKey, patch: &EntityPatch) -> Result<Entity, EngineError> {
        let mut entity = match self.storage.get_entity(key)? {
            Some(entity) => entity,
            // Dropped by a refetch while in flight; the server still has it.
            None => self
                .overlays
                .get(key)
                .map(|o| o.tentative.clone())
                .ok_or_else(|| EngineError::EntityNotFound(key.to_string()))?,
        };
        entity.apply_patch(patch);
        self.storage.put_entity(&entity)?;
        self.overlays.remove(key);
        self.bump(key.kind);
        debug!(%key, version = entity.version, "optimistic change committed");
        Ok(entity)
    }

    /// Restore the value captured before the optimistic change. Returns the
    /// restored entity, or `None` when a refetch has since removed it.
    pub fn revert(&mut self, key: &EntityKey) -> Result<Option<Entity>, EngineError> {
        let overlay = self
            .overlays
            .remove(key)
            .ok_or_else(|| EngineError::NoOverlay(key.to_string()))?;
        if self.storage.get_entity(key)?.is_none() {
            debug!(%key, "reverted entity no longer present; not restoring");
            return Ok(None);
        }
        self.storage.put_entity(&overlay.previous)?;
        self.bump(key.kind);
        debug!(%key, version = overlay.previous.version, "optimistic change reverted");
        Ok(Some(overlay.previous))
    }

    /// Wholesale refresh of one collection. Pending overlays win over the
    /// fetched values.
    pub fn replace_all(&mut self, kind: EntityKind, entities: Vec<Entity>) -> Result<(), EngineError> {
        let mut merged = Vec::with_capacity(entities.len());
        let mut seen = BTreeSet::new();
        for entity in entities {
            seen.insert(entity.key.clone());
            merged.push(self.reconcile_fetched(entity)?);
        }

        // Overlays whose entity disappeared from the listing stay until they settle.
        let orphaned: Vec<EntityKey> = self
            .overlays
            .keys()
            .filter(|k| k.kind == kind && !seen.contains(k))
            .cloned()
            .collect();
        for key in orphaned {
            if let Some(entry) = self.overlays.get_mut(&key) {
                entry.drifted = true;
            }
            warn!(%key, "entity with pending change missing from refreshed list");
        }

        self.storage.replace_kind(kind, &merged)?;
        self.bump(kind);
        debug!(%kind, count = merged.len(), "collection replaced");
        Ok(())
    }

    /// Single-entity refresh with the same overlay precedence as
    /// [`EntityStore::replace_all`].
    pub fn upsert_fetched(&mut self, entity: Entity) -> Result<Entity, EngineError> {
        let kind = entity.key.kind;
        let visible = self.reconcile_fetched(entity)?;
        self.storage.put_entity(&visible)?;
        self.bump(kind);
        Ok(visible)
    }

    fn reconcile_fetched(&mut self, fetched: Entity) -> Result<Entity, EngineError> {
        match self.overlays.get_mut(&fetched.key) {
            Some(entry) => {
                let visible = entry.rebase(fetched)?;
                if entry.drifted {
                    warn!(
                        key = %entry.key,
                        submitted = entry.submitted_version,
                        fetched = entry.previous.version,
                        "server copy changed under a pending mutation"
                    );
                }
                Ok(visible)
            }
            None => Ok(fetched),
        }
    }

    // ========================================================================
    // Create / delete
    // ========================================================================

    pub fn insert(&mut self, entity: Entity) -> Result<(), EngineError> {
        self.storage.put_entity(&entity)?;
        self.bump(entity.key.kind);
        Ok(())
    }

    /// Remove an entity that has no pending change.
    pub fn remove(&mut self, key: &EntityKey) -> Result<bool, EngineError> {
        if self.overlays.contains(key) {
            return Err(EngineError::MutationInFlight(key.to_string()));
        }
        let removed = self.storage.remove_entity(key)?;
        if removed {
            self.bump(key.kind);
        }
        Ok(removed)
    }

    /// Forget an entity the server no longer has, pending change included.
    pub fn discard(&mut self, key: &EntityKey) -> Result<bool, EngineError> {
        let had_overlay = self.overlays.remove(key).is_some();
        let removed = self.storage.remove_entity(key)?;
        if removed || had_overlay {
            self.bump(key.kind);
        }
        Ok(removed)
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, key: &EntityKey) -> Result<Option<Entity>, EngineError> {
        Ok(self.storage.get_entity(key)?)
    }

    pub fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, EngineError> {
        Ok(self.storage.list_entities(kind)?)
    }

    pub fn search(&self, kind: EntityKind, term: &str) -> Result<Vec<Entity>, EngineError> {
        Ok(self
            .list(kind)?
            .into_iter()
            .filter(|e| e.matches_search(term))
            .collect())
    }

    pub fn count(&self, kind: EntityKind) -> Result<u64, EngineError> {
        Ok(self.storage.entity_count(kind)?)
    }

    pub fn overlay(&self, key: &EntityKey) -> Option<&OverlayEntry> {
        self.overlays.get(key)
    }

    pub fn is_pending(&self, key: &EntityKey) -> bool {
        self.overlays.contains(key)
    }

    pub fn pending_keys(&self) -> Vec<EntityKey> {
        self.overlays.keys().cloned().collect()
    }

    /// Monotonic counter bumped whenever the `kind` collection changes.
    pub fn revision(&self, kind: EntityKind) -> u64 {
        self.revisions.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_core::{entity::field, FieldValue};

    fn order(id: i64, status: &str, version: u64) -> Entity {
        let mut fields = Fields::new();
        fields.insert(field::STATUS.into(), FieldValue::from(status));
        Entity::new(EntityKey::order(id), version, fields)
    }

    fn status(s: &str) -> Fields {
        let mut fields = Fields::new();
        fields.insert(field::STATUS.into(), FieldValue::from(s));
        fields
    }

    fn seeded() -> Result<EntityStore, EngineError> {
        let mut store = EntityStore::open_in_memory()?;
        store.replace_all(EntityKind::Order, vec![order(7, "pending", 1), order(8, "pending", 3)])?;
        Ok(store)
    }

    #[test]
    fn apply_optimistic_is_visible_immediately() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        let entry = store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        assert_eq!(entry.submitted_version, 1);
        let seen = store.get(&key)?.ok_or("missing")?;
        assert_eq!(seen.text(field::STATUS), Some("shipped"));
        assert!(store.is_pending(&key));
        Ok(())
    }

    #[test]
    fn apply_optimistic_requires_existing_entity() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let result = store.apply_optimistic(&EntityKey::order(99), status("shipped"), MutationId::new());
        assert!(matches!(result, Err(EngineError::EntityNotFound(_))));
        assert!(store.pending_keys().is_empty());
        Ok(())
    }

    #[test]
    fn second_apply_on_same_key_is_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        store.apply_optimistic(&key, status("processing"), MutationId::new())?;
        let result = store.apply_optimistic(&key, status("shipped"), MutationId::new());
        assert!(matches!(result, Err(EngineError::MutationInFlight(_))));
        assert_eq!(store.get(&key)?.ok_or("missing")?.text(field::STATUS), Some("processing"));
        Ok(())
    }

    #[test]
    fn revert_restores_exactly() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(8);
        let before = store.list(EntityKind::Order)?;
        store.apply_optimistic(&key, status("delivered"), MutationId::new())?;
        store.revert(&key)?;
        assert_eq!(store.list(EntityKind::Order)?, before);
        assert!(!store.is_pending(&key));
        Ok(())
    }

    #[test]
    fn revert_without_overlay_is_an_error() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        assert!(matches!(store.revert(&EntityKey::order(7)), Err(EngineError::NoOverlay(_))));
        Ok(())
    }

    #[test]
    fn commit_is_idempotent() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        let patch = EntityPatch::from_json(&serde_json::json!({"id": 7, "status": "shipped", "version": 2}));
        let once = store.commit(&key, &patch)?;
        let twice = store.commit(&key, &patch)?;
        assert_eq!(once, twice);
        assert_eq!(store.get(&key)?, Some(once.clone()));
        assert_eq!(once.version, 2);
        assert!(!store.is_pending(&key));
        Ok(())
    }

    #[test]
    fn failed_commit_write_keeps_overlay_for_revert() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        store.apply_optimistic(&key, status("shipped"), MutationId::new())?;

        // Versions beyond i64 cannot be stored, so the write is refused.
        let patch = EntityPatch::from_json(&serde_json::json!({"version": u64::MAX}));
        assert!(matches!(store.commit(&key, &patch), Err(EngineError::Storage(_))));
        assert!(store.is_pending(&key));
        assert_eq!(store.get(&key)?.ok_or("missing")?.version, 1);

        let restored = store.revert(&key)?.ok_or("not restored")?;
        assert_eq!(restored.text(field::STATUS), Some("pending"));
        assert_eq!(store.get(&key)?, Some(restored));
        Ok(())
    }

    #[test]
    fn commit_of_missing_entity_without_overlay_fails() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let result = store.commit(&EntityKey::order(99), &EntityPatch::default());
        assert!(matches!(result, Err(EngineError::EntityNotFound(_))));
        Ok(())
    }

    #[test]
    fn refetch_marks_only_missing_overlays_drifted() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let (kept, dropped) = (EntityKey::order(7), EntityKey::order(8));
        store.apply_optimistic(&kept, status("shipped"), MutationId::new())?;
        store.apply_optimistic(&dropped, status("delivered"), MutationId::new())?;

        store.replace_all(EntityKind::Order, vec![order(7, "pending", 1), order(9, "pending", 1)])?;

        assert!(!store.overlay(&kept).ok_or("overlay gone")?.drifted);
        assert!(store.overlay(&dropped).ok_or("overlay gone")?.drifted);
        assert_eq!(store.count(EntityKind::Order)?, 2);
        Ok(())
    }

    #[test]
    fn replace_all_keeps_overlay_value() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        let entry = store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        store.replace_all(EntityKind::Order, vec![order(7, "pending", 1), order(8, "processing", 4)])?;

        assert_eq!(store.get(&key)?, Some(entry.tentative));
        let other = store.get(&EntityKey::order(8))?.ok_or("missing")?;
        assert_eq!(other.text(field::STATUS), Some("processing"));
        assert!(!store.overlay(&key).ok_or("overlay gone")?.drifted);
        Ok(())
    }

    #[test]
    fn revert_after_refetch_lands_on_fetched_value() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        store.replace_all(EntityKind::Order, vec![order(7, "processing", 2)])?;
        assert!(store.overlay(&key).ok_or("overlay gone")?.drifted);

        let restored = store.revert(&key)?.ok_or("not restored")?;
        assert_eq!(restored.text(field::STATUS), Some("processing"));
        assert_eq!(restored.version, 2);
        Ok(())
    }

    #[test]
    fn revert_does_not_resurrect_removed_entity() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        store.replace_all(EntityKind::Order, vec![order(8, "pending", 3)])?;
        assert!(store.overlay(&key).ok_or("overlay gone")?.drifted);
        assert_eq!(store.revert(&key)?, None);
        assert_eq!(store.get(&key)?, None);
        Ok(())
    }

    #[test]
    fn commit_after_refetch_removed_entity_restores_it() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        store.replace_all(EntityKind::Order, vec![])?;
        let patch = EntityPatch::from_json(&serde_json::json!({"version": 2}));
        let committed = store.commit(&key, &patch)?;
        assert_eq!(committed.text(field::STATUS), Some("shipped"));
        assert_eq!(store.count(EntityKind::Order)?, 1);
        Ok(())
    }

    #[test]
    fn upsert_fetched_applies_overlay() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(8);
        store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        let visible = store.upsert_fetched(order(8, "pending", 3))?;
        assert_eq!(visible.text(field::STATUS), Some("shipped"));
        Ok(())
    }

    #[test]
    fn remove_refuses_pending_entity_but_discard_does_not() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let key = EntityKey::order(7);
        store.apply_optimistic(&key, status("shipped"), MutationId::new())?;
        assert!(matches!(store.remove(&key), Err(EngineError::MutationInFlight(_))));
        assert!(store.discard(&key)?);
        assert!(!store.is_pending(&key));
        assert_eq!(store.get(&key)?, None);
        Ok(())
    }

    #[test]
    fn revisions_track_changes_per_kind() -> Result<(), Box<dyn std::error::Error>> {
        let mut store = seeded()?;
        let orders = store.revision(EntityKind::Order);
        assert_eq!(store.revision(EntityKind::User), 0);
        store.apply_optimistic(&EntityKey::order(7), status("shipped"), MutationId::new())?;
        assert!(store.revision(EntityKind::Order) > orders);
        assert_eq!(store.revision(EntityKind::Product), 0);
        Ok(())
    }
}
