use std::collections::BTreeMap;

use shopdesk_core::{CoreError, Entity, EntityKey, Fields, MutationId};

/// Pending optimistic change for one entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayEntry {
    pub mutation_id: MutationId,
    pub key: EntityKey,
    /// Fields the mutation is writing.
    pub patch: Fields,
    pub tentative: Entity,
    /// Value a revert restores.
    pub previous: Entity,
    /// Version token sent with the request.
    pub submitted_version: u64,
    /// The server's copy changed while the mutation was in flight.
    pub drifted: bool,
    previous_fingerprint: [u8; 32],
}

impl OverlayEntry {
    pub fn new(mutation_id: MutationId, previous: Entity, patch: Fields) -> Result<Self, CoreError> {
        let tentative = previous.with_fields(&patch);
        Ok(Self {
            mutation_id,
            key: previous.key.clone(),
            submitted_version: previous.version,
            previous_fingerprint: previous.fingerprint()?,
            patch,
            tentative,
            previous,
            drifted: false,
        })
    }

    /// Rebase onto a freshly fetched value: the fetch becomes the revert
    /// target and the patch is reapplied on top. Returns the value readers
    /// should see.
    pub fn rebase(&mut self, fetched: Entity) -> Result<Entity, CoreError> {
        if fetched.fingerprint()? != self.previous_fingerprint {
            self.drifted = true;
        }
        self.tentative = fetched.with_fields(&self.patch);
        self.previous = fetched;
        Ok(self.tentative.clone())
    }
}

/// In-memory overlays keyed by entity. At most one entry per key; entries
/// are never persisted.
#[derive(Debug, Default)]
pub struct OverlayManager {
    entries: BTreeMap<EntityKey, OverlayEntry>,
}

impl OverlayManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &EntityKey) -> Option<&OverlayEntry> {
        self.entries.get(key)
    }

    pub fn get_mut(&mut self, key: &EntityKey) -> Option<&mut OverlayEntry> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &EntityKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Inserts unless the key already has an overlay, in which case the
    /// rejected entry is handed back.
    pub fn insert(&mut self, entry: OverlayEntry) -> Result<(), OverlayEntry> {
        if self.entries.contains_key(&entry.key) {
            return Err(entry);
        }
        self.entries.insert(entry.key.clone(), entry);
        Ok(())
    }

    pub fn remove(&mut self, key: &EntityKey) -> Option<OverlayEntry> {
        self.entries.remove(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &EntityKey> {
        self.entries.keys()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
