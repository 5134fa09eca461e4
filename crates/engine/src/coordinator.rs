use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::Rc;

use shopdesk_core::intent::{create_body, update_body};
use shopdesk_core::mutation::{MutationAttempt, MutationState};
use shopdesk_core::{
    classify_error, endpoints, recovery_for, ConflictKind, Entity, EntityKey, EntityKind,
    EntityPatch, Fields, MutationIntent, Notification, NotificationSink, NotificationStatus,
    RecoveryAction, Request, TransportError,
};
use tracing::{debug, info, warn, Instrument};

use crate::config::ClientConfig;
use crate::error::EngineError;
use crate::messages::{self, Text};
use crate::store::SharedStore;
use crate::transport::Transport;

/// How a dispatched intent ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MutationOutcome {
    /// Server accepted the update; carries the entity now in the store.
    Committed(Entity),
    /// Update failed and the optimistic change was rolled back (or the
    /// entity discarded, for `NotFound`).
    Reverted {
        conflict: ConflictKind,
        recovery: RecoveryAction,
    },
    Created(Entity),
    Deleted { key: EntityKey, already_removed: bool },
    /// A create or delete failed; nothing was applied locally.
    Failed {
        conflict: ConflictKind,
        recovery: RecoveryAction,
    },
    Skipped(SkipReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// No such entity in the store.
    UnknownEntity,
    /// Another mutation on the same entity has not settled yet.
    AlreadyInFlight,
}

/// Marks a key busy for the lifetime of the guard.
struct InFlightGuard<'a> {
    keys: &'a RefCell<BTreeSet<EntityKey>>,
    key: EntityKey,
}

impl<'a> InFlightGuard<'a> {
    fn acquire(keys: &'a RefCell<BTreeSet<EntityKey>>, key: &EntityKey) -> Option<Self> {
        if !keys.borrow_mut().insert(key.clone()) {
            return None;
        }
        Some(Self { keys, key: key.clone() })
    }
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.keys.borrow_mut().remove(&self.key);
    }
}

/// Drives optimistic apply, request and settlement for every intent.
pub struct MutationCoordinator<T: Transport> {
    store: SharedStore,
    transport: T,
    sink: Rc<dyn NotificationSink>,
    config: ClientConfig,
    in_flight: RefCell<BTreeSet<EntityKey>>,
}

impl<T: Transport> MutationCoordinator<T> {
    pub fn new(store: SharedStore, transport: T, config: ClientConfig) -> Self {
        Self {
            store,
            transport,
            sink: Rc::new(LogSink),
            config,
            in_flight: RefCell::new(BTreeSet::new()),
        }
    }

    pub fn with_sink(mut self, sink: Rc<dyn NotificationSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Whether a mutation for `key` is between dispatch and settlement.
    pub fn is_updating(&self, key: &EntityKey) -> bool {
        self.in_flight.borrow().contains(key)
    }

    pub fn updating_keys(&self) -> Vec<EntityKey> {
        self.in_flight.borrow().iter().cloned().collect()
    }

    /// Run one intent to settlement. Transport failures end in an outcome;
    /// only local storage failures surface as `Err`.
    pub async fn dispatch(&self, intent: MutationIntent) -> Result<MutationOutcome, EngineError> {
        let span = tracing::info_span!("dispatch", intent = intent.name(), kind = %intent.kind());
        async {
            match &intent {
                MutationIntent::SetOrderStatus { id, status } => {
                    let key = EntityKey::order(id.clone());
                    let mut fields = Fields::new();
                    fields.insert(
                        shopdesk_core::entity::field::STATUS.into(),
                        status.as_str().into(),
                    );
                    self.run_update(&intent, key, fields).await
                }
                MutationIntent::UpdateProduct { id, changes } => {
                    self.run_update(&intent, EntityKey::product(id.clone()), changes.to_fields())
                        .await
                }
                MutationIntent::UpdateUser { id, changes } => {
                    self.run_update(&intent, EntityKey::user(id.clone()), changes.to_fields())
                        .await
                }
                MutationIntent::CreateProduct(product) => {
                    self.run_create(EntityKind::Product, product.to_fields()).await
                }
                MutationIntent::CreateUser(user) => {
                    self.run_create(EntityKind::User, user.to_fields()).await
                }
                MutationIntent::DeleteProduct { id } => {
                    self.run_delete(EntityKey::product(id.clone())).await
                }
                MutationIntent::DeleteUser { id } => self.run_delete(EntityKey::user(id.clone())).await,
            }
        }
        .instrument(span)
        .await
    }

    // ========================================================================
    // Updates
    // ========================================================================

    async fn run_update(
        &self,
        intent: &MutationIntent,
        key: EntityKey,
        fields: Fields,
    ) -> Result<MutationOutcome, EngineError> {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, &key) else {
            return Ok(self.reject_in_flight(&key));
        };

        let mut attempt = MutationAttempt::new(key.clone());
        let applied = self.store.borrow_mut().apply_optimistic(&key, fields, attempt.id);
        let entry = match applied {
            Ok(entry) => entry,
            Err(EngineError::EntityNotFound(_)) => {
                debug!(%key, "update for unknown entity ignored");
                return Ok(MutationOutcome::Skipped(SkipReason::UnknownEntity));
            }
            Err(EngineError::MutationInFlight(_)) => {
                drop(guard);
                return Ok(self.reject_in_flight(&key));
            }
            Err(e) => return Err(e),
        };
        attempt.advance(MutationState::OptimisticApplied)?;

        self.notify(
            NotificationStatus::Pending,
            Some(&attempt),
            messages::pending(intent, &key, &entry.previous),
        );
        let body = update_body(&entry.patch, entry.submitted_version);
        let request = match intent {
            MutationIntent::SetOrderStatus { id, .. } => Request::put(endpoints::order_status(id), body),
            _ => Request::put(endpoints::item(&key), body),
        };
        attempt.advance(MutationState::InFlight)?;
        debug!(%key, mutation = %attempt.id, version = entry.submitted_version, "request sent");

        let result = self.transport.send(request).await;

        match result {
            Ok(response) => {
                let patch = EntityPatch::from_json(&response.data);
                let committed = {
                    let mut store = self.store.borrow_mut();
                    match store.commit(&key, &patch) {
                        Ok(committed) => committed,
                        Err(error) => {
                            // Leave the store without a dangling overlay.
                            if let Err(revert_error) = store.revert(&key) {
                                warn!(%key, %revert_error, "revert after failed commit also failed");
                            }
                            return Err(error);
                        }
                    }
                };
                attempt.advance(MutationState::Committed)?;
                info!(%key, version = committed.version, "mutation committed");
                self.notify(
                    NotificationStatus::Success,
                    Some(&attempt),
                    messages::committed(intent, &key),
                );
                drop(guard);
                if self.config.refetch_after_commit {
                    self.refresh(key.kind).await?;
                }
                Ok(MutationOutcome::Committed(committed))
            }
            Err(error) => {
                let (conflict, recovery) = self.classify(&error);
                {
                    let mut store = self.store.borrow_mut();
                    if conflict == ConflictKind::NotFound {
                        store.discard(&key)?;
                    } else {
                        store.revert(&key)?;
                    }
                }
                attempt.advance(MutationState::Reverted)?;
                warn!(%key, conflict = conflict.as_str(), %error, "mutation reverted");
                self.notify_conflict(
                    Some(&attempt),
                    messages::update_failed(intent, &key, conflict),
                    conflict,
                    recovery,
                );
                drop(guard);
                if recovery.refetches() {
                    self.refresh(key.kind).await?;
                }
                Ok(MutationOutcome::Reverted { conflict, recovery })
            }
        }
    }

    fn reject_in_flight(&self, key: &EntityKey) -> MutationOutcome {
        debug!(%key, "mutation rejected; another is in flight");
        let text = messages::already_in_flight(key);
        self.sink.notify(&Notification::error(None, text.title, text.message));
        MutationOutcome::Skipped(SkipReason::AlreadyInFlight)
    }

    // ========================================================================
    // Create / delete
    // ========================================================================

    async fn run_create(&self, kind: EntityKind, fields: Fields) -> Result<MutationOutcome, EngineError> {
        let request = Request::post(endpoints::collection(kind), create_body(&fields));
        let result = self
            .transport
            .send(request)
            .await
            .and_then(|response| {
                Entity::from_json(kind, &response.data)
                    .map_err(|e| TransportError::Decode(e.to_string()))
            });

        match result {
            Ok(entity) => {
                self.store.borrow_mut().insert(entity.clone())?;
                info!(key = %entity.key, "entity created");
                self.notify(NotificationStatus::Success, None, messages::created(&entity));
                Ok(MutationOutcome::Created(entity))
            }
            Err(error) => {
                let (conflict, recovery) = self.classify(&error);
                warn!(%kind, conflict = conflict.as_str(), %error, "create failed");
                self.notify_conflict(None, messages::create_failed(kind), conflict, recovery);
                if recovery.refetches() {
                    self.refresh(kind).await?;
                }
                Ok(MutationOutcome::Failed { conflict, recovery })
            }
        }
    }

    async fn run_delete(&self, key: EntityKey) -> Result<MutationOutcome, EngineError> {
        let Some(guard) = InFlightGuard::acquire(&self.in_flight, &key) else {
            return Ok(self.reject_in_flight(&key));
        };
        let (known, pending) = {
            let store = self.store.borrow();
            (store.get(&key)?.is_some(), store.is_pending(&key))
        };
        if pending {
            drop(guard);
            return Ok(self.reject_in_flight(&key));
        }
        if !known {
            debug!(%key, "delete for unknown entity ignored");
            return Ok(MutationOutcome::Skipped(SkipReason::UnknownEntity));
        }

        let result = self.transport.send(Request::delete(endpoints::item(&key))).await;

        match result {
            Ok(_) => {
                self.store.borrow_mut().remove(&key)?;
                info!(%key, "entity deleted");
                self.notify(NotificationStatus::Success, None, messages::deleted(&key, false));
                Ok(MutationOutcome::Deleted { key, already_removed: false })
            }
            Err(error) if error.status() == Some(404) => {
                self.store.borrow_mut().discard(&key)?;
                info!(%key, "entity was already removed on the server");
                self.notify(NotificationStatus::Success, None, messages::deleted(&key, true));
                drop(guard);
                self.refresh(key.kind).await?;
                Ok(MutationOutcome::Deleted { key, already_removed: true })
            }
            Err(error) => {
                let (conflict, recovery) = self.classify(&error);
                warn!(%key, conflict = conflict.as_str(), %error, "delete failed");
                self.notify_conflict(None, messages::delete_failed(&key), conflict, recovery);
                drop(guard);
                if recovery.refetches() {
                    self.refresh(key.kind).await?;
                }
                Ok(MutationOutcome::Failed { conflict, recovery })
            }
        }
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Fetch a whole collection and replace the canonical copy. Returns the
    /// number of entities loaded, or `None` if the fetch failed (the store
    /// is left untouched).
    pub async fn refresh(&self, kind: EntityKind) -> Result<Option<usize>, EngineError> {
        let result = self
            .transport
            .send(Request::get(endpoints::collection(kind)))
            .await
            .and_then(|response| parse_list(kind, &response.data));

        match result {
            Ok(entities) => {
                let count = entities.len();
                self.store.borrow_mut().replace_all(kind, entities)?;
                debug!(%kind, count, "collection refreshed");
                Ok(Some(count))
            }
            Err(error) => {
                warn!(%kind, %error, "refresh failed");
                let text = messages::refresh_failed(kind);
                self.sink.notify(&Notification::error(None, text.title, text.message));
                Ok(None)
            }
        }
    }

    /// Fetch one entity. A 404 drops it locally unless a mutation on it is
    /// still pending.
    pub async fn refresh_one(&self, key: &EntityKey) -> Result<Option<Entity>, EngineError> {
        let result = self
            .transport
            .send(Request::get(endpoints::item(key)))
            .await
            .and_then(|response| {
                Entity::from_json(key.kind, &response.data)
                    .map_err(|e| TransportError::Decode(e.to_string()))
            });

        match result {
            Ok(entity) => Ok(Some(self.store.borrow_mut().upsert_fetched(entity)?)),
            Err(error) if error.status() == Some(404) => {
                let mut store = self.store.borrow_mut();
                if !store.is_pending(key) {
                    store.remove(key)?;
                }
                debug!(%key, "entity no longer exists");
                Ok(None)
            }
            Err(error) => {
                warn!(%key, %error, "refresh failed");
                let text = messages::refresh_failed(key.kind);
                self.sink.notify(&Notification::error(None, text.title, text.message));
                Ok(None)
            }
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn classify(&self, error: &TransportError) -> (ConflictKind, RecoveryAction) {
        let conflict = classify_error(error);
        (conflict, recovery_for(conflict, self.config.refetch_on_not_found))
    }

    fn notify(&self, status: NotificationStatus, attempt: Option<&MutationAttempt>, text: Text) {
        let mutation_id = attempt.map(|a| a.id);
        let notification = match (status, mutation_id) {
            (NotificationStatus::Pending, Some(id)) => Notification::pending(id, text.title, text.message),
            (NotificationStatus::Success, Some(id)) => Notification::success(id, text.title, text.message),
            (NotificationStatus::Error, id) => Notification::error(id, text.title, text.message),
            (status, None) => Notification {
                status,
                ..Notification::error(None, text.title, text.message)
            },
        };
        self.sink.notify(&notification);
    }

    fn notify_conflict(
        &self,
        attempt: Option<&MutationAttempt>,
        text: Text,
        conflict: ConflictKind,
        recovery: RecoveryAction,
    ) {
        let notification = Notification::error(attempt.map(|a| a.id), text.title, text.message)
            .with_conflict(conflict, recovery);
        self.sink.notify(&notification);
    }
}

fn parse_list(kind: EntityKind, data: &serde_json::Value) -> Result<Vec<Entity>, TransportError> {
    let items = data
        .as_array()
        .ok_or_else(|| TransportError::Decode(format!("{kind} list is not an array")))?;
    items
        .iter()
        .map(|item| Entity::from_json(kind, item).map_err(|e| TransportError::Decode(e.to_string())))
        .collect()
}

/// Sink that only writes notifications to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl NotificationSink for LogSink {
    fn notify(&self, notification: &Notification) {
        let title = notification.title.as_str();
        let message = notification.message.as_str();
        match notification.status {
            NotificationStatus::Pending => debug!(title, message, "notification"),
            NotificationStatus::Success => info!(title, message, "notification"),
            NotificationStatus::Error => warn!(
                title,
                message,
                conflict = notification.conflict.map(|c| c.as_str()),
                "notification"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_key_on_drop() {
        let keys = RefCell::new(BTreeSet::new());
        let key = EntityKey::order(7);
        {
            let _guard = InFlightGuard::acquire(&keys, &key).unwrap();
            assert!(InFlightGuard::acquire(&keys, &key).is_none());
            assert!(keys.borrow().contains(&key));
        }
        assert!(keys.borrow().is_empty());
        assert!(InFlightGuard::acquire(&keys, &EntityKey::order(7)).is_some());
    }

    #[test]
    fn list_parsing_requires_an_array_of_entities() {
        let listed = parse_list(EntityKind::Order, &serde_json::json!([{"id": 1}, {"id": 2, "version": 4}]))
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].version, 1);
        assert!(parse_list(EntityKind::Order, &serde_json::json!({"id": 1})).is_err());
        assert!(parse_list(EntityKind::Order, &serde_json::json!([{"status": "pending"}])).is_err());
    }

    /// Answers every request with a fixed success body.
    struct FixedOk(serde_json::Value);

    #[async_trait::async_trait(?Send)]
    impl Transport for FixedOk {
        async fn send(&self, _request: Request) -> Result<shopdesk_core::Response, TransportError> {
            Ok(shopdesk_core::Response { status: 200, data: self.0.clone() })
        }
    }

    fn coordinator_with_order_7(data: serde_json::Value) -> MutationCoordinator<FixedOk> {
        let store = crate::store::EntityStore::open_in_memory().unwrap().into_shared();
        let mut fields = Fields::new();
        fields.insert(shopdesk_core::entity::field::STATUS.into(), "pending".into());
        store.borrow_mut().insert(Entity::new(EntityKey::order(7), 1, fields)).unwrap();
        MutationCoordinator::new(store, FixedOk(data), ClientConfig::default())
    }

    fn ship_7() -> MutationIntent {
        MutationIntent::SetOrderStatus { id: 7.into(), status: shopdesk_core::OrderStatus::Shipped }
    }

    #[tokio::test]
    async fn non_json_success_body_commits() {
        let coordinator = coordinator_with_order_7(serde_json::Value::String("OK".into()));

        let outcome = coordinator.dispatch(ship_7()).await.unwrap();

        let MutationOutcome::Committed(committed) = outcome else {
            panic!("expected a commit, got {outcome:?}");
        };
        assert_eq!(committed.text("status"), Some("shipped"));
        assert_eq!(committed.version, 1);
        assert!(!coordinator.store.borrow().is_pending(&EntityKey::order(7)));
    }

    #[tokio::test]
    async fn unstorable_commit_is_rolled_back() {
        let coordinator = coordinator_with_order_7(serde_json::json!({"version": u64::MAX}));
        let key = EntityKey::order(7);

        let result = coordinator.dispatch(ship_7()).await;

        assert!(matches!(result, Err(EngineError::Storage(_))));
        let store = coordinator.store.borrow();
        assert!(!store.is_pending(&key));
        assert_eq!(store.get(&key).unwrap().unwrap().text("status"), Some("pending"));
        drop(store);
        assert!(!coordinator.is_updating(&key));
    }

    #[test]
    fn log_sink_accepts_every_status() {
        let sink = LogSink;
        sink.notify(&Notification::error(None, "Update failed", "boom"));
        sink.notify(&Notification::pending(shopdesk_core::MutationId::new(), "Updating", "..."));
    }
}
