use std::path::Path;
use std::rc::Rc;

use shopdesk_core::entity::field;
use shopdesk_core::{Entity, EntityKey, EntityKind, FieldValue, Fields, UserRole};
use shopdesk_engine::{
    ClientConfig, EngineError, EntityStore, MutationCoordinator, SharedStore, Transport,
};
use shopdesk_storage::SqliteStorage;

use crate::{FakeBackend, GatedTransport, RecordingSink};

pub type Gated = Rc<GatedTransport<Rc<FakeBackend>>>;

/// One admin client wired to a fake backend: store, coordinator and a
/// recording sink.
pub struct TestClient<T: Transport = Rc<FakeBackend>> {
    pub backend: Rc<FakeBackend>,
    pub store: SharedStore,
    pub sink: Rc<RecordingSink>,
    pub coordinator: MutationCoordinator<T>,
}

impl TestClient<Rc<FakeBackend>> {
    pub fn new() -> Result<Self, EngineError> {
        Self::with_config(ClientConfig::default())
    }

    pub fn with_config(config: ClientConfig) -> Result<Self, EngineError> {
        let backend = Rc::new(FakeBackend::new());
        Self::assemble(EntityStore::open_in_memory()?, backend.clone(), backend, config)
    }

    /// Canonical collections kept in a database file under `dir`.
    pub fn file_backed(dir: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        let path = dir.join("shopdesk.db");
        let path = path.to_str().ok_or("non-utf8 database path")?;
        let storage = SqliteStorage::open(path)?;
        let backend = Rc::new(FakeBackend::new());
        Ok(Self::assemble(
            EntityStore::new(storage),
            backend.clone(),
            backend,
            ClientConfig::default(),
        )?)
    }
}

impl TestClient<Gated> {
    /// Writes wait at a gate until released through [`TestClient::gate`].
    pub fn gated(config: ClientConfig) -> Result<Self, EngineError> {
        let backend = Rc::new(FakeBackend::new());
        let gate = Rc::new(GatedTransport::new(backend.clone()));
        Self::assemble(EntityStore::open_in_memory()?, backend, gate, config)
    }

    pub fn gate(&self) -> &GatedTransport<Rc<FakeBackend>> {
        self.coordinator.transport()
    }
}

impl<T: Transport> TestClient<T> {
    fn assemble(
        store: EntityStore,
        backend: Rc<FakeBackend>,
        transport: T,
        config: ClientConfig,
    ) -> Result<Self, EngineError> {
        let store = store.into_shared();
        let sink = Rc::new(RecordingSink::new());
        let coordinator =
            MutationCoordinator::new(store.clone(), transport, config).with_sink(sink.clone());
        Ok(Self { backend, store, sink, coordinator })
    }

    /// Seed the backend and pull the collection into the store.
    pub async fn load(&self, kind: EntityKind, entities: Vec<Entity>) -> Result<(), EngineError> {
        self.backend.seed(kind, entities);
        self.coordinator.refresh(kind).await?;
        Ok(())
    }

    pub fn get(&self, key: &EntityKey) -> Result<Option<Entity>, EngineError> {
        self.store.borrow().get(key)
    }

    pub fn text(&self, key: &EntityKey, name: &str) -> Result<Option<String>, EngineError> {
        Ok(self.get(key)?.and_then(|e| e.text(name).map(str::to_string)))
    }

    pub fn version(&self, key: &EntityKey) -> Result<Option<u64>, EngineError> {
        Ok(self.get(key)?.map(|e| e.version))
    }

    pub fn list(&self, kind: EntityKind) -> Result<Vec<Entity>, EngineError> {
        self.store.borrow().list(kind)
    }
}

// ============================================================================
// Fixtures
// ============================================================================

pub fn order(id: i64, status: &str, version: u64) -> Entity {
    let mut customer = std::collections::BTreeMap::new();
    customer.insert(field::NAME.to_string(), FieldValue::from(format!("Customer {id}")));
    customer.insert(field::EMAIL.to_string(), FieldValue::from(format!("customer{id}@example.com")));

    let mut fields = Fields::new();
    fields.insert(field::STATUS.into(), FieldValue::from(status));
    fields.insert("total".into(), FieldValue::Float(10.0 * id as f64));
    fields.insert(field::CUSTOMER.into(), FieldValue::Object(customer));
    Entity::new(EntityKey::order(id), version, fields)
}

pub fn product(id: i64, name: &str, category: &str, price: f64, stock: i64) -> Entity {
    let mut fields = Fields::new();
    fields.insert(field::NAME.into(), FieldValue::from(name));
    fields.insert(field::DESCRIPTION.into(), FieldValue::from(""));
    fields.insert(field::PRICE.into(), FieldValue::Float(price));
    fields.insert(field::STOCK.into(), FieldValue::Integer(stock));
    fields.insert(field::CATEGORY.into(), FieldValue::from(category));
    Entity::new(EntityKey::product(id), 1, fields)
}

pub fn user(id: i64, name: &str, email: &str, role: UserRole) -> Entity {
    let mut fields = Fields::new();
    fields.insert(field::NAME.into(), FieldValue::from(name));
    fields.insert(field::EMAIL.into(), FieldValue::from(email));
    fields.insert(field::ROLE.into(), FieldValue::from(role.as_str()));
    Entity::new(EntityKey::user(id), 1, fields)
}

pub fn status_fields(status: &str) -> Fields {
    let mut fields = Fields::new();
    fields.insert(field::STATUS.into(), FieldValue::from(status));
    fields
}
