use std::cell::RefCell;
use std::collections::{BTreeMap, VecDeque};

use async_trait::async_trait;
use serde_json::{json, Value};
use shopdesk_core::entity::field;
use shopdesk_core::{
    Entity, EntityId, EntityKey, EntityKind, EntityPatch, Fields, Method, Request, Response,
    TransportError,
};
use shopdesk_engine::Transport;

/// In-memory stand-in for the admin REST API. Enforces version tokens the
/// way the real server does: a write carrying a stale `version` gets 409.
#[derive(Default)]
pub struct FakeBackend {
    state: RefCell<BackendState>,
}

#[derive(Default)]
struct BackendState {
    collections: BTreeMap<EntityKind, Vec<Entity>>,
    next_id: i64,
    failures: VecDeque<TransportError>,
    requests: Vec<Request>,
}

fn not_found(key: &EntityKey) -> TransportError {
    TransportError::from_status(404, Some(json!({ "message": format!("{key} not found") })))
}

fn bad_request(message: &str) -> TransportError {
    TransportError::from_status(400, Some(json!({ "message": message })))
}

fn kind_for_segment(segment: &str) -> Option<EntityKind> {
    match segment {
        "orders" => Some(EntityKind::Order),
        "products" => Some(EntityKind::Product),
        "users" => Some(EntityKind::User),
        _ => None,
    }
}

fn parse_id(segment: &str) -> EntityId {
    segment
        .parse::<i64>()
        .map(EntityId::Int)
        .unwrap_or_else(|_| EntityId::Text(segment.to_string()))
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a whole collection.
    pub fn seed(&self, kind: EntityKind, entities: Vec<Entity>) {
        let mut state = self.state.borrow_mut();
        for entity in &entities {
            if let EntityId::Int(n) = entity.key.id {
                state.next_id = state.next_id.max(n);
            }
        }
        state.collections.insert(kind, entities);
    }

    pub fn get(&self, key: &EntityKey) -> Option<Entity> {
        let state = self.state.borrow();
        state
            .collections
            .get(&key.kind)
            .and_then(|list| list.iter().find(|e| e.key == *key))
            .cloned()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.state.borrow().collections.get(&kind).map_or(0, Vec::len)
    }

    /// Someone else edits `key`: fields are written and the version bumped.
    pub fn modify(&self, key: &EntityKey, fields: Fields) -> Option<u64> {
        let mut state = self.state.borrow_mut();
        let entity = state
            .collections
            .get_mut(&key.kind)?
            .iter_mut()
            .find(|e| e.key == *key)?;
        entity.fields.extend(fields);
        entity.version += 1;
        Some(entity.version)
    }

    /// Someone else deletes `key`.
    pub fn remove(&self, key: &EntityKey) -> bool {
        let mut state = self.state.borrow_mut();
        let Some(list) = state.collections.get_mut(&key.kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|e| e.key != *key);
        list.len() != before
    }

    /// The next request fails with `error` instead of being served.
    pub fn fail_next(&self, error: TransportError) {
        self.state.borrow_mut().failures.push_back(error);
    }

    pub fn requests(&self) -> Vec<Request> {
        self.state.borrow().requests.clone()
    }

    pub fn request_count(&self, method: Method, path: &str) -> usize {
        self.state
            .borrow()
            .requests
            .iter()
            .filter(|r| r.method == method && r.path == path)
            .count()
    }

    fn handle(&self, request: &Request) -> Result<Response, TransportError> {
        let mut state = self.state.borrow_mut();
        state.requests.push(request.clone());
        if let Some(error) = state.failures.pop_front() {
            return Err(error);
        }

        let segments: Vec<&str> = request.path.trim_matches('/').split('/').collect();
        let kind = segments
            .first()
            .and_then(|s| kind_for_segment(s))
            .ok_or_else(|| not_found_path(&request.path))?;
        let key = segments.get(1).map(|s| EntityKey::new(kind, parse_id(s)));
        let status_route = segments.get(2) == Some(&"status");
        if segments.len() > 3 || (segments.len() == 3 && !(status_route && kind == EntityKind::Order)) {
            return Err(not_found_path(&request.path));
        }
        if status_route && request.method != Method::Put {
            return Err(method_not_allowed(request));
        }

        match (request.method, key) {
            (Method::Get, None) => {
                let list = state.collections.get(&kind).map(Vec::as_slice).unwrap_or_default();
                let data = Value::Array(list.iter().map(Entity::to_json).collect());
                Ok(Response { status: 200, data })
            }
            (Method::Get, Some(key)) => {
                let entity = state.find(&key).ok_or_else(|| not_found(&key))?;
                Ok(Response { status: 200, data: entity.to_json() })
            }
            (Method::Put, Some(key)) => {
                let body = request.body.as_ref().ok_or_else(|| bad_request("missing body"))?;
                let patch = EntityPatch::from_json(body);
                let entity = state.find_mut(&key).ok_or_else(|| not_found(&key))?;
                if let Some(submitted) = patch.version {
                    if submitted != entity.version {
                        return Err(TransportError::from_status(
                            409,
                            Some(json!({
                                "message": format!(
                                    "Version conflict: {key} is at version {}",
                                    entity.version
                                )
                            })),
                        ));
                    }
                }
                if status_route && !patch.fields.contains_key(field::STATUS) {
                    return Err(bad_request("status is required"));
                }
                entity.fields.extend(patch.fields);
                entity.version += 1;
                Ok(Response { status: 200, data: entity.to_json() })
            }
            (Method::Post, None) => {
                let body = request.body.as_ref().ok_or_else(|| bad_request("missing body"))?;
                state.next_id += 1;
                let id = state.next_id;
                let patch = EntityPatch::from_json(body);
                let entity = Entity::new(EntityKey::new(kind, id), 1, patch.fields);
                let data = entity.to_json();
                state.collections.entry(kind).or_default().push(entity);
                Ok(Response { status: 201, data })
            }
            (Method::Delete, Some(key)) => {
                let list = state.collections.entry(kind).or_default();
                let before = list.len();
                list.retain(|e| e.key != key);
                if list.len() == before {
                    return Err(not_found(&key));
                }
                Ok(Response { status: 204, data: Value::Null })
            }
            _ => Err(method_not_allowed(request)),
        }
    }
}

fn method_not_allowed(request: &Request) -> TransportError {
    TransportError::from_status(
        405,
        Some(json!({ "message": format!("{} not allowed on {}", request.method, request.path) })),
    )
}

fn not_found_path(path: &str) -> TransportError {
    TransportError::from_status(404, Some(json!({ "message": format!("no route for {path}") })))
}

impl BackendState {
    fn find(&self, key: &EntityKey) -> Option<&Entity> {
        self.collections.get(&key.kind)?.iter().find(|e| e.key == *key)
    }

    fn find_mut(&mut self, key: &EntityKey) -> Option<&mut Entity> {
        self.collections.get_mut(&key.kind)?.iter_mut().find(|e| e.key == *key)
    }
}

#[async_trait(?Send)]
impl Transport for FakeBackend {
    async fn send(&self, request: Request) -> Result<Response, TransportError> {
        // Give other tasks a chance to run, as a real round trip would.
        tokio::task::yield_now().await;
        self.handle(&request)
    }
}
