use rusqlite::{Connection, OptionalExtension};

use shopdesk_core::{Entity, EntityKey, EntityKind};

use crate::error::StorageError;
use crate::traits::Storage;

fn encode_entity(entity: &Entity) -> Result<Vec<u8>, StorageError> {
    rmp_serde::to_vec(entity).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn decode_entity(bytes: &[u8]) -> Result<Entity, StorageError> {
    rmp_serde::from_slice(bytes).map_err(|e| StorageError::Serialization(e.to_string()))
}

fn version_column(entity: &Entity) -> Result<i64, StorageError> {
    i64::try_from(entity.version).map_err(|_| {
        StorageError::ConstraintViolation(format!("version out of range for {}", entity.key))
    })
}

const UPSERT_SQL: &str = "
INSERT INTO entities (kind, id_key, version, record) VALUES (?1, ?2, ?3, ?4)
ON CONFLICT (kind, id_key) DO UPDATE SET
    version = excluded.version,
    record = excluded.record,
    updated_at = CAST(unixepoch('now','subsec') * 1000 AS INTEGER)
";

pub struct SqliteStorage {
    conn: Connection,
}

impl SqliteStorage {
    pub fn open(path: &str) -> Result<Self, StorageError> {
        let conn = Connection::open(path)?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()?;
        crate::schema::init_schema(&conn)?;
        Ok(Self { conn })
    }

    /// Stored version column for `key`, without decoding the record.
    pub fn stored_version(&self, key: &EntityKey) -> Result<Option<u64>, StorageError> {
        let version: Option<i64> = self
            .conn
            .query_row(
                "SELECT version FROM entities WHERE kind = ?1 AND id_key = ?2",
                rusqlite::params![key.kind.as_str(), key.id.storage_key()],
                |row| row.get(0),
            )
            .optional()?;
        version
            .map(|v| {
                u64::try_from(v)
                    .map_err(|_| StorageError::Serialization(format!("negative version for {key}")))
            })
            .transpose()
    }
}

impl Storage for SqliteStorage {
    fn get_entity(&self, key: &EntityKey) -> Result<Option<Entity>, StorageError> {
        let bytes: Option<Vec<u8>> = self
            .conn
            .query_row(
                "SELECT record FROM entities WHERE kind = ?1 AND id_key = ?2",
                rusqlite::params![key.kind.as_str(), key.id.storage_key()],
                |row| row.get(0),
            )
            .optional()?;
        bytes.map(|b| decode_entity(&b)).transpose()
    }

    fn put_entity(&mut self, entity: &Entity) -> Result<(), StorageError> {
        let record = encode_entity(entity)?;
        self.conn.execute(
            UPSERT_SQL,
            rusqlite::params![
                entity.key.kind.as_str(),
                entity.key.id.storage_key(),
                version_column(entity)?,
                record,
            ],
        )?;
        Ok(())
    }

    fn remove_entity(&mut self, key: &EntityKey) -> Result<bool, StorageError> {
        let removed = self.conn.execute(
            "DELETE FROM entities WHERE kind = ?1 AND id_key = ?2",
            rusqlite::params![key.kind.as_str(), key.id.storage_key()],
        )?;
        Ok(removed > 0)
    }

    fn list_entities(&self, kind: EntityKind) -> Result<Vec<Entity>, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT record FROM entities WHERE kind = ?1 ORDER BY rowid")?;
        let rows = stmt.query_map(rusqlite::params![kind.as_str()], |row| row.get::<_, Vec<u8>>(0))?;
        let mut entities = Vec::new();
        for row in rows {
            entities.push(decode_entity(&row?)?);
        }
        Ok(entities)
    }

    fn replace_kind(&mut self, kind: EntityKind, entities: &[Entity]) -> Result<(), StorageError> {
        if let Some(stray) = entities.iter().find(|e| e.key.kind != kind) {
            return Err(StorageError::ConstraintViolation(format!(
                "{} in {kind} collection",
                stray.key
            )));
        }

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM entities WHERE kind = ?1", rusqlite::params![kind.as_str()])?;
        {
            let mut stmt = tx.prepare(UPSERT_SQL)?;
            for entity in entities {
                stmt.execute(rusqlite::params![
                    kind.as_str(),
                    entity.key.id.storage_key(),
                    version_column(entity)?,
                    encode_entity(entity)?,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn entity_count(&self, kind: EntityKind) -> Result<u64, StorageError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM entities WHERE kind = ?1",
            rusqlite::params![kind.as_str()],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shopdesk_core::{entity::field, FieldValue, Fields};

    fn order(id: i64, status: &str, version: u64) -> Entity {
        let mut fields = Fields::new();
        fields.insert(field::STATUS.into(), FieldValue::from(status));
        Entity::new(EntityKey::order(id), version, fields)
    }

    #[test]
    fn put_then_get() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let entity = order(7, "pending", 1);
        storage.put_entity(&entity)?;
        assert_eq!(storage.get_entity(&EntityKey::order(7))?, Some(entity));
        assert_eq!(storage.stored_version(&EntityKey::order(7))?, Some(1));
        assert_eq!(storage.get_entity(&EntityKey::order(8))?, None);
        Ok(())
    }

    #[test]
    fn put_overwrites_in_place() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.put_entity(&order(1, "pending", 1))?;
        storage.put_entity(&order(2, "pending", 1))?;
        storage.put_entity(&order(1, "shipped", 2))?;

        let listed = storage.list_entities(EntityKind::Order)?;
        let ids: Vec<_> = listed.iter().map(|e| e.key.clone()).collect();
        // Updated row keeps its position.
        assert_eq!(ids, vec![EntityKey::order(1), EntityKey::order(2)]);
        assert_eq!(listed[0].version, 2);
        Ok(())
    }

    #[test]
    fn int_and_text_ids_are_distinct_rows() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.put_entity(&Entity::new(EntityKey::user(7), 1, Fields::new()))?;
        storage.put_entity(&Entity::new(EntityKey::user("7"), 1, Fields::new()))?;
        assert_eq!(storage.entity_count(EntityKind::User)?, 2);
        Ok(())
    }

    #[test]
    fn remove_reports_whether_row_existed() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.put_entity(&order(7, "pending", 1))?;
        assert!(storage.remove_entity(&EntityKey::order(7))?);
        assert!(!storage.remove_entity(&EntityKey::order(7))?);
        Ok(())
    }

    #[test]
    fn replace_kind_leaves_other_kinds_alone() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.put_entity(&order(1, "pending", 1))?;
        storage.put_entity(&Entity::new(EntityKey::product(1), 1, Fields::new()))?;

        storage.replace_kind(EntityKind::Order, &[order(2, "shipped", 3), order(3, "pending", 1)])?;

        assert_eq!(storage.get_entity(&EntityKey::order(1))?, None);
        assert_eq!(storage.entity_count(EntityKind::Order)?, 2);
        assert_eq!(storage.entity_count(EntityKind::Product)?, 1);
        Ok(())
    }

    #[test]
    fn replace_kind_rejects_mixed_collections() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        storage.put_entity(&order(1, "pending", 1))?;
        let mixed = [order(2, "pending", 1), Entity::new(EntityKey::user(1), 1, Fields::new())];
        let result = storage.replace_kind(EntityKind::Order, &mixed);
        assert!(matches!(result, Err(StorageError::ConstraintViolation(_))));
        // Nothing was touched.
        assert_eq!(storage.entity_count(EntityKind::Order)?, 1);
        Ok(())
    }

    #[test]
    fn file_backed_storage_survives_reopen() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("shopdesk.db");
        let path = path.to_str().ok_or("non-utf8 temp path")?;
        {
            let mut storage = SqliteStorage::open(path)?;
            storage.put_entity(&order(7, "processing", 4))?;
        }
        let storage = SqliteStorage::open(path)?;
        let reopened = storage.get_entity(&EntityKey::order(7))?.ok_or("missing order")?;
        assert_eq!(reopened.version, 4);
        assert_eq!(reopened.text(field::STATUS), Some("processing"));
        Ok(())
    }

    #[test]
    fn created_at_survives_encoding() -> Result<(), Box<dyn std::error::Error>> {
        let mut storage = SqliteStorage::open_in_memory()?;
        let json = serde_json::json!({"id": 3, "name": "Lamp", "createdAt": "2024-05-01T08:30:00Z"});
        let entity = Entity::from_json(EntityKind::Product, &json)?;
        storage.put_entity(&entity)?;
        assert_eq!(storage.get_entity(&entity.key)?, Some(entity));
        Ok(())
    }
}
