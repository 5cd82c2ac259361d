use crate::models::{ActionTypeDef, EventTypeDef};
use anyhow::Result;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::sync::Arc;

pub const EVENT_TYPE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("event_types");
pub const ACTION_TYPE_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("action_types");

/// Catalog of declared event and action types, read by validation and
/// introspection paths only.
pub struct CatalogStore {
    db: Arc<Database>,
}

impl CatalogStore {
    pub fn new(db: Arc<Database>) -> Result<Self> {
        let write_txn = db.begin_write()?;
        write_txn.open_table(EVENT_TYPE_TABLE)?;
        write_txn.open_table(ACTION_TYPE_TABLE)?;
        write_txn.commit()?;
        Ok(Self { db })
    }

    pub fn upsert_event_type(&self, def: &EventTypeDef) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(EVENT_TYPE_TABLE)?;
            table.insert(def.key.as_str(), serde_json::to_vec(def)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_event_type(&self, key: &str) -> Result<Option<EventTypeDef>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENT_TYPE_TABLE)?;
        if let Some(value) = table.get(key)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn list_event_types(&self) -> Result<Vec<EventTypeDef>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(EVENT_TYPE_TABLE)?;
        let mut defs = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            defs.push(serde_json::from_slice(value.value())?);
        }
        Ok(defs)
    }

    pub fn upsert_action_type(&self, def: &ActionTypeDef) -> Result<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ACTION_TYPE_TABLE)?;
            table.insert(def.key.as_str(), serde_json::to_vec(def)?.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    pub fn get_action_type(&self, key: &str) -> Result<Option<ActionTypeDef>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTION_TYPE_TABLE)?;
        if let Some(value) = table.get(key)? {
            Ok(Some(serde_json::from_slice(value.value())?))
        } else {
            Ok(None)
        }
    }

    pub fn list_action_types(&self) -> Result<Vec<ActionTypeDef>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ACTION_TYPE_TABLE)?;
        let mut defs = Vec::new();
        for item in table.iter()? {
            let (_, value) = item?;
            defs.push(serde_json::from_slice(value.value())?);
        }
        Ok(defs)
    }
}
