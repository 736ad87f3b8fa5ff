//! The process-wide table registry: table id to heap file, schema and
//! primary-key name. Entries are added by the embedding layer and live for
//! the process lifetime.

use crate::error::{DbError, DbResult};
use crate::heap_file::HeapFile;
use crate::tuple::TupleDesc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

struct CatalogEntry {
    file: Arc<HeapFile>,
    name: String,
    primary_key: String,
}

/// Table registry. Adding a table under an already-registered name or id
/// replaces the previous entry.
#[derive(Default)]
pub struct Catalog {
    tables: RwLock<HashMap<i32, CatalogEntry>>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_table(&self, file: Arc<HeapFile>, name: &str, primary_key: &str) {
        let mut tables = self.tables.write();
        let id = file.id();
        tables.retain(|_, entry| entry.name != name);
        tables.insert(
            id,
            CatalogEntry {
                file,
                name: name.to_string(),
                primary_key: primary_key.to_string(),
            },
        );
        log::debug!("catalog: registered table {name:?} as id {id}");
    }

    pub fn table(&self, table_id: i32) -> DbResult<Arc<HeapFile>> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.file.clone())
            .ok_or_else(|| DbError::NotFound(format!("table id {table_id}")))
    }

    pub fn tuple_desc(&self, table_id: i32) -> DbResult<Arc<TupleDesc>> {
        Ok(self.table(table_id)?.desc().clone())
    }

    pub fn primary_key(&self, table_id: i32) -> DbResult<String> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.primary_key.clone())
            .ok_or_else(|| DbError::NotFound(format!("table id {table_id}")))
    }

    pub fn table_name(&self, table_id: i32) -> DbResult<String> {
        self.tables
            .read()
            .get(&table_id)
            .map(|entry| entry.name.clone())
            .ok_or_else(|| DbError::NotFound(format!("table id {table_id}")))
    }

    pub fn table_id(&self, name: &str) -> DbResult<i32> {
        self.tables
            .read()
            .iter()
            .find(|(_, entry)| entry.name == name)
            .map(|(id, _)| *id)
            .ok_or_else(|| DbError::NotFound(format!("table named {name:?}")))
    }

    /// Ids of every registered table.
    pub fn table_ids(&self) -> Vec<i32> {
        self.tables.read().keys().copied().collect()
    }
}
