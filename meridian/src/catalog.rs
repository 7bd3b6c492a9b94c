//! The in-memory catalog: tables, schemas, heap handles, and hash indexes.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use std::collections::HashMap;

use stratum::hash::{default_hash, DiskExtendibleHashTable, HASH_DIRECTORY_MAX_DEPTH};
use stratum::heap::TableHeap;
use stratum::{BufferPoolManager, Rid};

use crate::errors::ExecutionError;
use crate::types::{Schema, Value};

pub type TableOid = u32;

/// The hash index key: an Int column value.
pub type TableIndex = DiskExtendibleHashTable<i64, Rid>;

/// Encodes an indexable value as an index key. Only Int columns may be
/// indexed.
pub fn index_key(value: &Value) -> Option<i64> {
    match value {
        Value::Int(v) => Some(*v),
        _ => None,
    }
}

pub struct TableInfo {
    pub oid: TableOid,
    pub name: String,
    pub schema: Schema,
    pub heap: TableHeap,
}

pub struct IndexInfo {
    pub name: String,
    pub table_name: String,
    /// Which column of the table schema the index keys on.
    pub key_column: usize,
    pub is_primary: bool,
    pub index: TableIndex,
}

pub struct Catalog {
    bpm: Arc<BufferPoolManager>,
    tables: RwLock<HashMap<TableOid, Arc<TableInfo>>>,
    table_names: RwLock<HashMap<String, TableOid>>,
    indexes: RwLock<HashMap<String, Arc<IndexInfo>>>,
    next_oid: AtomicU32,
}

impl Catalog {
    pub fn new(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            tables: RwLock::new(HashMap::new()),
            table_names: RwLock::new(HashMap::new()),
            indexes: RwLock::new(HashMap::new()),
            next_oid: AtomicU32::new(1),
        }
    }

    pub fn buffer_pool(&self) -> &Arc<BufferPoolManager> {
        &self.bpm
    }

    pub fn create_table(
        &self,
        name: impl Into<String>,
        schema: Schema,
    ) -> Result<Arc<TableInfo>, ExecutionError> {
        let name = name.into();
        if self.table_names.read().contains_key(&name) {
            return Err(ExecutionError::Generic(format!(
                "table {name} already exists"
            )));
        }
        let oid = self.next_oid.fetch_add(1, Ordering::SeqCst);
        let heap = TableHeap::new(Arc::clone(&self.bpm))?;
        let info = Arc::new(TableInfo {
            oid,
            name: name.clone(),
            schema,
            heap,
        });
        self.tables.write().insert(oid, Arc::clone(&info));
        self.table_names.write().insert(name, oid);
        crate::meridian_debug_log!("[Catalog::create_table] oid {oid} for {}", info.name);
        Ok(info)
    }

    pub fn table(&self, name: &str) -> Result<Arc<TableInfo>, ExecutionError> {
        let oid = *self
            .table_names
            .read()
            .get(name)
            .ok_or_else(|| ExecutionError::TableNotFound(name.to_string()))?;
        self.table_by_oid(oid)
    }

    pub fn table_by_oid(&self, oid: TableOid) -> Result<Arc<TableInfo>, ExecutionError> {
        self.tables
            .read()
            .get(&oid)
            .cloned()
            .ok_or_else(|| ExecutionError::TableNotFound(format!("oid {oid}")))
    }

    pub fn tables(&self) -> Vec<Arc<TableInfo>> {
        self.tables.read().values().cloned().collect()
    }

    /// Builds a hash index over `key_column`, backfilling from every
    /// non-deleted row already in the heap.
    pub fn create_index(
        &self,
        index_name: impl Into<String>,
        table_name: &str,
        key_column: usize,
        bucket_max_size: u32,
        is_primary: bool,
    ) -> Result<Arc<IndexInfo>, ExecutionError> {
        let index_name = index_name.into();
        if self.indexes.read().contains_key(&index_name) {
            return Err(ExecutionError::Generic(format!(
                "index {index_name} already exists"
            )));
        }
        let table = self.table(table_name)?;
        let index = TableIndex::new(
            Arc::clone(&self.bpm),
            2,
            HASH_DIRECTORY_MAX_DEPTH,
            bucket_max_size,
            default_hash,
        )?;

        let mut iter = table.heap.iter();
        while let Some((meta, payload, rid)) = iter.next()? {
            if meta.is_deleted {
                continue;
            }
            let tuple = crate::types::Tuple::deserialize(&payload, &table.schema)?;
            if let Some(key) = index_key(tuple.value(key_column)) {
                index.insert(&key, &rid)?;
            }
        }

        let info = Arc::new(IndexInfo {
            name: index_name.clone(),
            table_name: table_name.to_string(),
            key_column,
            is_primary,
            index,
        });
        self.indexes.write().insert(index_name, Arc::clone(&info));
        Ok(info)
    }

    pub fn index(&self, index_name: &str) -> Result<Arc<IndexInfo>, ExecutionError> {
        self.indexes
            .read()
            .get(index_name)
            .cloned()
            .ok_or_else(|| ExecutionError::IndexNotFound(index_name.to_string()))
    }

    pub fn indexes_for_table(&self, table_name: &str) -> Vec<Arc<IndexInfo>> {
        self.indexes
            .read()
            .values()
            .filter(|info| info.table_name == table_name)
            .cloned()
            .collect()
    }

    pub fn primary_index(&self, table_name: &str) -> Option<Arc<IndexInfo>> {
        self.indexes
            .read()
            .values()
            .find(|info| info.table_name == table_name && info.is_primary)
            .cloned()
    }

    /// The index on (`table_name`, `key_column`), if one exists.
    pub fn match_index(&self, table_name: &str, key_column: usize) -> Option<Arc<IndexInfo>> {
        self.indexes
            .read()
            .values()
            .find(|info| info.table_name == table_name && info.key_column == key_column)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, DataType, Tuple};
    use stratum::disk::DiskManager;
    use stratum::page::TupleMeta;
    use tempfile::tempdir;

    fn catalog(dir: &tempfile::TempDir) -> Catalog {
        let dm = DiskManager::open(dir.path().join("catalog.db")).unwrap();
        Catalog::new(Arc::new(BufferPoolManager::new(64, 2, dm)))
    }

    fn two_column_schema() -> Schema {
        Schema::new(vec![
            Column::new("id", DataType::Int),
            Column::new("name", DataType::Varchar),
        ])
    }

    #[test]
    fn create_and_resolve_tables() {
        let dir = tempdir().unwrap();
        let catalog = catalog(&dir);
        let info = catalog.create_table("users", two_column_schema()).unwrap();
        assert_eq!(catalog.table("users").unwrap().oid, info.oid);
        assert!(catalog.table("missing").is_err());
        assert!(catalog.create_table("users", two_column_schema()).is_err());
    }

    #[test]
    fn create_index_backfills_existing_rows() {
        let dir = tempdir().unwrap();
        let catalog = catalog(&dir);
        let table = catalog.create_table("users", two_column_schema()).unwrap();
        let mut rids = Vec::new();
        for i in 0..5i64 {
            let tuple = Tuple::new(vec![Value::Int(i), Value::Varchar(format!("u{i}"))]);
            rids.push(
                table
                    .heap
                    .insert_tuple(TupleMeta::new(0, false), &tuple.serialize())
                    .unwrap(),
            );
        }
        let index = catalog
            .create_index("users_pk", "users", 0, 16, true)
            .unwrap();
        for i in 0..5i64 {
            assert_eq!(index.index.get(&i).unwrap(), Some(rids[i as usize]));
        }
        assert!(catalog.primary_index("users").is_some());
        assert!(catalog.match_index("users", 0).is_some());
        assert!(catalog.match_index("users", 1).is_none());
    }
}
