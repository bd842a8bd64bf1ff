//! Production [`DurableStore`] backed by `redb`, an embedded transactional
//! key-value engine. One redb table per named space, plus one extra redb
//! table per declared secondary index (`"{space}__idx__{field}"`).

use std::path::Path;
use std::sync::Mutex;

use redb::{Database, ReadableTable, TableDefinition};

use crate::error::StoreError;

use super::engine::{BatchOp, DurableStore, FetchResult, QuotaUsage, StoreCursor, StoredEntry};

fn to_store_err(e: impl std::fmt::Display) -> StoreError {
    StoreError::Io(e.to_string())
}

fn space_table(space: &str) -> TableDefinition<'_, &str, (&[u8], u64)> {
    TableDefinition::new(space)
}

fn index_table_name(space: &str, index: &str) -> String {
    format!("{space}__idx__{index}")
}

/// A `redb`-backed durable store.
///
/// Index tables store `indexed_value -> msgpack-encoded Vec<String>` of
/// primary keys; `scan_index` decodes and returns that list directly.
pub struct RedbStore {
    db: Mutex<Database>,
    quota_bytes: u64,
}

impl RedbStore {
    /// Opens (creating if absent) a redb database file at `path`.
    pub fn open(path: impl AsRef<Path>, quota_bytes: u64) -> Result<Self, StoreError> {
        let db = Database::create(path).map_err(to_store_err)?;
        Ok(Self { db: Mutex::new(db), quota_bytes })
    }

}

impl DurableStore for RedbStore {
    fn put(&self, space: &str, key: &str, bytes: Vec<u8>, cost: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_write().map_err(to_store_err)?;
        let prev = {
            let mut table = txn.open_table(space_table(space)).map_err(to_store_err)?;
            let prev = table
                .get(key)
                .map_err(to_store_err)?
                .map(|v| v.value().0.to_vec());
            table.insert(key, (bytes.as_slice(), cost)).map_err(to_store_err)?;
            prev
        };
        txn.commit().map_err(to_store_err)?;
        Ok(prev)
    }

    fn get(&self, space: &str, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_read().map_err(to_store_err)?;
        let table = txn.open_table(space_table(space)).map_err(to_store_err)?;
        Ok(table.get(key).map_err(to_store_err)?.map(|v| {
            let (bytes, cost) = v.value();
            StoredEntry { key: key.to_string(), bytes: bytes.to_vec(), cost }
        }))
    }

    fn delete(&self, space: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_write().map_err(to_store_err)?;
        let prev = {
            let mut table = txn.open_table(space_table(space)).map_err(to_store_err)?;
            table.remove(key).map_err(to_store_err)?.map(|v| v.value().0.to_vec())
        };
        txn.commit().map_err(to_store_err)?;
        Ok(prev)
    }

    fn batch_write(&self, space: &str, writes: Vec<BatchOp>) -> Result<(), StoreError> {
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_write().map_err(to_store_err)?;
        {
            let mut table = txn.open_table(space_table(space)).map_err(to_store_err)?;
            for op in writes {
                match op {
                    BatchOp::Put { key, bytes, cost } => {
                        table.insert(key.as_str(), (bytes.as_slice(), cost)).map_err(to_store_err)?;
                    }
                    BatchOp::Delete { key } => {
                        table.remove(key.as_str()).map_err(to_store_err)?;
                    }
                }
            }
        }
        txn.commit().map_err(to_store_err)?;
        Ok(())
    }

    fn fetch_entries(
        &self,
        space: &str,
        cursor: &StoreCursor,
        size: usize,
    ) -> Result<FetchResult<StoredEntry>, StoreError> {
        let snapshot = self.snapshot(space)?;
        let total = snapshot.len();
        let offset = if cursor.state.is_empty() {
            0
        } else {
            let mut buf = [0u8; 8];
            let len = cursor.state.len().min(8);
            buf[..len].copy_from_slice(&cursor.state[..len]);
            u64::from_le_bytes(buf) as usize
        };

        let items: Vec<StoredEntry> = snapshot.into_iter().skip(offset).take(size).collect();
        let new_offset = offset + items.len();

        Ok(FetchResult {
            items,
            next_cursor: StoreCursor {
                state: (new_offset as u64).to_le_bytes().to_vec(),
                finished: new_offset >= total,
            },
        })
    }

    fn snapshot(&self, space: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_read().map_err(to_store_err)?;
        let table = match txn.open_table(space_table(space)) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(to_store_err(e)),
        };
        let mut out = Vec::new();
        for entry in table.iter().map_err(to_store_err)? {
            let (k, v) = entry.map_err(to_store_err)?;
            let (bytes, cost) = v.value();
            out.push(StoredEntry { key: k.value().to_string(), bytes: bytes.to_vec(), cost });
        }
        Ok(out)
    }

    fn scan_index(&self, space: &str, index: &str, indexed_value: &str) -> Result<Vec<String>, StoreError> {
        let table_name = index_table_name(space, index);
        let table_def: TableDefinition<'_, &str, &[u8]> = TableDefinition::new(&table_name);
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_read().map_err(to_store_err)?;
        let table = match txn.open_table(table_def) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(to_store_err(e)),
        };
        Ok(table
            .get(indexed_value)
            .map_err(to_store_err)?
            .map(|v| rmp_serde::from_slice::<Vec<String>>(v.value()).unwrap_or_default())
            .unwrap_or_default())
    }

    fn len(&self, space: &str) -> Result<usize, StoreError> {
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_read().map_err(to_store_err)?;
        match txn.open_table(space_table(space)) {
            Ok(table) => Ok(table.len().map_err(to_store_err)? as usize),
            Err(redb::TableError::TableDoesNotExist(_)) => Ok(0),
            Err(e) => Err(to_store_err(e)),
        }
    }

    fn clear(&self, space: &str) -> Result<(), StoreError> {
        let keys: Vec<String> = self.snapshot(space)?.into_iter().map(|e| e.key).collect();
        let writes = keys.into_iter().map(|key| BatchOp::Delete { key }).collect();
        self.batch_write(space, writes)
    }

    fn quota(&self) -> Result<QuotaUsage, StoreError> {
        let db = self.db.lock().expect("redb mutex poisoned");
        let stats = db.begin_write().map_err(to_store_err)?;
        let used = stats.stats().map_err(to_store_err)?.stored_bytes();
        Ok(QuotaUsage { used_bytes: used as u64, quota_bytes: self.quota_bytes })
    }

    fn update_index(
        &self,
        space: &str,
        index: &str,
        indexed_value: &str,
        row_id: &str,
        add: bool,
    ) -> Result<(), StoreError> {
        let table_name = index_table_name(space, index);
        let table_def: TableDefinition<'_, &str, &[u8]> = TableDefinition::new(&table_name);
        let db = self.db.lock().expect("redb mutex poisoned");
        let txn = db.begin_write().map_err(to_store_err)?;
        {
            let mut table = txn.open_table(table_def).map_err(to_store_err)?;
            let mut ids: Vec<String> = table
                .get(indexed_value)
                .map_err(to_store_err)?
                .map(|v| rmp_serde::from_slice(v.value()).unwrap_or_default())
                .unwrap_or_default();
            if add {
                if !ids.iter().any(|id| id == row_id) {
                    ids.push(row_id.to_string());
                }
            } else {
                ids.retain(|id| id != row_id);
            }
            let bytes = rmp_serde::to_vec(&ids).map_err(|e| StoreError::Serde(e.to_string()))?;
            table.insert(indexed_value, bytes.as_slice()).map_err(to_store_err)?;
        }
        txn.commit().map_err(to_store_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn put_get_delete_round_trip() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb"), 1_000_000).unwrap();

        assert!(store.put("todos", "1", vec![1, 2, 3], 3).unwrap().is_none());
        assert_eq!(store.get("todos", "1").unwrap().unwrap().bytes, vec![1, 2, 3]);

        let removed = store.delete("todos", "1").unwrap();
        assert_eq!(removed, Some(vec![1, 2, 3]));
        assert!(store.get("todos", "1").unwrap().is_none());
    }

    #[test]
    fn snapshot_on_absent_space_is_empty() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb"), 1_000_000).unwrap();
        assert!(store.snapshot("never_written").unwrap().is_empty());
        assert_eq!(store.len("never_written").unwrap(), 0);
    }

    #[test]
    fn batch_write_applies_puts_and_deletes() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb"), 1_000_000).unwrap();
        store.put("todos", "1", vec![1], 1).unwrap();

        store
            .batch_write(
                "todos",
                vec![
                    BatchOp::Put { key: "2".into(), bytes: vec![2], cost: 1 },
                    BatchOp::Delete { key: "1".into() },
                ],
            )
            .unwrap();

        assert!(store.get("todos", "1").unwrap().is_none());
        assert_eq!(store.get("todos", "2").unwrap().unwrap().bytes, vec![2]);
    }

    #[test]
    fn index_round_trips_primary_keys() {
        let dir = tempdir().unwrap();
        let store = RedbStore::open(dir.path().join("test.redb"), 1_000_000).unwrap();
        store.update_index("todos", "owner", "alice", "row-1", true).unwrap();
        store.update_index("todos", "owner", "alice", "row-2", true).unwrap();
        store.update_index("todos", "owner", "alice", "row-1", false).unwrap();

        let ids = store.scan_index("todos", "owner", "alice").unwrap();
        assert_eq!(ids, vec!["row-2".to_string()]);
    }
}
