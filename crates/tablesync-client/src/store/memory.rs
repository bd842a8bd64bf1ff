//! In-memory [`DurableStore`] backed by [`DashMap`], one per named space.
//!
//! Grounded on the server's `HashMapStorage`. Used in tests and as the
//! default store before a `RedbStore` file has been opened.

use dashmap::DashMap;

use crate::error::StoreError;

use super::engine::{BatchOp, DurableStore, FetchResult, QuotaUsage, StoreCursor, StoredEntry};

struct Space {
    entries: DashMap<String, (Vec<u8>, u64)>,
    indexes: DashMap<String, DashMap<String, Vec<String>>>,
}

impl Space {
    fn new() -> Self {
        Self { entries: DashMap::new(), indexes: DashMap::new() }
    }
}

/// An in-memory, non-persistent `DurableStore`. Entries are lost on drop.
pub struct MemoryStore {
    spaces: DashMap<String, Space>,
    quota_bytes: u64,
}

impl MemoryStore {
    #[must_use]
    pub fn new(quota_bytes: u64) -> Self {
        Self { spaces: DashMap::new(), quota_bytes }
    }

    fn space(&self, name: &str) -> dashmap::mapref::one::RefMut<'_, String, Space> {
        self.spaces.entry(name.to_string()).or_insert_with(Space::new)
    }

    /// Registers a secondary index field for a space. Declaring an index
    /// after data already exists requires calling this before the writes
    /// that should be indexed -- there is no backfill.
    pub fn declare_index(&self, space: &str, field: &str) {
        self.space(space).indexes.entry(field.to_string()).or_default();
    }

    fn fetch_offset(cursor: &StoreCursor) -> usize {
        if cursor.state.is_empty() {
            0
        } else {
            let mut buf = [0u8; 8];
            let len = cursor.state.len().min(8);
            buf[..len].copy_from_slice(&cursor.state[..len]);
            u64::from_le_bytes(buf) as usize
        }
    }

    fn encode_offset(offset: usize) -> Vec<u8> {
        (offset as u64).to_le_bytes().to_vec()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(5 * 1024 * 1024)
    }
}

impl DurableStore for MemoryStore {
    fn put(&self, space: &str, key: &str, bytes: Vec<u8>, cost: u64) -> Result<Option<Vec<u8>>, StoreError> {
        let s = self.space(space);
        let prev = s.entries.insert(key.to_string(), (bytes, cost));
        Ok(prev.map(|(b, _)| b))
    }

    fn get(&self, space: &str, key: &str) -> Result<Option<StoredEntry>, StoreError> {
        let s = self.space(space);
        Ok(s.entries.get(key).map(|r| {
            let (bytes, cost) = r.value().clone();
            StoredEntry { key: key.to_string(), bytes, cost }
        }))
    }

    fn delete(&self, space: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let s = self.space(space);
        Ok(s.entries.remove(key).map(|(_, (b, _))| b))
    }

    fn batch_write(&self, space: &str, writes: Vec<BatchOp>) -> Result<(), StoreError> {
        let s = self.space(space);
        for op in writes {
            match op {
                BatchOp::Put { key, bytes, cost } => {
                    s.entries.insert(key, (bytes, cost));
                }
                BatchOp::Delete { key } => {
                    s.entries.remove(&key);
                }
            }
        }
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
        let offset = Self::fetch_offset(cursor);

        let items: Vec<StoredEntry> = snapshot.into_iter().skip(offset).take(size).collect();
        let new_offset = offset + items.len();

        Ok(FetchResult {
            items,
            next_cursor: StoreCursor { state: Self::encode_offset(new_offset), finished: new_offset >= total },
        })
    }

    fn snapshot(&self, space: &str) -> Result<Vec<StoredEntry>, StoreError> {
        let s = self.space(space);
        Ok(s.entries
            .iter()
            .map(|e| StoredEntry { key: e.key().clone(), bytes: e.value().0.clone(), cost: e.value().1 })
            .collect())
    }

    fn scan_index(&self, space: &str, index: &str, indexed_value: &str) -> Result<Vec<String>, StoreError> {
        let s = self.space(space);
        Ok(s.indexes
            .get(index)
            .and_then(|idx| idx.get(indexed_value).map(|v| v.clone()))
            .unwrap_or_default())
    }

    fn len(&self, space: &str) -> Result<usize, StoreError> {
        Ok(self.space(space).entries.len())
    }

    fn clear(&self, space: &str) -> Result<(), StoreError> {
        let s = self.space(space);
        s.entries.clear();
        s.indexes.clear();
        Ok(())
    }

    fn quota(&self) -> Result<QuotaUsage, StoreError> {
        let used: u64 = self.spaces.iter().map(|s| s.entries.iter().map(|e| e.value().1).sum::<u64>()).sum();
        Ok(QuotaUsage { used_bytes: used, quota_bytes: self.quota_bytes })
    }

    fn update_index(
        &self,
        space: &str,
        index: &str,
        indexed_value: &str,
        row_id: &str,
        add: bool,
    ) -> Result<(), StoreError> {
        let s = self.space(space);
        let idx = s.indexes.entry(index.to_string()).or_default();
        let mut ids = idx.entry(indexed_value.to_string()).or_default();
        if add {
            if !ids.iter().any(|id| id == row_id) {
                ids.push(row_id.to_string());
            }
        } else {
            ids.retain(|id| id != row_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_get_delete_round_trip() {
        let store = MemoryStore::default();
        assert!(store.put("todos", "1", vec![1, 2, 3], 3).unwrap().is_none());

        let fetched = store.get("todos", "1").unwrap().unwrap();
        assert_eq!(fetched.bytes, vec![1, 2, 3]);

        let removed = store.delete("todos", "1").unwrap();
        assert_eq!(removed, Some(vec![1, 2, 3]));
        assert!(store.get("todos", "1").unwrap().is_none());
    }

    #[test]
    fn spaces_are_isolated() {
        let store = MemoryStore::default();
        store.put("todos", "1", vec![1], 1).unwrap();
        store.put("notes", "1", vec![2], 1).unwrap();

        assert_eq!(store.get("todos", "1").unwrap().unwrap().bytes, vec![1]);
        assert_eq!(store.get("notes", "1").unwrap().unwrap().bytes, vec![2]);
    }

    #[test]
    fn fetch_entries_paginates() {
        let store = MemoryStore::default();
        for i in 0..5 {
            store.put("todos", &format!("k{i}"), vec![i as u8], 1).unwrap();
        }

        let cursor = StoreCursor::start();
        let page1 = store.fetch_entries("todos", &cursor, 3).unwrap();
        assert_eq!(page1.items.len(), 3);
        assert!(!page1.next_cursor.finished);

        let page2 = store.fetch_entries("todos", &page1.next_cursor, 3).unwrap();
        assert_eq!(page2.items.len(), 2);
        assert!(page2.next_cursor.finished);
    }

    #[test]
    fn quota_sums_cost_across_spaces() {
        let store = MemoryStore::new(1000);
        store.put("todos", "1", vec![0; 100], 100).unwrap();
        store.put("notes", "1", vec![0; 50], 50).unwrap();

        let quota = store.quota().unwrap();
        assert_eq!(quota.used_bytes, 150);
        assert!(!quota.is_over(1000));
        assert!(quota.is_over(100));
    }

    #[test]
    fn clear_empties_space_only() {
        let store = MemoryStore::default();
        store.put("todos", "1", vec![1], 1).unwrap();
        store.put("notes", "1", vec![1], 1).unwrap();

        store.clear("todos").unwrap();
        assert_eq!(store.len("todos").unwrap(), 0);
        assert_eq!(store.len("notes").unwrap(), 1);
    }
}
