//! The durable-store contract: a named-space, secondary-indexed key-value
//! store with quota introspection.
//!
//! Grounded on the server's three-layer `StorageEngine`/`RecordStore`
//! hierarchy, collapsed into a single trait since the client has no
//! partitioning and no backup-replication provenance to track -- a row
//! either lives in its table's space or it doesn't.

use crate::error::StoreError;

/// Opaque cursor for resumable iteration over a space's entries.
///
/// Implementations encode their own position in `state`; callers only check
/// `finished`. Mirrors the server's `IterationCursor`.
#[derive(Debug, Clone, Default)]
pub struct StoreCursor {
    pub state: Vec<u8>,
    pub finished: bool,
}

impl StoreCursor {
    #[must_use]
    pub fn start() -> Self {
        Self { state: Vec::new(), finished: false }
    }
}

/// Result of a cursor-based fetch, paired with the cursor to resume from.
#[derive(Debug)]
pub struct FetchResult<T> {
    pub items: Vec<T>,
    pub next_cursor: StoreCursor,
}

/// Current storage usage, used by the quota pre-check and eviction trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaUsage {
    pub used_bytes: u64,
    pub quota_bytes: u64,
}

impl QuotaUsage {
    #[must_use]
    pub fn is_over(&self, threshold_bytes: u64) -> bool {
        self.used_bytes >= threshold_bytes
    }
}

/// A raw, serialized row entry as stored by the durable store.
#[derive(Debug, Clone)]
pub struct StoredEntry {
    pub key: String,
    pub bytes: Vec<u8>,
    pub cost: u64,
}

/// Durable, transactional key-value storage partitioned into named spaces
/// (one per replicated table) plus caller-declared secondary indexes.
///
/// Implementations: [`super::redb_store::RedbStore`] for production,
/// [`super::memory::MemoryStore`] for tests and pre-open buffering.
pub trait DurableStore: Send + Sync + 'static {
    /// Insert or replace an entry, returning the previous bytes if present.
    fn put(&self, space: &str, key: &str, bytes: Vec<u8>, cost: u64) -> Result<Option<Vec<u8>>, StoreError>;

    /// Retrieve an entry by key.
    fn get(&self, space: &str, key: &str) -> Result<Option<StoredEntry>, StoreError>;

    /// Remove an entry, returning the removed bytes if present.
    fn delete(&self, space: &str, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Apply a batch of puts/deletes as a single transaction.
    fn batch_write(&self, space: &str, writes: Vec<BatchOp>) -> Result<(), StoreError>;

    /// Iterate all entries in a space with cursor-based pagination.
    fn fetch_entries(
        &self,
        space: &str,
        cursor: &StoreCursor,
        size: usize,
    ) -> Result<FetchResult<StoredEntry>, StoreError>;

    /// Return a point-in-time snapshot of all entries in a space.
    fn snapshot(&self, space: &str) -> Result<Vec<StoredEntry>, StoreError>;

    /// Scan a secondary index for keys matching `indexed_value`.
    ///
    /// `index` names a field declared `indexed: true` on the table's schema.
    /// Returns primary keys; callers fetch the full entry with `get`.
    fn scan_index(&self, space: &str, index: &str, indexed_value: &str) -> Result<Vec<String>, StoreError>;

    /// Adds (`add = true`) or removes `row_id` from the posting list stored
    /// under `indexed_value` in the `(space, index)` secondary index.
    fn update_index(
        &self,
        space: &str,
        index: &str,
        indexed_value: &str,
        row_id: &str,
        add: bool,
    ) -> Result<(), StoreError>;

    /// Number of entries in a space.
    fn len(&self, space: &str) -> Result<usize, StoreError>;

    fn is_empty(&self, space: &str) -> Result<bool, StoreError> {
        Ok(self.len(space)? == 0)
    }

    /// Remove every entry in a space.
    fn clear(&self, space: &str) -> Result<(), StoreError>;

    /// Current usage against the store's overall quota.
    fn quota(&self) -> Result<QuotaUsage, StoreError>;
}

/// One write in a `DurableStore::batch_write` transaction.
#[derive(Debug, Clone)]
pub enum BatchOp {
    Put { key: String, bytes: Vec<u8>, cost: u64 },
    Delete { key: String },
}
