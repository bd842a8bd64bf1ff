//! Row and mutation metadata shared between the durable store, the
//! replicated-table abstraction, and the sync engine.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Per-row replication state, tracked alongside the application's own row data.
///
/// Grounded on the server's `RecordMetadata` (version/access-time/hit-count
/// bookkeeping for eviction), extended with the client-only `is_dirty` and
/// `sync_status` fields a server never needs since it is always authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowMetadata {
    pub table_name: String,
    pub id: String,
    /// Incremented on every local or server-applied write.
    pub version: u64,
    /// Millis since epoch of the last successful sync covering this row.
    pub last_synced_at: u64,
    /// Millis since epoch of the last read access. Drives LRU eviction scoring.
    pub last_accessed_at: u64,
    /// Millis since epoch of the last local or remote modification.
    pub last_modified_at: u64,
    /// Number of read accesses. Drives LFU eviction scoring.
    pub access_count: u64,
    /// `true` while a local edit has not yet been confirmed by the server.
    pub is_dirty: bool,
    pub sync_status: SyncStatus,
}

impl RowMetadata {
    #[must_use]
    pub fn new(table_name: impl Into<String>, id: impl Into<String>, now: u64) -> Self {
        Self {
            table_name: table_name.into(),
            id: id.into(),
            version: 1,
            last_synced_at: 0,
            last_accessed_at: now,
            last_modified_at: now,
            access_count: 0,
            is_dirty: false,
            sync_status: SyncStatus::Pending,
        }
    }

    pub fn on_access(&mut self, now: u64) {
        self.access_count = self.access_count.saturating_add(1);
        self.last_accessed_at = now;
    }

    pub fn on_local_write(&mut self, now: u64) {
        self.version = self.version.saturating_add(1);
        self.last_modified_at = now;
        self.is_dirty = true;
        self.sync_status = SyncStatus::Pending;
    }

    pub fn on_synced(&mut self, now: u64) {
        self.is_dirty = false;
        self.last_synced_at = now;
        self.sync_status = SyncStatus::Synced;
    }
}

/// Replication status of a single row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SyncStatus {
    Synced,
    Pending,
    Conflict,
    Error,
}

/// The application row wrapped with its replication metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(
    serialize = "R: Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
pub struct ReplicatedRow<R> {
    pub metadata: RowMetadata,
    pub data: R,
}

/// Per-table replication bookkeeping, separate from any individual row.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableMetadata {
    pub last_full_sync_at: u64,
    pub last_incremental_sync_at: u64,
    pub sync_status: Option<SyncStatus>,
    pub last_error: Option<String>,
    pub conflict_count: u64,
    pub pending_mutation_count: u64,
}

/// The kind of local write a `PendingMutation` represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationOp {
    Insert,
    Update,
    Delete,
    BatchUpdate,
}

/// Lifecycle status of a queued mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MutationStatus {
    Pending,
    Syncing,
    Failed,
    Success,
}

/// A locally-made write waiting to be uploaded to the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingMutation {
    pub id: String,
    pub table_name: String,
    pub row_id: String,
    pub operation: MutationOp,
    pub data: Option<crate::value::Value>,
    pub timestamp: u64,
    pub sequence_number: u64,
    /// Other mutation ids that must be uploaded before this one.
    pub depends_on: BTreeSet<String>,
    pub retries: u32,
    pub status: MutationStatus,
    pub last_error: Option<String>,
}

impl PendingMutation {
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        table_name: impl Into<String>,
        row_id: impl Into<String>,
        operation: MutationOp,
        data: Option<crate::value::Value>,
        timestamp: u64,
        sequence_number: u64,
    ) -> Self {
        Self {
            id: id.into(),
            table_name: table_name.into(),
            row_id: row_id.into(),
            operation,
            data,
            timestamp,
            sequence_number,
            depends_on: BTreeSet::new(),
            retries: 0,
            status: MutationStatus::Pending,
            last_error: None,
        }
    }
}

/// How a table resolves conflicts between a local dirty row and an incoming
/// server row for the same id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum ConflictStrategy {
    Lww,
    ServerAuthoritative,
    ClientAuthoritative,
    FieldLevelMerge { client_authoritative_fields: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_metadata_on_local_write_marks_dirty_and_bumps_version() {
        let mut m = RowMetadata::new("todos", "1", 1000);
        assert_eq!(m.version, 1);
        m.on_local_write(1050);
        assert_eq!(m.version, 2);
        assert!(m.is_dirty);
        assert_eq!(m.sync_status, SyncStatus::Pending);
    }

    #[test]
    fn row_metadata_on_synced_clears_dirty() {
        let mut m = RowMetadata::new("todos", "1", 1000);
        m.on_local_write(1050);
        m.on_synced(1100);
        assert!(!m.is_dirty);
        assert_eq!(m.sync_status, SyncStatus::Synced);
        assert_eq!(m.last_synced_at, 1100);
    }

    #[test]
    fn on_access_increments_count() {
        let mut m = RowMetadata::new("todos", "1", 1000);
        m.on_access(1001);
        m.on_access(1002);
        assert_eq!(m.access_count, 2);
        assert_eq!(m.last_accessed_at, 1002);
    }
}
