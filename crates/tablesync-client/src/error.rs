//! Error taxonomy for the durable store, sync engine, and replication manager.
//!
//! Follows the teacher's split between a typed `thiserror` enum per layer and
//! `anyhow::Error` only at the outermost (host-facing) boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage quota exceeded: used {used_bytes} of {quota_bytes} bytes")]
    QuotaExceeded { used_bytes: u64, quota_bytes: u64 },

    #[error("version conflict writing `{table}/{id}`: expected {expected}, found {actual}")]
    VersionConflict { table: String, id: String, expected: u64, actual: u64 },

    #[error("schema mismatch for table `{table}`: {reason}")]
    SchemaMismatch { table: String, reason: String },

    #[error("row `{table}/{id}` not found")]
    NotFound { table: String, id: String },

    #[error("backing store I/O error: {0}")]
    Io(String),

    #[error("serialization error: {0}")]
    Serde(String),

    #[error("query on table `{table}` exceeded hard timeout after {elapsed_ms}ms (limit {timeout_ms}ms)")]
    QueryTimeout { table: String, elapsed_ms: u64, timeout_ms: u64 },
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("transient network error: {0}")]
    Transient(String),

    #[error("mutation dependency cycle detected among {0:?}")]
    Cycle(Vec<String>),

    #[error("unknown mutation operation encountered during upload")]
    UnknownOperation,

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("sync cancelled")]
    Cancelled,

    #[error("table `{0}` is not registered")]
    UnknownTable(String),

    #[error("operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    #[error("sync queue overloaded, try again later")]
    Overloaded,
}

#[derive(Debug, Error)]
pub enum ReplicationError {
    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("replication is disabled by the kill switch")]
    KillSwitchEngaged,
}
