//! Observable replication events, fanned out from `ReplicationManager` over
//! an internal `tokio::sync::broadcast` channel -- the Rust analogue of the
//! DOM `CustomEvent` surface named in the design notes.

use tablesync_core::SyncStatus;

/// One observable event raised by the replication manager or sync engine.
#[derive(Debug, Clone, PartialEq)]
pub enum ReplicationEvent {
    SyncStarted { table_name: String },
    SyncProgress { table_name: String, rows_synced: u64, rows_total: Option<u64> },
    SyncCompleted { table_name: String, status: SyncStatus },
    SyncFailed { table_name: String, reason: String },
    ConflictResolved { table_name: String, row_id: String },
    QuotaAlert { used_bytes: u64, quota_bytes: u64 },
    MutationQueueAlert { pending: u64, level: AlertLevel },
    KillSwitchEngaged { table_name: Option<String> },
}

/// Severity of a threshold-crossing alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertLevel {
    Warning,
    Error,
    Critical,
}
