//! tablesync-client -- durable storage, conflict resolution, sync
//! scheduling, and replication management for offline-first client
//! applications built on `tablesync-core`.
//!
//! - **Store** ([`store`]): the durable, secondary-indexed key-value contract
//!   and its `redb`/in-memory implementations
//! - **Table** ([`table`]): `ReplicatedTable<R>`, the generic per-table cache
//! - **Conflict** ([`conflict`]): the three-tier LWW comparator and resolver
//! - **Mutation** ([`mutation`]): the durable, dependency-ordered upload queue
//! - **Sync** ([`sync`]): `SyncEngine`, one per registered table
//! - **Manager** ([`manager`]): `ReplicationManager`, priority scheduling,
//!   the kill switch, and quota-driven eviction across every table
//! - **Prefetch** ([`prefetch`]): predictive warm-sync based on navigation history
//! - **Monitor** ([`monitor`]): passive rolling-window sync health reporting
//! - **Ports** ([`ports`]): traits a host implements to supply network I/O,
//!   connectivity signal, and cross-tab broadcast
//! - **Events** ([`events`]): the observable `ReplicationEvent` surface
//! - **Config** ([`config`]): `ReplicationConfig`, every engine tunable
//! - **Error** ([`error`]): `StoreError`, `SyncError`, `ReplicationError`

pub mod config;
pub mod conflict;
pub mod error;
pub mod events;
mod json;
pub mod manager;
pub mod middleware;
pub mod monitor;
pub mod mutation;
pub mod ports;
pub mod prefetch;
pub mod store;
pub mod sync;
pub mod table;
mod time;

pub use config::{ConflictStrategyKind, ReplicationConfig};
pub use conflict::{compare_lww, ConflictResolver, ServerTimestamp, TimestampedSide, Winner};
pub use error::{ReplicationError, StoreError, SyncError};
pub use events::{AlertLevel, ReplicationEvent};
pub use manager::{ReplicationManager, SyncPriority, SyncableTable};
pub use monitor::{SyncMonitor, SyncSample, TableHealth};
pub use mutation::{MutationQueue, QueueHealth};
pub use ports::{BroadcastChannel, NetworkMonitor, PushSubscription, TableServerApi};
pub use prefetch::PrefetchManager;
pub use store::{BatchOp, DurableStore, FetchResult, MemoryStore, QuotaUsage, StoreCursor, StoredEntry};
#[cfg(feature = "redb")]
pub use store::RedbStore;
pub use sync::SyncEngine;
pub use table::ReplicatedTable;

impl From<ConflictStrategyKind> for tablesync_core::ConflictStrategy {
    fn from(kind: ConflictStrategyKind) -> Self {
        match kind {
            ConflictStrategyKind::Lww => tablesync_core::ConflictStrategy::Lww,
            ConflictStrategyKind::ServerAuthoritative => tablesync_core::ConflictStrategy::ServerAuthoritative,
            ConflictStrategyKind::ClientAuthoritative => tablesync_core::ConflictStrategy::ClientAuthoritative,
        }
    }
}
