//! The replication manager: table registry, priority-ordered sync
//! scheduling, cache eviction, the event surface, and the kill switch.
//!
//! Grounded on the server's `ShutdownController` (the `ArcSwap<bool>` kill
//! switch pattern) and `ServiceRegistry` (name-keyed component lookup).

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::{broadcast, Mutex as AsyncMutex};

use tablesync_core::TableMetadata;

use crate::error::{ReplicationError, StoreError, SyncError};
use crate::events::{AlertLevel, ReplicationEvent};
use crate::store::{DurableStore, QuotaUsage};
use crate::time::now_ms;

/// Relative priority a table is synced at during `sync_all`. Ties break on
/// registration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPriority {
    Low,
    Medium,
    High,
    Critical,
}

impl SyncPriority {
    fn rank(self) -> u8 {
        match self {
            SyncPriority::Low => 0,
            SyncPriority::Medium => 1,
            SyncPriority::High => 2,
            SyncPriority::Critical => 3,
        }
    }
}

/// Type-erased handle to one table's sync engine, so the manager can drive
/// `sync_all` and eviction without knowing each table's row type.
#[async_trait]
pub trait SyncableTable: Send + Sync {
    fn table_name(&self) -> &str;
    async fn sync(&self) -> Result<TableMetadata, SyncError>;
    fn eviction_candidates(&self, now: u64) -> Vec<String>;
    fn evict(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
impl<R, S, Api> SyncableTable for crate::sync::SyncEngine<R, S, Api>
where
    R: tablesync_core::Identifiable
        + Clone
        + serde::Serialize
        + serde::de::DeserializeOwned
        + Send
        + Sync
        + 'static,
    S: DurableStore,
    Api: crate::ports::TableServerApi<R> + 'static,
{
    fn table_name(&self) -> &str {
        self.table_name()
    }

    async fn sync(&self) -> Result<TableMetadata, SyncError> {
        self.sync().await
    }

    fn eviction_candidates(&self, now: u64) -> Vec<String> {
        self.eviction_candidates(now)
    }

    fn evict(&self, id: &str) -> Result<(), StoreError> {
        self.evict(id)
    }
}

struct RegisteredTable {
    priority: SyncPriority,
    registration_order: u64,
    engine: Arc<dyn SyncableTable>,
    kill_switch: Arc<AtomicBool>,
}

/// Coordinates sync across every registered table for one durable store,
/// with a global and per-table kill switch, priority-ordered scheduling, and
/// quota-driven eviction.
pub struct ReplicationManager<S: DurableStore> {
    store: Arc<S>,
    tables: DashMap<String, RegisteredTable>,
    registration_counter: std::sync::atomic::AtomicU64,
    kill_switch: ArcSwap<bool>,
    sync_lock: AsyncMutex<()>,
    syncing: AtomicBool,
    events_tx: broadcast::Sender<ReplicationEvent>,
    quota_soft_limit_bytes: u64,
    quota_eviction_target_bytes: u64,
}

/// RAII marker: flips `syncing` back to `false` when a sync pass ends,
/// including on an early return or error.
struct SyncInProgressGuard<'a> {
    flag: &'a AtomicBool,
}

impl Drop for SyncInProgressGuard<'_> {
    fn drop(&mut self) {
        self.flag.store(false, AtomicOrdering::SeqCst);
    }
}

impl<S: DurableStore> ReplicationManager<S> {
    #[must_use]
    pub fn new(store: Arc<S>, quota_soft_limit_bytes: u64, quota_eviction_target_bytes: u64) -> Self {
        let (events_tx, _rx) = broadcast::channel(256);
        Self {
            store,
            tables: DashMap::new(),
            registration_counter: std::sync::atomic::AtomicU64::new(0),
            kill_switch: ArcSwap::from_pointee(false),
            sync_lock: AsyncMutex::new(()),
            syncing: AtomicBool::new(false),
            events_tx,
            quota_soft_limit_bytes,
            quota_eviction_target_bytes,
        }
    }

    #[must_use]
    pub fn subscribe_events(&self) -> broadcast::Receiver<ReplicationEvent> {
        self.events_tx.subscribe()
    }

    fn emit(&self, event: ReplicationEvent) {
        let _ = self.events_tx.send(event);
    }

    /// Registers a table's sync engine under a priority. Idempotent:
    /// re-registering an already-mounted name is a silent no-op that leaves
    /// the original registration (priority, kill switch, engine) untouched.
    pub fn register_table(
        &self,
        priority: SyncPriority,
        engine: Arc<dyn SyncableTable>,
    ) -> Result<(), ReplicationError> {
        let name = engine.table_name().to_string();
        if self.tables.contains_key(&name) {
            return Ok(());
        }
        let registration_order = self.registration_counter.fetch_add(1, AtomicOrdering::SeqCst);
        self.tables.insert(
            name,
            RegisteredTable {
                priority,
                registration_order,
                engine,
                kill_switch: Arc::new(AtomicBool::new(false)),
            },
        );
        Ok(())
    }

    /// `true` while `sync_all` or `refresh_table` is actively driving a sync
    /// pass. Used by [`crate::prefetch::PrefetchManager`] to suppress warm
    /// syncs that would otherwise queue behind a real one.
    #[must_use]
    pub fn is_sync_in_progress(&self) -> bool {
        self.syncing.load(AtomicOrdering::SeqCst)
    }

    /// Engages or releases the global kill switch. While engaged, every
    /// scheduled sync action refuses to run.
    pub fn set_kill_switch(&self, engaged: bool) {
        self.kill_switch.store(Arc::new(engaged));
        if engaged {
            self.emit(ReplicationEvent::KillSwitchEngaged { table_name: None });
        }
    }

    #[must_use]
    pub fn is_kill_switch_engaged(&self) -> bool {
        **self.kill_switch.load()
    }

    pub fn set_table_kill_switch(&self, table_name: &str, engaged: bool) -> Result<(), ReplicationError> {
        let table = self
            .tables
            .get(table_name)
            .ok_or_else(|| ReplicationError::Sync(SyncError::UnknownTable(table_name.to_string())))?;
        table.kill_switch.store(engaged, AtomicOrdering::SeqCst);
        if engaged {
            self.emit(ReplicationEvent::KillSwitchEngaged { table_name: Some(table_name.to_string()) });
        }
        Ok(())
    }

    /// Syncs every registered table in priority order (ties broken by
    /// registration order), serialized behind a FIFO lock so overlapping
    /// callers queue rather than racing.
    pub async fn sync_all(&self) -> Result<(), ReplicationError> {
        let _guard = self.sync_lock.lock().await;

        if self.is_kill_switch_engaged() {
            return Err(ReplicationError::KillSwitchEngaged);
        }

        self.syncing.store(true, AtomicOrdering::SeqCst);
        let _sync_guard = SyncInProgressGuard { flag: &self.syncing };

        let mut ordered: Vec<(String, SyncPriority, u64, Arc<dyn SyncableTable>, Arc<AtomicBool>)> = self
            .tables
            .iter()
            .map(|entry| {
                let t = entry.value();
                (entry.key().clone(), t.priority, t.registration_order, t.engine.clone(), t.kill_switch.clone())
            })
            .collect();
        ordered.sort_by(|a, b| b.1.rank().cmp(&a.1.rank()).then(a.2.cmp(&b.2)));

        for (name, _priority, _order, engine, table_kill_switch) in ordered {
            if table_kill_switch.load(AtomicOrdering::SeqCst) {
                continue;
            }
            self.emit(ReplicationEvent::SyncStarted { table_name: name.clone() });
            match engine.sync().await {
                Ok(meta) => {
                    self.emit(ReplicationEvent::SyncCompleted {
                        table_name: name,
                        status: meta.sync_status.unwrap_or(tablesync_core::SyncStatus::Synced),
                    });
                }
                Err(err) => {
                    self.emit(ReplicationEvent::SyncFailed { table_name: name.clone(), reason: err.to_string() });
                    tracing::error!(table = %name, error = %err, "table sync failed");
                }
            }
        }

        self.check_quota();
        Ok(())
    }

    /// Syncs a single table immediately, outside the priority ordering.
    pub async fn refresh_table(&self, table_name: &str) -> Result<(), ReplicationError> {
        if self.is_kill_switch_engaged() {
            return Err(ReplicationError::KillSwitchEngaged);
        }
        let entry = self
            .tables
            .get(table_name)
            .ok_or_else(|| ReplicationError::Sync(SyncError::UnknownTable(table_name.to_string())))?;
        if entry.kill_switch.load(AtomicOrdering::SeqCst) {
            return Err(ReplicationError::KillSwitchEngaged);
        }
        let engine = entry.engine.clone();
        drop(entry);

        self.syncing.store(true, AtomicOrdering::SeqCst);
        let _sync_guard = SyncInProgressGuard { flag: &self.syncing };

        self.emit(ReplicationEvent::SyncStarted { table_name: table_name.to_string() });
        engine.sync().await.map(|_| ()).map_err(|err| {
            self.emit(ReplicationEvent::SyncFailed { table_name: table_name.to_string(), reason: err.to_string() });
            ReplicationError::Sync(err)
        })
    }

    #[must_use]
    pub fn cache_stats(&self) -> QuotaUsage {
        self.store.quota().unwrap_or(QuotaUsage { used_bytes: 0, quota_bytes: 0 })
    }

    /// Evicts the least-valuable rows across every registered table until
    /// usage falls to `quota_eviction_target_bytes`, or no table has any
    /// remaining eviction candidate.
    pub fn evict_lru(&self) -> u64 {
        let mut evicted = 0u64;
        loop {
            let usage = self.cache_stats();
            if usage.used_bytes <= self.quota_eviction_target_bytes {
                break;
            }

            let now = now_ms();
            let mut progressed = false;
            for entry in self.tables.iter() {
                let candidates = entry.value().engine.eviction_candidates(now);
                if let Some(id) = candidates.first() {
                    if entry.value().engine.evict(id).is_ok() {
                        evicted += 1;
                        progressed = true;
                    }
                }
            }
            if !progressed {
                break;
            }
        }
        evicted
    }

    fn check_quota(&self) {
        let usage = self.cache_stats();
        if usage.is_over(self.quota_soft_limit_bytes) {
            self.emit(ReplicationEvent::QuotaAlert { used_bytes: usage.used_bytes, quota_bytes: usage.quota_bytes });
            let evicted = self.evict_lru();
            tracing::info!(evicted, used_bytes = usage.used_bytes, "quota soft limit exceeded, ran eviction pass");
        }
    }

    /// Drops every row in every registered table's durable-store space,
    /// used on tenant/scope change so no stale data from a previous scope
    /// leaks into the next.
    pub fn clear_all_caches(&self) -> Result<(), StoreError> {
        for entry in self.tables.iter() {
            self.store.clear(entry.key())?;
        }
        Ok(())
    }

    pub fn mutation_queue_alert(&self, pending: u64, level: AlertLevel) {
        self.emit(ReplicationEvent::MutationQueueAlert { pending, level });
    }

    pub fn conflict_resolved(&self, table_name: &str, row_id: &str) {
        self.emit(ReplicationEvent::ConflictResolved {
            table_name: table_name.to_string(),
            row_id: row_id.to_string(),
        });
    }
}
