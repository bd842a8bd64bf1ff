//! Predictive prefetch: learns which page a user navigates to next and
//! warms the tables that page reads, ahead of the navigation actually
//! happening.
//!
//! Grounded on the server's frequency-table idioms (a nested `DashMap`
//! counting observed transitions), applied here to page-to-page navigation
//! instead of request-to-request.

use std::sync::Arc;

use dashmap::DashMap;

use crate::manager::{ReplicationManager, SyncPriority};
use crate::store::DurableStore;

/// Tracks navigation transitions and the tables each page depends on, and
/// issues low-priority warm syncs for the pages most likely to be visited
/// next.
pub struct PrefetchManager<S: DurableStore> {
    manager: Arc<ReplicationManager<S>>,
    transitions: DashMap<String, DashMap<String, u64>>,
    page_tables: DashMap<String, Vec<String>>,
}

impl<S: DurableStore> PrefetchManager<S> {
    #[must_use]
    pub fn new(manager: Arc<ReplicationManager<S>>) -> Self {
        Self { manager, transitions: DashMap::new(), page_tables: DashMap::new() }
    }

    /// Declares which tables a page reads from, so a predicted navigation to
    /// that page can warm the right tables.
    pub fn declare_page_tables(&self, page: impl Into<String>, tables: Vec<String>) {
        self.page_tables.insert(page.into(), tables);
    }

    /// Records that the user navigated from `from_page` to `to_page`.
    pub fn track_navigation(&self, from_page: &str, to_page: &str) {
        let counts = self.transitions.entry(from_page.to_string()).or_default();
        *counts.entry(to_page.to_string()).or_insert(0) += 1;
    }

    /// Returns the `top_n` pages most frequently visited after `current_page`,
    /// most likely first.
    #[must_use]
    pub fn predict_next_pages(&self, current_page: &str, top_n: usize) -> Vec<String> {
        let Some(counts) = self.transitions.get(current_page) else { return Vec::new() };
        let mut ranked: Vec<(String, u64)> = counts.iter().map(|e| (e.key().clone(), *e.value())).collect();
        ranked.sort_by(|a, b| b.1.cmp(&a.1));
        ranked.into_iter().take(top_n).map(|(page, _)| page).collect()
    }

    /// Warms the tables backing the top-N predicted next pages, at `Low`
    /// priority, through the normal sync path. Suppressed entirely while a
    /// real sync pass is already in flight: queuing a speculative warm sync
    /// behind it would only delay the sync that actually matters.
    pub async fn warm_predicted_pages(&self, current_page: &str, top_n: usize) {
        if self.manager.is_sync_in_progress() {
            tracing::debug!(page = %current_page, "prefetch suppressed, a sync pass is already in progress");
            return;
        }
        for page in self.predict_next_pages(current_page, top_n) {
            let Some(tables) = self.page_tables.get(&page) else { continue };
            for table_name in tables.iter() {
                if let Err(err) = self.manager.refresh_table(table_name).await {
                    tracing::debug!(table = %table_name, page = %page, error = %err, "prefetch warm sync skipped");
                }
            }
        }
    }

    #[must_use]
    pub fn registered_priority_for(&self, _page: &str) -> SyncPriority {
        SyncPriority::Low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn manager() -> Arc<ReplicationManager<MemoryStore>> {
        Arc::new(ReplicationManager::new(Arc::new(MemoryStore::new(u64::MAX)), 4_500_000, 4_000_000))
    }

    #[test]
    fn predict_next_pages_ranks_by_frequency() {
        let p = PrefetchManager::new(manager());
        p.track_navigation("home", "todos");
        p.track_navigation("home", "todos");
        p.track_navigation("home", "settings");

        let predicted = p.predict_next_pages("home", 2);
        assert_eq!(predicted, vec!["todos".to_string(), "settings".to_string()]);
    }

    #[test]
    fn unknown_page_predicts_nothing() {
        let p = PrefetchManager::new(manager());
        assert!(p.predict_next_pages("nowhere", 3).is_empty());
    }

    #[tokio::test]
    async fn warming_unknown_table_does_not_panic() {
        let p = PrefetchManager::new(manager());
        p.track_navigation("home", "todos");
        p.declare_page_tables("todos", vec!["todos".to_string()]);
        p.warm_predicted_pages("home", 1).await;
    }

    #[tokio::test]
    async fn warm_predicted_pages_is_suppressed_while_a_sync_pass_is_in_progress() {
        use crate::error::{StoreError, SyncError};
        use crate::manager::{SyncPriority, SyncableTable};
        use async_trait::async_trait;
        use std::sync::atomic::{AtomicU32, Ordering};
        use std::time::Duration;
        use tablesync_core::TableMetadata;

        struct SlowTable {
            syncs: Arc<AtomicU32>,
        }

        #[async_trait]
        impl SyncableTable for SlowTable {
            fn table_name(&self) -> &str {
                "todos"
            }
            async fn sync(&self) -> Result<TableMetadata, SyncError> {
                self.syncs.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(TableMetadata::default())
            }
            fn eviction_candidates(&self, _now: u64) -> Vec<String> {
                vec![]
            }
            fn evict(&self, _id: &str) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let m = manager();
        let syncs = Arc::new(AtomicU32::new(0));
        m.register_table(SyncPriority::Medium, Arc::new(SlowTable { syncs: syncs.clone() })).unwrap();

        let p = PrefetchManager::new(m.clone());
        p.track_navigation("home", "todos");
        p.declare_page_tables("todos", vec!["todos".to_string()]);

        let sync_fut = m.sync_all();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(m.is_sync_in_progress());

        p.warm_predicted_pages("home", 1).await;
        // the warm sync must have been suppressed, not queued behind the
        // in-flight one: only the original sync_all pass touched the table.
        assert_eq!(syncs.load(Ordering::SeqCst), 1);

        sync_fut.await.unwrap();
    }
}
