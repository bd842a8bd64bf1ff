//! Per-table sync engine: full sync, incremental sync with a safety-
//! threshold escalation guard, periodic full-sync fallback, and
//! dependency-ordered mutation upload.
//!
//! Grounded on the server's sync worker loop; cooperative cancellation uses
//! a `tokio::sync::watch<bool>` the way `ShutdownController` signals shutdown.

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::watch;

use tablesync_core::wire::{
    CountRequest, FetchIncrementalRequest, FetchPageRequest, PushMessage, WriteRowRequest,
    WriteRowResponse,
};
use tablesync_core::{Identifiable, SyncStatus, TableMetadata};

use crate::conflict::ServerTimestamp;
use crate::config::ReplicationConfig;
use crate::error::{StoreError, SyncError};
use crate::json::to_json;
use crate::mutation::MutationQueue;
use crate::ports::{BroadcastChannel, TableServerApi};
use crate::store::DurableStore;
use crate::table::ReplicatedTable;
use crate::time::now_ms;

/// Drives one table's sync lifecycle against a host-supplied
/// [`TableServerApi`].
pub struct SyncEngine<R, S: DurableStore, Api> {
    table: Arc<ReplicatedTable<R, S>>,
    store: Arc<S>,
    mutations: Arc<MutationQueue<S>>,
    api: Arc<Api>,
    table_name: String,
    meta_space: String,
    full_sync_page_size: usize,
    incremental_safety_threshold: u64,
    force_full_sync_interval_ms: u64,
    mutation_upload_chunk_size: usize,
    retry_backoff_base_ms: u64,
    retry_backoff_max_ms: u64,
    cancel: watch::Receiver<bool>,
}

impl<R, S, Api> SyncEngine<R, S, Api>
where
    R: Identifiable + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore,
    Api: TableServerApi<R>,
{
    #[must_use]
    pub fn new(
        table: Arc<ReplicatedTable<R, S>>,
        store: Arc<S>,
        mutations: Arc<MutationQueue<S>>,
        api: Arc<Api>,
        table_name: impl Into<String>,
        config: &ReplicationConfig,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        let table_name = table_name.into();
        Self {
            table,
            store,
            mutations,
            api,
            meta_space: format!("{table_name}__meta"),
            table_name,
            full_sync_page_size: config.full_sync_page_size,
            incremental_safety_threshold: config.incremental_safety_threshold,
            force_full_sync_interval_ms: config.force_full_sync_interval_ms,
            mutation_upload_chunk_size: config.mutation_upload_chunk_size,
            retry_backoff_base_ms: config.retry_backoff_base_ms,
            retry_backoff_max_ms: config.retry_backoff_max_ms,
            cancel,
        }
    }

    fn cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub fn eviction_candidates(&self, now: u64) -> Vec<String> {
        self.table.eviction_candidates(now)
    }

    /// Drops a row from the local cache to relieve quota pressure. This is
    /// not a user delete: the server still holds the row, so no upload
    /// mutation is enqueued.
    pub fn evict(&self, id: &str) -> Result<(), StoreError> {
        self.table.apply_remote_delete(id).map(|_| ())
    }

    /// Applies server-pushed row changes as they arrive, routing each
    /// through conflict resolution the same way a sync pass would, then
    /// republishing on `broadcast` for other local consumers of the same
    /// durable store (the in-process analogue of a browser tab's
    /// `BroadcastChannel`).
    ///
    /// Runs until the push stream closes or the cancellation signal fires;
    /// a host with no push transport (`TableServerApi::push_stream` returns
    /// `None`) never spawns this loop.
    pub async fn run_push_listener(&self, broadcast: &dyn BroadcastChannel) {
        let Some(mut subscription) = self.api.push_stream().await else {
            return;
        };

        loop {
            if self.cancelled() {
                return;
            }
            match subscription.recv().await {
                Some(PushMessage::RowChanged { table_name, row }) => {
                    let ts = ServerTimestamp::new(row.server_timestamp);
                    let mut metadata = tablesync_core::RowMetadata::new(&table_name, &row.row_id, now_ms());
                    metadata.version = row.version;
                    let remote = tablesync_core::ReplicatedRow { metadata, data: row.data };
                    if let Err(err) = self.table.apply_remote(&row.row_id, remote, ts) {
                        tracing::error!(table = %table_name, row_id = %row.row_id, error = %err, "failed to apply pushed row");
                        continue;
                    }
                    broadcast.publish(&table_name, &row.row_id);
                }
                Some(PushMessage::RowDeleted { table_name, row_id }) => {
                    if let Err(err) = self.table.apply_remote_delete(&row_id) {
                        tracing::error!(table = %table_name, row_id = %row_id, error = %err, "failed to apply pushed delete");
                        continue;
                    }
                    broadcast.publish(&table_name, &row_id);
                }
                None => return,
            }
        }
    }

    /// Uploads every queued mutation in dependency order, chunked to
    /// `mutation_upload_chunk_size`. Runs before download on every sync pass.
    pub async fn upload_mutations(&self) -> Result<(), SyncError> {
        let order = self.mutations.drain_order()?;
        for chunk in order.chunks(self.mutation_upload_chunk_size.max(1)) {
            for mutation in chunk {
                if self.cancelled() {
                    return Err(SyncError::Cancelled);
                }

                self.mutations.mark_syncing(&mutation.id).map_err(SyncError::Store)?;

                let data = match &mutation.data {
                    Some(value) => Some(
                        serde_json::from_value::<R>(to_json(value))
                            .map_err(|e| SyncError::Store(StoreError::Serde(e.to_string())))?,
                    ),
                    None => None,
                };

                let request = WriteRowRequest {
                    table_name: mutation.table_name.clone(),
                    row_id: mutation.row_id.clone(),
                    data,
                    expected_version: None,
                    client_timestamp: mutation.timestamp,
                };

                match self.api.write_row(request).await {
                    Ok(WriteRowResponse::Accepted { row }) => {
                        let ts = ServerTimestamp::new(row.metadata.last_modified_at);
                        self.table
                            .apply_remote(&mutation.row_id, row, ts)
                            .map_err(SyncError::Store)?;
                        self.mutations.mark_success(&mutation.id).map_err(SyncError::Store)?;
                    }
                    Ok(WriteRowResponse::VersionConflict { server_row }) => {
                        let ts = ServerTimestamp::new(server_row.metadata.last_modified_at);
                        self.table
                            .apply_remote(&mutation.row_id, server_row, ts)
                            .map_err(SyncError::Store)?;
                        self.mutations.mark_success(&mutation.id).map_err(SyncError::Store)?;
                    }
                    Ok(WriteRowResponse::Rejected { reason }) => {
                        self.mutations
                            .mark_failed(&mutation.id, &reason, self.retry_backoff_base_ms, self.retry_backoff_max_ms)
                            .map_err(SyncError::Store)?;
                    }
                    Err(err) => {
                        let backoff = self
                            .mutations
                            .mark_failed(&mutation.id, &err.to_string(), self.retry_backoff_base_ms, self.retry_backoff_max_ms)
                            .map_err(SyncError::Store)?;
                        tracing::warn!(table = %self.table_name, mutation_id = %mutation.id, backoff_ms = backoff, error = %err, "mutation upload failed, backing off");
                        tokio::time::sleep(Duration::from_millis(backoff)).await;
                    }
                }
            }
        }
        Ok(())
    }

    /// Fetches every row for this table, page by page, applying each through
    /// conflict resolution if a dirty local row exists. Once every page has
    /// been applied, any locally-held row whose id never appeared in the
    /// server's response is reconciled: a clean row is deleted outright (the
    /// server no longer has it), while a dirty row is preserved and logged as
    /// a conflict, since the device may still need to upload it.
    pub async fn full_sync(&self) -> Result<TableMetadata, SyncError> {
        if self.cancelled() {
            return Err(SyncError::Cancelled);
        }

        let mut seen_ids: std::collections::HashSet<String> = std::collections::HashSet::new();
        let mut cursor: Option<String> = None;
        loop {
            let request = FetchPageRequest {
                table_name: self.table_name.clone(),
                cursor: cursor.clone(),
                page_size: self.full_sync_page_size,
                filter: None,
            };
            let response = self.api.fetch_page(request).await?;
            for row in response.rows {
                let id = row.metadata.id.clone();
                seen_ids.insert(id.clone());
                let ts = ServerTimestamp::new(row.metadata.last_modified_at);
                self.table.apply_remote(&id, row, ts).map_err(SyncError::Store)?;
            }
            cursor = response.next_cursor;
            if cursor.is_none() {
                break;
            }
            if self.cancelled() {
                return Err(SyncError::Cancelled);
            }
        }

        for local in self.table.get_all() {
            let id = local.metadata.id.clone();
            if seen_ids.contains(&id) {
                continue;
            }
            if local.metadata.is_dirty {
                tracing::warn!(
                    table = %self.table_name,
                    row_id = %id,
                    "row absent from full sync response but holds an unconfirmed local edit, preserving as conflict"
                );
                continue;
            }
            self.table.apply_remote_delete(&id).map_err(SyncError::Store)?;
        }

        let mut meta = self.read_table_metadata()?;
        meta.last_full_sync_at = now_ms();
        meta.sync_status = Some(SyncStatus::Synced);
        self.write_table_metadata(&meta)?;
        Ok(meta)
    }

    /// Fetches rows changed since the last watermark. Escalates to a full
    /// sync when the server reports more changes than
    /// `incremental_safety_threshold`, or when the delta was truncated.
    pub async fn incremental_sync(&self) -> Result<TableMetadata, SyncError> {
        if self.cancelled() {
            return Err(SyncError::Cancelled);
        }

        let meta = self.read_table_metadata()?;
        let since = meta.last_incremental_sync_at.max(meta.last_full_sync_at);

        let count = self
            .api
            .count(CountRequest { table_name: self.table_name.clone(), since: Some(since) })
            .await?;
        if count.count > self.incremental_safety_threshold {
            tracing::info!(table = %self.table_name, count = count.count, threshold = self.incremental_safety_threshold, "incremental delta exceeds safety threshold, escalating to full sync");
            return self.full_sync().await;
        }

        let response = self
            .api
            .fetch_incremental(FetchIncrementalRequest {
                table_name: self.table_name.clone(),
                since,
                limit: self.incremental_safety_threshold as usize,
            })
            .await?;

        if response.truncated {
            tracing::warn!(table = %self.table_name, "incremental sync truncated by server, escalating to full sync");
            return self.full_sync().await;
        }

        for row in response.changed {
            let id = row.metadata.id.clone();
            let ts = ServerTimestamp::new(row.metadata.last_modified_at);
            self.table.apply_remote(&id, row, ts).map_err(SyncError::Store)?;
        }
        for id in response.deleted_ids {
            self.table.apply_remote_delete(&id).map_err(SyncError::Store)?;
        }

        let mut meta = meta;
        meta.last_incremental_sync_at = response.server_watermark;
        meta.sync_status = Some(SyncStatus::Synced);
        self.write_table_metadata(&meta)?;
        Ok(meta)
    }

    /// Uploads pending mutations, then runs a full sync if one has never run
    /// or the forced-full-sync interval has elapsed, else an incremental sync.
    pub async fn sync(&self) -> Result<TableMetadata, SyncError> {
        self.upload_mutations().await?;

        let meta = self.read_table_metadata()?;
        let now = now_ms();
        if meta.last_full_sync_at == 0
            || now.saturating_sub(meta.last_full_sync_at) > self.force_full_sync_interval_ms
        {
            self.full_sync().await
        } else {
            self.incremental_sync().await
        }
    }

    fn read_table_metadata(&self) -> Result<TableMetadata, SyncError> {
        match self.store.get(&self.meta_space, "meta").map_err(SyncError::Store)? {
            Some(entry) => serde_json::from_slice(&entry.bytes)
                .map_err(|e| SyncError::Store(StoreError::Serde(e.to_string()))),
            None => Ok(TableMetadata::default()),
        }
    }

    fn write_table_metadata(&self, meta: &TableMetadata) -> Result<(), SyncError> {
        let bytes = serde_json::to_vec(meta).map_err(|e| StoreError::Serde(e.to_string()))?;
        let cost = bytes.len() as u64;
        self.store.put(&self.meta_space, "meta", bytes, cost).map_err(SyncError::Store)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde::Deserialize;
    use tablesync_core::wire::{
        CountResponse, FetchIncrementalResponse, FetchPageResponse,
    };
    use tablesync_core::{ConflictStrategy, FieldDef, ReplicatedRow, RowMetadata, TableSchema};

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Todo {
        id: String,
        title: String,
    }

    impl Identifiable for Todo {
        fn id(&self) -> &str {
            &self.id
        }
    }

    struct FakeApi {
        pages: Mutex<Vec<FetchPageResponse<Todo>>>,
    }

    #[async_trait]
    impl TableServerApi<Todo> for FakeApi {
        async fn fetch_page(&self, _req: FetchPageRequest) -> Result<FetchPageResponse<Todo>, SyncError> {
            Ok(self.pages.lock().pop().unwrap_or(FetchPageResponse { rows: vec![], next_cursor: None }))
        }

        async fn fetch_incremental(
            &self,
            _req: FetchIncrementalRequest,
        ) -> Result<FetchIncrementalResponse<Todo>, SyncError> {
            Ok(FetchIncrementalResponse { changed: vec![], deleted_ids: vec![], server_watermark: now_ms(), truncated: false })
        }

        async fn count(&self, _req: CountRequest) -> Result<CountResponse, SyncError> {
            Ok(CountResponse { count: 0 })
        }

        async fn write_row(
            &self,
            _req: WriteRowRequest<Todo>,
        ) -> Result<WriteRowResponse<Todo>, SyncError> {
            unreachable!("not exercised in this test")
        }
    }

    fn schema() -> TableSchema {
        TableSchema { name: "todos".into(), version: 1, fields: vec![FieldDef { name: "title".into(), required: true, indexed: false }] }
    }

    #[tokio::test]
    async fn full_sync_applies_all_pages_and_stamps_metadata() {
        let store = Arc::new(MemoryStore::new(u64::MAX));
        let mutations = Arc::new(MutationQueue::new(store.clone(), "todos"));
        let config = ReplicationConfig::default();
        let table = Arc::new(ReplicatedTable::new(
            "todos", schema(), store.clone(), mutations.clone(), ConflictStrategy::Lww, &config, None, None, None,
        ));

        let row = ReplicatedRow { metadata: RowMetadata::new("todos", "1", now_ms()), data: Todo { id: "1".into(), title: "a".into() } };
        let api = Arc::new(FakeApi { pages: Mutex::new(vec![FetchPageResponse { rows: vec![row], next_cursor: None }]) });

        let (_tx, rx) = watch::channel(false);
        let engine = SyncEngine::new(table.clone(), store, mutations, api, "todos", &config, rx);

        let meta = engine.full_sync().await.unwrap();
        assert!(meta.last_full_sync_at > 0);
        assert!(table.get("1").is_some());
    }

    #[tokio::test]
    async fn cancelled_token_short_circuits_full_sync() {
        let store = Arc::new(MemoryStore::new(u64::MAX));
        let mutations = Arc::new(MutationQueue::new(store.clone(), "todos"));
        let config = ReplicationConfig::default();
        let table = Arc::new(ReplicatedTable::new(
            "todos", schema(), store.clone(), mutations.clone(), ConflictStrategy::Lww, &config, None, None, None,
        ));
        let api = Arc::new(FakeApi { pages: Mutex::new(vec![]) });

        let (_tx, rx) = watch::channel(true);
        let engine = SyncEngine::new(table, store, mutations, api, "todos", &config, rx);

        let err = engine.full_sync().await.unwrap_err();
        assert!(matches!(err, SyncError::Cancelled));
    }

    #[tokio::test]
    async fn full_sync_deletes_clean_rows_absent_from_response_but_preserves_dirty_ones() {
        let store = Arc::new(MemoryStore::new(u64::MAX));
        let mutations = Arc::new(MutationQueue::new(store.clone(), "todos"));
        let config = ReplicationConfig::default();
        let table = Arc::new(ReplicatedTable::new(
            "todos", schema(), store.clone(), mutations.clone(), ConflictStrategy::Lww, &config, None, None, None,
        ));

        // "1" will be re-affirmed by the server response.
        // "2" is clean and absent from the response: must be deleted.
        // "3" is dirty (an unconfirmed local edit) and absent from the
        // response: must be preserved, not deleted.
        table.apply_remote(
            "1",
            ReplicatedRow { metadata: RowMetadata::new("todos", "1", now_ms()), data: Todo { id: "1".into(), title: "a".into() } },
            ServerTimestamp::new(now_ms()),
        ).unwrap();
        table.apply_remote(
            "2",
            ReplicatedRow { metadata: RowMetadata::new("todos", "2", now_ms()), data: Todo { id: "2".into(), title: "b".into() } },
            ServerTimestamp::new(now_ms()),
        ).unwrap();
        table.set("3", Todo { id: "3".into(), title: "c".into() }, None).unwrap();

        let server_row = ReplicatedRow { metadata: RowMetadata::new("todos", "1", now_ms()), data: Todo { id: "1".into(), title: "a".into() } };
        let api = Arc::new(FakeApi { pages: Mutex::new(vec![FetchPageResponse { rows: vec![server_row], next_cursor: None }]) });

        let (_tx, rx) = watch::channel(false);
        let engine = SyncEngine::new(table.clone(), store, mutations, api, "todos", &config, rx);

        engine.full_sync().await.unwrap();

        assert!(table.get("1").is_some());
        assert!(table.get("2").is_none());
        assert!(table.get("3").is_some());
    }
}
