//! The generic replicated-table abstraction: local reads/writes against a
//! [`DurableStore`] space, optimistic concurrency, eviction scoring, and
//! change notification.
//!
//! Grounded on the server's `RecordStore` (version bookkeeping, quota-aware
//! writes), generalized over an application row type `R` the way
//! `ReplicatedRow<R>` already does in `tablesync-core`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{watch, Notify};

use tablesync_core::{
    ChangeNotifier, ConflictStrategy, Identifiable, MutationOp, Predicate, PredicateOp,
    ReplicatedRow, RowMetadata, TableSchema, ValidationResult, Value,
};

use crate::config::ReplicationConfig;
use crate::conflict::{compare_lww, ConflictResolver, ServerTimestamp, TimestampedSide, Winner};
use crate::error::StoreError;
use crate::json::{index_key, row_fields};
use crate::mutation::MutationQueue;
use crate::ports::NetworkMonitor;
use crate::store::DurableStore;
use crate::time::now_ms;

const OPTIMISTIC_RETRY_LIMIT: u32 = 3;
const SUBSCRIBE_DEBOUNCE_MS: u64 = 100;

/// A single table's worth of locally-replicated rows, generic over the
/// application row type `R` and the durable store implementation `S`.
pub struct ReplicatedTable<R, S: DurableStore> {
    table_name: String,
    schema: TableSchema,
    store: Arc<S>,
    mutations: Arc<MutationQueue<S>>,
    conflict_strategy: ConflictStrategy,
    edit_protection_window_ms: u64,
    /// TTL after which a clean, synced row is considered expired while
    /// offline data is unreachable; `None` disables expiry entirely.
    ttl_ms: Option<u64>,
    network_monitor: Option<Arc<dyn NetworkMonitor>>,
    query_soft_timeout_ms: u64,
    query_hard_timeout_ms: u64,
    notifier: Option<Arc<dyn ChangeNotifier<R>>>,
    change_version: Arc<AtomicU64>,
    change_tx: watch::Sender<u64>,
    debounce_notify: Arc<Notify>,
}

impl<R, S> ReplicatedTable<R, S>
where
    R: Identifiable + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
    S: DurableStore,
{
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table_name: impl Into<String>,
        schema: TableSchema,
        store: Arc<S>,
        mutations: Arc<MutationQueue<S>>,
        conflict_strategy: ConflictStrategy,
        config: &ReplicationConfig,
        ttl_ms: Option<u64>,
        network_monitor: Option<Arc<dyn NetworkMonitor>>,
        notifier: Option<Arc<dyn ChangeNotifier<R>>>,
    ) -> Self {
        let (change_tx, _rx) = watch::channel(0u64);
        let change_version = Arc::new(AtomicU64::new(0));
        let debounce_notify = Arc::new(Notify::new());

        let task_notify = debounce_notify.clone();
        let task_version = change_version.clone();
        let task_tx = change_tx.clone();
        tokio::spawn(async move {
            loop {
                task_notify.notified().await;
                tokio::time::sleep(Duration::from_millis(SUBSCRIBE_DEBOUNCE_MS)).await;
                let v = task_version.fetch_add(1, AtomicOrdering::SeqCst) + 1;
                let _ = task_tx.send(v);
            }
        });

        Self {
            table_name: table_name.into(),
            schema,
            store,
            mutations,
            conflict_strategy,
            edit_protection_window_ms: config.edit_protection_window_ms,
            ttl_ms,
            network_monitor,
            query_soft_timeout_ms: config.query_soft_timeout_ms,
            query_hard_timeout_ms: config.query_hard_timeout_ms,
            notifier,
            change_version,
            change_tx,
            debounce_notify,
        }
    }

    #[must_use]
    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    #[must_use]
    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    /// Reads a row, updating its access-time/count metadata for eviction
    /// scoring. Never returns `Err`: store failures log and surface as `None`.
    /// A row that has expired under the table's TTL is evicted on read rather
    /// than returned.
    pub fn get(&self, id: &str) -> Option<ReplicatedRow<R>> {
        let mut row = self.read_row_raw(id)?;
        let now = now_ms();
        if self.is_expired(&row.metadata, now) {
            if let Err(err) = self.delete_raw(id, &row.data) {
                tracing::warn!(table = %self.table_name, row_id = id, error = %err, "eviction of expired row failed");
            }
            return None;
        }
        row.metadata.on_access(now);
        if let Err(err) = self.write_row(id, &row) {
            tracing::warn!(table = %self.table_name, row_id = id, error = %err, "access-time update failed");
        }
        Some(row)
    }

    /// Reads a row without expiry eviction or access-time bookkeeping, used
    /// internally where expiry has already been decided by the caller.
    fn read_row_raw(&self, id: &str) -> Option<ReplicatedRow<R>> {
        let entry = match self.store.get(&self.table_name, id) {
            Ok(Some(e)) => e,
            Ok(None) => return None,
            Err(err) => {
                tracing::error!(table = %self.table_name, row_id = id, error = %err, "store read failed");
                return None;
            }
        };
        match serde_json::from_slice(&entry.bytes) {
            Ok(row) => Some(row),
            Err(err) => {
                tracing::error!(table = %self.table_name, row_id = id, error = %err, "row deserialize failed");
                None
            }
        }
    }

    /// Writes a row with optimistic concurrency: if `expected_version` is
    /// given and doesn't match the stored row's current version, returns
    /// `StoreError::VersionConflict` without writing.
    pub fn set(
        &self,
        id: &str,
        data: R,
        expected_version: Option<u64>,
    ) -> Result<ReplicatedRow<R>, StoreError> {
        self.validate_row(&data)?;
        let now = now_ms();
        let current = self.read_metadata(id)?;

        if let (Some(expected), Some(current)) = (expected_version, &current) {
            if current.version != expected {
                return Err(StoreError::VersionConflict {
                    table: self.table_name.clone(),
                    id: id.to_string(),
                    expected,
                    actual: current.version,
                });
            }
        }

        let op = if current.is_some() { MutationOp::Update } else { MutationOp::Insert };
        let mut metadata = current.unwrap_or_else(|| RowMetadata::new(&self.table_name, id, now));
        metadata.on_local_write(now);

        let row = ReplicatedRow { metadata, data };
        self.write_row(id, &row)?;
        self.reindex(id, &row.data, true)?;
        self.mutations.enqueue(&self.table_name, id, op, Some(row_fields_as_value(&row.data)), [])?;
        self.notify(id, None, Some(&row.data));
        self.ping_subscribers();
        Ok(row)
    }

    /// Bounded retry-loop read-modify-write: reads the current row, applies
    /// `f`, and retries on version conflict up to a small bound.
    pub fn optimistic_update(
        &self,
        id: &str,
        f: impl Fn(&R) -> R,
    ) -> Result<ReplicatedRow<R>, StoreError> {
        let mut attempts = 0;
        loop {
            let current = self
                .get(id)
                .ok_or_else(|| StoreError::NotFound { table: self.table_name.clone(), id: id.to_string() })?;
            let next = f(&current.data);
            match self.set(id, next, Some(current.metadata.version)) {
                Ok(row) => return Ok(row),
                Err(StoreError::VersionConflict { .. }) if attempts < OPTIMISTIC_RETRY_LIMIT => {
                    attempts += 1;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Removes a row locally and atomically enqueues its delete mutation for
    /// upload.
    pub fn delete(&self, id: &str) -> Result<Option<ReplicatedRow<R>>, StoreError> {
        let existing = self.read_row_raw(id);
        if let Some(row) = &existing {
            self.delete_raw(id, &row.data)?;
            self.mutations.enqueue(&self.table_name, id, MutationOp::Delete, None, [])?;
            self.notify(id, Some(&row.data), None);
            self.ping_subscribers();
        }
        Ok(existing)
    }

    /// Removes a row's storage and index entries without enqueuing a delete
    /// mutation, used for local-only eviction (TTL expiry, quota eviction).
    fn delete_raw(&self, id: &str, data: &R) -> Result<(), StoreError> {
        self.reindex(id, data, false)?;
        self.store.delete(&self.table_name, id)?;
        Ok(())
    }

    /// Removes a row for a reason other than a local user edit: the server
    /// reported it gone (full-sync reconciliation, an incremental delete, a
    /// pushed delete), or local quota pressure evicted it from the cache.
    /// Unlike [`Self::delete`], this never enqueues an upload mutation.
    pub fn apply_remote_delete(&self, id: &str) -> Result<Option<ReplicatedRow<R>>, StoreError> {
        let existing = self.read_row_raw(id);
        if let Some(row) = &existing {
            self.delete_raw(id, &row.data)?;
            self.notify(id, Some(&row.data), None);
            self.ping_subscribers();
        }
        Ok(existing)
    }

    #[must_use]
    pub fn get_all(&self) -> Vec<ReplicatedRow<R>> {
        self.store
            .snapshot(&self.table_name)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|entry| serde_json::from_slice(&entry.bytes).ok())
            .collect()
    }

    /// Equality lookup on `field`, using the table's secondary index when the
    /// field is declared `indexed: true`; otherwise falls back to a full scan.
    pub fn query_by_field(
        &self,
        field: &str,
        value: &Value,
    ) -> Result<Vec<ReplicatedRow<R>>, StoreError> {
        let predicate = Predicate::Field {
            field: field.to_string(),
            op: PredicateOp::Eq,
            value: value.clone(),
        };
        self.query(&predicate)
    }

    /// Evaluates an arbitrary predicate tree against this table's rows,
    /// taking the secondary-index fast path for a single top-level `Field`
    /// equality predicate on an indexed field.
    ///
    /// The scan is timed against `query_soft_timeout_ms`/`query_hard_timeout_ms`:
    /// crossing the soft limit only logs a warning, crossing the hard limit
    /// fails the query with `StoreError::QueryTimeout`. Because the scan
    /// itself runs to completion synchronously, the hard-limit check is
    /// necessarily applied after the fact rather than aborting mid-scan.
    pub fn query(&self, predicate: &Predicate) -> Result<Vec<ReplicatedRow<R>>, StoreError> {
        let started = Instant::now();

        let results = if let Predicate::Field { field, op: PredicateOp::Eq, value } = predicate {
            if self.schema.indexed_fields().contains(&field.as_str()) {
                let ids = self
                    .store
                    .scan_index(&self.table_name, field, &index_key(value))
                    .unwrap_or_default();
                ids.iter().filter_map(|id| self.get(id)).collect()
            } else {
                self.full_scan(predicate)
            }
        } else {
            self.full_scan(predicate)
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if elapsed_ms > self.query_hard_timeout_ms {
            return Err(StoreError::QueryTimeout {
                table: self.table_name.clone(),
                elapsed_ms,
                timeout_ms: self.query_hard_timeout_ms,
            });
        }
        if elapsed_ms > self.query_soft_timeout_ms {
            tracing::warn!(
                table = %self.table_name,
                elapsed_ms,
                soft_timeout_ms = self.query_soft_timeout_ms,
                "query exceeded soft timeout"
            );
        }

        Ok(results)
    }

    fn full_scan(&self, predicate: &Predicate) -> Vec<ReplicatedRow<R>> {
        self.get_all()
            .into_iter()
            .filter(|row| predicate.matches(&row_fields(&row.data)))
            .collect()
    }

    /// Writes every `(id, data)` pair in one durable-store transaction.
    pub fn batch_set(&self, rows: Vec<(String, R)>) -> Result<Vec<ReplicatedRow<R>>, StoreError> {
        for (_, data) in &rows {
            self.validate_row(data)?;
        }
        let now = now_ms();
        let mut written = Vec::with_capacity(rows.len());
        for (id, data) in rows {
            let current = self.read_metadata(&id)?;
            let op = if current.is_some() { MutationOp::Update } else { MutationOp::Insert };
            let mut metadata = current.unwrap_or_else(|| RowMetadata::new(&self.table_name, &id, now));
            metadata.on_local_write(now);
            let row = ReplicatedRow { metadata, data };
            self.write_row(&id, &row)?;
            self.reindex(&id, &row.data, true)?;
            self.mutations.enqueue(&self.table_name, &id, op, Some(row_fields_as_value(&row.data)), [])?;
            self.notify(&id, None, Some(&row.data));
            written.push(row);
        }
        self.ping_subscribers();
        Ok(written)
    }

    /// `batch_set` in chunks of `chunk_size`, matching the mutation upload
    /// chunk size used by the sync engine so a large local import applies
    /// with the same backpressure profile as a server sync.
    pub fn batch_set_chunked(
        &self,
        rows: Vec<(String, R)>,
        chunk_size: usize,
    ) -> Result<Vec<ReplicatedRow<R>>, StoreError> {
        let chunk_size = chunk_size.max(1);
        let mut out = Vec::with_capacity(rows.len());
        for chunk in rows.chunks(chunk_size) {
            out.extend(self.batch_set(chunk.to_vec())?);
        }
        Ok(out)
    }

    /// A debounced change signal: fires at most once per ~100ms regardless of
    /// how many individual writes occurred in that window.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.change_tx.subscribe()
    }

    /// Resolves a conflict between the locally-held row and an incoming
    /// server row for the same id, applying the table's conflict strategy.
    /// Returns the row that should be kept locally after resolution.
    pub fn resolve_conflict(
        &self,
        id: &str,
        local: &ReplicatedRow<R>,
        remote: &ReplicatedRow<R>,
        remote_timestamp: ServerTimestamp,
    ) -> ReplicatedRow<R> {
        let local_timestamp = if local.metadata.is_dirty {
            ServerTimestamp::new(local.metadata.last_modified_at)
        } else {
            ServerTimestamp::new(local.metadata.last_synced_at)
        };

        let local_side = TimestampedSide { timestamp: local_timestamp, id };
        let remote_side = TimestampedSide { timestamp: remote_timestamp, id };

        let local_fields = row_fields(&local.data);
        let remote_fields = row_fields(&remote.data);

        let (winner, merged_fields) = ConflictResolver::resolve(
            &self.conflict_strategy,
            local_side,
            remote_side,
            &local_fields,
            &remote_fields,
        );

        match winner {
            Winner::Local => local.clone(),
            Winner::Remote => remote.clone(),
            Winner::Merged => {
                let merged = merged_fields.unwrap_or_default();
                let json = serde_json::to_value(
                    merged.into_iter().map(|(k, v)| (k, crate::json::to_json(&v))).collect::<BTreeMap<_, _>>(),
                )
                .unwrap_or(serde_json::Value::Null);
                match serde_json::from_value::<R>(json) {
                    Ok(data) => ReplicatedRow { metadata: remote.metadata.clone(), data },
                    Err(err) => {
                        tracing::error!(table = %self.table_name, row_id = id, error = %err, "field-merge deserialize failed, keeping remote");
                        remote.clone()
                    }
                }
            }
        }
    }

    /// Applies a server-provided row during sync. If the local row is dirty
    /// (an unconfirmed local edit exists), runs it through conflict
    /// resolution first; otherwise stores the remote row directly and marks
    /// it synced. Returns the row now held locally.
    pub fn apply_remote(
        &self,
        id: &str,
        mut remote: ReplicatedRow<R>,
        remote_timestamp: ServerTimestamp,
    ) -> Result<ReplicatedRow<R>, StoreError> {
        let local = self.get(id);
        let resolved = match &local {
            Some(local_row) if local_row.metadata.is_dirty => {
                self.resolve_conflict(id, local_row, &remote, remote_timestamp)
            }
            _ => {
                remote.metadata.on_synced(now_ms());
                remote
            }
        };
        self.write_row(id, &resolved)?;
        self.reindex(id, &resolved.data, true)?;
        self.notify(id, local.as_ref().map(|r| &r.data), Some(&resolved.data));
        self.ping_subscribers();
        Ok(resolved)
    }

    /// A row is expired when it carries no unconfirmed local edit, the
    /// device is online (so a fresh copy is actually reachable), and it's
    /// been longer than the table's TTL since it was last confirmed synced.
    /// A dirty row, or any row while offline, is never expired: evicting it
    /// would destroy data the device cannot yet re-fetch.
    #[must_use]
    pub fn is_expired(&self, metadata: &RowMetadata, now: u64) -> bool {
        let Some(ttl) = self.ttl_ms else { return false };
        if metadata.is_dirty {
            return false;
        }
        let online = self.network_monitor.as_ref().map_or(true, |m| m.is_online());
        if !online {
            return false;
        }
        now.saturating_sub(metadata.last_synced_at) > ttl
    }

    /// Scores every non-protected row for eviction desirability: 0.7 weight
    /// on inverse access frequency, 0.3 weight on staleness, both min-max
    /// normalized over the candidate set. Rows modified within the edit
    /// protection window are never candidates. Returns ids sorted most- to
    /// least-evictable.
    #[must_use]
    pub fn eviction_candidates(&self, now: u64) -> Vec<String> {
        let eligible: Vec<RowMetadata> = self
            .get_all()
            .into_iter()
            .map(|row| row.metadata)
            .filter(|m| {
                !m.is_dirty && now.saturating_sub(m.last_modified_at) >= self.edit_protection_window_ms
            })
            .collect();

        if eligible.is_empty() {
            return Vec::new();
        }

        let (min_freq, max_freq) = min_max(eligible.iter().map(|m| m.access_count as f64));
        let (min_age, max_age) = min_max(
            eligible
                .iter()
                .map(|m| now.saturating_sub(m.last_accessed_at) as f64),
        );

        let mut scored: Vec<(String, f64)> = eligible
            .iter()
            .map(|m| {
                let freq_norm = normalize(m.access_count as f64, min_freq, max_freq);
                let age_norm = normalize(now.saturating_sub(m.last_accessed_at) as f64, min_age, max_age);
                let score = 0.7 * (1.0 - freq_norm) + 0.3 * age_norm;
                (m.id.clone(), score)
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.into_iter().map(|(id, _)| id).collect()
    }

    fn validate_row(&self, data: &R) -> Result<(), StoreError> {
        match self.schema.validate(&row_fields(data)) {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { errors } => Err(StoreError::SchemaMismatch {
                table: self.table_name.clone(),
                reason: errors.join("; "),
            }),
        }
    }

    fn read_metadata(&self, id: &str) -> Result<Option<RowMetadata>, StoreError> {
        match self.store.get(&self.table_name, id)? {
            Some(entry) => {
                let row: ReplicatedRow<R> = serde_json::from_slice(&entry.bytes)
                    .map_err(|err| StoreError::Serde(err.to_string()))?;
                Ok(Some(row.metadata))
            }
            None => Ok(None),
        }
    }

    fn write_row(&self, id: &str, row: &ReplicatedRow<R>) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(row).map_err(|err| StoreError::Serde(err.to_string()))?;
        let cost = bytes.len() as u64;
        self.store.put(&self.table_name, id, bytes, cost)?;
        Ok(())
    }

    fn reindex(&self, id: &str, data: &R, present: bool) -> Result<(), StoreError> {
        let fields = row_fields(data);
        for field in self.schema.indexed_fields() {
            if let Some(value) = fields.get(field) {
                self.store.update_index(&self.table_name, field, &index_key(value), id, present)?;
            }
        }
        Ok(())
    }

    fn notify(&self, id: &str, old: Option<&R>, new: Option<&R>) {
        if let Some(notifier) = &self.notifier {
            notifier.notify_change(&self.table_name, id, old, new);
        }
    }

    fn ping_subscribers(&self) {
        self.debounce_notify.notify_one();
    }
}

fn row_fields_as_value<R: Serialize>(data: &R) -> Value {
    Value::Map(row_fields(data))
}

fn min_max(values: impl Iterator<Item = f64>) -> (f64, f64) {
    values.fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
        (lo.min(v), hi.max(v))
    })
}

fn normalize(value: f64, min: f64, max: f64) -> f64 {
    if (max - min).abs() < f64::EPSILON {
        0.0
    } else {
        (value - min) / (max - min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde::Deserialize;
    use tablesync_core::FieldDef;

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct Todo {
        id: String,
        title: String,
        owner: String,
    }

    impl Identifiable for Todo {
        fn id(&self) -> &str {
            &self.id
        }
    }

    fn schema() -> TableSchema {
        TableSchema {
            name: "todos".into(),
            version: 1,
            fields: vec![
                FieldDef { name: "title".into(), required: true, indexed: false },
                FieldDef { name: "owner".into(), required: true, indexed: true },
            ],
        }
    }

    fn table() -> ReplicatedTable<Todo, MemoryStore> {
        let store = Arc::new(MemoryStore::new(u64::MAX));
        let mutations = Arc::new(MutationQueue::new(store.clone(), "todos"));
        ReplicatedTable::new(
            "todos",
            schema(),
            store,
            mutations,
            ConflictStrategy::Lww,
            &ReplicationConfig::default(),
            None,
            None,
            None,
        )
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let t = table();
        let todo = Todo { id: "1".into(), title: "write".into(), owner: "alice".into() };
        t.set("1", todo.clone(), None).expect("set");
        let fetched = t.get("1").expect("get");
        assert_eq!(fetched.data, todo);
        assert_eq!(fetched.metadata.version, 1);
    }

    #[tokio::test]
    async fn version_conflict_rejects_stale_expected_version() {
        let t = table();
        let todo = Todo { id: "1".into(), title: "write".into(), owner: "alice".into() };
        t.set("1", todo.clone(), None).unwrap();
        t.set("1", todo.clone(), Some(1)).unwrap(); // bumps to version 2
        let err = t.set("1", todo, Some(1)).unwrap_err();
        assert!(matches!(err, StoreError::VersionConflict { .. }));
    }

    #[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
    struct OptionalTitleTodo {
        id: String,
        title: Option<String>,
        owner: String,
    }

    impl Identifiable for OptionalTitleTodo {
        fn id(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn set_rejects_row_missing_a_required_field() {
        let store = Arc::new(MemoryStore::new(u64::MAX));
        let mutations = Arc::new(MutationQueue::new(store.clone(), "todos"));
        let t: ReplicatedTable<OptionalTitleTodo, MemoryStore> = ReplicatedTable::new(
            "todos",
            schema(),
            store,
            mutations,
            ConflictStrategy::Lww,
            &ReplicationConfig::default(),
            None,
            None,
            None,
        );
        let err = t
            .set("1", OptionalTitleTodo { id: "1".into(), title: None, owner: "alice".into() }, None)
            .unwrap_err();
        assert!(matches!(err, StoreError::SchemaMismatch { .. }));
        assert!(t.get("1").is_none());
    }

    #[tokio::test]
    async fn query_by_indexed_field_uses_secondary_index() {
        let t = table();
        t.set("1", Todo { id: "1".into(), title: "a".into(), owner: "alice".into() }, None).unwrap();
        t.set("2", Todo { id: "2".into(), title: "b".into(), owner: "bob".into() }, None).unwrap();
        let results = t.query_by_field("owner", &Value::String("alice".into())).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].data.id, "1");
    }

    #[tokio::test]
    async fn delete_removes_row_and_index_entry() {
        let t = table();
        t.set("1", Todo { id: "1".into(), title: "a".into(), owner: "alice".into() }, None).unwrap();
        t.delete("1").unwrap();
        assert!(t.get("1").is_none());
        assert!(t.query_by_field("owner", &Value::String("alice".into())).unwrap().is_empty());
    }

    #[tokio::test]
    async fn optimistic_update_applies_function() {
        let t = table();
        t.set("1", Todo { id: "1".into(), title: "a".into(), owner: "alice".into() }, None).unwrap();
        let updated = t
            .optimistic_update("1", |todo| Todo { title: "b".into(), ..todo.clone() })
            .unwrap();
        assert_eq!(updated.data.title, "b");
    }

    #[tokio::test]
    async fn dirty_rows_within_protection_window_are_not_eviction_candidates() {
        let t = table();
        t.set("1", Todo { id: "1".into(), title: "a".into(), owner: "alice".into() }, None).unwrap();
        // the row written above is dirty and within the edit-protection window,
        // so it must not appear as an eviction candidate yet.
        assert!(!t.eviction_candidates(now_ms()).contains(&"1".to_string()));
    }

    #[tokio::test]
    async fn dirty_rows_are_never_eviction_candidates_even_outside_the_window() {
        let t = table();
        t.set("1", Todo { id: "1".into(), title: "a".into(), owner: "alice".into() }, None).unwrap();
        let mut row = t.get("1").unwrap();
        // push last_modified_at well outside the protection window while
        // leaving the row dirty: it must still never be a candidate.
        row.metadata.last_modified_at = now_ms().saturating_sub(1_000_000);
        t.write_row("1", &row).unwrap();
        assert!(row.metadata.is_dirty);
        assert!(!t.eviction_candidates(now_ms()).contains(&"1".to_string()));
    }

    #[tokio::test]
    async fn clean_rows_within_protection_window_are_not_eviction_candidates() {
        let t = table();
        t.set("1", Todo { id: "1".into(), title: "a".into(), owner: "alice".into() }, None).unwrap();
        let mut row = t.get("1").unwrap();
        row.metadata.on_synced(now_ms());
        t.write_row("1", &row).unwrap();
        // clean, but the modification itself is recent: still exempt.
        assert!(!t.eviction_candidates(now_ms()).contains(&"1".to_string()));
    }

    #[tokio::test]
    async fn clean_rows_outside_protection_window_are_eviction_candidates() {
        let t = table();
        t.set("1", Todo { id: "1".into(), title: "a".into(), owner: "alice".into() }, None).unwrap();
        let mut row = t.get("1").unwrap();
        row.metadata.on_synced(now_ms());
        row.metadata.last_modified_at = now_ms().saturating_sub(1_000_000);
        t.write_row("1", &row).unwrap();
        assert!(t.eviction_candidates(now_ms()).contains(&"1".to_string()));
    }
}
