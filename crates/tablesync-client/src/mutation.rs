//! The local mutation queue: durable, dependency-ordered uploads of
//! offline writes.
//!
//! Grounded on the server's `MutationLog`/worker retry pattern; the
//! dependency drain uses Kahn's algorithm over `PendingMutation::depends_on`
//! plus implicit edges between mutations sharing a `(table_name, row_id)`,
//! ordered by `sequence_number`, so same-row mutations never upload
//! out of causal order.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::Mutex;
use rand::Rng as _;

use tablesync_core::hlc::{SystemClock, HLC};
use tablesync_core::{MutationOp, MutationStatus, PendingMutation, Value};

use crate::error::{StoreError, SyncError};
use crate::store::{BatchOp, DurableStore};

const QUEUE_WARN_THRESHOLD: u64 = 500;
const QUEUE_ERROR_THRESHOLD: u64 = 1000;

/// Severity of a mutation-queue depth alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueHealth {
    Ok,
    Warning,
    Error,
}

/// Durable FIFO-ish queue of locally-made writes awaiting upload, persisted
/// to its own durable-store space so it survives a process restart.
///
/// `space` names the primary queue; `backup_space` is a second durable-store
/// space mirroring every state transition, used to reconstruct the queue if
/// the primary is found to be missing entries on startup.
pub struct MutationQueue<S: DurableStore> {
    store: Arc<S>,
    space: String,
    backup_space: String,
    sequence: AtomicU64,
    /// Stamps every enqueued mutation with a causal timestamp, so
    /// `PendingMutation::timestamp` reflects this node's HLC rather than a
    /// bare wall clock read.
    hlc: Mutex<HLC>,
}

impl<S: DurableStore> MutationQueue<S> {
    #[must_use]
    pub fn new(store: Arc<S>, table_name: impl Into<String>) -> Self {
        let table_name = table_name.into();
        let node_id = format!("{table_name}-local");
        Self {
            store,
            space: format!("{table_name}__mutations"),
            backup_space: format!("{table_name}__mutations_backup"),
            sequence: AtomicU64::new(0),
            hlc: Mutex::new(HLC::new(node_id, Box::new(SystemClock))),
        }
    }

    /// Enqueues a new mutation, assigning it the next sequence number and an
    /// HLC-stamped timestamp.
    pub fn enqueue(
        &self,
        table_name: &str,
        row_id: &str,
        operation: MutationOp,
        data: Option<Value>,
        depends_on: impl IntoIterator<Item = String>,
    ) -> Result<PendingMutation, StoreError> {
        let sequence_number = self.sequence.fetch_add(1, AtomicOrdering::SeqCst);
        let id = format!("{table_name}:{row_id}:{sequence_number}");
        let timestamp = self.hlc.lock().now().millis;
        let mut mutation = PendingMutation::new(
            id,
            table_name,
            row_id,
            operation,
            data,
            timestamp,
            sequence_number,
        );
        mutation.depends_on = depends_on.into_iter().collect();
        self.persist(&mutation)?;
        Ok(mutation)
    }

    #[must_use]
    pub fn len(&self) -> u64 {
        self.store.len(&self.space).unwrap_or(0) as u64
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn health(&self) -> QueueHealth {
        let depth = self.len();
        if depth >= QUEUE_ERROR_THRESHOLD {
            QueueHealth::Error
        } else if depth >= QUEUE_WARN_THRESHOLD {
            QueueHealth::Warning
        } else {
            QueueHealth::Ok
        }
    }

    /// Returns every pending/failed mutation still in the queue, in upload
    /// order: a topological sort over `depends_on`, ties broken by
    /// `sequence_number`. Mutations whose dependencies form a cycle are
    /// excluded from the returned order and marked `Failed` with
    /// `SyncError::Cycle`.
    pub fn drain_order(&self) -> Result<Vec<PendingMutation>, SyncError> {
        let all = self.all_mutations()?;
        let by_id: HashMap<String, PendingMutation> =
            all.iter().cloned().map(|m| (m.id.clone(), m)).collect();

        let mut in_degree: HashMap<String, usize> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();

        for m in &all {
            in_degree.entry(m.id.clone()).or_insert(0);
            for dep in &m.depends_on {
                if by_id.contains_key(dep) {
                    *in_degree.entry(m.id.clone()).or_insert(0) += 1;
                    dependents.entry(dep.clone()).or_default().push(m.id.clone());
                }
            }
        }

        // Implicit same-row edges: mutations against the same (table_name,
        // row_id) must drain in sequence_number order regardless of explicit
        // depends_on, so a later write can never jump ahead of an earlier one
        // against the same row.
        let mut by_row: HashMap<(String, String), Vec<&PendingMutation>> = HashMap::new();
        for m in &all {
            by_row.entry((m.table_name.clone(), m.row_id.clone())).or_default().push(m);
        }
        for chain in by_row.values_mut() {
            chain.sort_by_key(|m| m.sequence_number);
            for pair in chain.windows(2) {
                let (earlier, later) = (pair[0], pair[1]);
                if earlier.id == later.id {
                    continue;
                }
                *in_degree.entry(later.id.clone()).or_insert(0) += 1;
                dependents.entry(earlier.id.clone()).or_default().push(later.id.clone());
            }
        }

        let mut ready: VecDeque<String> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(id, _)| id.clone())
            .collect();
        sort_by_sequence(&mut ready, &by_id);

        let mut ordered = Vec::with_capacity(all.len());
        let mut visited: HashSet<String> = HashSet::new();

        while let Some(id) = ready.pop_front() {
            if !visited.insert(id.clone()) {
                continue;
            }
            if let Some(m) = by_id.get(&id) {
                ordered.push(m.clone());
            }
            if let Some(children) = dependents.get(&id) {
                let mut newly_ready = Vec::new();
                for child in children {
                    if let Some(deg) = in_degree.get_mut(child) {
                        *deg = deg.saturating_sub(1);
                        if *deg == 0 {
                            newly_ready.push(child.clone());
                        }
                    }
                }
                for child in newly_ready {
                    ready.push_back(child);
                }
                sort_by_sequence(&mut ready, &by_id);
            }
        }

        if ordered.len() < all.len() {
            let cyclic: Vec<String> = all
                .iter()
                .map(|m| m.id.clone())
                .filter(|id| !visited.contains(id))
                .collect();
            for id in &cyclic {
                if let Some(mut m) = by_id.get(id).cloned() {
                    m.status = MutationStatus::Failed;
                    m.last_error = Some("dependency cycle".to_string());
                    self.persist(&m).map_err(SyncError::Store)?;
                }
            }
            tracing::error!(cyclic = ?cyclic, "mutation dependency cycle detected, excluding from drain order");
        }

        Ok(ordered)
    }

    pub fn mark_syncing(&self, id: &str) -> Result<(), StoreError> {
        self.update_status(id, MutationStatus::Syncing, None)
    }

    pub fn mark_success(&self, id: &str) -> Result<(), StoreError> {
        self.remove(id)
    }

    /// Marks a mutation failed and bumps its retry count, returning the next
    /// backoff delay (jittered exponential, clamped to `max_backoff_ms`).
    pub fn mark_failed(
        &self,
        id: &str,
        reason: &str,
        base_backoff_ms: u64,
        max_backoff_ms: u64,
    ) -> Result<u64, StoreError> {
        let mut mutation = self
            .get(id)?
            .ok_or_else(|| StoreError::NotFound { table: self.space.clone(), id: id.to_string() })?;
        mutation.retries = mutation.retries.saturating_add(1);
        mutation.status = MutationStatus::Failed;
        mutation.last_error = Some(reason.to_string());
        self.persist(&mutation)?;

        let exp = base_backoff_ms.saturating_mul(1u64 << mutation.retries.min(16));
        let capped = exp.min(max_backoff_ms);
        let jitter = rand::rng().random_range(0..=capped / 4 + 1);
        Ok(capped.saturating_sub(capped / 8).saturating_add(jitter))
    }

    fn update_status(
        &self,
        id: &str,
        status: MutationStatus,
        last_error: Option<String>,
    ) -> Result<(), StoreError> {
        let Some(mut mutation) = self.get(id)? else { return Ok(()) };
        mutation.status = status;
        mutation.last_error = last_error;
        self.persist(&mutation)
    }

    fn get(&self, id: &str) -> Result<Option<PendingMutation>, StoreError> {
        match self.store.get(&self.space, id)? {
            Some(entry) => Ok(Some(
                serde_json::from_slice(&entry.bytes).map_err(|e| StoreError::Serde(e.to_string()))?,
            )),
            None => Ok(None),
        }
    }

    fn all_mutations(&self) -> Result<Vec<PendingMutation>, SyncError> {
        Ok(self
            .store
            .snapshot(&self.space)
            .map_err(SyncError::Store)?
            .into_iter()
            .filter_map(|e| serde_json::from_slice(&e.bytes).ok())
            .collect())
    }

    fn persist(&self, mutation: &PendingMutation) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(mutation).map_err(|e| StoreError::Serde(e.to_string()))?;
        let cost = bytes.len() as u64;
        self.store.put(&self.space, &mutation.id, bytes.clone(), cost)?;
        self.store.put(&self.backup_space, &mutation.id, bytes, cost)?;
        Ok(())
    }

    fn remove(&self, id: &str) -> Result<(), StoreError> {
        self.store.batch_write(
            &self.space,
            vec![BatchOp::Delete { key: id.to_string() }],
        )?;
        self.store.delete(&self.backup_space, id)?;
        Ok(())
    }

    /// Restores any mutation present in the backup space but missing from
    /// the primary queue, used on startup after an unclean shutdown.
    pub fn restore_from_backup(&self) -> Result<usize, StoreError> {
        let backup = self.store.snapshot(&self.backup_space)?;
        let mut restored = 0;
        for entry in backup {
            if self.store.get(&self.space, &entry.key)?.is_none() {
                self.store.put(&self.space, &entry.key, entry.bytes, entry.cost)?;
                restored += 1;
            }
        }
        Ok(restored)
    }
}

fn sort_by_sequence(queue: &mut VecDeque<String>, by_id: &HashMap<String, PendingMutation>) {
    let mut as_vec: Vec<String> = queue.drain(..).collect();
    as_vec.sort_by_key(|id| {
        by_id.get(id).map(|m| (m.table_name.clone(), m.row_id.clone(), m.sequence_number))
    });
    queue.extend(as_vec);
}
