//! Client-level configuration for the replication engine.
//!
//! Follows the teacher's `ServerConfig` shape: a plain struct with a
//! `Default` impl, built via struct-update syntax rather than a builder.

/// Strategy used for conflict resolution when not overridden per-table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictStrategyKind {
    Lww,
    ServerAuthoritative,
    ClientAuthoritative,
}

/// Tunables for the replication engine.
#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    /// Unique identifier for this client instance, used by the HLC.
    pub node_id: String,
    /// How often `ReplicationManager` runs a periodic sync pass, in milliseconds.
    pub periodic_sync_interval_ms: u64,
    /// Forces a full sync (instead of incremental) after this many milliseconds.
    pub force_full_sync_interval_ms: u64,
    /// Row-count threshold above which an incremental sync escalates to full sync.
    pub incremental_safety_threshold: u64,
    /// Page size used for full-sync pagination.
    pub full_sync_page_size: usize,
    /// Chunk size used for batched mutation uploads.
    pub mutation_upload_chunk_size: usize,
    /// Storage usage (bytes) above which eviction is triggered.
    pub quota_soft_limit_bytes: u64,
    /// Target storage usage (bytes) eviction drains down to.
    pub quota_eviction_target_bytes: u64,
    /// Soft timeout for in-memory queries, in milliseconds.
    pub query_soft_timeout_ms: u64,
    /// Hard timeout for in-memory queries, in milliseconds.
    pub query_hard_timeout_ms: u64,
    /// Minimum backoff between mutation upload retries, in milliseconds.
    pub retry_backoff_base_ms: u64,
    /// Maximum backoff between mutation upload retries, in milliseconds.
    pub retry_backoff_max_ms: u64,
    /// Edit-protection window: rows modified within this window are never evicted.
    pub edit_protection_window_ms: u64,
    /// Default conflict strategy for tables that don't override it.
    pub default_conflict_strategy: ConflictStrategyKind,
    /// Rolling window size for the sync monitor's per-table history.
    pub monitor_window_size: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            node_id: String::new(),
            periodic_sync_interval_ms: 5 * 60 * 1000,
            force_full_sync_interval_ms: 24 * 60 * 60 * 1000,
            incremental_safety_threshold: 5_000,
            full_sync_page_size: 500,
            mutation_upload_chunk_size: 50,
            quota_soft_limit_bytes: 4_500_000,
            quota_eviction_target_bytes: 4_000_000,
            query_soft_timeout_ms: 200,
            query_hard_timeout_ms: 2_000,
            retry_backoff_base_ms: 500,
            retry_backoff_max_ms: 30_000,
            edit_protection_window_ms: 5 * 60 * 1000,
            default_conflict_strategy: ConflictStrategyKind::Lww,
            monitor_window_size: 200,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_sane_bounds() {
        let cfg = ReplicationConfig::default();
        assert!(cfg.quota_eviction_target_bytes < cfg.quota_soft_limit_bytes);
        assert!(cfg.query_soft_timeout_ms < cfg.query_hard_timeout_ms);
        assert!(cfg.retry_backoff_base_ms < cfg.retry_backoff_max_ms);
    }

    #[test]
    fn struct_update_overrides_selected_fields() {
        let cfg = ReplicationConfig {
            node_id: "client-1".into(),
            periodic_sync_interval_ms: 60_000,
            ..ReplicationConfig::default()
        };
        assert_eq!(cfg.node_id, "client-1");
        assert_eq!(cfg.periodic_sync_interval_ms, 60_000);
        assert_eq!(cfg.full_sync_page_size, 500);
    }
}
