//! Conflict resolution between a local dirty row and an incoming server row
//! for the same id.
//!
//! The three-tier last-write-wins comparator generalizes the teacher's
//! `HLC::compare` (millis, then counter, then node_id) to: millis, then
//! sub-millisecond microseconds when both sides carry one, then a lexical id
//! tiebreak. This is deliberately not a CRDT merge -- concurrent edits
//! collapse to a single winning value per the table's `ConflictStrategy`,
//! never a field-by-field join beyond the strategy's declared
//! client-authoritative fields.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use tablesync_core::{ConflictStrategy, Value};

/// A comparable server-observed timestamp: wall-clock millis plus an
/// optional sub-millisecond microsecond component.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerTimestamp {
    pub millis: u64,
    pub micros: Option<u32>,
}

impl ServerTimestamp {
    #[must_use]
    pub fn new(millis: u64) -> Self {
        Self { millis, micros: None }
    }

    #[must_use]
    pub fn with_micros(millis: u64, micros: u32) -> Self {
        Self { millis, micros: Some(micros) }
    }
}

/// One side of a conflict comparison: a timestamp plus the row id used as
/// the final tiebreak.
#[derive(Debug, Clone, Copy)]
pub struct TimestampedSide<'a> {
    pub timestamp: ServerTimestamp,
    pub id: &'a str,
}

/// Compares two timestamped sides using the three-tier LWW rule: millis
/// first, then microseconds only when *both* sides carry one, then lexical
/// id. A side missing microseconds never loses to the missing-component
/// check alone -- it falls straight through to the id tiebreak, matching the
/// resolution in the open question about dirty rows with no `updated_at`.
#[must_use]
pub fn compare_lww(local: TimestampedSide<'_>, remote: TimestampedSide<'_>) -> Ordering {
    local
        .timestamp
        .millis
        .cmp(&remote.timestamp.millis)
        .then_with(|| match (local.timestamp.micros, remote.timestamp.micros) {
            (Some(a), Some(b)) => a.cmp(&b),
            _ => Ordering::Equal,
        })
        .then_with(|| local.id.cmp(remote.id))
}

/// Outcome of resolving a conflict between a local and a remote row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Winner {
    Local,
    Remote,
    /// Only reachable under `FieldLevelMerge`: neither side fully wins, the
    /// merged field map should be used instead.
    Merged,
}

/// Resolves field-level conflicts. Pure function: the caller is responsible
/// for applying the outcome and emitting any conflict-resolved events.
pub struct ConflictResolver;

impl ConflictResolver {
    /// Decides the winner between `local` and `remote` field maps for the
    /// same row id, given the table's declared strategy.
    ///
    /// For `FieldLevelMerge`, also returns the merged field map; callers
    /// should use it instead of either side's map when `Winner::Merged` is
    /// returned.
    #[must_use]
    pub fn resolve(
        strategy: &ConflictStrategy,
        local: TimestampedSide<'_>,
        remote: TimestampedSide<'_>,
        local_fields: &BTreeMap<String, Value>,
        remote_fields: &BTreeMap<String, Value>,
    ) -> (Winner, Option<BTreeMap<String, Value>>) {
        match strategy {
            ConflictStrategy::Lww => {
                let winner = match compare_lww(local, remote) {
                    Ordering::Less => Winner::Remote,
                    Ordering::Equal | Ordering::Greater => Winner::Local,
                };
                (winner, None)
            }
            ConflictStrategy::ServerAuthoritative => (Winner::Remote, None),
            ConflictStrategy::ClientAuthoritative => (Winner::Local, None),
            ConflictStrategy::FieldLevelMerge { client_authoritative_fields } => {
                let mut merged = remote_fields.clone();
                for field in client_authoritative_fields {
                    if let Some(v) = local_fields.get(field) {
                        merged.insert(field.clone(), v.clone());
                    }
                }
                (Winner::Merged, Some(merged))
            }
        }
    }
}
