//! Wall-clock helper shared by the table, mutation queue, sync engine, and
//! monitor. Centralized so tests can see exactly where "now" enters the
//! system.

use std::time::{SystemTime, UNIX_EPOCH};

#[must_use]
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
