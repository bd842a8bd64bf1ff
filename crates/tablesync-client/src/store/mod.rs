//! Durable storage layer: the [`DurableStore`] contract and its two
//! implementations.

pub mod engine;
pub mod memory;
#[cfg(feature = "redb")]
pub mod redb_store;

pub use engine::{BatchOp, DurableStore, FetchResult, QuotaUsage, StoreCursor, StoredEntry};
pub use memory::MemoryStore;
#[cfg(feature = "redb")]
pub use redb_store::RedbStore;
