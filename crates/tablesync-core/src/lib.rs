//! tablesync-core -- wire-agnostic foundation for the offline-first table
//! replication engine: Hybrid Logical Clock, the dynamic `Value` type, table
//! schema/predicate shapes, row/mutation metadata, and the traits a
//! replicated row type implements.
//!
//! - **HLC** ([`hlc`]): Hybrid Logical Clock for distributed causality tracking
//! - **Value** ([`value`]): dynamic field value used by predicates and wire shapes
//! - **Schema** ([`schema`]): `TableSchema`, `Predicate`
//! - **Model** ([`model`]): `RowMetadata`, `ReplicatedRow`, `PendingMutation`
//! - **Traits** ([`traits`]): `Identifiable`, `ChangeNotifier`
//! - **Wire** ([`wire`]): request/response shapes for the server sync endpoints

pub mod hlc;
pub mod model;
pub mod schema;
pub mod traits;
pub mod value;
pub mod wire;

pub use hlc::{ClockSource, SystemClock, Timestamp, LWWRecord, HLC};
pub use model::{
    ConflictStrategy, MutationOp, MutationStatus, PendingMutation, ReplicatedRow, RowMetadata,
    SyncStatus, TableMetadata,
};
pub use schema::{FieldDef, Predicate, PredicateOp, TableSchema, ValidationResult};
pub use traits::{ChangeNotifier, Identifiable};
pub use value::Value;
