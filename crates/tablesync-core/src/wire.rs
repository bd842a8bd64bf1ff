//! Request/response shapes for the four server endpoints a `TableServerApi`
//! implementation talks to, plus the push message shape.
//!
//! Grounded on the teacher's `messages::http_sync` request/response pairs.
//! The actual bytes on the wire are explicitly out of scope for this engine;
//! these types exist so a host has a concrete default shape to adopt.

use serde::{Deserialize, Serialize};

use crate::model::ReplicatedRow;
use crate::schema::Predicate;
use crate::traits::Identifiable;

/// Requests one page of a full sync.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchPageRequest {
    pub table_name: String,
    pub cursor: Option<String>,
    pub page_size: usize,
    pub filter: Option<Predicate>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(
    serialize = "R: Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
pub struct FetchPageResponse<R> {
    pub rows: Vec<ReplicatedRow<R>>,
    pub next_cursor: Option<String>,
}

/// Requests rows changed since a given server-side watermark.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchIncrementalRequest {
    pub table_name: String,
    pub since: u64,
    pub limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(
    serialize = "R: Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
pub struct FetchIncrementalResponse<R> {
    pub changed: Vec<ReplicatedRow<R>>,
    pub deleted_ids: Vec<String>,
    pub server_watermark: u64,
    /// `true` when the server could not express the delta within `limit`
    /// rows and the caller should escalate to a full sync.
    pub truncated: bool,
}

/// Requests a row count, used as the incremental-sync safety-threshold guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountRequest {
    pub table_name: String,
    pub since: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CountResponse {
    pub count: u64,
}

/// Uploads one locally-queued mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(
    serialize = "R: Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
pub struct WriteRowRequest<R> {
    pub table_name: String,
    pub row_id: String,
    pub data: Option<R>,
    pub expected_version: Option<u64>,
    pub client_timestamp: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(
    serialize = "R: Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
pub enum WriteRowResponse<R> {
    Accepted { row: ReplicatedRow<R> },
    VersionConflict { server_row: ReplicatedRow<R> },
    Rejected { reason: String },
}

/// A server-pushed row change, delivered over whatever transport the host's
/// `TableServerApi::push_stream` implementation supplies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum PushMessage<R> {
    RowChanged { table_name: String, row: Box<ReplicatedRowWire<R>> },
    RowDeleted { table_name: String, row_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", bound(
    serialize = "R: Serialize",
    deserialize = "R: serde::de::DeserializeOwned"
))]
pub struct ReplicatedRowWire<R> {
    pub row_id: String,
    pub data: R,
    pub server_timestamp: u64,
    pub version: u64,
}

impl<R: Identifiable> ReplicatedRowWire<R> {
    #[must_use]
    pub fn row_id_matches(&self) -> bool {
        self.data.id() == self.row_id
    }
}
