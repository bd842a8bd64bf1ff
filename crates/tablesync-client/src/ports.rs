//! Traits a host application implements to wire this engine to its own
//! network stack, connectivity signal, and cross-tab transport.
//!
//! These are the seams spec.md calls "the server's responsibility" -- the
//! wire encoding behind `TableServerApi` is explicitly out of scope; only the
//! request/response *shapes* in `tablesync_core::wire` are specified.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use tablesync_core::wire::{
    CountRequest, CountResponse, FetchIncrementalRequest, FetchIncrementalResponse,
    FetchPageRequest, FetchPageResponse, PushMessage, WriteRowRequest, WriteRowResponse,
};
use tablesync_core::Identifiable;

use crate::error::SyncError;

/// The host's connection to the remote table server. `R` is the application
/// row type for a single table; a host typically implements this once per
/// table or generically over its own row enum.
#[async_trait]
pub trait TableServerApi<R>: Send + Sync
where
    R: Identifiable + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    async fn fetch_page(&self, req: FetchPageRequest) -> Result<FetchPageResponse<R>, SyncError>;

    async fn fetch_incremental(
        &self,
        req: FetchIncrementalRequest,
    ) -> Result<FetchIncrementalResponse<R>, SyncError>;

    async fn count(&self, req: CountRequest) -> Result<CountResponse, SyncError>;

    async fn write_row(&self, req: WriteRowRequest<R>) -> Result<WriteRowResponse<R>, SyncError>;

    /// Optional push channel; hosts with no server-push transport return `None`.
    async fn push_stream(&self) -> Option<Box<dyn PushSubscription<R>>> {
        None
    }
}

/// A live subscription to server-pushed row changes, returned by
/// `TableServerApi::push_stream`.
#[async_trait]
pub trait PushSubscription<R>: Send
where
    R: Identifiable + Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Waits for the next pushed message; returns `None` once the channel closes.
    async fn recv(&mut self) -> Option<PushMessage<R>>;
}

/// The host runtime's connectivity signal.
#[async_trait]
pub trait NetworkMonitor: Send + Sync {
    fn is_online(&self) -> bool;

    /// Waits until the online/offline state changes, returning the new state.
    async fn changed(&self) -> bool;
}

/// Cross-tab/cross-process broadcast of row changes, so multiple consumers
/// of the same durable store observe each other's writes. The in-process
/// `tokio::sync::broadcast` implementation the manager owns by default
/// satisfies this trait; a host with real separate processes can supply its
/// own (named pipe, shared file, loopback socket).
#[async_trait]
pub trait BroadcastChannel: Send + Sync {
    fn publish(&self, table_name: &str, row_id: &str);

    async fn recv(&self) -> Option<(String, String)>;
}
