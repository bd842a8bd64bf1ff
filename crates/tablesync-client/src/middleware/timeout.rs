//! Generic timeout middleware for tower services operating over [`SyncError`].
//!
//! Grounded on the teacher's `TimeoutLayer`/`TimeoutService`, generalized from
//! the fixed `Operation`/`OperationResponse` pair to any request/response type
//! so it covers both query execution (soft/hard timeouts) and page fetches
//! during sync.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::{Layer, Service};

use crate::error::SyncError;

#[derive(Debug, Clone)]
pub struct TimeoutLayer {
    duration: Duration,
}

impl TimeoutLayer {
    #[must_use]
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }
}

impl<S> Layer<S> for TimeoutLayer {
    type Service = TimeoutService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        TimeoutService { inner, duration: self.duration }
    }
}

#[derive(Debug, Clone)]
pub struct TimeoutService<S> {
    inner: S,
    duration: Duration,
}

impl<S, Req> Service<Req> for TimeoutService<S>
where
    S: Service<Req, Error = SyncError> + Send,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = SyncError;
    type Future = Pin<Box<dyn Future<Output = Result<S::Response, SyncError>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let timeout_ms = self.duration.as_millis() as u64;
        let fut = self.inner.call(req);
        let duration = self.duration;
        Box::pin(async move {
            match tokio::time::timeout(duration, fut).await {
                Ok(result) => result,
                Err(_elapsed) => Err(SyncError::Timeout { timeout_ms }),
            }
        })
    }
}
