use std::sync::Arc;
use tokio::sync::{AcquireError, OwnedSemaphorePermit, Semaphore};

/// Tracing call guard semaphore.
///
/// Restricts the number of concurrent tracing requests, since each can pin a
/// regenerated state and a worker pool.
#[derive(Clone, Debug)]
pub struct TracingCallGuard(Arc<Semaphore>);

impl TracingCallGuard {
    /// Creates a guard allowing `max_tracing_requests` calls in parallel.
    pub fn new(max_tracing_requests: usize) -> Self {
        Self(Arc::new(Semaphore::new(max_tracing_requests)))
    }

    /// See also [`Semaphore::acquire_owned`]
    pub async fn acquire_owned(self) -> Result<OwnedSemaphorePermit, AcquireError> {
        self.0.acquire_owned().await
    }
}
