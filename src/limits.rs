//! Process-wide ceiling on simultaneous outbound calls.
//!
//! Every network call the pipeline makes (graph database, text generation,
//! embedding) goes through one `OutboundLimiter`, which holds a permit for
//! the duration of the call and applies the call's timeout.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;

use crate::{Error, Result};

/// Bounded-concurrency gate shared by all components of one pipeline.
#[derive(Debug, Clone)]
pub struct OutboundLimiter {
    permits: Arc<Semaphore>,
    capacity: usize,
}

impl OutboundLimiter {
    pub fn new(max_inflight: usize) -> Self {
        let capacity = max_inflight.max(1);
        Self { permits: Arc::new(Semaphore::new(capacity)), capacity }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Calls currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.capacity - self.permits.available_permits()
    }

    /// Run `fut` under a permit. The timeout covers waiting for the permit
    /// as well as the call; on expiry `on_timeout` supplies the error.
    pub async fn call<T, F>(&self, timeout: Duration, on_timeout: impl FnOnce() -> Error, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let guarded = async {
            let _permit = self
                .permits
                .acquire()
                .await
                .map_err(|_| Error::Config("outbound limiter closed".into()))?;
            fut.await
        };
        match tokio::time::timeout(timeout, guarded).await {
            Ok(result) => result,
            Err(_) => Err(on_timeout()),
        }
    }
}

impl Default for OutboundLimiter {
    fn default() -> Self {
        Self::new(8)
    }
}
