//! Bounded retry around any `GraphDriver`.
//!
//! Only transient failures (connection refused, timeouts) are retried;
//! syntax and type errors come back on the first attempt.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::time::sleep;
use tracing::warn;

use crate::execution::QueryResult;
use crate::model::*;
use crate::tx::TxMode;
use crate::Result;
use super::{GraphDriver, RelationshipSample};

/// Attempt count and backoff schedule.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Delay before the second attempt; doubles after each failure.
    #[serde(rename = "backoff_ms", with = "crate::config::duration_ms")]
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { attempts: 3, backoff: Duration::from_millis(200) }
    }
}

impl RetryPolicy {
    /// Delay after failed attempt number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.backoff.saturating_mul(1u32 << attempt.saturating_sub(1).min(16))
    }
}

/// Wraps a driver and retries transient failures.
pub struct RetryingDriver<D> {
    inner: D,
    policy: RetryPolicy,
}

impl<D: GraphDriver> RetryingDriver<D> {
    pub fn new(inner: D, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }

    pub fn inner(&self) -> &D {
        &self.inner
    }

    async fn retry<'a, T, F, Fut>(&'a self, op: &'static str, mut call: F) -> Result<T>
    where
        F: FnMut(&'a D) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let attempts = self.policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match call(&self.inner).await {
                Err(err) if err.is_transient() && attempt < attempts => {
                    let delay = self.policy.delay(attempt);
                    warn!(stage = "graph", op, attempt, delay_ms = delay.as_millis() as u64, code = err.code(), "transient failure, retrying");
                    sleep(delay).await;
                    attempt += 1;
                }
                outcome => return outcome,
            }
        }
    }
}

#[async_trait]
impl<D: GraphDriver> GraphDriver for RetryingDriver<D> {
    async fn run(&self, query: &str, params: PropertyMap, mode: TxMode) -> Result<QueryResult> {
        self.retry("run", |d| d.run(query, params.clone(), mode)).await
    }

    async fn ping(&self) -> Result<()> {
        self.retry("ping", |d| d.ping()).await
    }

    async fn labels(&self) -> Result<Vec<String>> {
        self.retry("labels", |d| d.labels()).await
    }

    async fn relationship_types(&self) -> Result<Vec<String>> {
        self.retry("relationship_types", |d| d.relationship_types()).await
    }

    async fn count_nodes(&self, label: &str) -> Result<u64> {
        self.retry("count_nodes", |d| d.count_nodes(label)).await
    }

    async fn count_relationships(&self, rel_type: &str) -> Result<u64> {
        self.retry("count_relationships", |d| d.count_relationships(rel_type)).await
    }

    async fn sample_node_properties(&self, label: &str, limit: usize) -> Result<Vec<Node>> {
        self.retry("sample_node_properties", |d| d.sample_node_properties(label, limit)).await
    }

    async fn sample_relationship_properties(&self, rel_type: &str, limit: usize) -> Result<Vec<RelationshipSample>> {
        self.retry("sample_relationship_properties", |d| d.sample_relationship_properties(rel_type, limit))
            .await
    }

    async fn find_nodes_matching(&self, terms: &[String], limit: usize) -> Result<Vec<Node>> {
        self.retry("find_nodes_matching", |d| d.find_nodes_matching(terms, limit)).await
    }

    async fn node(&self, id: NodeId) -> Result<Option<Node>> {
        self.retry("node", |d| d.node(id)).await
    }

    async fn neighbours(&self, id: NodeId) -> Result<Vec<(Relationship, Node)>> {
        self.retry("neighbours", |d| d.neighbours(id)).await
    }

    async fn searchable_nodes(&self, limit: usize) -> Result<Vec<Node>> {
        self.retry("searchable_nodes", |d| d.searchable_nodes(limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use crate::Error;

    /// Fails the first `failures` pings with `error`.
    struct Flaky {
        calls: AtomicU32,
        failures: u32,
        error: fn() -> Error,
    }

    #[async_trait]
    impl GraphDriver for Flaky {
        async fn run(&self, _query: &str, _params: PropertyMap, _mode: TxMode) -> Result<QueryResult> {
            Ok(QueryResult::default())
        }

        async fn ping(&self) -> Result<()> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.failures { Err((self.error)()) } else { Ok(()) }
        }
    }

    fn policy(attempts: u32) -> RetryPolicy {
        RetryPolicy { attempts, backoff: Duration::from_millis(1) }
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let d = RetryingDriver::new(
            Flaky { calls: AtomicU32::new(0), failures: 2, error: || Error::Unavailable("refused".into()) },
            policy(3),
        );
        d.ping().await.unwrap();
        assert_eq!(d.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_attempts() {
        let d = RetryingDriver::new(
            Flaky { calls: AtomicU32::new(0), failures: 10, error: || Error::Unavailable("refused".into()) },
            policy(3),
        );
        assert!(matches!(d.ping().await, Err(Error::Unavailable(_))));
        assert_eq!(d.inner().calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_failures_are_not_retried() {
        let d = RetryingDriver::new(
            Flaky { calls: AtomicU32::new(0), failures: 10, error: || Error::ExecutionError("bad".into()) },
            policy(3),
        );
        assert!(d.ping().await.is_err());
        assert_eq!(d.inner().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_doubles() {
        let p = RetryPolicy { attempts: 3, backoff: Duration::from_millis(100) };
        assert_eq!(p.delay(1), Duration::from_millis(100));
        assert_eq!(p.delay(2), Duration::from_millis(200));
        assert_eq!(p.delay(3), Duration::from_millis(400));
    }
}
