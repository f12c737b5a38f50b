//! Query execution.
//!
//! Result types shared by every driver, and the `QueryExecutor` that runs
//! validated candidates in read-only mode.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::limits::OutboundLimiter;
use crate::model::*;
use crate::storage::GraphDriver;
use crate::tx::TxMode;
use crate::{Error, Result};

/// Query execution result.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<ResultRow>,
    pub stats: ExecutionStats,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Values of one row in column order.
    pub fn ordered(&self, row: &ResultRow) -> Vec<Value> {
        self.columns.iter().map(|c| row.values.get(c).cloned().unwrap_or(Value::Null)).collect()
    }

    /// The only cell of a one-row, one-column result.
    pub fn single_value(&self) -> Option<&Value> {
        match (&self.columns[..], &self.rows[..]) {
            ([col], [row]) => row.values.get(col),
            _ => None,
        }
    }
}

/// A single row in the result set.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultRow {
    pub values: BTreeMap<String, Value>,
}

impl ResultRow {
    /// Get a typed value from the row.
    pub fn get<T: FromValue>(&self, key: &str) -> Result<T> {
        let val = self.values.get(key)
            .ok_or_else(|| Error::NotFound(format!("Column '{key}'")))?;
        T::from_value(val)
    }
}

/// Execution statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionStats {
    pub rows_returned: u64,
    pub execution_time_ms: u64,
}

/// Convert from Value to concrete types.
pub trait FromValue: Sized {
    fn from_value(val: &Value) -> Result<Self>;
}

impl FromValue for Node {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::Node(n) => Ok(*n.clone()),
            _ => Err(Error::TypeError {
                expected: "Node".into(),
                got: val.type_name().into(),
            }),
        }
    }
}

impl FromValue for String {
    fn from_value(val: &Value) -> Result<Self> {
        match val {
            Value::String(s) => Ok(s.clone()),
            _ => Err(Error::TypeError {
                expected: "String".into(),
                got: val.type_name().into(),
            }),
        }
    }
}

impl FromValue for i64 {
    fn from_value(val: &Value) -> Result<Self> {
        val.as_int().ok_or_else(|| Error::TypeError {
            expected: "Integer".into(),
            got: val.type_name().into(),
        })
    }
}

impl FromValue for Value {
    fn from_value(val: &Value) -> Result<Self> {
        Ok(val.clone())
    }
}

// ============================================================================
// QueryExecutor
// ============================================================================

/// Runs `Valid` candidates against the graph in read-only mode.
pub struct QueryExecutor<D: GraphDriver> {
    driver: Arc<D>,
    limiter: OutboundLimiter,
    timeout: Duration,
}

impl<D: GraphDriver> QueryExecutor<D> {
    pub fn new(driver: Arc<D>, limiter: OutboundLimiter, timeout: Duration) -> Self {
        Self { driver, limiter, timeout }
    }

    /// Execute a validated candidate.
    ///
    /// Unvalidated and rejected candidates never reach the driver. Driver
    /// failures surface as `ExecutionError` carrying the driver text for
    /// logs only; `Error::public_message` does not repeat it.
    pub async fn execute(&self, candidate: &CandidateQuery) -> Result<QueryResult> {
        match candidate.status() {
            ValidationStatus::Valid => {}
            ValidationStatus::Rejected(reason) => return Err(Error::ValidationRejected(reason.clone())),
            ValidationStatus::Unvalidated => {
                return Err(Error::ExecutionError("candidate has not been validated".into()));
            }
        }

        let started = Instant::now();
        let timeout_ms = self.timeout.as_millis() as u64;
        let outcome = self
            .limiter
            .call(self.timeout, || Error::ExecutionTimeout(timeout_ms), async {
                self.driver.run(candidate.text(), PropertyMap::new(), TxMode::ReadOnly).await
            })
            .await;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        match outcome {
            Ok(mut result) => {
                result.stats.rows_returned = result.rows.len() as u64;
                result.stats.execution_time_ms = elapsed_ms;
                debug!(stage = "execute", rows = result.rows.len(), elapsed_ms, "query executed");
                Ok(result)
            }
            Err(err @ Error::ExecutionTimeout(_)) => {
                warn!(stage = "execute", elapsed_ms, code = err.code(), "query timed out");
                Err(err)
            }
            Err(err) => {
                warn!(stage = "execute", elapsed_ms, code = err.code(), error = %err, "query failed");
                Err(Error::ExecutionError(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::QueryValidator;

    fn graph() -> Arc<crate::storage::MemoryGraph> {
        let g = crate::storage::MemoryGraph::new();
        g.add_node(["Brand"], props([("name", "MSI")]));
        Arc::new(g)
    }

    fn executor(g: Arc<crate::storage::MemoryGraph>) -> QueryExecutor<crate::storage::MemoryGraph> {
        QueryExecutor::new(g, OutboundLimiter::new(2), Duration::from_secs(2))
    }

    #[tokio::test]
    async fn test_unvalidated_candidate_never_runs() {
        let g = graph();
        let exec = executor(g.clone());
        let candidate = CandidateQuery::new("MATCH (b:Brand) RETURN b.name");
        assert!(exec.execute(&candidate).await.is_err());
        assert_eq!(g.run_count(), 0);
    }

    #[tokio::test]
    async fn test_rejected_candidate_never_runs() {
        let g = graph();
        let exec = executor(g.clone());
        let candidate = QueryValidator::default().validate(CandidateQuery::new("MATCH (b) DETACH DELETE b"));
        assert!(matches!(exec.execute(&candidate).await, Err(Error::ValidationRejected(_))));
        assert_eq!(g.run_count(), 0);
    }

    #[tokio::test]
    async fn test_valid_candidate_returns_rows() {
        let g = graph();
        let exec = executor(g.clone());
        let candidate = QueryValidator::default().validate(CandidateQuery::new("MATCH (b:Brand) RETURN b.name"));
        let result = exec.execute(&candidate).await.unwrap();
        assert_eq!(result.columns, vec!["b.name"]);
        assert_eq!(result.single_value(), Some(&Value::from("MSI")));
        assert_eq!(result.stats.rows_returned, 1);
    }

    #[tokio::test]
    async fn test_driver_error_is_wrapped_without_public_detail() {
        let g = graph();
        let exec = executor(g.clone());
        let candidate = QueryValidator::default().validate(CandidateQuery::new("MATCH (b:Brand) RETURN missing.name"));
        let err = exec.execute(&candidate).await.unwrap_err();
        assert!(matches!(err, Error::ExecutionError(_)));
        assert!(!err.public_message().contains("missing"));
    }

    #[tokio::test]
    async fn test_slow_query_times_out() {
        let g = graph();
        g.set_latency(Duration::from_millis(500));
        let exec = QueryExecutor::new(g, OutboundLimiter::new(1), Duration::from_millis(20));
        let candidate = QueryValidator::default().validate(CandidateQuery::new("MATCH (b:Brand) RETURN b"));
        assert!(matches!(exec.execute(&candidate).await, Err(Error::ExecutionTimeout(20))));
    }
}
