//! Neo4j over the HTTP transactional API.
//!
//! Each `run` is one auto-commit request to `{uri}/db/{database}/tx/commit`.
//! Read-only statements carry `access-mode: READ`, so a cluster routes them
//! to a reader and the server refuses writes even if one slipped through.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use crate::config::GraphConfig;
use crate::execution::{QueryResult, ResultRow};
use crate::model::*;
use crate::tx::TxMode;
use crate::{Error, Result};
use super::GraphDriver;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Serialize)]
struct CommitRequest<'a> {
    statements: [Statement<'a>; 1],
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct Statement<'a> {
    statement: &'a str,
    parameters: serde_json::Map<String, serde_json::Value>,
    result_data_contents: [&'static str; 1],
}

#[derive(Debug, Deserialize)]
struct CommitResponse {
    #[serde(default)]
    results: Vec<StatementResult>,
    #[serde(default)]
    errors: Vec<ServerError>,
}

#[derive(Debug, Deserialize)]
struct StatementResult {
    columns: Vec<String>,
    #[serde(default)]
    data: Vec<DataRow>,
}

#[derive(Debug, Deserialize)]
struct DataRow {
    row: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct ServerError {
    code: String,
    message: String,
}

// ============================================================================
// HttpGraphDriver
// ============================================================================

/// Driver for an external Neo4j server. The `reqwest::Client` pools
/// connections; clone the driver (or share it in an `Arc`) rather than
/// building several.
#[derive(Clone)]
pub struct HttpGraphDriver {
    client: Client,
    endpoint: String,
    user: String,
    password: Option<String>,
}

impl HttpGraphDriver {
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.query_timeout)
            .connect_timeout(config.query_timeout.min(Duration::from_secs(10)))
            .build()
            .map_err(|e| Error::Config(format!("graph http client: {e}")))?;
        let endpoint = format!("{}/db/{}/tx/commit", config.uri.trim_end_matches('/'), config.database);
        Ok(Self { client, endpoint, user: config.user.clone(), password: config.password.clone() })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl GraphDriver for HttpGraphDriver {
    async fn run(&self, query: &str, params: PropertyMap, mode: TxMode) -> Result<QueryResult> {
        let body = CommitRequest {
            statements: [Statement {
                statement: query,
                parameters: params.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
                result_data_contents: ["row"],
            }],
        };
        trace!(endpoint = %self.endpoint, ?mode, "neo4j request");

        let mut request = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.user, self.password.as_ref())
            .json(&body);
        if mode.is_read_only() {
            request = request.header("access-mode", "READ");
        }

        let response = request.send().await.map_err(transport_error)?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(Error::Config(format!("neo4j rejected credentials ({status})")));
        }
        if status.is_server_error() {
            return Err(Error::Unavailable(format!("neo4j returned {status}")));
        }
        let payload: CommitResponse = response.json().await.map_err(transport_error)?;
        decode(payload)
    }

    async fn ping(&self) -> Result<()> {
        let result = self.run("RETURN 1 AS ok", PropertyMap::new(), TxMode::ReadOnly).await?;
        debug!(endpoint = %self.endpoint, "neo4j reachable");
        match result.single_value() {
            Some(Value::Int(1)) => Ok(()),
            _ => Err(Error::Unavailable("unexpected ping response".into())),
        }
    }
}

fn transport_error(err: reqwest::Error) -> Error {
    if err.is_timeout() {
        Error::Unavailable(format!("neo4j request timed out: {err}"))
    } else if err.is_decode() {
        Error::ExecutionError(format!("neo4j response could not be decoded: {err}"))
    } else {
        Error::Unavailable(format!("neo4j unreachable: {err}"))
    }
}

fn decode(payload: CommitResponse) -> Result<QueryResult> {
    if let Some(err) = payload.errors.into_iter().next() {
        return Err(if err.code.starts_with("Neo.TransientError") {
            Error::Unavailable(format!("{}: {}", err.code, err.message))
        } else {
            Error::ExecutionError(format!("{}: {}", err.code, err.message))
        });
    }
    let Some(result) = payload.results.into_iter().next() else {
        return Ok(QueryResult::default());
    };
    let rows = result
        .data
        .into_iter()
        .map(|data| ResultRow {
            values: result.columns.iter().cloned().zip(data.row.into_iter().map(Value::from_json)).collect(),
        })
        .collect();
    Ok(QueryResult { columns: result.columns, rows, stats: Default::default() })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn parse(v: serde_json::Value) -> Result<QueryResult> {
        decode(serde_json::from_value(v).unwrap())
    }

    #[test]
    fn test_decodes_rows_by_column() {
        let result = parse(json!({
            "results": [{
                "columns": ["name", "count"],
                "data": [{"row": ["MSI", 3], "meta": [null, null]}, {"row": ["ASUS", 1]}]
            }],
            "errors": []
        }))
        .unwrap();
        assert_eq!(result.columns, vec!["name", "count"]);
        assert_eq!(result.rows.len(), 2);
        assert_eq!(result.rows[0].values.get("count"), Some(&Value::Int(3)));
        assert_eq!(result.ordered(&result.rows[1]), vec![Value::from("ASUS"), Value::Int(1)]);
    }

    #[test]
    fn test_transient_server_error_is_retryable() {
        let err = parse(json!({
            "results": [],
            "errors": [{"code": "Neo.TransientError.General.DatabaseUnavailable", "message": "down"}]
        }))
        .unwrap_err();
        assert!(err.is_transient());
    }

    #[test]
    fn test_client_error_is_not_retryable() {
        let err = parse(json!({
            "results": [],
            "errors": [{"code": "Neo.ClientError.Statement.SyntaxError", "message": "Invalid input"}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::ExecutionError(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn test_request_body_shape() {
        let body = CommitRequest {
            statements: [Statement {
                statement: "RETURN $x AS x",
                parameters: props([("x", 1)]).iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
                result_data_contents: ["row"],
            }],
        };
        let v = serde_json::to_value(&body).unwrap();
        assert_eq!(v["statements"][0]["resultDataContents"], json!(["row"]));
        assert_eq!(v["statements"][0]["parameters"]["x"], json!(1));
    }

    #[test]
    fn test_endpoint_from_config() {
        let config = GraphConfig { uri: "http://db:7474/".into(), database: "shop".into(), ..GraphConfig::default() };
        let driver = HttpGraphDriver::new(&config).unwrap();
        assert_eq!(driver.endpoint(), "http://db:7474/db/shop/tx/commit");
    }
}
