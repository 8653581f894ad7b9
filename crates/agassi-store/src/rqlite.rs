//! rqlite HTTP API client.
//!
//! Statements are sent in rqlite's parameterized JSON form. Queries use
//! the associative response format so rows arrive as column → value maps.

use std::time::Duration;

use http::{Method, StatusCode};
use serde::Deserialize;
use tracing::debug;

use crate::client::{Consistency, ExecuteResult, QueryResult, Row, Statement, StoreClient};
use crate::error::{StoreError, StoreResult};
use crate::http_client::{self, HttpResponse};

/// Client for a single rqlite node's HTTP API.
#[derive(Debug, Clone)]
pub struct RqliteClient {
    addr: String,
    timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    #[serde(default)]
    results: Vec<ApiResult>,
    error: Option<String>,
    time: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct ApiResult {
    #[serde(default)]
    rows: Vec<Row>,
    #[serde(default)]
    rows_affected: u64,
    error: Option<String>,
    time: Option<f64>,
}

impl RqliteClient {
    /// Create a client for the node listening on `addr` (`host:port`).
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Set the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addr(&self) -> &str {
        &self.addr
    }

    /// Whether the node answers `/readyz` successfully.
    pub async fn is_ready(&self) -> bool {
        match self.send(Method::GET, "/readyz", None).await {
            Ok(resp) => resp.status.is_success(),
            Err(e) => {
                debug!(addr = %self.addr, error = %e, "readiness check failed");
                false
            }
        }
    }

    /// Whether the local node currently holds Raft leadership.
    pub async fn is_leader(&self) -> StoreResult<bool> {
        let resp = self.send(Method::GET, "/status", None).await?;
        let resp = check_status(resp)?;
        let status: serde_json::Value =
            serde_json::from_slice(&resp.body).map_err(|e| StoreError::Decode(e.to_string()))?;
        Ok(status
            .pointer("/store/raft/state")
            .and_then(|s| s.as_str())
            .is_some_and(|s| s.eq_ignore_ascii_case("leader")))
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Vec<u8>>,
    ) -> StoreResult<HttpResponse> {
        http_client::request(&self.addr, method, path, body, self.timeout)
            .await
            .map_err(|e| match e {
                e if e.is_unreachable() => StoreError::Unavailable(e.to_string()),
                e => StoreError::Http(e),
            })
    }

    async fn post_statements(&self, path: &str, statements: &[Statement]) -> StoreResult<ApiResponse> {
        let body =
            serde_json::to_vec(statements).map_err(|e| StoreError::Decode(e.to_string()))?;
        let resp = check_status(self.send(Method::POST, path, Some(body)).await?)?;
        let parsed: ApiResponse =
            serde_json::from_slice(&resp.body).map_err(|e| StoreError::Decode(e.to_string()))?;

        if let Some(error) = parsed.error {
            return Err(StoreError::Statement(error));
        }
        if let Some(error) = parsed.results.iter().find_map(|r| r.error.clone()) {
            return Err(StoreError::Statement(error));
        }
        Ok(parsed)
    }
}

fn check_status(resp: HttpResponse) -> StoreResult<HttpResponse> {
    if resp.status == StatusCode::SERVICE_UNAVAILABLE {
        return Err(StoreError::Unavailable(
            String::from_utf8_lossy(&resp.body).into_owned(),
        ));
    }
    if !resp.status.is_success() {
        return Err(StoreError::Status {
            status: resp.status.as_u16(),
            body: String::from_utf8_lossy(&resp.body).into_owned(),
        });
    }
    Ok(resp)
}

fn execute_result(resp: ApiResponse) -> ExecuteResult {
    ExecuteResult {
        rows_affected: resp.results.iter().map(|r| r.rows_affected).sum(),
        time: resp.time.or_else(|| resp.results.iter().filter_map(|r| r.time).reduce(|a, b| a + b)),
    }
}

impl StoreClient for RqliteClient {
    async fn query(&self, statement: Statement, consistency: Consistency) -> StoreResult<QueryResult> {
        let path = format!("/db/query?level={}&associative&timings", consistency.as_str());
        let mut resp = self.post_statements(&path, std::slice::from_ref(&statement)).await?;
        let result = resp.results.pop();
        Ok(QueryResult {
            time: result.as_ref().and_then(|r| r.time).or(resp.time),
            rows: result.map(|r| r.rows).unwrap_or_default(),
        })
    }

    async fn execute(&self, statement: Statement) -> StoreResult<ExecuteResult> {
        let resp = self
            .post_statements("/db/execute?timings", std::slice::from_ref(&statement))
            .await?;
        Ok(execute_result(resp))
    }

    async fn transact(&self, statements: Vec<Statement>) -> StoreResult<ExecuteResult> {
        let resp = self
            .post_statements("/db/execute?transaction&timings", &statements)
            .await?;
        Ok(execute_result(resp))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_associative_query_response() {
        let body = r#"{
            "results": [{
                "types": {"id": "text", "port": "integer"},
                "rows": [{"id": "svc-1", "port": 8443}],
                "time": 0.0012
            }],
            "time": 0.003
        }"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.results[0].rows.len(), 1);
        assert_eq!(parsed.results[0].rows[0]["id"], "svc-1");
        assert_eq!(parsed.results[0].time, Some(0.0012));
    }

    #[test]
    fn execute_result_sums_rows_affected() {
        let body = r#"{
            "results": [
                {"last_insert_id": 1, "rows_affected": 1},
                {"rows_affected": 2}
            ],
            "time": 0.01
        }"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        let result = execute_result(parsed);
        assert_eq!(result.rows_affected, 3);
        assert_eq!(result.time, Some(0.01));
    }

    #[test]
    fn statement_errors_are_surfaced() {
        let body = r#"{"results": [{"error": "no such table: services"}]}"#;
        let parsed: ApiResponse = serde_json::from_str(body).unwrap();
        assert_eq!(
            parsed.results[0].error.as_deref(),
            Some("no such table: services")
        );
    }

    #[tokio::test]
    async fn unreachable_node_is_unavailable() {
        // Port 9 (discard) on localhost is closed in test environments.
        let client = RqliteClient::new("127.0.0.1:9").with_timeout(Duration::from_millis(500));
        let err = client
            .execute(Statement::new("SELECT 1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(!client.is_ready().await);
    }
}
