//! Query Executor
//!
//! Runs validated query text against the appropriate backing store
//! under a hard wall-clock timeout and a row cap, then normalizes the
//! raw rows into the canonical shape. Preference order: the columnar
//! store when an analytical-query form is supplied, else the row store.

use crate::config::SentinelConfig;
use crate::error::{Result, SentinelError};
use crate::execution::backend::QueryBackend;
use crate::execution::normalize::normalize_rows;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Per-execution options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionOptions {
    pub timeout_ms: u64,
    pub max_rows: usize,
    pub request_id: Option<String>,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        let config = SentinelConfig::default();
        Self {
            timeout_ms: config.default_timeout_ms,
            max_rows: config.default_max_rows,
            request_id: None,
        }
    }
}

/// Metadata about one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub row_count: usize,
    pub execution_time_ms: u64,
    pub estimated_bytes: usize,
    pub backend: String,
    pub cached: bool,
    pub request_id: Option<String>,
}

/// Normalized result of one execution. Created fresh per request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryExecutionResult {
    pub rows: Vec<Map<String, Value>>,
    pub metadata: ExecutionMetadata,
}

/// Reachability report for both backing stores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub row_store: bool,
    pub column_store: bool,
}

/// Executor over the configured backends
pub struct QueryExecutor {
    row_store: Option<Arc<dyn QueryBackend>>,
    column_store: Option<Arc<dyn QueryBackend>>,
}

impl QueryExecutor {
    pub fn new(
        row_store: Option<Arc<dyn QueryBackend>>,
        column_store: Option<Arc<dyn QueryBackend>>,
    ) -> Self {
        Self {
            row_store,
            column_store,
        }
    }

    /// Execute a validated query. `analytical` takes precedence when
    /// the columnar backend is available.
    pub async fn execute(
        &self,
        sql: Option<&str>,
        analytical: Option<&str>,
        opts: &ExecutionOptions,
    ) -> Result<QueryExecutionResult> {
        let (backend, query) = self.select_backend(sql, analytical)?;

        info!(
            backend = backend.name(),
            timeout_ms = opts.timeout_ms,
            request_id = ?opts.request_id,
            "Executing query"
        );

        let started = Instant::now();
        let rows = match tokio::time::timeout(
            Duration::from_millis(opts.timeout_ms),
            backend.execute(query),
        )
        .await
        {
            Ok(result) => result?,
            Err(_) => {
                warn!(backend = backend.name(), "Query timed out");
                return Err(SentinelError::Timeout {
                    backend: backend.name(),
                    timeout_ms: opts.timeout_ms,
                });
            }
        };
        let execution_time_ms = started.elapsed().as_millis() as u64;

        // Over-limit is a typed error, never a silent truncation
        if rows.len() > opts.max_rows {
            return Err(SentinelError::RowLimit {
                returned: rows.len(),
                max: opts.max_rows,
            });
        }

        let rows = normalize_rows(rows);
        let estimated_bytes = estimate_result_bytes(&rows);

        Ok(QueryExecutionResult {
            metadata: ExecutionMetadata {
                row_count: rows.len(),
                execution_time_ms,
                estimated_bytes,
                backend: backend.name().to_string(),
                cached: false,
                request_id: opts.request_id.clone(),
            },
            rows,
        })
    }

    fn select_backend<'a>(
        &self,
        sql: Option<&'a str>,
        analytical: Option<&'a str>,
    ) -> Result<(&Arc<dyn QueryBackend>, &'a str)> {
        if let (Some(query), Some(backend)) = (analytical, self.column_store.as_ref()) {
            return Ok((backend, query));
        }
        if let (Some(query), Some(backend)) = (sql, self.row_store.as_ref()) {
            return Ok((backend, query));
        }
        Err(SentinelError::Config(
            "No query text supplied for an available backend".to_string(),
        ))
    }

    /// Probe both backing stores. Never throws; unconfigured backends
    /// report unreachable.
    pub async fn test_connection(&self) -> ConnectionStatus {
        let row_store = match &self.row_store {
            Some(backend) => backend.probe().await,
            None => false,
        };
        let column_store = match &self.column_store {
            Some(backend) => backend.probe().await,
            None => false,
        };
        ConnectionStatus {
            row_store,
            column_store,
        }
    }
}

/// Approximate result size: serialized size of one sample row times
/// the row count. Used for cache/memory accounting, not billing.
fn estimate_result_bytes(rows: &[Map<String, Value>]) -> usize {
    match rows.first() {
        Some(sample) => {
            let sample_size = serde_json::to_string(sample).map(|s| s.len()).unwrap_or(0);
            sample_size * rows.len()
        }
        None => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;

    struct StubBackend {
        name: &'static str,
        rows: usize,
        delay: Duration,
    }

    #[async_trait]
    impl QueryBackend for StubBackend {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn execute(&self, _query: &str) -> Result<Vec<Map<String, Value>>> {
            tokio::time::sleep(self.delay).await;
            let row = |i: usize| {
                let mut map = Map::new();
                map.insert("id".to_string(), json!(i));
                map.insert("amount".to_string(), json!(1.23456));
                map
            };
            Ok((0..self.rows).map(row).collect())
        }

        async fn probe(&self) -> bool {
            true
        }
    }

    fn executor(rows: usize, delay: Duration) -> QueryExecutor {
        QueryExecutor::new(
            Some(Arc::new(StubBackend {
                name: "postgres",
                rows,
                delay,
            })),
            None,
        )
    }

    #[tokio::test]
    async fn test_execute_normalizes_rows() {
        let executor = executor(2, Duration::ZERO);
        let result = executor
            .execute(Some("SELECT 1"), None, &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(result.metadata.row_count, 2);
        assert_eq!(result.metadata.backend, "postgres");
        assert!(!result.metadata.cached);
        assert_eq!(result.rows[0]["amount"], json!(1.2346));
        assert!(result.metadata.estimated_bytes > 0);
    }

    #[tokio::test]
    async fn test_timeout_is_typed_error() {
        let executor = executor(1, Duration::from_millis(200));
        let opts = ExecutionOptions {
            timeout_ms: 20,
            ..Default::default()
        };
        let err = executor
            .execute(Some("SELECT 1"), None, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::Timeout { backend: "postgres", .. }));
    }

    #[tokio::test]
    async fn test_row_cap_is_typed_error_not_truncation() {
        let executor = executor(50, Duration::ZERO);
        let opts = ExecutionOptions {
            max_rows: 10,
            ..Default::default()
        };
        let err = executor
            .execute(Some("SELECT 1"), None, &opts)
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::RowLimit { returned: 50, max: 10 }));
    }

    #[tokio::test]
    async fn test_columnar_preferred_when_analytical_supplied() {
        let executor = QueryExecutor::new(
            Some(Arc::new(StubBackend {
                name: "postgres",
                rows: 1,
                delay: Duration::ZERO,
            })),
            Some(Arc::new(StubBackend {
                name: "clickhouse",
                rows: 1,
                delay: Duration::ZERO,
            })),
        );
        let result = executor
            .execute(Some("SELECT 1"), Some("SELECT 1"), &ExecutionOptions::default())
            .await
            .unwrap();
        assert_eq!(result.metadata.backend, "clickhouse");
    }

    #[tokio::test]
    async fn test_no_backend_for_query() {
        let executor = QueryExecutor::new(None, None);
        let err = executor
            .execute(Some("SELECT 1"), None, &ExecutionOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SentinelError::Config(_)));
    }

    #[tokio::test]
    async fn test_connection_probe() {
        let executor = executor(1, Duration::ZERO);
        let status = executor.test_connection().await;
        assert!(status.row_store);
        assert!(!status.column_store);
    }
}
