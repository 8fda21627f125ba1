//! Query Backends
//!
//! Pluggable execution backends behind one trait: the row-oriented
//! transactional store (PostgreSQL via sqlx) and the column-oriented
//! analytical store (ClickHouse-compatible HTTP interface).

use crate::error::{Result, SentinelError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Column, Row, TypeInfo};
use std::time::Duration;
use tracing::{debug, warn};

/// A backing data store that can execute validated query text
#[async_trait]
pub trait QueryBackend: Send + Sync {
    /// Backend name (e.g., "postgres", "clickhouse")
    fn name(&self) -> &'static str;

    /// Execute a query and return rows as JSON maps
    async fn execute(&self, query: &str) -> Result<Vec<Map<String, Value>>>;

    /// Check reachability without throwing
    async fn probe(&self) -> bool;
}

/// Row-oriented transactional store
pub struct RowStoreBackend {
    pool: PgPool,
}

impl RowStoreBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect using `DATABASE_URL`.
    pub async fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| SentinelError::Config("DATABASE_URL is not set".to_string()))?;
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&database_url)
            .await?;
        Ok(Self::new(pool))
    }
}

#[async_trait]
impl QueryBackend for RowStoreBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn execute(&self, query: &str) -> Result<Vec<Map<String, Value>>> {
        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db) => SentinelError::Backend {
                    backend: "postgres",
                    code: db.code().map(|c| c.to_string()),
                    message: db.message().to_string(),
                },
                _ => SentinelError::Database(e),
            })?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    async fn probe(&self) -> bool {
        sqlx::query("SELECT 1").execute(&self.pool).await.is_ok()
    }
}

fn row_to_json(row: &PgRow) -> Map<String, Value> {
    let mut map = Map::new();
    for column in row.columns() {
        map.insert(column.name().to_string(), pg_value_to_json(row, column.ordinal(), column.type_info().name()));
    }
    map
}

fn pg_value_to_json(row: &PgRow, idx: usize, type_name: &str) -> Value {
    match type_name {
        "INT2" => opt_json(row.try_get::<Option<i16>, _>(idx)),
        "INT4" => opt_json(row.try_get::<Option<i32>, _>(idx)),
        "INT8" => opt_json(row.try_get::<Option<i64>, _>(idx)),
        "FLOAT4" => opt_json(row.try_get::<Option<f32>, _>(idx)),
        "FLOAT8" => opt_json(row.try_get::<Option<f64>, _>(idx)),
        "BOOL" => opt_json(row.try_get::<Option<bool>, _>(idx)),
        "UUID" => match row.try_get::<Option<uuid::Uuid>, _>(idx) {
            Ok(Some(v)) => json!(v.to_string()),
            _ => Value::Null,
        },
        "DATE" => match row.try_get::<Option<chrono::NaiveDate>, _>(idx) {
            Ok(Some(v)) => json!(v.format("%Y-%m-%d").to_string()),
            _ => Value::Null,
        },
        "TIMESTAMP" => match row.try_get::<Option<chrono::NaiveDateTime>, _>(idx) {
            Ok(Some(v)) => json!(v.format("%Y-%m-%d %H:%M:%S").to_string()),
            _ => Value::Null,
        },
        "TIMESTAMPTZ" => match row.try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx) {
            Ok(Some(v)) => json!(v.to_rfc3339()),
            _ => Value::Null,
        },
        _ => match row.try_get::<Option<String>, _>(idx) {
            Ok(Some(v)) => json!(v),
            _ => Value::Null,
        },
    }
}

fn opt_json<T: serde::Serialize>(value: std::result::Result<Option<T>, sqlx::Error>) -> Value {
    match value {
        Ok(Some(v)) => json!(v),
        _ => Value::Null,
    }
}

/// Column-oriented analytical store spoken to over its HTTP interface
pub struct ColumnStoreBackend {
    client: Client,
    base_url: String,
    database: String,
    user: String,
    password: String,
}

#[derive(Debug, Deserialize)]
struct AnalyticalResponse {
    #[serde(default)]
    data: Vec<Map<String, Value>>,
}

impl ColumnStoreBackend {
    pub fn new(base_url: String, database: String, user: String, password: String) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            database,
            user,
            password,
        })
    }

    /// Build a backend from environment variables with local defaults.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        let base_url = std::env::var("COLUMN_STORE_URL")
            .unwrap_or_else(|_| "http://localhost:8123".to_string());
        let database =
            std::env::var("COLUMN_STORE_DATABASE").unwrap_or_else(|_| "default".to_string());
        let user = std::env::var("COLUMN_STORE_USER").unwrap_or_else(|_| "default".to_string());
        let password = std::env::var("COLUMN_STORE_PASSWORD").unwrap_or_default();

        Self::new(base_url, database, user, password)
    }
}

#[async_trait]
impl QueryBackend for ColumnStoreBackend {
    fn name(&self) -> &'static str {
        "clickhouse"
    }

    async fn execute(&self, query: &str) -> Result<Vec<Map<String, Value>>> {
        let body = format!("{} FORMAT JSON", query.trim_end_matches(';'));
        debug!(backend = "clickhouse", "Submitting analytical query");

        let response = self
            .client
            .post(format!("{}/?database={}", self.base_url, self.database))
            .header("X-ClickHouse-User", &self.user)
            .header("X-ClickHouse-Key", &self.password)
            .body(body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(SentinelError::Backend {
                backend: "clickhouse",
                code: Some(status.as_u16().to_string()),
                message,
            });
        }

        let parsed: AnalyticalResponse = response.json().await?;
        Ok(parsed.data)
    }

    async fn probe(&self) -> bool {
        match self
            .client
            .get(format!("{}/ping", self.base_url))
            .send()
            .await
        {
            Ok(response) => response.status().is_success(),
            Err(e) => {
                warn!(backend = "clickhouse", error = %e, "Probe failed");
                false
            }
        }
    }
}
