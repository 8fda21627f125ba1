//! Query Plan Types
//!
//! Structural, pre-text representation of a request as produced by the
//! natural-language translator. Immutable once handed to verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregation function applied to a metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Aggregation {
    Sum,
    Avg,
    Min,
    Max,
    Count,
    CountDistinct,
}

impl Aggregation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aggregation::Sum => "sum",
            Aggregation::Avg => "avg",
            Aggregation::Min => "min",
            Aggregation::Max => "max",
            Aggregation::Count => "count",
            Aggregation::CountDistinct => "count_distinct",
        }
    }
}

/// A metric reference in a plan
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricSpec {
    pub metric: String,
    pub aggregation: Aggregation,
}

/// A join edge between two tables
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JoinSpec {
    pub from_table: String,
    pub to_table: String,
}

/// A GROUP BY dimension
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DimensionSpec {
    pub table: String,
    pub column: String,
}

/// A filter predicate
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterSpec {
    pub column: String,
    pub operator: String,
    pub value: String,
}

/// Inclusive time range constraint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }
}

/// Structural description of a query's intended shape
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryPlan {
    pub tenant_id: String,
    pub metrics: Vec<MetricSpec>,
    #[serde(default)]
    pub joins: Vec<JoinSpec>,
    #[serde(default)]
    pub dimensions: Vec<DimensionSpec>,
    #[serde(default)]
    pub filters: Vec<FilterSpec>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub limit: Option<u64>,
}
