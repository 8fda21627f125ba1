//! Metric Ontology
//!
//! Read-only reference data consumed from the external ontology module:
//! metric definitions, the join allow-list, and tiered cost/time budgets.
//! This subsystem only performs lookups; it never mutates the ontology.

use crate::plan::Aggregation;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Definition of a single metric in the ontology
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricDefinition {
    pub name: String,
    pub source_table: String,
    pub allowed_aggregations: HashSet<Aggregation>,
    /// Fields classified as personally identifying
    pub pii_fields: Vec<String>,
    /// Relative cost weight used by the cost model
    pub cost_weight: u32,
    /// Optional ceiling on the time range this metric may cover (days)
    pub max_time_range_days: Option<i64>,
}

/// Budget tier selecting a ceiling table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Standard,
    Enterprise,
}

/// Structural and cost ceilings for one tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TierBudget {
    pub max_joins: usize,
    pub max_group_by_dimensions: usize,
    pub max_rows_returned: u64,
    pub max_cost_points: u32,
    pub max_execution_time_ms: u64,
}

impl TierBudget {
    pub fn standard() -> Self {
        Self {
            max_joins: 10,
            max_group_by_dimensions: 5,
            max_rows_returned: 10_000,
            max_cost_points: 200,
            max_execution_time_ms: 2_500,
        }
    }

    pub fn enterprise() -> Self {
        Self {
            max_joins: 20,
            max_group_by_dimensions: 10,
            max_rows_returned: 50_000,
            max_cost_points: 500,
            max_execution_time_ms: 10_000,
        }
    }

    pub fn for_tier(tier: Tier) -> Self {
        match tier {
            Tier::Standard => Self::standard(),
            Tier::Enterprise => Self::enterprise(),
        }
    }
}

/// Metric ontology with join allow-list
pub struct Ontology {
    metrics: HashMap<String, MetricDefinition>,
    /// Directed allow-list of join edges (from_table, to_table)
    allowed_joins: HashSet<(String, String)>,
}

impl Ontology {
    pub fn new(
        metrics: Vec<MetricDefinition>,
        allowed_joins: Vec<(String, String)>,
    ) -> Self {
        Self {
            metrics: metrics.into_iter().map(|m| (m.name.clone(), m)).collect(),
            allowed_joins: allowed_joins.into_iter().collect(),
        }
    }

    pub fn metric(&self, name: &str) -> Option<&MetricDefinition> {
        self.metrics.get(name)
    }

    pub fn is_join_allowed(&self, from_table: &str, to_table: &str) -> bool {
        self.allowed_joins
            .contains(&(from_table.to_string(), to_table.to_string()))
    }

    /// Small fixture ontology used in tests and local demos
    pub fn demo() -> Self {
        let metrics = vec![
            MetricDefinition {
                name: "revenue".to_string(),
                source_table: "transactions".to_string(),
                allowed_aggregations: [Aggregation::Sum, Aggregation::Avg]
                    .into_iter()
                    .collect(),
                pii_fields: vec![],
                cost_weight: 2,
                max_time_range_days: Some(365),
            },
            MetricDefinition {
                name: "active_users".to_string(),
                source_table: "users".to_string(),
                allowed_aggregations: [Aggregation::Count, Aggregation::CountDistinct]
                    .into_iter()
                    .collect(),
                pii_fields: vec!["email".to_string(), "phone".to_string()],
                cost_weight: 3,
                max_time_range_days: Some(730),
            },
            MetricDefinition {
                name: "order_count".to_string(),
                source_table: "orders".to_string(),
                allowed_aggregations: [Aggregation::Count, Aggregation::Sum]
                    .into_iter()
                    .collect(),
                pii_fields: vec![],
                cost_weight: 1,
                max_time_range_days: None,
            },
        ];

        let allowed_joins = vec![
            ("transactions".to_string(), "users".to_string()),
            ("orders".to_string(), "users".to_string()),
            ("orders".to_string(), "transactions".to_string()),
        ];

        Self::new(metrics, allowed_joins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_demo_ontology_lookups() {
        let ontology = Ontology::demo();
        assert!(ontology.metric("revenue").is_some());
        assert!(ontology.metric("nonexistent").is_none());
        assert!(ontology.is_join_allowed("transactions", "users"));
        assert!(!ontology.is_join_allowed("users", "transactions"));
    }

    #[test]
    fn test_tier_budgets() {
        let standard = TierBudget::standard();
        let enterprise = TierBudget::enterprise();
        assert!(enterprise.max_joins > standard.max_joins);
        assert!(enterprise.max_cost_points > standard.max_cost_points);
    }
}
