//! Plan Safety Verifier
//!
//! Structural analysis of the pre-text query plan against the metric
//! ontology and tiered cost/time budgets. Produces an estimated cost
//! score, an advisory time estimate, and the set of PII fields that
//! require downstream redaction.

use crate::config::SentinelConfig;
use crate::ontology::{Ontology, Tier, TierBudget};
use crate::plan::{Aggregation, QueryPlan};
use crate::security::guardrails::scan_value_for_injection;
use crate::verify::result::{Severity, VerificationResult, Violation};
use std::collections::{HashMap, HashSet};

const BASE_COST: u32 = 10;
const COST_PER_JOIN: u32 = 15;
const COST_PER_DIMENSION: u32 = 3;
const COST_PER_FILTER: u32 = 2;
const DISTINCT_COUNT_EXTRA_COST: u32 = 10;
const MAX_TIME_WINDOW_COST: u32 = 20;

const BASE_TIME_MS: u64 = 100;
const TIME_PER_METRIC_MS: u64 = 50;
const TIME_PER_JOIN_MS: u64 = 300;
const TIME_PER_DIMENSION_MS: u64 = 100;
const TIME_PER_FILTER_MS: u64 = 20;
const TIME_PER_DISTINCT_COUNT_MS: u64 = 500;

/// Verifies query plans against the ontology and a tier budget
pub struct PlanSafetyVerifier<'a> {
    ontology: &'a Ontology,
    max_plan_range_days: i64,
}

impl<'a> PlanSafetyVerifier<'a> {
    pub fn new(ontology: &'a Ontology, config: &SentinelConfig) -> Self {
        Self {
            ontology,
            max_plan_range_days: config.max_plan_range_days,
        }
    }

    /// Run every structural check, aggregating all violations found.
    pub fn verify(&self, plan: &QueryPlan, tier: Tier) -> VerificationResult {
        let budget = TierBudget::for_tier(tier);
        let mut result = VerificationResult::passed();

        if plan.tenant_id.trim().is_empty() {
            result.push_violation(Violation::new(
                "PLAN_001",
                Severity::Critical,
                "Plan is missing a tenant id",
            ));
        }

        self.check_metrics(plan, &mut result);
        self.check_joins(plan, &budget, &mut result);
        self.check_dimensions(plan, &budget, &mut result);
        self.check_limit(plan, &budget, &mut result);
        self.check_time_range(plan, &mut result);
        self.collect_pii(plan, &mut result);
        self.check_filter_values(plan, &mut result);

        result.estimated_cost = self.estimate_cost(plan);
        if result.estimated_cost > budget.max_cost_points {
            result.push_violation(Violation::new(
                "COST_001",
                Severity::High,
                format!(
                    "Estimated cost {} exceeds budget of {} points",
                    result.estimated_cost, budget.max_cost_points
                ),
            ));
        }

        // The time estimate is advisory: exceeding it warns but never
        // blocks. The cost-point budget is the hard gate.
        result.estimated_time_ms = self.estimate_time_ms(plan);
        if result.estimated_time_ms > budget.max_execution_time_ms {
            result.push_warning(Violation::new(
                "EST_001",
                Severity::Warning,
                format!(
                    "Estimated execution time {}ms exceeds tier target {}ms",
                    result.estimated_time_ms, budget.max_execution_time_ms
                ),
            ));
        }

        result
    }

    fn check_metrics(&self, plan: &QueryPlan, result: &mut VerificationResult) {
        for spec in &plan.metrics {
            match self.ontology.metric(&spec.metric) {
                None => {
                    result.push_violation(Violation::new(
                        "MET_001",
                        Severity::High,
                        format!("Unknown metric '{}'", spec.metric),
                    ));
                }
                Some(def) => {
                    if !def.allowed_aggregations.contains(&spec.aggregation) {
                        result.push_violation(Violation::new(
                            "MET_002",
                            Severity::High,
                            format!(
                                "Aggregation '{}' not allowed for metric '{}'",
                                spec.aggregation.as_str(),
                                spec.metric
                            ),
                        ));
                    }
                }
            }
        }
    }

    fn check_joins(&self, plan: &QueryPlan, budget: &TierBudget, result: &mut VerificationResult) {
        if plan.joins.len() > budget.max_joins {
            result.push_violation(Violation::new(
                "JOIN_003",
                Severity::High,
                format!(
                    "Too many joins: {} (max {})",
                    plan.joins.len(),
                    budget.max_joins
                ),
            ));
        }

        for join in &plan.joins {
            if !self.ontology.is_join_allowed(&join.from_table, &join.to_table) {
                result.push_violation(Violation::new(
                    "JOIN_001",
                    Severity::High,
                    format!(
                        "Join {} -> {} is not on the allow-list",
                        join.from_table, join.to_table
                    ),
                ));
            }
        }

        if has_join_cycle(plan) {
            result.push_violation(Violation::new(
                "JOIN_002",
                Severity::High,
                "Join graph contains a cycle",
            ));
        }
    }

    fn check_dimensions(
        &self,
        plan: &QueryPlan,
        budget: &TierBudget,
        result: &mut VerificationResult,
    ) {
        if plan.dimensions.len() > budget.max_group_by_dimensions {
            result.push_violation(Violation::new(
                "DIM_001",
                Severity::Medium,
                format!(
                    "Too many GROUP BY dimensions: {} (max {})",
                    plan.dimensions.len(),
                    budget.max_group_by_dimensions
                ),
            ));
        }
    }

    fn check_limit(&self, plan: &QueryPlan, budget: &TierBudget, result: &mut VerificationResult) {
        let limit = plan.limit.unwrap_or(budget.max_rows_returned);
        if limit > budget.max_rows_returned {
            result.push_violation(Violation::new(
                "LIMIT_002",
                Severity::Medium,
                format!(
                    "Requested limit {} exceeds tier maximum {}",
                    limit, budget.max_rows_returned
                ),
            ));
        }
    }

    fn check_time_range(&self, plan: &QueryPlan, result: &mut VerificationResult) {
        let Some(range) = &plan.time_range else {
            return;
        };

        if range.start >= range.end {
            result.push_violation(Violation::new(
                "TIME_003",
                Severity::Medium,
                "Time range start must precede end",
            ));
            return;
        }

        let days = range.days();
        if days > self.max_plan_range_days {
            result.push_violation(Violation::new(
                "TIME_001",
                Severity::Medium,
                format!(
                    "Time range of {} days exceeds absolute maximum {}",
                    days, self.max_plan_range_days
                ),
            ));
        }

        for spec in &plan.metrics {
            if let Some(def) = self.ontology.metric(&spec.metric) {
                if let Some(max_days) = def.max_time_range_days {
                    if days > max_days {
                        result.push_violation(Violation::new(
                            "TIME_002",
                            Severity::Medium,
                            format!(
                                "Metric '{}' allows at most {} days, plan covers {}",
                                spec.metric, max_days, days
                            ),
                        ));
                    }
                }
            }
        }
    }

    /// PII detection flags fields for downstream redaction; it never
    /// blocks execution.
    fn collect_pii(&self, plan: &QueryPlan, result: &mut VerificationResult) {
        let mut pii: Vec<String> = Vec::new();

        for spec in &plan.metrics {
            if let Some(def) = self.ontology.metric(&spec.metric) {
                for field in &def.pii_fields {
                    if !pii.contains(field) {
                        pii.push(field.clone());
                    }
                }
            }
        }

        for dim in &plan.dimensions {
            let is_pii = plan.metrics.iter().any(|spec| {
                self.ontology
                    .metric(&spec.metric)
                    .map(|def| def.pii_fields.contains(&dim.column))
                    .unwrap_or(false)
            });
            if is_pii && !pii.contains(&dim.column) {
                pii.push(dim.column.clone());
            }
        }

        if !pii.is_empty() {
            result.push_warning(Violation::new(
                "PII_001",
                Severity::Warning,
                format!("Result will contain PII fields: {}", pii.join(", ")),
            ));
            result.pii_fields = pii;
            result.requires_redaction = true;
        }
    }

    fn check_filter_values(&self, plan: &QueryPlan, result: &mut VerificationResult) {
        for filter in &plan.filters {
            if let Some(reason) = scan_value_for_injection(&filter.value) {
                result.push_violation(Violation::new(
                    "INJ_001",
                    Severity::Critical,
                    format!(
                        "Filter value for column '{}' contains {}",
                        filter.column, reason
                    ),
                ));
            }
        }
    }

    /// Cost model. Informs budget enforcement, not ground truth.
    fn estimate_cost(&self, plan: &QueryPlan) -> u32 {
        let mut cost = BASE_COST;

        for spec in &plan.metrics {
            let weight = self
                .ontology
                .metric(&spec.metric)
                .map(|def| def.cost_weight)
                .unwrap_or(1);
            cost += weight * 5;
            if spec.aggregation == Aggregation::CountDistinct {
                cost += DISTINCT_COUNT_EXTRA_COST;
            }
        }

        cost += plan.joins.len() as u32 * COST_PER_JOIN;
        cost += plan.dimensions.len() as u32 * COST_PER_DIMENSION;
        cost += plan.filters.len() as u32 * COST_PER_FILTER;

        if let Some(range) = &plan.time_range {
            let window_cost = (range.days().max(0) / 30) as u32;
            cost += window_cost.min(MAX_TIME_WINDOW_COST);
        }

        cost
    }

    /// Advisory wall-clock estimate for the plan.
    fn estimate_time_ms(&self, plan: &QueryPlan) -> u64 {
        let mut time = BASE_TIME_MS;

        time += plan.metrics.len() as u64 * TIME_PER_METRIC_MS;
        time += plan.joins.len() as u64 * TIME_PER_JOIN_MS;
        time += plan.dimensions.len() as u64 * TIME_PER_DIMENSION_MS;
        time += plan.filters.len() as u64 * TIME_PER_FILTER_MS;

        let distinct_counts = plan
            .metrics
            .iter()
            .filter(|spec| spec.aggregation == Aggregation::CountDistinct)
            .count();
        time += distinct_counts as u64 * TIME_PER_DISTINCT_COUNT_MS;

        if let Some(range) = &plan.time_range {
            time += (range.days().max(0) as u64) / 2;
        }

        time
    }
}

/// Detect a cycle in the directed join graph. Nodes are the metrics'
/// source tables plus every join endpoint.
fn has_join_cycle(plan: &QueryPlan) -> bool {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut nodes: HashSet<&str> = HashSet::new();

    for join in &plan.joins {
        adjacency
            .entry(join.from_table.as_str())
            .or_default()
            .push(join.to_table.as_str());
        nodes.insert(join.from_table.as_str());
        nodes.insert(join.to_table.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Unvisited,
        InProgress,
        Done,
    }

    let mut marks: HashMap<&str, Mark> = nodes.iter().map(|n| (*n, Mark::Unvisited)).collect();

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
    ) -> bool {
        match marks.get(node).copied().unwrap_or(Mark::Unvisited) {
            Mark::Done => return false,
            Mark::InProgress => return true,
            Mark::Unvisited => {}
        }
        marks.insert(node, Mark::InProgress);
        if let Some(next) = adjacency.get(node) {
            for n in next {
                if visit(n, adjacency, marks) {
                    return true;
                }
            }
        }
        marks.insert(node, Mark::Done);
        false
    }

    let node_list: Vec<&str> = nodes.into_iter().collect();
    for node in node_list {
        if visit(node, &adjacency, &mut marks) {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{DimensionSpec, FilterSpec, JoinSpec, MetricSpec, TimeRange};
    use chrono::{TimeZone, Utc};

    fn base_plan() -> QueryPlan {
        QueryPlan {
            tenant_id: "T1".to_string(),
            metrics: vec![MetricSpec {
                metric: "revenue".to_string(),
                aggregation: Aggregation::Sum,
            }],
            joins: vec![],
            dimensions: vec![],
            filters: vec![],
            time_range: None,
            limit: Some(100),
        }
    }

    fn verifier_parts() -> (Ontology, SentinelConfig) {
        (Ontology::demo(), SentinelConfig::default())
    }

    #[test]
    fn test_valid_plan_passes() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);
        let result = verifier.verify(&base_plan(), Tier::Standard);
        assert!(result.valid, "violations: {:?}", result.violations);
        assert!(result.estimated_cost >= BASE_COST);
    }

    #[test]
    fn test_missing_tenant_rejected() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);
        let mut plan = base_plan();
        plan.tenant_id = "".to_string();
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "PLAN_001"));
    }

    #[test]
    fn test_unknown_metric_and_bad_aggregation() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);

        let mut plan = base_plan();
        plan.metrics.push(MetricSpec {
            metric: "nonexistent".to_string(),
            aggregation: Aggregation::Sum,
        });
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "MET_001"));

        let mut plan = base_plan();
        plan.metrics[0].aggregation = Aggregation::CountDistinct;
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "MET_002"));
    }

    #[test]
    fn test_too_many_joins_rejected() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);
        let mut plan = base_plan();
        for i in 0..15 {
            plan.joins.push(JoinSpec {
                from_table: format!("t{}", i),
                to_table: format!("t{}", i + 1),
            });
        }
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "JOIN_003"));

        // The same plan fits the enterprise budget
        let result = verifier.verify(&plan, Tier::Enterprise);
        assert!(!result.violations.iter().any(|v| v.code == "JOIN_003"));
    }

    #[test]
    fn test_join_allow_list_and_cycle() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);

        let mut plan = base_plan();
        plan.joins.push(JoinSpec {
            from_table: "users".to_string(),
            to_table: "transactions".to_string(),
        });
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "JOIN_001"));

        let mut plan = base_plan();
        plan.joins.push(JoinSpec {
            from_table: "transactions".to_string(),
            to_table: "users".to_string(),
        });
        plan.joins.push(JoinSpec {
            from_table: "users".to_string(),
            to_table: "transactions".to_string(),
        });
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "JOIN_002"));
    }

    #[test]
    fn test_limit_against_tier_budget() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);
        let mut plan = base_plan();
        plan.limit = Some(50_000);
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "LIMIT_002"));

        let result = verifier.verify(&plan, Tier::Enterprise);
        assert!(!result.violations.iter().any(|v| v.code == "LIMIT_002"));
    }

    #[test]
    fn test_time_range_rules() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);

        let mut plan = base_plan();
        plan.time_range = Some(TimeRange {
            start: Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "TIME_003"));

        // revenue caps at 365 days
        let mut plan = base_plan();
        plan.time_range = Some(TimeRange {
            start: Utc.with_ymd_and_hms(2022, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "TIME_002"));

        // beyond the absolute 1825-day ceiling
        let mut plan = base_plan();
        plan.time_range = Some(TimeRange {
            start: Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        });
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "TIME_001"));
    }

    #[test]
    fn test_pii_warns_but_does_not_block() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);
        let mut plan = base_plan();
        plan.metrics = vec![MetricSpec {
            metric: "active_users".to_string(),
            aggregation: Aggregation::Count,
        }];
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.valid, "violations: {:?}", result.violations);
        assert!(result.requires_redaction);
        assert!(result.pii_fields.contains(&"email".to_string()));
        assert!(result.warnings.iter().any(|w| w.code == "PII_001"));
    }

    #[test]
    fn test_filter_value_injection_scan() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);
        let mut plan = base_plan();
        plan.filters.push(FilterSpec {
            column: "region".to_string(),
            operator: "=".to_string(),
            value: "x'; DROP TABLE users".to_string(),
        });
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.violations.iter().any(|v| v.code == "INJ_001"));
    }

    #[test]
    fn test_cost_monotonicity() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);

        let plan = base_plan();
        let baseline = verifier.verify(&plan, Tier::Standard).estimated_cost;

        let mut with_join = base_plan();
        with_join.joins.push(JoinSpec {
            from_table: "transactions".to_string(),
            to_table: "users".to_string(),
        });
        assert!(verifier.verify(&with_join, Tier::Standard).estimated_cost > baseline);

        let mut with_dims = base_plan();
        with_dims.dimensions.push(DimensionSpec {
            table: "transactions".to_string(),
            column: "region".to_string(),
        });
        assert!(verifier.verify(&with_dims, Tier::Standard).estimated_cost > baseline);

        let mut with_range = base_plan();
        with_range.time_range = Some(TimeRange {
            start: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 7, 1, 0, 0, 0).unwrap(),
        });
        assert!(verifier.verify(&with_range, Tier::Standard).estimated_cost > baseline);
    }

    #[test]
    fn test_crossing_cost_budget_flips_valid() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);

        // Heavy enough to cross the standard 200-point budget while
        // staying inside every other standard ceiling: cost is
        // 10 + 10 (revenue) + 25 (distinct count) + 150 (joins) + 15
        // (dimensions) = 210.
        let mut plan = base_plan();
        plan.metrics.push(MetricSpec {
            metric: "active_users".to_string(),
            aggregation: Aggregation::CountDistinct,
        });
        for _ in 0..10 {
            plan.joins.push(JoinSpec {
                from_table: "transactions".to_string(),
                to_table: "users".to_string(),
            });
        }
        for i in 0..5 {
            plan.dimensions.push(DimensionSpec {
                table: "transactions".to_string(),
                column: format!("dim_{}", i),
            });
        }

        let standard = verifier.verify(&plan, Tier::Standard);
        assert!(
            standard.violations.iter().any(|v| v.code == "COST_001"),
            "cost {} should exceed 200",
            standard.estimated_cost
        );
        assert!(!standard.valid);

        // The identical plan fits the enterprise budget
        let enterprise = verifier.verify(&plan, Tier::Enterprise);
        assert!(!enterprise.violations.iter().any(|v| v.code == "COST_001"));
        assert!(enterprise.valid, "violations: {:?}", enterprise.violations);
    }

    #[test]
    fn test_time_estimate_is_warning_only() {
        let (ontology, config) = verifier_parts();
        let verifier = PlanSafetyVerifier::new(&ontology, &config);
        let mut plan = base_plan();
        for _ in 0..8 {
            plan.joins.push(JoinSpec {
                from_table: "transactions".to_string(),
                to_table: "users".to_string(),
            });
        }
        let result = verifier.verify(&plan, Tier::Standard);
        assert!(result.estimated_time_ms > 2_500);
        assert!(result.warnings.iter().any(|w| w.code == "EST_001"));
    }
}
