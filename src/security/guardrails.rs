//! Query Guardrails
//!
//! Static analysis of rendered query text against tenant-isolation,
//! injection, and resource-exhaustion rules. All checks run
//! independently and every violation found is reported; nothing here
//! is fail-fast.

use crate::config::SentinelConfig;
use crate::security::policy::SecurityContext;
use crate::verify::result::{Severity, VerificationResult, Violation};
use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

lazy_static! {
    /// Equality filter on the tenant column, both quoting styles
    static ref TENANT_FILTER: Regex = Regex::new(
        r#"(?i)["'`]?(company_id|tenant_id)["'`]?\s*=\s*['"]?([A-Za-z0-9_\-]+)['"]?"#
    ).unwrap();

    /// Negated or fuzzy operators on the tenant column
    static ref TENANT_NEGATED: Regex = Regex::new(
        r#"(?i)["'`]?(company_id|tenant_id)["'`]?\s*(!=|<>|\bnot\s+in\b|\blike\b)"#
    ).unwrap();

    static ref OR_CLAUSE: Regex = Regex::new(r"(?i)\bor\b").unwrap();

    static ref DANGEROUS_KEYWORD: Regex = Regex::new(
        r"(?i)\b(drop|truncate|alter|grant|revoke)\b"
    ).unwrap();

    static ref UNION_SELECT: Regex = Regex::new(r"(?i)\bunion\b[\s\S]*\bselect\b").unwrap();

    static ref DYNAMIC_EXEC: Regex = Regex::new(
        r"(?i)\b(exec|execute\s+immediate|sp_executesql|eval)\b"
    ).unwrap();

    static ref LIMIT_CLAUSE: Regex = Regex::new(r"(?i)\blimit\s+(\d+)").unwrap();

    static ref WHERE_CLAUSE: Regex = Regex::new(r"(?i)\bwhere\b").unwrap();

    static ref DATE_LITERAL: Regex = Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").unwrap();

    static ref TABLE_REF: Regex = Regex::new(
        r"(?i)\b(?:from|join)\s+([A-Za-z_][A-Za-z0-9_]*)"
    ).unwrap();
}

/// Guardrail validator over rendered query text
pub struct GuardrailValidator {
    max_limit_rows: u64,
    max_time_window_days: i64,
    max_subquery_depth: u32,
}

impl GuardrailValidator {
    pub fn new(config: &SentinelConfig) -> Self {
        Self {
            max_limit_rows: config.max_limit_rows,
            max_time_window_days: config.max_time_window_days,
            max_subquery_depth: config.max_subquery_depth,
        }
    }

    /// Run every guardrail check against the query text and aggregate
    /// all violations found.
    pub fn verify(&self, sql: &str, ctx: &SecurityContext) -> VerificationResult {
        let mut result = VerificationResult::passed();

        self.check_tenant_isolation(sql, ctx, &mut result);
        self.check_table_access(sql, ctx, &mut result);
        self.check_injection(sql, &mut result);
        self.check_structure(sql, &mut result);
        self.check_resources(sql, &mut result);

        if !result.valid {
            tracing::warn!(
                tenant = %ctx.company_id,
                violations = result.violations.len(),
                "Query rejected by guardrails"
            );
        }

        result
    }

    /// Tenant isolation: the query must carry an equality filter on the
    /// tenant column whose literal equals the caller's own tenant id.
    /// Column names match case-insensitively; the literal value is
    /// compared case-sensitively (exact equality).
    fn check_tenant_isolation(
        &self,
        sql: &str,
        ctx: &SecurityContext,
        result: &mut VerificationResult,
    ) {
        if ctx.bypasses_row_filter() {
            return;
        }

        let mut matched_own_tenant = false;
        let mut found_any_filter = false;
        for caps in TENANT_FILTER.captures_iter(sql) {
            found_any_filter = true;
            if &caps[2] == ctx.company_id {
                matched_own_tenant = true;
            }
        }

        // One TNT_001 per query: a negated operator subsumes the
        // missing-equality report.
        if TENANT_NEGATED.is_match(sql) {
            result.push_violation(Violation::new(
                "TNT_001",
                Severity::Critical,
                "Tenant column filtered with a negated or fuzzy operator",
            ));
        } else if !matched_own_tenant {
            let message = if found_any_filter {
                format!(
                    "Tenant filter value does not match caller tenant '{}'",
                    ctx.company_id
                )
            } else {
                "Missing equality filter on tenant column".to_string()
            };
            result.push_violation(Violation::new("TNT_001", Severity::Critical, message));
        }

        // An OR anywhere in the statement can widen the predicate past
        // the tenant filter. Reported as a bypass, distinct from a
        // missing filter.
        if OR_CLAUSE.is_match(sql) {
            result.push_violation(Violation::new(
                "TNT_002",
                Severity::Critical,
                "OR clause may bypass tenant isolation filter",
            ));
        }
    }

    /// Every referenced table must be permitted by the caller's context.
    fn check_table_access(
        &self,
        sql: &str,
        ctx: &SecurityContext,
        result: &mut VerificationResult,
    ) {
        if ctx.bypasses_row_filter() {
            return;
        }

        for caps in TABLE_REF.captures_iter(sql) {
            let table = caps[1].to_lowercase();
            if ctx.denied_tables.contains(&table) || !ctx.allowed_tables.permits(&table) {
                result.push_violation(Violation::new(
                    "TBL_001",
                    Severity::High,
                    format!("Access to table '{}' is not permitted for this role", table),
                ));
            }
        }
    }

    fn check_injection(&self, sql: &str, result: &mut VerificationResult) {
        if let Some(caps) = DANGEROUS_KEYWORD.captures(sql) {
            result.push_violation(Violation::new(
                "INJ_001",
                Severity::Critical,
                format!("Dangerous keyword '{}' in query", &caps[1]),
            ));
        }

        // A semicolon anywhere but the very end means stacked statements
        if sql.trim_end().trim_end_matches(';').contains(';') {
            result.push_violation(Violation::new(
                "INJ_002",
                Severity::Critical,
                "Stacked statements via semicolon",
            ));
        }

        if UNION_SELECT.is_match(sql) {
            result.push_violation(Violation::new(
                "INJ_003",
                Severity::Critical,
                "UNION SELECT in query",
            ));
        }

        if sql.contains("--") || sql.contains("/*") {
            result.push_violation(Violation::new(
                "INJ_004",
                Severity::Critical,
                "Inline comment in query",
            ));
        }

        if DYNAMIC_EXEC.is_match(sql) {
            result.push_violation(Violation::new(
                "INJ_005",
                Severity::Critical,
                "Dynamic execution call in query",
            ));
        }
    }

    /// A structurally valid read query must carry a WHERE clause.
    /// Uses the SQL parser when the text parses, textual fallback for
    /// analytical dialects the generic parser cannot handle.
    fn check_structure(&self, sql: &str, result: &mut VerificationResult) {
        match Parser::parse_sql(&GenericDialect {}, sql) {
            Ok(statements) => {
                if statements.len() > 1 {
                    result.push_violation(Violation::new(
                        "INJ_002",
                        Severity::Critical,
                        "Multiple statements in one query",
                    ));
                }
                let missing_where = statements.iter().any(|stmt| match stmt {
                    Statement::Query(query) => match query.body.as_ref() {
                        SetExpr::Select(select) => select.selection.is_none(),
                        _ => false,
                    },
                    _ => false,
                });
                if missing_where {
                    result.push_violation(Violation::new(
                        "STRUCT_001",
                        Severity::High,
                        "Read query has no WHERE clause",
                    ));
                }
            }
            Err(_) => {
                if !WHERE_CLAUSE.is_match(sql) {
                    result.push_violation(Violation::new(
                        "STRUCT_001",
                        Severity::High,
                        "Read query has no WHERE clause",
                    ));
                }
            }
        }
    }

    fn check_resources(&self, sql: &str, result: &mut VerificationResult) {
        let depth = subquery_depth(sql);
        if depth > self.max_subquery_depth {
            result.push_violation(Violation::new(
                "NEST_001",
                Severity::High,
                format!(
                    "Subquery nesting depth {} exceeds maximum {}",
                    depth, self.max_subquery_depth
                ),
            ));
        }

        match LIMIT_CLAUSE.captures(sql) {
            None => {
                result.push_violation(Violation::new(
                    "LIMIT_001",
                    Severity::Medium,
                    "Query has no LIMIT clause",
                ));
            }
            Some(caps) => {
                let limit: u64 = caps[1].parse().unwrap_or(u64::MAX);
                if limit > self.max_limit_rows {
                    result.push_violation(Violation::new(
                        "LIMIT_002",
                        Severity::Medium,
                        format!("LIMIT {} exceeds maximum {}", limit, self.max_limit_rows),
                    ));
                }
            }
        }

        if let Some(days) = explicit_window_days(sql) {
            if days > self.max_time_window_days {
                result.push_violation(Violation::new(
                    "TIME_001",
                    Severity::Medium,
                    format!(
                        "Time window of {} days exceeds maximum {}",
                        days, self.max_time_window_days
                    ),
                ));
            }
        }
    }
}

/// Scan a single filter value for injection patterns. Used by the plan
/// verifier as a second, structural line of defense over pre-text
/// filter values.
pub fn scan_value_for_injection(value: &str) -> Option<String> {
    if let Some(caps) = DANGEROUS_KEYWORD.captures(value) {
        return Some(format!("dangerous keyword '{}'", &caps[1]));
    }
    if value.contains(';') {
        return Some("stacked statement separator".to_string());
    }
    if UNION_SELECT.is_match(value) {
        return Some("UNION SELECT".to_string());
    }
    if value.contains("--") || value.contains("/*") {
        return Some("inline comment".to_string());
    }
    if DYNAMIC_EXEC.is_match(value) {
        return Some("dynamic execution call".to_string());
    }
    None
}

/// Maximum depth of `(SELECT ...)` nesting in the query text.
/// The outermost statement does not count.
fn subquery_depth(sql: &str) -> u32 {
    let bytes = sql.as_bytes();
    let mut stack: Vec<bool> = Vec::new();
    let mut current: u32 = 0;
    let mut max_depth: u32 = 0;
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'(' => {
                let rest = sql[i + 1..].trim_start().as_bytes();
                let is_select = rest.len() >= 6 && rest[..6].eq_ignore_ascii_case(b"select");
                if is_select {
                    current += 1;
                    max_depth = max_depth.max(current);
                }
                stack.push(is_select);
            }
            b')' => {
                if let Some(was_select) = stack.pop() {
                    if was_select {
                        current = current.saturating_sub(1);
                    }
                }
            }
            _ => {}
        }
        i += 1;
    }

    max_depth
}

/// Span in days between the earliest and latest date literal in the
/// query, when at least two appear.
fn explicit_window_days(sql: &str) -> Option<i64> {
    let mut dates: Vec<NaiveDate> = DATE_LITERAL
        .captures_iter(sql)
        .filter_map(|caps| NaiveDate::parse_from_str(&caps[1], "%Y-%m-%d").ok())
        .collect();
    if dates.len() < 2 {
        return None;
    }
    dates.sort();
    Some((*dates.last().unwrap() - *dates.first().unwrap()).num_days())
}
