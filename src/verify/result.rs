//! Verification Result Types
//!
//! Shared output shape for the guardrail validator and the plan safety
//! verifier. A request is executable only when both report `valid`.

use serde::{Deserialize, Serialize};

/// How a violation should be surfaced and alerted.
///
/// Severity classifies reporting only; every violation blocks execution
/// regardless of severity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Medium,
    High,
    Critical,
}

/// A single coded rule violation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Violation {
    pub code: String,
    pub severity: Severity,
    pub message: String,
}

impl Violation {
    pub fn new(code: &str, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            severity,
            message: message.into(),
        }
    }
}

/// Aggregated verification output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub violations: Vec<Violation>,
    pub warnings: Vec<Violation>,
    pub estimated_cost: u32,
    pub estimated_time_ms: u64,
    pub pii_fields: Vec<String>,
    pub requires_redaction: bool,
}

impl VerificationResult {
    pub fn passed() -> Self {
        Self {
            valid: true,
            violations: Vec::new(),
            warnings: Vec::new(),
            estimated_cost: 0,
            estimated_time_ms: 0,
            pii_fields: Vec::new(),
            requires_redaction: false,
        }
    }

    pub fn push_violation(&mut self, violation: Violation) {
        self.valid = false;
        self.violations.push(violation);
    }

    pub fn push_warning(&mut self, warning: Violation) {
        self.warnings.push(warning);
    }

    /// Merge another result into this one. The merged result is valid
    /// only when both inputs are; cost, time and PII flags are combined
    /// so the caller sees one consolidated report.
    pub fn merge(&mut self, other: VerificationResult) {
        self.valid = self.valid && other.valid;
        self.violations.extend(other.violations);
        self.warnings.extend(other.warnings);
        self.estimated_cost = self.estimated_cost.max(other.estimated_cost);
        self.estimated_time_ms = self.estimated_time_ms.max(other.estimated_time_ms);
        for field in other.pii_fields {
            if !self.pii_fields.contains(&field) {
                self.pii_fields.push(field);
            }
        }
        self.requires_redaction = self.requires_redaction || other.requires_redaction;
    }
}
