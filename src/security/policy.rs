//! Security Policy Definitions
//!
//! Role-to-policy mapping is a fixed table over a closed role enum.
//! Unknown roles always fall back to the most restrictive policy.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// User role for access control
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Viewer,
    Analyst,
    TenantAdmin,
    SystemAdmin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Viewer => "viewer",
            Role::Analyst => "analyst",
            Role::TenantAdmin => "tenant_admin",
            Role::SystemAdmin => "system_admin",
        }
    }

    /// Unknown role strings map to Viewer, the most restrictive role.
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "system_admin" => Role::SystemAdmin,
            "tenant_admin" => Role::TenantAdmin,
            "analyst" => Role::Analyst,
            _ => Role::Viewer,
        }
    }

    /// Only system administrators may bypass row-level tenant filtering.
    pub fn bypasses_row_filter(&self) -> bool {
        matches!(self, Role::SystemAdmin)
    }
}

/// Table access scope for a role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableScope {
    All,
    Allowed(HashSet<String>),
}

impl TableScope {
    pub fn permits(&self, table: &str) -> bool {
        match self {
            TableScope::All => true,
            TableScope::Allowed(tables) => tables.contains(table),
        }
    }
}

/// Per-hour rate limits by query tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimits {
    pub standard_per_hour: u32,
    pub heavy_per_hour: u32,
}

/// Resolved identity handed in by the (out-of-scope) auth layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub tenant_id: String,
    pub role: Role,
}

/// Per-request authorization context. Built fresh per request and
/// never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    pub company_id: String,
    pub role: Role,
    pub allowed_tables: TableScope,
    pub denied_tables: HashSet<String>,
    pub rate_limits: RateLimits,
}

impl SecurityContext {
    pub fn bypasses_row_filter(&self) -> bool {
        self.role.bypasses_row_filter()
    }
}

/// Build the authorization context for a resolved identity.
///
/// Pure function, no I/O, no error conditions.
pub fn build_security_context(identity: &Identity) -> SecurityContext {
    let (allowed_tables, denied_tables, rate_limits) = match identity.role {
        Role::SystemAdmin => (
            TableScope::All,
            HashSet::new(),
            RateLimits { standard_per_hour: 10_000, heavy_per_hour: 1_000 },
        ),
        Role::TenantAdmin => (
            TableScope::Allowed(
                ["transactions", "orders", "users", "metrics", "reports"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            ["audit_log"].into_iter().map(String::from).collect(),
            RateLimits { standard_per_hour: 1_000, heavy_per_hour: 100 },
        ),
        Role::Analyst => (
            TableScope::Allowed(
                ["transactions", "orders", "metrics"]
                    .into_iter()
                    .map(String::from)
                    .collect(),
            ),
            ["audit_log", "users"].into_iter().map(String::from).collect(),
            RateLimits { standard_per_hour: 500, heavy_per_hour: 50 },
        ),
        Role::Viewer => (
            TableScope::Allowed(["metrics"].into_iter().map(String::from).collect()),
            ["audit_log", "users", "transactions"]
                .into_iter()
                .map(String::from)
                .collect(),
            RateLimits { standard_per_hour: 100, heavy_per_hour: 10 },
        ),
    };

    SecurityContext {
        company_id: identity.tenant_id.clone(),
        role: identity.role,
        allowed_tables,
        denied_tables,
        rate_limits,
    }
}
