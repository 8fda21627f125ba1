//! Query Sentinel
//!
//! Query safety firewall and result cache for a multi-tenant analytics
//! service. Sits between a natural-language query front end and two
//! shared data stores, enforcing tenant isolation, injection
//! resistance, and cost/time budgets before any query executes, and
//! deduplicating identical concurrent requests through a
//! stampede-protected result cache.

pub mod cache;
pub mod config;
pub mod error;
pub mod execution;
pub mod firewall;
pub mod observability;
pub mod ontology;
pub mod plan;
pub mod security;
pub mod verify;

pub use cache::{generate_cache_key, CacheKeyParams, CacheStore, MemoryCacheStore, ResultCache};
pub use config::SentinelConfig;
pub use error::{Result, SentinelError};
pub use execution::{
    ColumnStoreBackend, ConnectionStatus, ExecutionOptions, QueryBackend, QueryExecutionResult,
    QueryExecutor, RowStoreBackend,
};
pub use firewall::{QueryRequest, QuerySentinel};
pub use ontology::{MetricDefinition, Ontology, Tier, TierBudget};
pub use plan::{Aggregation, DimensionSpec, FilterSpec, JoinSpec, MetricSpec, QueryPlan, TimeRange};
pub use security::{build_security_context, GuardrailValidator, Identity, Role, SecurityContext};
pub use verify::{PlanSafetyVerifier, Severity, VerificationResult, Violation};
