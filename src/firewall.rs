//! Query Firewall
//!
//! Composes the pipeline: security context, guardrail validation, plan
//! verification, stampede-protected result cache, and the executor.
//! The single logical operation exposed to callers is "execute this
//! plan/query for this tenant"; this subsystem never writes.

use crate::cache::key::{generate_cache_key, CacheKeyParams};
use crate::cache::result_cache::ResultCache;
use crate::cache::store::CacheStore;
use crate::config::SentinelConfig;
use crate::error::{Result, SentinelError};
use crate::execution::executor::{ExecutionOptions, QueryExecutionResult, QueryExecutor};
use crate::ontology::{Ontology, Tier};
use crate::plan::QueryPlan;
use crate::security::guardrails::GuardrailValidator;
use crate::security::policy::{build_security_context, Identity, Role, SecurityContext};
use crate::verify::plan_verifier::PlanSafetyVerifier;
use crate::verify::result::{Severity, VerificationResult, Violation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// One incoming request, as assembled by the (out-of-scope) translator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryRequest {
    /// Original natural-language question
    pub question: String,
    pub tenant_id: String,
    pub role: Role,
    pub plan: QueryPlan,
    /// Rendered SQL for the row store
    pub sql: Option<String>,
    /// Rendered analytical-query text for the columnar store
    pub analytical_query: Option<String>,
    pub tier: Tier,
    pub template_id: Option<String>,
    pub request_id: Option<String>,
}

/// The firewall pipeline
pub struct QuerySentinel {
    config: SentinelConfig,
    ontology: Ontology,
    guardrails: GuardrailValidator,
    cache: ResultCache,
    executor: QueryExecutor,
}

impl QuerySentinel {
    pub fn new(
        config: SentinelConfig,
        ontology: Ontology,
        cache_store: Arc<dyn CacheStore>,
        executor: QueryExecutor,
    ) -> Self {
        let guardrails = GuardrailValidator::new(&config);
        let cache = ResultCache::new(cache_store, &config);
        Self {
            config,
            ontology,
            guardrails,
            cache,
            executor,
        }
    }

    /// Run guardrail and plan verification without executing. Both must
    /// pass before a request may reach the cache or a backend.
    pub fn verify(&self, request: &QueryRequest) -> VerificationResult {
        let ctx = self.context_for(request);
        self.verify_with_context(request, &ctx)
    }

    /// Validate and execute a request, serving from cache when possible.
    pub async fn execute(&self, request: &QueryRequest) -> Result<QueryExecutionResult> {
        let ctx = self.context_for(request);
        let verification = self.verify_with_context(request, &ctx);
        if !verification.valid {
            return Err(SentinelError::Validation {
                violations: verification.violations,
            });
        }

        let key = generate_cache_key(&CacheKeyParams {
            question: &request.question,
            tenant_id: &request.tenant_id,
            time_range: request.plan.time_range.as_ref(),
            filters: &request.plan.filters,
        });

        let opts = ExecutionOptions {
            timeout_ms: self.config.default_timeout_ms,
            max_rows: self.config.default_max_rows,
            request_id: request.request_id.clone(),
        };

        let (value, cached) = self
            .cache
            .with_stampede_protection(
                &key,
                Duration::from_secs(self.config.cache_ttl_secs),
                request.template_id.as_deref(),
                || async {
                    let result = self
                        .executor
                        .execute(
                            request.sql.as_deref(),
                            request.analytical_query.as_deref(),
                            &opts,
                        )
                        .await?;
                    Ok(serde_json::to_value(result)?)
                },
            )
            .await?;

        let mut result: QueryExecutionResult = serde_json::from_value(value)?;
        result.metadata.cached = cached;
        result.metadata.request_id = request.request_id.clone();

        info!(
            tenant = %request.tenant_id,
            cached,
            rows = result.metadata.row_count,
            backend = %result.metadata.backend,
            "Request served"
        );

        Ok(result)
    }

    /// The result cache, for invalidation and instrumentation.
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// The executor, for connectivity probes.
    pub fn executor(&self) -> &QueryExecutor {
        &self.executor
    }

    fn context_for(&self, request: &QueryRequest) -> SecurityContext {
        build_security_context(&Identity {
            tenant_id: request.tenant_id.clone(),
            role: request.role,
        })
    }

    fn verify_with_context(
        &self,
        request: &QueryRequest,
        ctx: &SecurityContext,
    ) -> VerificationResult {
        let mut merged = VerificationResult::passed();

        // The plan must claim the same tenant as the request; a
        // translator bug here must never reach the cache key.
        if request.plan.tenant_id != request.tenant_id {
            merged.push_violation(Violation::new(
                "TNT_001",
                Severity::Critical,
                format!(
                    "Plan tenant '{}' does not match request tenant '{}'",
                    request.plan.tenant_id, request.tenant_id
                ),
            ));
        }

        if let Some(sql) = &request.sql {
            merged.merge(self.guardrails.verify(sql, ctx));
        }
        if let Some(analytical) = &request.analytical_query {
            merged.merge(self.guardrails.verify(analytical, ctx));
        }

        let verifier = PlanSafetyVerifier::new(&self.ontology, &self.config);
        merged.merge(verifier.verify(&request.plan, request.tier));

        merged
    }
}
