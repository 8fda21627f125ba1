//! Security Module
//!
//! Per-request authorization contexts and static query guardrails.

pub mod guardrails;
pub mod policy;

pub use guardrails::GuardrailValidator;
pub use policy::{build_security_context, Identity, RateLimits, Role, SecurityContext, TableScope};
