//! Verification Module
//!
//! Shared verification result types and the structural plan verifier.

pub mod plan_verifier;
pub mod result;

pub use plan_verifier::PlanSafetyVerifier;
pub use result::{Severity, VerificationResult, Violation};
