//! Policy checker trait.
//!
//! The orchestrator treats policy as a synchronous gate before an apply.
//! The trait returns a decision rather than a `Result`: an implementation
//! that cannot reach its policy source has nowhere to put the failure
//! except `Deny` (fail-closed).

use async_trait::async_trait;

/// Outcome of a policy check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyDecision {
    Allow,
    Deny { reason: String },
}

impl PolicyDecision {
    pub fn deny(reason: impl Into<String>) -> Self {
        PolicyDecision::Deny {
            reason: reason.into(),
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, PolicyDecision::Allow)
    }
}

/// Trait for apply-policy checkers.
#[async_trait]
pub trait PolicyChecker: Send + Sync {
    /// May `actor` apply `project`'s plan? `plan_summary` is the
    /// human-readable summary of the proposed change.
    async fn check(&self, actor: &str, project: &str, plan_summary: &str) -> PolicyDecision;
}
