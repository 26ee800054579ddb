//! Static policy rules.
//!
//! For single-tenant setups and tests: an allow-all default, or an
//! explicit allow list of actors.

use async_trait::async_trait;
use terraflow_core::policy::{PolicyChecker, PolicyDecision};

pub enum StaticPolicyChecker {
    AllowAll,
    DenyAll { reason: String },
    AllowedActors(Vec<String>),
}

impl StaticPolicyChecker {
    pub fn allow_all() -> Self {
        StaticPolicyChecker::AllowAll
    }

    pub fn deny_all(reason: impl Into<String>) -> Self {
        StaticPolicyChecker::DenyAll {
            reason: reason.into(),
        }
    }

    pub fn allowed_actors(actors: impl IntoIterator<Item = String>) -> Self {
        StaticPolicyChecker::AllowedActors(actors.into_iter().collect())
    }
}

#[async_trait]
impl PolicyChecker for StaticPolicyChecker {
    async fn check(&self, actor: &str, project: &str, _plan_summary: &str) -> PolicyDecision {
        match self {
            StaticPolicyChecker::AllowAll => PolicyDecision::Allow,
            StaticPolicyChecker::DenyAll { reason } => PolicyDecision::deny(reason.clone()),
            StaticPolicyChecker::AllowedActors(actors) => {
                if actors.iter().any(|a| a == actor) {
                    PolicyDecision::Allow
                } else {
                    PolicyDecision::deny(format!("actor {actor} may not apply {project}"))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn allow_list_gates_by_actor() {
        let checker = StaticPolicyChecker::allowed_actors(vec!["alice".to_string()]);

        assert!(checker.check("alice", "vpc", "").await.is_allowed());

        let decision = checker.check("mallory", "vpc", "").await;
        assert!(matches!(decision, PolicyDecision::Deny { .. }));
    }
}
