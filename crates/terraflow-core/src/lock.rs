//! Lock store abstraction.
//!
//! A lock protects one project's infrastructure state from concurrent
//! mutation. The store is external and shared: acquisition must be atomic
//! across orchestrator instances, not just within one process.

use async_trait::async_trait;

use crate::Result;

/// Outcome of a lock acquisition attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Granted,
    /// Denied; the resource is held by another actor.
    Held { holder: String },
}

impl LockOutcome {
    pub fn is_granted(&self) -> bool {
        matches!(self, LockOutcome::Granted)
    }
}

/// Resource key for a project's lock.
///
/// Namespaced so two repositories with the same project name never collide;
/// the workspace is included only when it is not the default one, matching
/// how state backends separate workspaces.
pub fn resource_key(namespace: &str, project: &str, workspace: &str) -> String {
    if workspace.is_empty() || workspace == "default" {
        format!("{namespace}#{project}")
    } else {
        format!("{namespace}#{project}#{workspace}")
    }
}

/// Trait for mutual-exclusion lock stores.
///
/// At most one holder per resource at any instant, system-wide. A store
/// grants re-acquisition by the current holder so a re-triggered run for
/// the same request does not deadlock on its own lock.
#[async_trait]
pub trait LockStore: Send + Sync {
    /// Attempt to acquire the lock for `resource` on behalf of `holder`.
    async fn try_lock(&self, resource: &str, holder: &str) -> Result<LockOutcome>;

    /// Release the lock if `holder` owns it. Returns false when the lock
    /// was not held by `holder` (already released or owned elsewhere).
    async fn unlock(&self, resource: &str, holder: &str) -> Result<bool>;

    /// Current holder of the lock, if any.
    async fn holder(&self, resource: &str) -> Result<Option<String>>;

    /// Release the lock regardless of holder. Operator recovery path for
    /// a crashed run; never called by the job runner.
    async fn force_unlock(&self, resource: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resource_key_omits_default_workspace() {
        assert_eq!(resource_key("org/repo", "vpc", "default"), "org/repo#vpc");
        assert_eq!(resource_key("org/repo", "vpc", ""), "org/repo#vpc");
    }

    #[test]
    fn resource_key_includes_named_workspace() {
        assert_eq!(
            resource_key("org/repo", "vpc", "staging"),
            "org/repo#vpc#staging"
        );
    }
}
