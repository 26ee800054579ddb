//! Resource locking for Terraflow.
//!
//! The lock store is the single source of truth for "is this project
//! currently being mutated". The manager derives resource keys from job
//! identity and delegates acquisition to a pluggable [`LockStore`].

pub mod memory;
pub mod postgres;

pub use memory::MemoryLockStore;
pub use postgres::PgLockStore;

use std::sync::Arc;
use terraflow_core::Result;
use terraflow_core::lock::{LockOutcome, LockStore, resource_key};
use tracing::debug;

/// Acquires and releases the per-project mutual exclusion lock.
#[derive(Clone)]
pub struct LockManager {
    store: Arc<dyn LockStore>,
}

impl LockManager {
    pub fn new(store: Arc<dyn LockStore>) -> Self {
        Self { store }
    }

    /// Key of the lock protecting one project's state.
    pub fn key_for(namespace: &str, project: &str, workspace: &str) -> String {
        resource_key(namespace, project, workspace)
    }

    /// Attempt to acquire the lock. A denial is data, not an error; the
    /// caller decides whether a held lock blocks the job.
    pub async fn acquire(&self, resource: &str, holder: &str) -> Result<LockOutcome> {
        let outcome = self.store.try_lock(resource, holder).await?;
        match &outcome {
            LockOutcome::Granted => debug!(resource, holder, "lock acquired"),
            LockOutcome::Held { holder: other } => {
                debug!(resource, held_by = %other, "lock denied")
            }
        }
        Ok(outcome)
    }

    /// Release the lock held by `holder`. Returns false when the lock was
    /// not held by them.
    pub async fn release(&self, resource: &str, holder: &str) -> Result<bool> {
        let released = self.store.unlock(resource, holder).await?;
        debug!(resource, holder, released, "lock released");
        Ok(released)
    }

    /// Current holder of a resource's lock.
    pub async fn holder(&self, resource: &str) -> Result<Option<String>> {
        self.store.holder(resource).await
    }

    /// Operator recovery: release regardless of holder.
    pub async fn force_unlock(&self, resource: &str) -> Result<bool> {
        self.store.force_unlock(resource).await
    }
}
