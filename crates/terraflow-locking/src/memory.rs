//! In-process lock store.
//!
//! Suitable for tests and single-runner setups only: it cannot exclude a
//! concurrent orchestrator on another machine.

use async_trait::async_trait;
use std::collections::HashMap;
use terraflow_core::Result;
use terraflow_core::lock::{LockOutcome, LockStore};
use tokio::sync::Mutex;

#[derive(Default)]
pub struct MemoryLockStore {
    locks: Mutex<HashMap<String, String>>,
}

impl MemoryLockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockStore for MemoryLockStore {
    async fn try_lock(&self, resource: &str, holder: &str) -> Result<LockOutcome> {
        let mut locks = self.locks.lock().await;
        match locks.get(resource) {
            Some(current) if current == holder => Ok(LockOutcome::Granted),
            Some(current) => Ok(LockOutcome::Held {
                holder: current.clone(),
            }),
            None => {
                locks.insert(resource.to_string(), holder.to_string());
                Ok(LockOutcome::Granted)
            }
        }
    }

    async fn unlock(&self, resource: &str, holder: &str) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        match locks.get(resource) {
            Some(current) if current == holder => {
                locks.remove(resource);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn holder(&self, resource: &str) -> Result<Option<String>> {
        let locks = self.locks.lock().await;
        Ok(locks.get(resource).cloned())
    }

    async fn force_unlock(&self, resource: &str) -> Result<bool> {
        let mut locks = self.locks.lock().await;
        Ok(locks.remove(resource).is_some())
    }
}
