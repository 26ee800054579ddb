//! In-memory plan storage for tests and ephemeral runs.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use terraflow_core::Result;
use terraflow_core::plan::{PlanArtifact, PlanKey, PlanStorage};
use tokio::sync::Mutex;

use crate::checksum;

#[derive(Default)]
pub struct MemoryPlanStorage {
    artifacts: Mutex<HashMap<PlanKey, PlanArtifact>>,
}

impl MemoryPlanStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlanStorage for MemoryPlanStorage {
    async fn store(&self, key: &PlanKey, data: &[u8]) -> Result<PlanArtifact> {
        let artifact = PlanArtifact {
            key: key.clone(),
            data: data.to_vec(),
            checksum: checksum(data),
            created_at: Utc::now(),
        };
        let mut artifacts = self.artifacts.lock().await;
        artifacts.insert(key.clone(), artifact.clone());
        Ok(artifact)
    }

    async fn retrieve(&self, key: &PlanKey) -> Result<Option<PlanArtifact>> {
        let artifacts = self.artifacts.lock().await;
        Ok(artifacts.get(key).cloned())
    }

    async fn delete(&self, key: &PlanKey) -> Result<()> {
        let mut artifacts = self.artifacts.lock().await;
        artifacts.remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn two_requests_do_not_collide() {
        let storage = MemoryPlanStorage::new();
        let key_a = PlanKey {
            namespace: "org/repo".to_string(),
            project: "vpc".to_string(),
            request: "pr-1".to_string(),
        };
        let key_b = PlanKey {
            request: "pr-2".to_string(),
            ..key_a.clone()
        };

        storage.store(&key_a, b"a").await.unwrap();
        storage.store(&key_b, b"b").await.unwrap();

        assert_eq!(storage.retrieve(&key_a).await.unwrap().unwrap().data, b"a");
        assert_eq!(storage.retrieve(&key_b).await.unwrap().unwrap().data, b"b");
    }
}
