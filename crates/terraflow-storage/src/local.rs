//! Filesystem plan storage.
//!
//! Layout: `<root>/<namespace>/<project>/<request>.tfplan`, with the
//! artifact checksum in a `.sha256` sidecar. Namespace separators are
//! sanitized so "org/repo" stays one directory level.

use async_trait::async_trait;
use chrono::Utc;
use std::path::{Path, PathBuf};
use terraflow_core::plan::{PlanArtifact, PlanKey, PlanStorage};
use terraflow_core::{Error, Result};
use tracing::debug;

use crate::checksum;

pub struct LocalPlanStorage {
    root: PathBuf,
}

impl LocalPlanStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn plan_path(&self, key: &PlanKey) -> PathBuf {
        self.root
            .join(sanitize(&key.namespace))
            .join(sanitize(&key.project))
            .join(format!("{}.tfplan", sanitize(&key.request)))
    }

    fn checksum_path(&self, key: &PlanKey) -> PathBuf {
        self.plan_path(key).with_extension("tfplan.sha256")
    }
}

fn sanitize(part: &str) -> String {
    part.replace(['/', '\\'], "-")
}

fn io_err(context: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Storage(format!("{context} {}: {e}", path.display()))
}

#[async_trait]
impl PlanStorage for LocalPlanStorage {
    async fn store(&self, key: &PlanKey, data: &[u8]) -> Result<PlanArtifact> {
        let path = self.plan_path(key);
        let parent = path.parent().expect("plan path always has a parent");
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| io_err("create", parent, e))?;

        let digest = checksum(data);
        tokio::fs::write(&path, data)
            .await
            .map_err(|e| io_err("write", &path, e))?;
        let digest_path = self.checksum_path(key);
        tokio::fs::write(&digest_path, &digest)
            .await
            .map_err(|e| io_err("write", &digest_path, e))?;

        debug!(key = %key, path = %path.display(), "plan artifact stored");

        Ok(PlanArtifact {
            key: key.clone(),
            data: data.to_vec(),
            checksum: digest,
            created_at: Utc::now(),
        })
    }

    async fn retrieve(&self, key: &PlanKey) -> Result<Option<PlanArtifact>> {
        let path = self.plan_path(key);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(io_err("read", &path, e)),
        };

        let digest = checksum(&data);
        let digest_path = self.checksum_path(key);
        match tokio::fs::read_to_string(&digest_path).await {
            Ok(stored) if stored.trim() != digest => {
                return Err(Error::Storage(format!(
                    "plan artifact for {key} failed checksum verification"
                )));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err("read", &digest_path, e)),
        }

        let created_at = tokio::fs::metadata(&path)
            .await
            .ok()
            .and_then(|m| m.modified().ok())
            .map(chrono::DateTime::from)
            .unwrap_or_else(Utc::now);

        Ok(Some(PlanArtifact {
            key: key.clone(),
            data,
            checksum: digest,
            created_at,
        }))
    }

    async fn delete(&self, key: &PlanKey) -> Result<()> {
        for path in [self.plan_path(key), self.checksum_path(key)] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err("delete", &path, e)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> PlanKey {
        PlanKey {
            namespace: "org/repo".to_string(),
            project: "vpc".to_string(),
            request: "pr-7".to_string(),
        }
    }

    #[tokio::test]
    async fn store_then_retrieve() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalPlanStorage::new(dir.path());

        let stored = storage.store(&key(), b"plan-bytes").await.unwrap();
        let retrieved = storage.retrieve(&key()).await.unwrap().unwrap();

        assert_eq!(retrieved.data, b"plan-bytes");
        assert_eq!(retrieved.checksum, stored.checksum);
    }

    #[tokio::test]
    async fn store_overwrites_previous_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalPlanStorage::new(dir.path());

        storage.store(&key(), b"first").await.unwrap();
        storage.store(&key(), b"second").await.unwrap();

        let retrieved = storage.retrieve(&key()).await.unwrap().unwrap();
        assert_eq!(retrieved.data, b"second");
    }

    #[tokio::test]
    async fn missing_artifact_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalPlanStorage::new(dir.path());

        assert!(storage.retrieve(&key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn corrupted_artifact_fails_checksum() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalPlanStorage::new(dir.path());

        storage.store(&key(), b"plan-bytes").await.unwrap();

        let path = storage.plan_path(&key());
        tokio::fs::write(&path, b"tampered").await.unwrap();

        let result = storage.retrieve(&key()).await;
        assert!(matches!(result, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn delete_then_retrieve_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalPlanStorage::new(dir.path());

        storage.store(&key(), b"plan-bytes").await.unwrap();
        storage.delete(&key()).await.unwrap();

        assert!(storage.retrieve(&key()).await.unwrap().is_none());
    }
}
