//! Plan artifact storage abstraction.
//!
//! The apply stage must consume the exact artifact produced by the
//! preceding plan stage for the same request, never a freshly recomputed
//! plan. Storage keys are namespaced by request identity so re-planning
//! the same change request overwrites, while two concurrent requests
//! touching the same project never collide.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Key for storing/retrieving a plan artifact.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanKey {
    /// Repository identifier.
    pub namespace: String,
    /// Project name.
    pub project: String,
    /// Request identity ("pr-123" or "run-<uuid>").
    pub request: String,
}

impl std::fmt::Display for PlanKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.project, self.request)
    }
}

/// A stored plan artifact. Immutable once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanArtifact {
    pub key: PlanKey,
    /// Serialized plan as produced by the provisioning tool.
    pub data: Vec<u8>,
    /// SHA-256 of `data`, hex-encoded.
    pub checksum: String,
    pub created_at: DateTime<Utc>,
}

/// Trait for plan artifact storage backends.
#[async_trait]
pub trait PlanStorage: Send + Sync {
    /// Store an artifact, overwriting any previous artifact for the key.
    async fn store(&self, key: &PlanKey, data: &[u8]) -> Result<PlanArtifact>;

    /// Retrieve the artifact for a key. `None` when no artifact exists;
    /// the caller decides whether that is an error.
    async fn retrieve(&self, key: &PlanKey) -> Result<Option<PlanArtifact>>;

    /// Delete the artifact for a key, if present.
    async fn delete(&self, key: &PlanKey) -> Result<()>;
}
