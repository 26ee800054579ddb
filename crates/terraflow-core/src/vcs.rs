//! Change-request service trait.
//!
//! One implementation per hosting provider. The orchestrator depends only
//! on this capability set and never branches on provider identity.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::Result;

/// A comment on a change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comment {
    /// Provider-specific comment identifier.
    pub id: String,
    pub body: String,
}

/// Trait for change-request (pull/merge request) services.
#[async_trait]
pub trait VcsService: Send + Sync {
    /// Post a new comment, returning it with its assigned id.
    async fn post_comment(&self, request_number: u64, body: &str) -> Result<Comment>;

    /// Replace the body of an existing comment.
    async fn update_comment(&self, comment_id: &str, body: &str) -> Result<()>;

    /// All comments on a change request, oldest first.
    async fn list_comments(&self, request_number: u64) -> Result<Vec<Comment>>;

    /// Merge the change request.
    async fn merge(&self, request_number: u64) -> Result<()>;

    /// Paths touched by the change request.
    async fn changed_files(&self, request_number: u64) -> Result<Vec<String>>;
}
