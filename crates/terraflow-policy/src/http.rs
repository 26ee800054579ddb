//! Policy checker backed by an HTTP policy service.
//!
//! Fail-closed: any transport failure, non-success status or unparseable
//! response is a denial. The safety property this gate protects is not
//! negotiable on a flaky network.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use terraflow_core::policy::{PolicyChecker, PolicyDecision};
use tracing::warn;

pub struct HttpPolicyChecker {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
}

#[derive(Serialize)]
struct PolicyRequest<'a> {
    actor: &'a str,
    project: &'a str,
    plan_summary: &'a str,
}

#[derive(Deserialize)]
struct PolicyResponse {
    allow: bool,
    #[serde(default)]
    reason: Option<String>,
}

impl HttpPolicyChecker {
    pub fn new(endpoint: impl Into<String>, token: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            token,
        }
    }

    async fn query(&self, actor: &str, project: &str, plan_summary: &str) -> Result<PolicyResponse, String> {
        let mut request = self.client.post(&self.endpoint).json(&PolicyRequest {
            actor,
            project,
            plan_summary,
        });
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let response = request.send().await.map_err(|e| e.to_string())?;

        if !response.status().is_success() {
            return Err(format!("policy service returned {}", response.status()));
        }

        response.json().await.map_err(|e| e.to_string())
    }
}

#[async_trait]
impl PolicyChecker for HttpPolicyChecker {
    async fn check(&self, actor: &str, project: &str, plan_summary: &str) -> PolicyDecision {
        match self.query(actor, project, plan_summary).await {
            Ok(PolicyResponse { allow: true, .. }) => PolicyDecision::Allow,
            Ok(PolicyResponse { allow: false, reason }) => PolicyDecision::deny(
                reason.unwrap_or_else(|| format!("actor {actor} may not apply {project}")),
            ),
            Err(error) => {
                warn!(actor, project, error = %error, "policy service unreachable, denying");
                PolicyDecision::deny(format!("policy service unreachable: {error}"))
            }
        }
    }
}
