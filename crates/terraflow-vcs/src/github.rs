//! GitHub implementation of the change-request service.

use async_trait::async_trait;
use serde::Deserialize;
use terraflow_core::vcs::{Comment, VcsService};
use terraflow_core::{Error, Result};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = "Terraflow";

/// GitHub API client scoped to one repository.
pub struct GitHubService {
    client: reqwest::Client,
    access_token: String,
    api_base: String,
    /// "owner/repo"
    repo: String,
}

#[derive(Debug, Deserialize)]
struct IssueComment {
    id: i64,
    body: String,
}

#[derive(Debug, Deserialize)]
struct PullRequestFile {
    filename: String,
}

impl GitHubService {
    pub fn new(access_token: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token: access_token.into(),
            api_base: API_BASE.to_string(),
            repo: repo.into(),
        }
    }

    /// Point the client at a GitHub Enterprise instance.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
    }

    async fn check_status(response: reqwest::Response, context: &str) -> Result<reqwest::Response> {
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(Error::Vcs(format!("{context} ({status}): {text}")))
    }
}

#[async_trait]
impl VcsService for GitHubService {
    async fn post_comment(&self, request_number: u64, body: &str) -> Result<Comment> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            self.api_base, self.repo, request_number
        );

        let response = self
            .request(reqwest::Method::POST, url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| Error::Vcs(e.to_string()))?;

        let created: IssueComment = Self::check_status(response, "failed to post comment")
            .await?
            .json()
            .await
            .map_err(|e| Error::Vcs(e.to_string()))?;

        Ok(Comment {
            id: created.id.to_string(),
            body: created.body,
        })
    }

    async fn update_comment(&self, comment_id: &str, body: &str) -> Result<()> {
        let url = format!(
            "{}/repos/{}/issues/comments/{}",
            self.api_base, self.repo, comment_id
        );

        let response = self
            .request(reqwest::Method::PATCH, url)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| Error::Vcs(e.to_string()))?;

        Self::check_status(response, "failed to update comment").await?;
        Ok(())
    }

    async fn list_comments(&self, request_number: u64) -> Result<Vec<Comment>> {
        let mut comments = Vec::new();
        let mut page = 1u32;

        loop {
            let url = format!(
                "{}/repos/{}/issues/{}/comments?per_page=100&page={}",
                self.api_base, self.repo, request_number, page
            );

            let response = self
                .request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(|e| Error::Vcs(e.to_string()))?;

            let batch: Vec<IssueComment> = Self::check_status(response, "failed to list comments")
                .await?
                .json()
                .await
                .map_err(|e| Error::Vcs(e.to_string()))?;

            let done = batch.len() < 100;
            comments.extend(batch.into_iter().map(|c| Comment {
                id: c.id.to_string(),
                body: c.body,
            }));

            if done {
                return Ok(comments);
            }
            page += 1;
        }
    }

    async fn merge(&self, request_number: u64) -> Result<()> {
        let url = format!(
            "{}/repos/{}/pulls/{}/merge",
            self.api_base, self.repo, request_number
        );

        let response = self
            .request(reqwest::Method::PUT, url)
            .json(&serde_json::json!({ "merge_method": "squash" }))
            .send()
            .await
            .map_err(|e| Error::Vcs(e.to_string()))?;

        Self::check_status(response, "failed to merge pull request").await?;
        Ok(())
    }

    async fn changed_files(&self, request_number: u64) -> Result<Vec<String>> {
        let mut files = Vec::new();
        let mut page = 1u32;

        loop {
            let url = format!(
                "{}/repos/{}/pulls/{}/files?per_page=100&page={}",
                self.api_base, self.repo, request_number, page
            );

            let response = self
                .request(reqwest::Method::GET, url)
                .send()
                .await
                .map_err(|e| Error::Vcs(e.to_string()))?;

            let batch: Vec<PullRequestFile> =
                Self::check_status(response, "failed to list pull request files")
                    .await?
                    .json()
                    .await
                    .map_err(|e| Error::Vcs(e.to_string()))?;

            let done = batch.len() < 100;
            files.extend(batch.into_iter().map(|f| f.filename));

            if done {
                return Ok(files);
            }
            page += 1;
        }
    }
}
