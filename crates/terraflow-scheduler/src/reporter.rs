//! Progress reporting back to the originating change request.
//!
//! A failed report is logged and swallowed: failing to report must not be
//! mistaken for the underlying operation having failed.

use async_trait::async_trait;
use std::sync::Arc;
use terraflow_core::Result;
use terraflow_core::job::{Job, JobResult, JobState};
use terraflow_core::vcs::VcsService;
use tracing::{info, warn};

/// Marker embedded in the rolling comment so it can be found again.
const REPORT_MARKER: &str = "<!-- terraflow:report -->";

/// How a report body lands on the change request.
#[async_trait]
pub trait ReportStrategy: Send + Sync {
    async fn publish(&self, vcs: &dyn VcsService, request_number: u64, body: &str) -> Result<()>;
}

/// Post a new comment for every report.
pub struct CommentPerRun;

#[async_trait]
impl ReportStrategy for CommentPerRun {
    async fn publish(&self, vcs: &dyn VcsService, request_number: u64, body: &str) -> Result<()> {
        vcs.post_comment(request_number, body).await?;
        Ok(())
    }
}

/// Maintain one rolling comment, appending each report to it.
pub struct SingleComment;

#[async_trait]
impl ReportStrategy for SingleComment {
    async fn publish(&self, vcs: &dyn VcsService, request_number: u64, body: &str) -> Result<()> {
        let existing = vcs
            .list_comments(request_number)
            .await?
            .into_iter()
            .find(|c| c.body.contains(REPORT_MARKER));

        match existing {
            Some(comment) => {
                let updated = format!("{}\n\n{}", comment.body, body);
                vcs.update_comment(&comment.id, &updated).await
            }
            None => {
                let initial = format!("{REPORT_MARKER}\n{body}");
                vcs.post_comment(request_number, &initial).await?;
                Ok(())
            }
        }
    }
}

/// Reports job and batch outcomes on the originating change request.
/// Jobs without a pull request (direct commits, drift, manual runs) are
/// reported to the log only.
pub struct Reporter {
    vcs: Option<Arc<dyn VcsService>>,
    strategy: Arc<dyn ReportStrategy>,
}

impl Reporter {
    pub fn new(vcs: Arc<dyn VcsService>, strategy: Arc<dyn ReportStrategy>) -> Self {
        Self {
            vcs: Some(vcs),
            strategy,
        }
    }

    /// A reporter that only logs; used when no change-request service is
    /// configured.
    pub fn log_only() -> Self {
        Self {
            vcs: None,
            strategy: Arc::new(CommentPerRun),
        }
    }

    /// Report one job's terminal state. Never fails the job.
    pub async fn report_job(&self, job: &Job, result: &JobResult) {
        info!(
            project = %result.project_name,
            state = %result.state,
            summary = %result.summary,
            "job finished"
        );

        let body = format_job_report(job, result);
        self.publish(job.pull_request_number, &body).await;
    }

    /// Report the batch aggregate. Never fails the batch.
    pub async fn report_batch(&self, request_number: Option<u64>, results: &[JobResult]) {
        let body = format_batch_report(results);
        self.publish(request_number, &body).await;
    }

    async fn publish(&self, request_number: Option<u64>, body: &str) {
        let (Some(vcs), Some(number)) = (&self.vcs, request_number) else {
            return;
        };

        if let Err(error) = self.strategy.publish(vcs.as_ref(), number, body).await {
            warn!(request = number, error = %error, "failed to report to change request");
        }
    }
}

/// Render one job's report body.
pub fn format_job_report(job: &Job, result: &JobResult) -> String {
    let status = match result.state {
        JobState::Done => "succeeded",
        JobState::Blocked => "blocked",
        _ => "failed",
    };

    let mut body = format!("### {} {status}\n", job.project_name);
    body.push_str(&format!("_{}_\n", result.summary));

    for stage in &result.stages {
        let marker = if stage.success { "ok" } else { "failed" };
        body.push_str(&format!(
            "\n<details><summary>{} ({marker})</summary>\n\n```\n{}\n```\n</details>\n",
            stage.name,
            stage.output.trim_end()
        ));
    }

    if let Some(error) = &result.error {
        body.push_str(&format!("\n```\n{}\n```\n", error.trim_end()));
    }

    body
}

/// Render the batch summary body.
pub fn format_batch_report(results: &[JobResult]) -> String {
    let mut body = String::from("### Batch summary\n\n| project | state | summary |\n|---|---|---|\n");
    for result in results {
        body.push_str(&format!(
            "| {} | {} | {} |\n",
            result.project_name, result.state, result.summary
        ));
    }
    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{FakeVcs, make_job};
    use terraflow_core::Error;
    use terraflow_core::job::JobCommand;

    #[tokio::test]
    async fn comment_per_run_posts_new_comments() {
        let vcs = FakeVcs::default();
        let strategy = CommentPerRun;

        strategy.publish(&vcs, 1, "first").await.unwrap();
        strategy.publish(&vcs, 1, "second").await.unwrap();

        assert_eq!(vcs.bodies().await.len(), 2);
    }

    #[tokio::test]
    async fn single_comment_appends_to_rolling_comment() {
        let vcs = FakeVcs::default();
        let strategy = SingleComment;

        strategy.publish(&vcs, 1, "first").await.unwrap();
        strategy.publish(&vcs, 1, "second").await.unwrap();

        let bodies = vcs.bodies().await;
        assert_eq!(bodies.len(), 1);
        assert!(bodies[0].contains(REPORT_MARKER));
        assert!(bodies[0].contains("first"));
        assert!(bodies[0].contains("second"));
    }

    struct FailingStrategy;

    #[async_trait]
    impl ReportStrategy for FailingStrategy {
        async fn publish(
            &self,
            _vcs: &dyn VcsService,
            _request_number: u64,
            _body: &str,
        ) -> Result<()> {
            Err(Error::Reporting("comment service down".to_string()))
        }
    }

    #[tokio::test]
    async fn report_failure_is_swallowed() {
        let vcs = Arc::new(FakeVcs::default());
        let reporter = Reporter::new(vcs, Arc::new(FailingStrategy));

        let job = make_job("vpc", &[JobCommand::Plan]);
        let result = JobResult::blocked("vpc", "someone-else");

        // Must neither panic nor surface the error; the job outcome stands.
        reporter.report_job(&job, &result).await;
    }
}
