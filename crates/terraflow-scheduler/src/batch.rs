//! Batch execution: level-parallel scheduling and result aggregation.

use terraflow_config::DependencyGraph;
use terraflow_core::job::{BatchResult, Job, JobResult, JobState};
use terraflow_core::{Result, RunId};
use tokio::task::JoinSet;
use tracing::{error, info};

use crate::aggregate::aggregate_results;
use crate::runner::JobRunner;
use crate::scheduler::schedule;

/// Runs one batch to completion: order the jobs, execute level by level,
/// report each outcome and fold the aggregate.
pub struct BatchRunner {
    runner: JobRunner,
}

impl BatchRunner {
    pub fn new(runner: JobRunner) -> Self {
        Self { runner }
    }

    /// Execute every job and return the aggregate plus per-job results in
    /// scheduler total order.
    ///
    /// Jobs within a dependency level run concurrently; a job whose
    /// upstream did not succeed is failed with that reason without ever
    /// starting. A configuration error (residual cycle) aborts before any
    /// job runs.
    pub async fn run_batch(
        &self,
        jobs: Vec<Job>,
        graph: &DependencyGraph,
        covers_all_impacted_projects: bool,
    ) -> Result<(BatchResult, Vec<JobResult>)> {
        let run_id = RunId::new();
        let scheduled = schedule(jobs, graph)?;

        info!(
            run = %run_id,
            jobs = scheduled.jobs.len(),
            levels = scheduled.levels.len(),
            "starting batch"
        );

        let mut results: Vec<Option<JobResult>> =
            (0..scheduled.jobs.len()).map(|_| None).collect();

        for level in &scheduled.levels {
            let mut running = JoinSet::new();

            for &idx in level {
                let blocked_on = scheduled.deps[idx].iter().copied().find(|&dep| {
                    !results[dep]
                        .as_ref()
                        .map(JobResult::is_success)
                        .unwrap_or(false)
                });

                if let Some(dep) = blocked_on {
                    let job = &scheduled.jobs[idx];
                    let result =
                        upstream_failure(job, &scheduled.jobs[dep].project_name);
                    self.runner.reporter().report_job(job, &result).await;
                    results[idx] = Some(result);
                    continue;
                }

                let runner = self.runner.clone();
                let job = scheduled.jobs[idx].clone();
                running.spawn(async move {
                    let result = runner.run_job(&job, run_id).await;
                    (idx, result)
                });
            }

            while let Some(joined) = running.join_next().await {
                match joined {
                    Ok((idx, result)) => results[idx] = Some(result),
                    Err(e) => error!(error = %e, "job task failed"),
                }
            }

            // A job task that died without producing a result still needs a
            // terminal outcome.
            for &idx in level {
                if results[idx].is_none() {
                    results[idx] = Some(upstream_failure(
                        &scheduled.jobs[idx],
                        "internal: job task died",
                    ));
                }
            }
        }

        let results: Vec<JobResult> = results.into_iter().flatten().collect();
        let batch = aggregate_results(&results, covers_all_impacted_projects);

        let request = scheduled.jobs.first().and_then(|j| j.pull_request_number);
        self.runner.reporter().report_batch(request, &results).await;

        info!(
            run = %run_id,
            all_applies_success = batch.all_applies_success,
            at_least_one_apply = batch.at_least_one_apply,
            covers_all_impacted_projects = batch.covers_all_impacted_projects,
            "batch finished"
        );

        Ok((batch, results))
    }
}

fn upstream_failure(job: &Job, upstream: &str) -> JobResult {
    JobResult {
        project_name: job.project_name.clone(),
        state: JobState::Failed,
        stages: vec![],
        apply_attempted: job.requests_apply(),
        apply_succeeded: false,
        summary: format!("skipped: upstream failure ({upstream})"),
        error: Some(format!("upstream project '{upstream}' did not succeed")),
    }
}
