//! Per-job execution: the lock → plan → policy → apply state machine.

use std::collections::HashMap;
use std::sync::Arc;
use terraflow_core::job::{Job, JobCommand, JobResult, JobState, StageResult, Step, StepAction};
use terraflow_core::lock::LockOutcome;
use terraflow_core::plan::{PlanKey, PlanStorage};
use terraflow_core::policy::{PolicyChecker, PolicyDecision};
use terraflow_core::provisioner::{ExecContext, PlanOutcome, Provisioner};
use terraflow_core::{Error, RunId};
use terraflow_locking::LockManager;
use tracing::{debug, error, info};

use crate::reporter::Reporter;

/// Executes one job's lifecycle:
/// `Queued → Locking → Planning → AwaitingPolicy → Applying → Reporting →
/// Done`, with `Failed` reachable from any state and `Blocked` from
/// `Locking`. The lock is released on every terminal transition.
#[derive(Clone)]
pub struct JobRunner {
    provisioner: Arc<dyn Provisioner>,
    locks: LockManager,
    plans: Arc<dyn PlanStorage>,
    policy: Arc<dyn PolicyChecker>,
    reporter: Arc<Reporter>,
}

impl JobRunner {
    pub fn new(
        provisioner: Arc<dyn Provisioner>,
        locks: LockManager,
        plans: Arc<dyn PlanStorage>,
        policy: Arc<dyn PolicyChecker>,
        reporter: Arc<Reporter>,
    ) -> Self {
        Self {
            provisioner,
            locks,
            plans,
            policy,
            reporter,
        }
    }

    pub fn reporter(&self) -> &Arc<Reporter> {
        &self.reporter
    }

    /// Run one job to a terminal state. Never panics outward and never
    /// leaks the project lock.
    pub async fn run_job(&self, job: &Job, run_id: RunId) -> JobResult {
        debug!(project = %job.project_name, state = %JobState::Locking, "acquiring project lock");

        let resource = LockManager::key_for(&job.namespace, &job.project_name, &job.workspace);
        let holder = job.request_identity(run_id);

        match self.locks.acquire(&resource, &holder).await {
            Ok(LockOutcome::Granted) => {}
            Ok(LockOutcome::Held { holder: other }) => {
                info!(project = %job.project_name, held_by = %other, "job blocked on lock");
                let mut result = JobResult::blocked(&job.project_name, &other);
                result.apply_attempted = job.requests_apply();
                self.reporter.report_job(job, &result).await;
                return result;
            }
            Err(e) => {
                let result = failed_result(
                    job,
                    vec![],
                    format!("lock acquisition failed: {e}"),
                    job.requests_apply(),
                );
                self.reporter.report_job(job, &result).await;
                return result;
            }
        }

        // Stages run in their own task so a panicking step cannot skip
        // the lock release below.
        let execution = {
            let runner = self.clone();
            let job = job.clone();
            tokio::spawn(async move { runner.execute_commands(&job, run_id).await })
        };

        let result = match execution.await {
            Ok(result) => result,
            Err(join_error) => {
                let detail = if join_error.is_panic() {
                    "job execution panicked"
                } else {
                    "job execution cancelled"
                };
                error!(project = %job.project_name, error = %join_error, "{detail}");
                failed_result(job, vec![], detail.to_string(), job.requests_apply())
            }
        };

        debug!(project = %job.project_name, state = %JobState::Reporting, "reporting result");
        self.reporter.report_job(job, &result).await;

        // Terminal transition: release on success, failure and panic alike.
        if let Err(e) = self.locks.release(&resource, &holder).await {
            error!(resource = %resource, error = %e, "failed to release lock");
        }

        result
    }

    /// Run the job's command list in order. The caller holds the lock.
    async fn execute_commands(&self, job: &Job, run_id: RunId) -> JobResult {
        let apply_requested = job.requests_apply();
        let mut stages: Vec<StageResult> = Vec::new();
        let mut last_summary: Option<String> = None;
        let mut drift_detected = false;

        let base_env = match merged_env(job) {
            Ok(env) => env,
            Err(e) => return failed_result(job, stages, e.to_string(), apply_requested),
        };

        for command in &job.commands {
            match command {
                JobCommand::Plan | JobCommand::DriftDetect => {
                    debug!(project = %job.project_name, state = %JobState::Planning, "planning");
                    let keep_artifact = *command == JobCommand::Plan;
                    match self
                        .run_plan_stage(job, run_id, &base_env, keep_artifact, &mut stages)
                        .await
                    {
                        Ok(outcome) => {
                            last_summary = Some(outcome.summary.to_string());
                            if *command == JobCommand::DriftDetect && outcome.has_changes {
                                drift_detected = true;
                            }
                        }
                        Err(e) => {
                            return failed_result(job, stages, e.to_string(), apply_requested);
                        }
                    }
                }
                JobCommand::Apply => {
                    debug!(project = %job.project_name, state = %JobState::AwaitingPolicy, "checking policy");
                    let summary = last_summary.clone().unwrap_or_default();
                    match self
                        .policy
                        .check(&job.requested_by, &job.project_name, &summary)
                        .await
                    {
                        PolicyDecision::Allow => {}
                        PolicyDecision::Deny { reason } => {
                            info!(project = %job.project_name, reason = %reason, "apply rejected by policy");
                            return failed_result(
                                job,
                                stages,
                                format!("policy denied: {reason}"),
                                true,
                            );
                        }
                    }

                    debug!(project = %job.project_name, state = %JobState::Applying, "applying stored plan");
                    let key = PlanKey {
                        namespace: job.namespace.clone(),
                        project: job.project_name.clone(),
                        request: job.request_identity(run_id),
                    };
                    let artifact = match self.plans.retrieve(&key).await {
                        Ok(Some(artifact)) => artifact,
                        Ok(None) => {
                            // Never re-plan here: what gets applied must be
                            // what was reviewed.
                            return failed_result(
                                job,
                                stages,
                                format!("no stored plan artifact for {key}; apply requires a prior plan"),
                                true,
                            );
                        }
                        Err(e) => return failed_result(job, stages, e.to_string(), true),
                    };

                    if let Err(e) = self
                        .run_apply_stage(job, &base_env, &artifact.data, &mut stages)
                        .await
                    {
                        return failed_result(job, stages, e.to_string(), true);
                    }
                }
            }
        }

        let summary = if drift_detected {
            format!(
                "drift detected ({})",
                last_summary.as_deref().unwrap_or("changes present")
            )
        } else if apply_requested {
            "applied successfully".to_string()
        } else {
            last_summary.unwrap_or_else(|| "completed".to_string())
        };

        JobResult {
            project_name: job.project_name.clone(),
            state: JobState::Done,
            stages,
            apply_attempted: apply_requested,
            apply_succeeded: apply_requested,
            summary,
            error: None,
        }
    }

    /// Execute the plan stage's steps strictly in order; the first
    /// failure aborts. On success the plan artifact is persisted, unless
    /// the run is plan-only drift detection.
    async fn run_plan_stage(
        &self,
        job: &Job,
        run_id: RunId,
        base_env: &HashMap<String, String>,
        keep_artifact: bool,
        stages: &mut Vec<StageResult>,
    ) -> terraflow_core::Result<PlanOutcome> {
        let mut outcome: Option<PlanOutcome> = None;

        for step in &job.plan_stage.steps {
            let ctx = exec_context(job, base_env, step);
            match &step.action {
                StepAction::Init { extra_args } => {
                    let output = self.provisioner.init(&ctx, extra_args).await?;
                    stages.push(StageResult {
                        name: "init".to_string(),
                        success: true,
                        output: output.combined(),
                    });
                }
                StepAction::Plan { extra_args } => {
                    let plan = self.provisioner.plan(&ctx, extra_args).await?;
                    stages.push(StageResult {
                        name: "plan".to_string(),
                        success: true,
                        output: plan.output.combined(),
                    });

                    if keep_artifact {
                        let key = PlanKey {
                            namespace: job.namespace.clone(),
                            project: job.project_name.clone(),
                            request: job.request_identity(run_id),
                        };
                        self.plans.store(&key, &plan.plan_data).await?;
                        debug!(project = %job.project_name, key = %key, "plan artifact stored");
                    }

                    outcome = Some(plan);
                }
                StepAction::Run { command } => {
                    let output = self.provisioner.run(&ctx, command).await?;
                    stages.push(StageResult {
                        name: "run".to_string(),
                        success: true,
                        output: output.combined(),
                    });
                }
                StepAction::Apply { .. } => {
                    return Err(Error::StepFailed(
                        "apply step is not allowed in a plan stage".to_string(),
                    ));
                }
            }
        }

        outcome.ok_or_else(|| {
            Error::StepFailed("plan stage contains no plan step".to_string())
        })
    }

    /// Execute the apply stage's steps strictly in order, consuming the
    /// stored plan artifact.
    async fn run_apply_stage(
        &self,
        job: &Job,
        base_env: &HashMap<String, String>,
        plan_data: &[u8],
        stages: &mut Vec<StageResult>,
    ) -> terraflow_core::Result<()> {
        for step in &job.apply_stage.steps {
            let ctx = exec_context(job, base_env, step);
            match &step.action {
                StepAction::Init { extra_args } => {
                    let output = self.provisioner.init(&ctx, extra_args).await?;
                    stages.push(StageResult {
                        name: "init".to_string(),
                        success: true,
                        output: output.combined(),
                    });
                }
                StepAction::Apply { extra_args } => {
                    let output = self.provisioner.apply(&ctx, plan_data, extra_args).await?;
                    stages.push(StageResult {
                        name: "apply".to_string(),
                        success: true,
                        output: output.combined(),
                    });
                }
                StepAction::Run { command } => {
                    let output = self.provisioner.run(&ctx, command).await?;
                    stages.push(StageResult {
                        name: "run".to_string(),
                        success: true,
                        output: output.combined(),
                    });
                }
                StepAction::Plan { .. } => {
                    return Err(Error::StepFailed(
                        "plan step is not allowed in an apply stage".to_string(),
                    ));
                }
            }
        }
        Ok(())
    }
}

fn exec_context(job: &Job, base_env: &HashMap<String, String>, step: &Step) -> ExecContext {
    let mut env = base_env.clone();
    env.extend(step.env.clone());
    ExecContext {
        working_dir: job.project_dir.clone(),
        workspace: job.workspace.clone(),
        env,
    }
}

fn merged_env(job: &Job) -> terraflow_core::Result<HashMap<String, String>> {
    let mut env = job.resolved_state_env()?;
    env.extend(job.resolved_command_env()?);
    Ok(env)
}

fn failed_result(
    job: &Job,
    stages: Vec<StageResult>,
    error: String,
    apply_attempted: bool,
) -> JobResult {
    let summary = error.lines().next().unwrap_or("failed").to_string();
    JobResult {
        project_name: job.project_name.clone(),
        state: JobState::Failed,
        stages,
        apply_attempted,
        apply_succeeded: false,
        summary,
        error: Some(error),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{
        AllowPolicy, CountingLockStore, DenyPolicy, FakeVcs, MockProvisioner,
        VanishingPlanStorage, make_job,
    };
    use terraflow_core::lock::{LockStore, resource_key};
    use terraflow_core::plan::PlanStorage;
    use terraflow_storage::MemoryPlanStorage;

    struct Harness {
        runner: JobRunner,
        provisioner: Arc<MockProvisioner>,
        lock_store: Arc<CountingLockStore>,
        plans: Arc<MemoryPlanStorage>,
        vcs: Arc<FakeVcs>,
    }

    fn build_harness(
        policy: Arc<dyn PolicyChecker>,
        plans_override: Option<Arc<dyn PlanStorage>>,
    ) -> Harness {
        let provisioner = Arc::new(MockProvisioner::default());
        let lock_store = Arc::new(CountingLockStore::default());
        let plans = Arc::new(MemoryPlanStorage::new());
        let vcs = Arc::new(FakeVcs::default());
        let reporter = Arc::new(Reporter::new(
            vcs.clone(),
            Arc::new(crate::reporter::CommentPerRun),
        ));

        let runner = JobRunner::new(
            provisioner.clone(),
            LockManager::new(lock_store.clone()),
            plans_override.unwrap_or_else(|| plans.clone()),
            policy,
            reporter,
        );

        Harness {
            runner,
            provisioner,
            lock_store,
            plans,
            vcs,
        }
    }

    fn harness_with_policy(policy: Arc<dyn PolicyChecker>) -> Harness {
        build_harness(policy, None)
    }

    fn harness() -> Harness {
        build_harness(Arc::new(AllowPolicy), None)
    }

    fn lock_key(job: &Job) -> String {
        resource_key(&job.namespace, &job.project_name, &job.workspace)
    }

    #[tokio::test]
    async fn plan_then_apply_succeeds_and_releases_lock() {
        let h = harness();
        let job = make_job("vpc", &[JobCommand::Plan, JobCommand::Apply]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Done);
        assert!(result.apply_attempted);
        assert!(result.apply_succeeded);
        assert_eq!(h.provisioner.calls_named("apply"), 1);
        assert_eq!(h.lock_store.releases(), 1);
        assert!(h.lock_store.holder(&lock_key(&job)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn apply_consumes_stored_artifact() {
        let h = harness();
        let job = make_job("vpc", &[JobCommand::Plan, JobCommand::Apply]);

        h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(
            h.provisioner.last_applied_plan(),
            Some(MockProvisioner::PLAN_BYTES.to_vec())
        );
    }

    #[tokio::test]
    async fn plan_only_job_does_not_attempt_apply() {
        let h = harness();
        let job = make_job("vpc", &[JobCommand::Plan]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Done);
        assert!(!result.apply_attempted);
        assert_eq!(h.provisioner.calls_named("apply"), 0);
    }

    #[tokio::test]
    async fn held_lock_blocks_job_without_failing() {
        let h = harness();
        let job = make_job("vpc", &[JobCommand::Plan]);

        h.lock_store
            .try_lock(&lock_key(&job), "somebody-else")
            .await
            .unwrap();

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Blocked);
        assert!(result.summary.contains("somebody-else"));
        // Nothing ran and the foreign lock was not touched.
        assert_eq!(h.provisioner.calls_named("plan"), 0);
        assert_eq!(h.lock_store.releases(), 0);
        assert_eq!(
            h.lock_store.holder(&lock_key(&job)).await.unwrap(),
            Some("somebody-else".to_string())
        );
    }

    #[tokio::test]
    async fn policy_denial_fails_job_with_reason_and_skips_apply() {
        let h = harness_with_policy(Arc::new(DenyPolicy::new("actor not on apply roster")));
        let job = make_job("vpc", &[JobCommand::Plan, JobCommand::Apply]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Failed);
        assert!(result.error.as_deref().unwrap().contains("actor not on apply roster"));
        assert_eq!(h.provisioner.calls_named("apply"), 0);
        assert_eq!(h.lock_store.releases(), 1);

        // The denial reason is surfaced verbatim on the change request.
        let comments = h.vcs.bodies().await;
        assert!(comments.iter().any(|c| c.contains("actor not on apply roster")));
    }

    #[tokio::test]
    async fn missing_artifact_at_apply_time_fails_without_replanning() {
        // Storage that accepts writes but loses them: the artifact is gone
        // by the time the apply command looks for it.
        let h = build_harness(
            Arc::new(AllowPolicy),
            Some(Arc::new(VanishingPlanStorage::default())),
        );
        let job = make_job("vpc", &[JobCommand::Plan, JobCommand::Apply]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Failed);
        assert!(result.error.as_deref().unwrap().contains("no stored plan artifact"));
        // Exactly one plan (the original); no silent re-plan at apply time.
        assert_eq!(h.provisioner.calls_named("plan"), 1);
        assert_eq!(h.provisioner.calls_named("apply"), 0);
        assert_eq!(h.lock_store.releases(), 1);
    }

    #[tokio::test]
    async fn apply_without_prior_plan_fails() {
        let h = harness();
        let job = make_job("vpc", &[JobCommand::Apply]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Failed);
        assert!(result.error.as_deref().unwrap().contains("no stored plan artifact"));
    }

    #[tokio::test]
    async fn second_apply_step_failure_keeps_first_step_output() {
        let h = harness();
        h.provisioner.fail_applies();
        let job = make_job("vpc", &[JobCommand::Plan, JobCommand::Apply]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Failed);
        assert!(result.apply_attempted);
        assert!(!result.apply_succeeded);
        // The apply stage's first step (init) succeeded and its output is
        // kept alongside the failing step's error.
        assert!(result.stages.iter().any(|s| s.name == "init" && s.success));
        assert!(result.error.as_deref().unwrap().contains("apply exploded"));
        assert_eq!(h.lock_store.releases(), 1);
    }

    #[tokio::test]
    async fn step_failure_releases_lock() {
        let h = harness();
        h.provisioner.fail_plans();
        let job = make_job("vpc", &[JobCommand::Plan]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Failed);
        assert_eq!(h.lock_store.releases(), 1);
        assert!(h.lock_store.holder(&lock_key(&job)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn panicking_step_still_releases_lock() {
        let h = harness();
        h.provisioner.panic_on_plan();
        let job = make_job("vpc", &[JobCommand::Plan]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        assert_eq!(result.state, JobState::Failed);
        assert!(result.error.as_deref().unwrap().contains("panicked"));
        assert_eq!(h.lock_store.releases(), 1);
        assert!(h.lock_store.holder(&lock_key(&job)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn drift_detect_skips_policy_and_apply_and_reports_drift() {
        let h = harness_with_policy(Arc::new(DenyPolicy::new("should never be consulted")));
        let job = make_job("vpc", &[JobCommand::DriftDetect]);

        let result = h.runner.run_job(&job, RunId::new()).await;

        // Denying policy untouched: drift runs never await policy.
        assert_eq!(result.state, JobState::Done);
        assert!(result.summary.contains("drift detected"));
        assert_eq!(h.provisioner.calls_named("apply"), 0);
        // Plan-only run keeps no artifact around.
        let stored = h
            .plans
            .retrieve(&PlanKey {
                namespace: job.namespace.clone(),
                project: job.project_name.clone(),
                request: job.request_identity(RunId::new()),
            })
            .await
            .unwrap();
        assert!(stored.is_none());
        assert_eq!(h.lock_store.releases(), 1);
    }

    #[tokio::test]
    async fn every_terminal_state_is_reported() {
        let h = harness();
        h.provisioner.fail_plans();
        let job = make_job("vpc", &[JobCommand::Plan]);

        h.runner.run_job(&job, RunId::new()).await;

        let comments = h.vcs.bodies().await;
        assert_eq!(comments.len(), 1);
        assert!(comments[0].contains("vpc"));
        assert!(comments[0].contains("failed"));
    }
}
