//! Shared mocks for scheduler tests.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use terraflow_core::Result;
use terraflow_core::job::{Job, JobCommand, Stage};
use terraflow_core::lock::{LockOutcome, LockStore};
use terraflow_core::plan::{PlanArtifact, PlanKey, PlanStorage};
use terraflow_core::policy::{PolicyChecker, PolicyDecision};
use terraflow_core::provisioner::{ExecContext, PlanOutcome, PlanSummary, Provisioner, StepOutput};
use terraflow_core::vcs::{Comment, VcsService};
use terraflow_core::Error;
use terraflow_locking::MemoryLockStore;

pub fn make_job(name: &str, commands: &[JobCommand]) -> Job {
    Job {
        project_name: name.to_string(),
        project_dir: PathBuf::from(name),
        workspace: "default".to_string(),
        commands: commands.to_vec(),
        plan_stage: Stage::default_plan(),
        apply_stage: Stage::default_apply(),
        pull_request_number: Some(7),
        requested_by: "alice".to_string(),
        namespace: "org/repo".to_string(),
        event_name: "pull_request".to_string(),
        state_env: HashMap::new(),
        command_env: HashMap::new(),
        state_env_provider: None,
        command_env_provider: None,
    }
}

/// Provisioner that records calls and can be told to fail or panic.
#[derive(Default)]
pub struct MockProvisioner {
    calls: Mutex<Vec<String>>,
    applied_plans: Mutex<Vec<Vec<u8>>>,
    fail_plans: AtomicBool,
    fail_applies: AtomicBool,
    panic_on_plan: AtomicBool,
    fail_plan_projects: Mutex<Vec<String>>,
}

impl MockProvisioner {
    pub const PLAN_BYTES: &'static [u8] = b"mock-plan-artifact";

    fn record(&self, kind: &str, ctx: &ExecContext) {
        let project = Self::project_of(ctx);
        self.calls.lock().unwrap().push(format!("{kind}:{project}"));
    }

    /// Number of calls of one kind ("init", "plan", "apply", "run").
    pub fn calls_named(&self, kind: &str) -> usize {
        let prefix = format!("{kind}:");
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.starts_with(&prefix))
            .count()
    }

    /// Projects in order of their first provisioner call.
    pub fn project_order(&self) -> Vec<String> {
        let mut order = Vec::new();
        for call in self.calls.lock().unwrap().iter() {
            let project = call.split(':').nth(1).unwrap_or_default().to_string();
            if !order.contains(&project) {
                order.push(project);
            }
        }
        order
    }

    pub fn last_applied_plan(&self) -> Option<Vec<u8>> {
        self.applied_plans.lock().unwrap().last().cloned()
    }

    pub fn fail_plans(&self) {
        self.fail_plans.store(true, Ordering::SeqCst);
    }

    pub fn fail_applies(&self) {
        self.fail_applies.store(true, Ordering::SeqCst);
    }

    pub fn panic_on_plan(&self) {
        self.panic_on_plan.store(true, Ordering::SeqCst);
    }

    /// Fail the plan step for one project only.
    pub fn fail_plans_for(&self, project: &str) {
        self.fail_plan_projects
            .lock()
            .unwrap()
            .push(project.to_string());
    }

    fn project_of(ctx: &ExecContext) -> String {
        ctx.working_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

#[async_trait]
impl Provisioner for MockProvisioner {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn init(&self, ctx: &ExecContext, _extra_args: &[String]) -> Result<StepOutput> {
        self.record("init", ctx);
        Ok(StepOutput {
            stdout: "initialized".to_string(),
            stderr: String::new(),
        })
    }

    async fn plan(&self, ctx: &ExecContext, _extra_args: &[String]) -> Result<PlanOutcome> {
        self.record("plan", ctx);
        if self.panic_on_plan.load(Ordering::SeqCst) {
            panic!("plan step panicked");
        }
        let project = Self::project_of(ctx);
        if self.fail_plans.load(Ordering::SeqCst)
            || self.fail_plan_projects.lock().unwrap().contains(&project)
        {
            return Err(Error::StepFailed("plan exploded".to_string()));
        }
        Ok(PlanOutcome {
            output: StepOutput {
                stdout: "Plan: 1 to add, 0 to change, 0 to destroy.".to_string(),
                stderr: String::new(),
            },
            has_changes: true,
            plan_data: Self::PLAN_BYTES.to_vec(),
            summary: PlanSummary {
                to_add: 1,
                to_change: 0,
                to_destroy: 0,
            },
        })
    }

    async fn apply(
        &self,
        ctx: &ExecContext,
        plan_data: &[u8],
        _extra_args: &[String],
    ) -> Result<StepOutput> {
        self.record("apply", ctx);
        self.applied_plans.lock().unwrap().push(plan_data.to_vec());
        if self.fail_applies.load(Ordering::SeqCst) {
            return Err(Error::StepFailed("apply exploded".to_string()));
        }
        Ok(StepOutput {
            stdout: "Apply complete!".to_string(),
            stderr: String::new(),
        })
    }

    async fn run(&self, ctx: &ExecContext, _command: &str) -> Result<StepOutput> {
        self.record("run", ctx);
        Ok(StepOutput::default())
    }
}

/// Lock store that counts successful releases.
#[derive(Default)]
pub struct CountingLockStore {
    inner: MemoryLockStore,
    release_count: AtomicUsize,
}

impl CountingLockStore {
    pub fn releases(&self) -> usize {
        self.release_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockStore for CountingLockStore {
    async fn try_lock(&self, resource: &str, holder: &str) -> Result<LockOutcome> {
        self.inner.try_lock(resource, holder).await
    }

    async fn unlock(&self, resource: &str, holder: &str) -> Result<bool> {
        let released = self.inner.unlock(resource, holder).await?;
        if released {
            self.release_count.fetch_add(1, Ordering::SeqCst);
        }
        Ok(released)
    }

    async fn holder(&self, resource: &str) -> Result<Option<String>> {
        self.inner.holder(resource).await
    }

    async fn force_unlock(&self, resource: &str) -> Result<bool> {
        self.inner.force_unlock(resource).await
    }
}

/// Storage that accepts writes but loses them immediately.
#[derive(Default)]
pub struct VanishingPlanStorage;

#[async_trait]
impl PlanStorage for VanishingPlanStorage {
    async fn store(&self, key: &PlanKey, data: &[u8]) -> Result<PlanArtifact> {
        Ok(PlanArtifact {
            key: key.clone(),
            data: data.to_vec(),
            checksum: String::new(),
            created_at: Utc::now(),
        })
    }

    async fn retrieve(&self, _key: &PlanKey) -> Result<Option<PlanArtifact>> {
        Ok(None)
    }

    async fn delete(&self, _key: &PlanKey) -> Result<()> {
        Ok(())
    }
}

pub struct AllowPolicy;

#[async_trait]
impl PolicyChecker for AllowPolicy {
    async fn check(&self, _actor: &str, _project: &str, _plan_summary: &str) -> PolicyDecision {
        PolicyDecision::Allow
    }
}

pub struct DenyPolicy {
    reason: String,
}

impl DenyPolicy {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

#[async_trait]
impl PolicyChecker for DenyPolicy {
    async fn check(&self, _actor: &str, _project: &str, _plan_summary: &str) -> PolicyDecision {
        PolicyDecision::deny(self.reason.clone())
    }
}

/// In-memory change-request service recording posted comments.
#[derive(Default)]
pub struct FakeVcs {
    comments: tokio::sync::Mutex<Vec<Comment>>,
}

impl FakeVcs {
    pub async fn bodies(&self) -> Vec<String> {
        self.comments
            .lock()
            .await
            .iter()
            .map(|c| c.body.clone())
            .collect()
    }
}

#[async_trait]
impl VcsService for FakeVcs {
    async fn post_comment(&self, _request_number: u64, body: &str) -> Result<Comment> {
        let mut comments = self.comments.lock().await;
        let comment = Comment {
            id: comments.len().to_string(),
            body: body.to_string(),
        };
        comments.push(comment.clone());
        Ok(comment)
    }

    async fn update_comment(&self, comment_id: &str, body: &str) -> Result<()> {
        let mut comments = self.comments.lock().await;
        let comment = comments
            .iter_mut()
            .find(|c| c.id == comment_id)
            .ok_or_else(|| Error::Vcs(format!("no comment {comment_id}")))?;
        comment.body = body.to_string();
        Ok(())
    }

    async fn list_comments(&self, _request_number: u64) -> Result<Vec<Comment>> {
        Ok(self.comments.lock().await.clone())
    }

    async fn merge(&self, _request_number: u64) -> Result<()> {
        Ok(())
    }

    async fn changed_files(&self, _request_number: u64) -> Result<Vec<String>> {
        Ok(vec![])
    }
}
