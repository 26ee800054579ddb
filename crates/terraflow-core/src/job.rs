//! Job, stage and result types.
//!
//! A [`Job`] is the unit of work for one infrastructure project within one
//! change request. It is created by the event-conversion boundary, consumed
//! exactly once by the job runner, and discarded after a [`JobResult`] is
//! produced.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::{Result, RunId};

/// Supplies environment variables computed from upstream project outputs.
///
/// Attached to a job when its project declares dependencies whose outputs
/// feed this project's state backend or commands.
pub trait EnvProvider: std::fmt::Debug + Send + Sync {
    fn env(&self) -> Result<HashMap<String, String>>;
}

/// A command the orchestrator can run for a project.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobCommand {
    Plan,
    Apply,
    DriftDetect,
}

impl std::fmt::Display for JobCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobCommand::Plan => write!(f, "plan"),
            JobCommand::Apply => write!(f, "apply"),
            JobCommand::DriftDetect => write!(f, "drift-detect"),
        }
    }
}

impl std::str::FromStr for JobCommand {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "plan" => Ok(JobCommand::Plan),
            "apply" => Ok(JobCommand::Apply),
            "drift-detect" => Ok(JobCommand::DriftDetect),
            other => Err(format!("unknown command: {other}")),
        }
    }
}

/// A named step within a plan or apply stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    pub action: StepAction,
    /// Environment overrides applied on top of the job's command env.
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Step {
    pub fn new(action: StepAction) -> Self {
        Self {
            action,
            env: HashMap::new(),
        }
    }

    /// Step name as shown in reports and logs.
    pub fn name(&self) -> &'static str {
        match self.action {
            StepAction::Init { .. } => "init",
            StepAction::Plan { .. } => "plan",
            StepAction::Apply { .. } => "apply",
            StepAction::Run { .. } => "run",
        }
    }
}

/// What a step does.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepAction {
    /// Initialize the project's working directory.
    Init {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    /// Compute a plan and capture its artifact.
    Plan {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    /// Enact a previously captured plan artifact.
    Apply {
        #[serde(default)]
        extra_args: Vec<String>,
    },
    /// Run an arbitrary shell command.
    Run { command: String },
}

/// An ordered step sequence (plan stage or apply stage).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Stage {
    pub steps: Vec<Step>,
}

impl Stage {
    /// The default plan stage: init then plan.
    pub fn default_plan() -> Self {
        Self {
            steps: vec![
                Step::new(StepAction::Init { extra_args: vec![] }),
                Step::new(StepAction::Plan { extra_args: vec![] }),
            ],
        }
    }

    /// The default apply stage: init then apply.
    pub fn default_apply() -> Self {
        Self {
            steps: vec![
                Step::new(StepAction::Init { extra_args: vec![] }),
                Step::new(StepAction::Apply { extra_args: vec![] }),
            ],
        }
    }
}

/// A unit of work for one infrastructure project within one change request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Project name, unique within a batch.
    pub project_name: String,
    /// Working directory holding the project's configuration.
    pub project_dir: PathBuf,
    /// Workspace identifier ("default" unless the project says otherwise).
    pub workspace: String,
    /// Ordered commands to execute.
    pub commands: Vec<JobCommand>,
    /// Steps run to compute a plan.
    pub plan_stage: Stage,
    /// Steps run to enact a stored plan.
    pub apply_stage: Stage,
    /// Present for interactive review flows, absent for direct-commit,
    /// manual and drift flows.
    pub pull_request_number: Option<u64>,
    /// Actor that requested this job.
    pub requested_by: String,
    /// Repository identifier, e.g. "org/repo".
    pub namespace: String,
    /// Name of the triggering event.
    pub event_name: String,
    /// Environment for the state backend.
    #[serde(default)]
    pub state_env: HashMap<String, String>,
    /// Environment for command execution.
    #[serde(default)]
    pub command_env: HashMap<String, String>,
    /// Computed state env from upstream project outputs, if any.
    #[serde(skip)]
    pub state_env_provider: Option<Arc<dyn EnvProvider>>,
    /// Computed command env from upstream project outputs, if any.
    #[serde(skip)]
    pub command_env_provider: Option<Arc<dyn EnvProvider>>,
}

impl Job {
    /// Whether the job's command list requests an apply.
    pub fn requests_apply(&self) -> bool {
        self.commands.contains(&JobCommand::Apply)
    }

    /// Identity of the originating request, used to key plan artifacts.
    /// Interactive flows key by pull request, everything else by run.
    pub fn request_identity(&self, run_id: RunId) -> String {
        match self.pull_request_number {
            Some(pr) => format!("pr-{pr}"),
            None => format!("run-{run_id}"),
        }
    }

    /// State env merged with upstream-provided values.
    pub fn resolved_state_env(&self) -> Result<HashMap<String, String>> {
        let mut env = self.state_env.clone();
        if let Some(provider) = &self.state_env_provider {
            env.extend(provider.env()?);
        }
        Ok(env)
    }

    /// Command env merged with upstream-provided values.
    pub fn resolved_command_env(&self) -> Result<HashMap<String, String>> {
        let mut env = self.command_env.clone();
        if let Some(provider) = &self.command_env_provider {
            env.extend(provider.env()?);
        }
        Ok(env)
    }
}

/// Per-job state machine.
///
/// `Queued → Locking → Planning → AwaitingPolicy → Applying → Reporting →
/// Done`, with failure transitions from any state to `Failed` and a
/// `Blocked` terminal state reachable from `Locking` on lock denial.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Locking,
    Planning,
    AwaitingPolicy,
    Applying,
    Reporting,
    Done,
    Failed,
    Blocked,
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed | JobState::Blocked)
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Queued => write!(f, "queued"),
            JobState::Locking => write!(f, "locking"),
            JobState::Planning => write!(f, "planning"),
            JobState::AwaitingPolicy => write!(f, "awaiting_policy"),
            JobState::Applying => write!(f, "applying"),
            JobState::Reporting => write!(f, "reporting"),
            JobState::Done => write!(f, "done"),
            JobState::Failed => write!(f, "failed"),
            JobState::Blocked => write!(f, "blocked"),
        }
    }
}

/// Result of one executed stage step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    /// Step name ("init", "plan", "apply", "run").
    pub name: String,
    pub success: bool,
    pub output: String,
}

/// Outcome of one job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobResult {
    pub project_name: String,
    /// Terminal state the job reached.
    pub state: JobState,
    /// Results for each executed step, in execution order.
    pub stages: Vec<StageResult>,
    pub apply_attempted: bool,
    pub apply_succeeded: bool,
    /// Human-readable one-line summary.
    pub summary: String,
    /// Error detail when the job failed.
    pub error: Option<String>,
}

impl JobResult {
    pub fn is_success(&self) -> bool {
        self.state == JobState::Done
    }

    pub fn blocked(project_name: impl Into<String>, holder: &str) -> Self {
        Self {
            project_name: project_name.into(),
            state: JobState::Blocked,
            stages: vec![],
            apply_attempted: false,
            apply_succeeded: false,
            summary: format!("blocked: currently locked by {holder}"),
            error: None,
        }
    }
}

/// Aggregate over the job results of one change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchResult {
    /// True iff every job that attempted an apply succeeded.
    pub all_applies_success: bool,
    /// True iff any job attempted an apply.
    pub at_least_one_apply: bool,
    /// True iff the batch included every impacted project. Supplied by the
    /// caller; a manually scoped batch never covers all impacted projects.
    pub covers_all_impacted_projects: bool,
}

impl BatchResult {
    /// Whether the originating request may be auto-merged.
    pub fn merge_allowed(&self) -> bool {
        self.all_applies_success && self.at_least_one_apply && self.covers_all_impacted_projects
    }
}
