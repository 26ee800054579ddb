//! Provisioner trait.
//!
//! The seam between the orchestrator and the infrastructure-provisioning
//! tool. Execution context (working directory, workspace, environment) is
//! passed explicitly; implementations must not read ambient process state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

use crate::Result;

/// Explicit execution context for one stage step.
#[derive(Debug, Clone)]
pub struct ExecContext {
    pub working_dir: PathBuf,
    pub workspace: String,
    pub env: HashMap<String, String>,
}

/// Captured output of one step.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepOutput {
    pub stdout: String,
    pub stderr: String,
}

impl StepOutput {
    /// Combined output for reports.
    pub fn combined(&self) -> String {
        if self.stderr.is_empty() {
            self.stdout.clone()
        } else {
            format!("{}\n{}", self.stdout, self.stderr)
        }
    }
}

/// Resource change counts parsed from plan output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanSummary {
    pub to_add: usize,
    pub to_change: usize,
    pub to_destroy: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Plan: {} to add, {} to change, {} to destroy.",
            self.to_add, self.to_change, self.to_destroy
        )
    }
}

/// Result of a plan step.
#[derive(Debug, Clone)]
pub struct PlanOutcome {
    pub output: StepOutput,
    /// Whether the plan proposes any changes.
    pub has_changes: bool,
    /// Serialized plan suitable for a later apply.
    pub plan_data: Vec<u8>,
    pub summary: PlanSummary,
}

/// Trait for infrastructure provisioning tools.
#[async_trait]
pub trait Provisioner: Send + Sync {
    /// Name of this provisioner, for logs.
    fn name(&self) -> &'static str;

    /// Initialize the working directory.
    async fn init(&self, ctx: &ExecContext, extra_args: &[String]) -> Result<StepOutput>;

    /// Compute a plan, returning its serialized artifact.
    async fn plan(&self, ctx: &ExecContext, extra_args: &[String]) -> Result<PlanOutcome>;

    /// Enact a previously computed plan.
    async fn apply(
        &self,
        ctx: &ExecContext,
        plan_data: &[u8],
        extra_args: &[String],
    ) -> Result<StepOutput>;

    /// Run an arbitrary shell command in the working directory.
    async fn run(&self, ctx: &ExecContext, command: &str) -> Result<StepOutput>;
}
