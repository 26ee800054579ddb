//! Terraform provisioner, running the binary as a local process.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use terraflow_core::provisioner::{ExecContext, PlanOutcome, PlanSummary, Provisioner, StepOutput};
use terraflow_core::{Error, Result};
use tokio::process::Command;
use tracing::{debug, error, info};

const PLAN_FILE: &str = ".terraflow.tfplan";

pub struct TerraformExecutor {
    /// Path to the terraform binary.
    terraform_bin: String,
}

impl Default for TerraformExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl TerraformExecutor {
    pub fn new() -> Self {
        let terraform_bin =
            std::env::var("TERRAFORM_BIN").unwrap_or_else(|_| "terraform".to_string());
        Self { terraform_bin }
    }

    pub fn with_binary(terraform_bin: impl Into<String>) -> Self {
        Self {
            terraform_bin: terraform_bin.into(),
        }
    }

    async fn exec(&self, ctx: &ExecContext, args: &[String]) -> Result<(StepOutput, Option<i32>)> {
        debug!(dir = %ctx.working_dir.display(), ?args, "running terraform");

        let output = Command::new(&self.terraform_bin)
            .args(args)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Provisioner(format!("failed to spawn terraform: {e}")))?;

        let step_output = StepOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        Ok((step_output, output.status.code()))
    }

    /// Select the job's workspace, creating it on first use. No-op for
    /// the default workspace.
    async fn select_workspace(&self, ctx: &ExecContext) -> Result<()> {
        if ctx.workspace.is_empty() || ctx.workspace == "default" {
            return Ok(());
        }

        let select = vec![
            "workspace".to_string(),
            "select".to_string(),
            ctx.workspace.clone(),
        ];
        let (output, code) = self.exec(ctx, &select).await?;
        if code == Some(0) {
            return Ok(());
        }

        debug!(workspace = %ctx.workspace, "workspace select failed, creating");
        let new = vec![
            "workspace".to_string(),
            "new".to_string(),
            ctx.workspace.clone(),
        ];
        let (new_output, new_code) = self.exec(ctx, &new).await?;
        if new_code == Some(0) {
            return Ok(());
        }

        Err(Error::Provisioner(format!(
            "failed to select workspace {}: {}\n{}",
            ctx.workspace,
            output.combined(),
            new_output.combined()
        )))
    }

    fn plan_file(working_dir: &Path) -> std::path::PathBuf {
        working_dir.join(PLAN_FILE)
    }
}

/// Parse "Plan: 2 to add, 1 to change, 0 to destroy." from plan output.
fn parse_plan_summary(output: &str) -> PlanSummary {
    let mut summary = PlanSummary::default();

    for line in output.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("Plan:") else {
            continue;
        };

        for part in rest.split(',') {
            let mut words = part.split_whitespace();
            let Some(count) = words.next().and_then(|w| w.parse::<usize>().ok()) else {
                continue;
            };
            let kind = part.trim_end_matches('.');
            if kind.contains("to add") {
                summary.to_add = count;
            } else if kind.contains("to change") {
                summary.to_change = count;
            } else if kind.contains("to destroy") {
                summary.to_destroy = count;
            }
        }
    }

    summary
}

#[async_trait]
impl Provisioner for TerraformExecutor {
    fn name(&self) -> &'static str {
        "terraform"
    }

    async fn init(&self, ctx: &ExecContext, extra_args: &[String]) -> Result<StepOutput> {
        info!(dir = %ctx.working_dir.display(), "running terraform init");

        let mut args = vec![
            "init".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(extra_args.iter().cloned());

        let (output, code) = self.exec(ctx, &args).await?;
        if code != Some(0) {
            error!(output = %output.combined(), "terraform init failed");
            return Err(Error::StepFailed(format!(
                "terraform init failed:\n{}",
                output.combined()
            )));
        }

        self.select_workspace(ctx).await?;
        Ok(output)
    }

    async fn plan(&self, ctx: &ExecContext, extra_args: &[String]) -> Result<PlanOutcome> {
        info!(dir = %ctx.working_dir.display(), workspace = %ctx.workspace, "running terraform plan");

        let plan_file = Self::plan_file(&ctx.working_dir);
        let mut args = vec![
            "plan".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
            "-detailed-exitcode".to_string(),
            format!("-out={}", plan_file.display()),
        ];
        args.extend(extra_args.iter().cloned());

        let (output, code) = self.exec(ctx, &args).await?;

        // Exit codes with -detailed-exitcode:
        // 0 = success, no changes
        // 1 = error
        // 2 = success, changes present
        let has_changes = code == Some(2);
        if !(code == Some(0) || has_changes) {
            error!(output = %output.combined(), "terraform plan failed");
            return Err(Error::StepFailed(format!(
                "terraform plan failed:\n{}",
                output.combined()
            )));
        }

        let plan_data = tokio::fs::read(&plan_file)
            .await
            .map_err(|e| Error::Provisioner(format!("failed to read plan file: {e}")))?;

        let summary = parse_plan_summary(&output.stdout);
        info!(
            has_changes,
            to_add = summary.to_add,
            to_change = summary.to_change,
            to_destroy = summary.to_destroy,
            "terraform plan completed"
        );

        Ok(PlanOutcome {
            output,
            has_changes,
            plan_data,
            summary,
        })
    }

    async fn apply(
        &self,
        ctx: &ExecContext,
        plan_data: &[u8],
        extra_args: &[String],
    ) -> Result<StepOutput> {
        info!(dir = %ctx.working_dir.display(), workspace = %ctx.workspace, "running terraform apply");

        // The stored artifact is the plan that was reviewed; write it back
        // so apply enacts exactly that plan.
        let plan_file = Self::plan_file(&ctx.working_dir);
        tokio::fs::write(&plan_file, plan_data)
            .await
            .map_err(|e| Error::Provisioner(format!("failed to write plan file: {e}")))?;

        let mut args = vec![
            "apply".to_string(),
            "-input=false".to_string(),
            "-no-color".to_string(),
        ];
        args.extend(extra_args.iter().cloned());
        args.push(plan_file.display().to_string());

        let (output, code) = self.exec(ctx, &args).await?;
        if code != Some(0) {
            error!(output = %output.combined(), "terraform apply failed");
            return Err(Error::StepFailed(format!(
                "terraform apply failed:\n{}",
                output.combined()
            )));
        }

        info!("terraform apply succeeded");
        Ok(output)
    }

    async fn run(&self, ctx: &ExecContext, command: &str) -> Result<StepOutput> {
        info!(dir = %ctx.working_dir.display(), command, "running custom step");

        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&ctx.working_dir)
            .envs(&ctx.env)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(|e| Error::Provisioner(format!("failed to spawn command: {e}")))?;

        let step_output = StepOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        };

        if !output.status.success() {
            return Err(Error::StepFailed(format!(
                "command '{command}' failed:\n{}",
                step_output.combined()
            )));
        }

        Ok(step_output)
    }
}
