//! Command implementations.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use terraflow_config::{ConfigError, OrchestratorConfig, ReportMode, parse_config};
use terraflow_core::job::{Job, JobCommand, JobResult, JobState};
use terraflow_core::lock::LockStore;
use terraflow_core::vcs::VcsService;
use terraflow_exec::TerraformExecutor;
use terraflow_locking::{LockManager, MemoryLockStore, PgLockStore};
use terraflow_policy::{HttpPolicyChecker, StaticPolicyChecker};
use terraflow_scheduler::reporter::{CommentPerRun, ReportStrategy, SingleComment};
use terraflow_scheduler::{BatchRunner, JobRunner, Reporter};
use terraflow_storage::LocalPlanStorage;
use terraflow_vcs::GitHubService;
use tracing::{error, info, warn};

use crate::BackendArgs;

const EXIT_OK: i32 = 0;
const EXIT_JOB_FAILED: i32 = 1;
const EXIT_CONFIG_ERROR: i32 = 2;
const EXIT_BAD_CONTEXT: i32 = 3;

pub struct RunArgs {
    pub config_path: String,
    pub root: String,
    pub project: Option<String>,
    pub jobs_file: Option<String>,
    pub commands: Vec<String>,
    pub pr: Option<u64>,
    pub actor: String,
    pub namespace: String,
    pub event: String,
    pub backends: BackendArgs,
}

/// Pre-converted batch, the output of the event-to-jobs boundary.
#[derive(Deserialize)]
struct JobsFile {
    jobs: Vec<Job>,
    covers_all_impacted_projects: bool,
}

pub async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let config = match load_config(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    let graph = config.dependency_graph()?;

    let (jobs, covers_all) = match build_batch(&config, &args) {
        Ok(batch) => batch,
        Err(message) => {
            error!(error = %message, "cannot build batch");
            return Ok(EXIT_BAD_CONTEXT);
        }
    };

    if jobs.is_empty() {
        info!("no jobs to run");
        return Ok(EXIT_OK);
    }

    info!(jobs = jobs.len(), "batch assembled");
    for job in &jobs {
        let commands: Vec<String> = job.commands.iter().map(|c| c.to_string()).collect();
        info!(project = %job.project_name, commands = %commands.join(", "), "job");
    }

    let Some(lock_store) = lock_store(&args.backends).await? else {
        return Ok(EXIT_BAD_CONTEXT);
    };

    let vcs: Option<Arc<dyn VcsService>> = match (&args.backends.github_token, args.pr) {
        (Some(token), Some(_)) => Some(Arc::new(GitHubService::new(
            token.clone(),
            args.namespace.clone(),
        ))),
        _ => None,
    };

    let strategy: Arc<dyn ReportStrategy> = match config.report_mode {
        ReportMode::CommentPerRun => Arc::new(CommentPerRun),
        ReportMode::SingleComment => Arc::new(SingleComment),
    };
    let reporter = match &vcs {
        Some(vcs) => Arc::new(Reporter::new(vcs.clone(), strategy)),
        None => Arc::new(Reporter::log_only()),
    };

    let policy = policy_checker(&args.backends);

    let runner = JobRunner::new(
        Arc::new(TerraformExecutor::new()),
        LockManager::new(lock_store),
        Arc::new(LocalPlanStorage::new(&args.backends.plans_dir)),
        policy,
        reporter,
    );

    let (batch, results) = BatchRunner::new(runner)
        .run_batch(jobs, &graph, covers_all)
        .await?;

    print_results(&results);

    if config.auto_merge && batch.merge_allowed() {
        if let (Some(vcs), Some(pr)) = (&vcs, args.pr) {
            info!(pr, "all applies clean, auto-merging");
            if let Err(e) = vcs.merge(pr).await {
                warn!(pr, error = %e, "auto-merge failed");
            }
        }
    }

    let failed = results.iter().any(|r| r.state == JobState::Failed);
    Ok(if failed { EXIT_JOB_FAILED } else { EXIT_OK })
}

pub async fn drift(
    config_path: &str,
    root: &str,
    actor: &str,
    namespace: &str,
    backends: BackendArgs,
) -> anyhow::Result<i32> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };
    let graph = config.dependency_graph()?;

    let jobs: Vec<Job> = config
        .projects
        .iter()
        .filter(|p| p.drift_detection)
        .map(|p| make_job(&config, root, p, vec![JobCommand::DriftDetect], None, actor, namespace, "drift-detect"))
        .collect();

    if jobs.is_empty() {
        info!("no projects have drift detection enabled");
        return Ok(EXIT_OK);
    }

    let Some(lock_store) = lock_store(&backends).await? else {
        return Ok(EXIT_BAD_CONTEXT);
    };

    let runner = JobRunner::new(
        Arc::new(TerraformExecutor::new()),
        LockManager::new(lock_store),
        Arc::new(LocalPlanStorage::new(&backends.plans_dir)),
        policy_checker(&backends),
        Arc::new(Reporter::log_only()),
    );

    // A drift sweep is never the full impacted set of a change request.
    let (_, results) = BatchRunner::new(runner)
        .run_batch(jobs, &graph, false)
        .await?;

    print_results(&results);

    let failed = results.iter().any(|r| r.state == JobState::Failed);
    Ok(if failed { EXIT_JOB_FAILED } else { EXIT_OK })
}

pub fn validate(path: &str) -> anyhow::Result<i32> {
    match load_config(path) {
        Ok(config) => {
            println!(
                "{}: ok ({} projects, {} workflows)",
                path,
                config.projects.len(),
                config.workflows.len()
            );
            Ok(EXIT_OK)
        }
        Err(e) => {
            println!("{path}: {e}");
            Ok(EXIT_CONFIG_ERROR)
        }
    }
}

pub async fn unlock(
    config_path: &str,
    project: &str,
    namespace: &str,
    backends: BackendArgs,
) -> anyhow::Result<i32> {
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "configuration error");
            return Ok(EXIT_CONFIG_ERROR);
        }
    };

    let Some(project_config) = config.project(project) else {
        error!(project, "unknown project");
        return Ok(EXIT_BAD_CONTEXT);
    };

    let Some(lock_store) = lock_store(&backends).await? else {
        return Ok(EXIT_BAD_CONTEXT);
    };
    let locks = LockManager::new(lock_store);

    let key = LockManager::key_for(namespace, project, &project_config.workspace);
    if locks.force_unlock(&key).await? {
        println!("released lock {key}");
    } else {
        println!("lock {key} was not held");
    }
    Ok(EXIT_OK)
}

fn load_config(path: &str) -> Result<OrchestratorConfig, ConfigError> {
    let text = std::fs::read_to_string(path)?;
    parse_config(&text)
}

fn build_batch(config: &OrchestratorConfig, args: &RunArgs) -> Result<(Vec<Job>, bool), String> {
    if let Some(path) = &args.jobs_file {
        let text = std::fs::read_to_string(path).map_err(|e| format!("{path}: {e}"))?;
        let file: JobsFile =
            serde_json::from_str(&text).map_err(|e| format!("{path}: {e}"))?;
        return Ok((file.jobs, file.covers_all_impacted_projects));
    }

    let commands_override = parse_commands(&args.commands)?;

    let selected: Vec<&terraflow_config::ProjectConfig> = match &args.project {
        Some(name) => {
            let project = config
                .project(name)
                .ok_or_else(|| format!("unknown project '{name}'"))?;
            vec![project]
        }
        None => config.projects.iter().collect(),
    };

    let jobs = selected
        .into_iter()
        .map(|project| {
            let workflow = config.workflow_for(project);
            let commands = commands_override.clone().unwrap_or_else(|| {
                if args.pr.is_some() {
                    workflow.on_pull_request_pushed.clone()
                } else {
                    workflow.on_commit_to_default.clone()
                }
            });
            make_job(
                config,
                &args.root,
                project,
                commands,
                args.pr,
                &args.actor,
                &args.namespace,
                &args.event,
            )
        })
        .collect();

    // A manually scoped batch never covers all impacted projects.
    Ok((jobs, args.project.is_none()))
}

#[allow(clippy::too_many_arguments)]
fn make_job(
    config: &OrchestratorConfig,
    root: &str,
    project: &terraflow_config::ProjectConfig,
    commands: Vec<JobCommand>,
    pr: Option<u64>,
    actor: &str,
    namespace: &str,
    event: &str,
) -> Job {
    let workflow = config.workflow_for(project);
    Job {
        project_name: project.name.clone(),
        project_dir: resolve_dir(root, &project.dir),
        workspace: project.workspace.clone(),
        commands,
        plan_stage: workflow.plan_stage,
        apply_stage: workflow.apply_stage,
        pull_request_number: pr,
        requested_by: actor.to_string(),
        namespace: namespace.to_string(),
        event_name: event.to_string(),
        state_env: workflow.state_env,
        command_env: workflow.command_env,
        state_env_provider: None,
        command_env_provider: None,
    }
}

fn resolve_dir(root: &str, dir: &Path) -> PathBuf {
    if dir.is_absolute() {
        dir.to_path_buf()
    } else {
        Path::new(root).join(dir)
    }
}

fn parse_commands(raw: &[String]) -> Result<Option<Vec<JobCommand>>, String> {
    if raw.is_empty() {
        return Ok(None);
    }
    raw.iter()
        .map(|s| s.parse::<JobCommand>())
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}

async fn lock_store(backends: &BackendArgs) -> anyhow::Result<Option<Arc<dyn LockStore>>> {
    match backends.lock_backend.as_str() {
        "postgres" => {
            let Some(url) = &backends.database_url else {
                error!("lock backend 'postgres' requires DATABASE_URL");
                return Ok(None);
            };
            let pool = sqlx::PgPool::connect(url).await?;
            let store = PgLockStore::new(pool);
            store.migrate().await?;
            Ok(Some(Arc::new(store)))
        }
        "memory" => {
            warn!("memory lock backend cannot exclude other orchestrator instances");
            Ok(Some(Arc::new(MemoryLockStore::new())))
        }
        other => {
            error!(backend = other, "unknown lock backend");
            Ok(None)
        }
    }
}

fn policy_checker(backends: &BackendArgs) -> Arc<dyn terraflow_core::policy::PolicyChecker> {
    match &backends.policy_url {
        Some(url) => Arc::new(HttpPolicyChecker::new(
            url.clone(),
            backends.policy_token.clone(),
        )),
        None => Arc::new(StaticPolicyChecker::allow_all()),
    }
}

fn print_results(results: &[JobResult]) {
    for result in results {
        println!("{}: {} ({})", result.project_name, result.state, result.summary);
        if let Some(error) = &result.error {
            println!("  {error}");
        }
    }
}
