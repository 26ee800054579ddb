//! Orchestrator configuration parsing.
//!
//! A `terraflow.kdl` file declares projects (directory, workspace,
//! workflow, dependencies) and workflows (plan/apply stage steps plus
//! environment variable sets).

use crate::graph::DependencyGraph;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use std::collections::HashMap;
use std::path::PathBuf;
use terraflow_core::job::{JobCommand, Stage, Step, StepAction};

pub const DEFAULT_WORKFLOW: &str = "default";

/// One configured infrastructure project.
#[derive(Debug, Clone)]
pub struct ProjectConfig {
    pub name: String,
    pub dir: PathBuf,
    pub workspace: String,
    pub workflow: String,
    pub depends_on: Vec<String>,
    pub drift_detection: bool,
}

/// A workflow: stage definitions plus environment variable sets and the
/// commands run for each trigger kind.
#[derive(Debug, Clone)]
pub struct Workflow {
    pub plan_stage: Stage,
    pub apply_stage: Stage,
    /// Environment for the state backend.
    pub state_env: HashMap<String, String>,
    /// Environment for command execution.
    pub command_env: HashMap<String, String>,
    /// Commands run when a pull request is opened or pushed to.
    pub on_pull_request_pushed: Vec<JobCommand>,
    /// Commands run on a commit to the default branch.
    pub on_commit_to_default: Vec<JobCommand>,
}

impl Default for Workflow {
    fn default() -> Self {
        Self {
            plan_stage: Stage::default_plan(),
            apply_stage: Stage::default_apply(),
            state_env: HashMap::new(),
            command_env: HashMap::new(),
            on_pull_request_pushed: vec![JobCommand::Plan],
            on_commit_to_default: vec![JobCommand::Plan, JobCommand::Apply],
        }
    }
}

/// How job results are reported back to the change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReportMode {
    /// A new comment for every report.
    CommentPerRun,
    /// One rolling comment, updated in place.
    #[default]
    SingleComment,
}

/// Parsed orchestrator configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub projects: Vec<ProjectConfig>,
    pub workflows: HashMap<String, Workflow>,
    pub auto_merge: bool,
    pub report_mode: ReportMode,
}

impl OrchestratorConfig {
    pub fn project(&self, name: &str) -> Option<&ProjectConfig> {
        self.projects.iter().find(|p| p.name == name)
    }

    /// Workflow for a project; the implicit default workflow when the
    /// project does not name one.
    pub fn workflow_for(&self, project: &ProjectConfig) -> Workflow {
        self.workflows
            .get(&project.workflow)
            .cloned()
            .unwrap_or_default()
    }

    /// Build the dependency graph over the configured projects.
    pub fn dependency_graph(&self) -> ConfigResult<DependencyGraph> {
        let pairs: Vec<(String, Vec<String>)> = self
            .projects
            .iter()
            .map(|p| (p.name.clone(), p.depends_on.clone()))
            .collect();
        DependencyGraph::build(&pairs)
    }
}

/// Parse an orchestrator configuration from KDL text.
pub fn parse_config(kdl: &str) -> ConfigResult<OrchestratorConfig> {
    let doc: KdlDocument = kdl.parse()?;

    let mut projects: Vec<ProjectConfig> = Vec::new();
    let mut workflows: HashMap<String, Workflow> = HashMap::new();
    let mut auto_merge = false;
    let mut report_mode = ReportMode::default();

    for node in doc.nodes() {
        match node.name().value() {
            "project" => {
                let project = parse_project(node)?;
                if projects.iter().any(|p| p.name == project.name) {
                    return Err(ConfigError::Duplicate(format!(
                        "project '{}'",
                        project.name
                    )));
                }
                projects.push(project);
            }
            "workflow" => {
                let name = get_first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("workflow name".to_string()))?;
                if workflows.contains_key(&name) {
                    return Err(ConfigError::Duplicate(format!("workflow '{name}'")));
                }
                workflows.insert(name, parse_workflow(node)?);
            }
            "auto-merge" => {
                auto_merge = node
                    .entries()
                    .iter()
                    .find(|e| e.name().is_none())
                    .and_then(|e| e.value().as_bool())
                    .unwrap_or(true);
            }
            "report" => {
                let mode = get_first_string_arg(node).unwrap_or_default();
                report_mode = match mode.as_str() {
                    "comment-per-run" => ReportMode::CommentPerRun,
                    "single-comment" | "" => ReportMode::SingleComment,
                    other => {
                        return Err(ConfigError::InvalidValue {
                            field: "report".to_string(),
                            message: format!("unknown report mode: {other}"),
                        });
                    }
                };
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if projects.is_empty() {
        return Err(ConfigError::MissingField("at least one project".to_string()));
    }

    // Validate workflow references
    for project in &projects {
        if project.workflow != DEFAULT_WORKFLOW && !workflows.contains_key(&project.workflow) {
            return Err(ConfigError::InvalidReference(format!(
                "project '{}' references unknown workflow '{}'",
                project.name, project.workflow
            )));
        }
    }

    let config = OrchestratorConfig {
        projects,
        workflows,
        auto_merge,
        report_mode,
    };

    // Dependency edges must resolve and form a DAG before anything runs.
    config.dependency_graph()?;

    Ok(config)
}

fn parse_project(node: &KdlNode) -> ConfigResult<ProjectConfig> {
    let name = get_first_string_arg(node)
        .ok_or_else(|| ConfigError::MissingField("project name".to_string()))?;

    let mut dir = None;
    let mut workspace = "default".to_string();
    let mut workflow = DEFAULT_WORKFLOW.to_string();
    let mut depends_on = Vec::new();
    let mut drift_detection = false;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "dir" => {
                    dir = get_first_string_arg(child).map(PathBuf::from);
                }
                "workspace" => {
                    if let Some(ws) = get_first_string_arg(child) {
                        workspace = ws;
                    }
                }
                "workflow" => {
                    if let Some(wf) = get_first_string_arg(child) {
                        workflow = wf;
                    }
                }
                "depends-on" => {
                    depends_on.extend(get_all_string_args(child));
                }
                "drift-detection" => {
                    drift_detection = true;
                }
                _ => {}
            }
        }
    }

    let dir = dir.ok_or_else(|| ConfigError::MissingField(format!("dir for project '{name}'")))?;

    Ok(ProjectConfig {
        name,
        dir,
        workspace,
        workflow,
        depends_on,
        drift_detection,
    })
}

fn parse_workflow(node: &KdlNode) -> ConfigResult<Workflow> {
    let mut workflow = Workflow::default();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "plan" => {
                    workflow.plan_stage = parse_stage(child)?;
                }
                "apply" => {
                    workflow.apply_stage = parse_stage(child)?;
                }
                "env" => {
                    parse_env_sets(child, &mut workflow.state_env, &mut workflow.command_env);
                }
                "on-pull-request-pushed" => {
                    workflow.on_pull_request_pushed = parse_commands(child)?;
                }
                "on-commit-to-default" => {
                    workflow.on_commit_to_default = parse_commands(child)?;
                }
                _ => {}
            }
        }
    }

    Ok(workflow)
}

fn parse_stage(node: &KdlNode) -> ConfigResult<Stage> {
    let mut steps = Vec::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let action = match child.name().value() {
                "init" => StepAction::Init {
                    extra_args: get_all_string_args(child),
                },
                "plan" => StepAction::Plan {
                    extra_args: get_all_string_args(child),
                },
                "apply" => StepAction::Apply {
                    extra_args: get_all_string_args(child),
                },
                "run" => {
                    let command = get_first_string_arg(child).ok_or_else(|| {
                        ConfigError::MissingField("command for run step".to_string())
                    })?;
                    StepAction::Run { command }
                }
                other => {
                    return Err(ConfigError::InvalidValue {
                        field: "step".to_string(),
                        message: format!("unknown step: {other}"),
                    });
                }
            };

            let mut env = HashMap::new();
            if let Some(grandchildren) = child.children() {
                for gc in grandchildren.nodes() {
                    if gc.name().value() == "env" {
                        collect_env(gc, &mut env);
                    }
                }
            }

            steps.push(Step { action, env });
        }
    }

    if steps.is_empty() {
        return Err(ConfigError::MissingField("at least one step".to_string()));
    }

    Ok(Stage { steps })
}

fn parse_commands(node: &KdlNode) -> ConfigResult<Vec<JobCommand>> {
    get_all_string_args(node)
        .iter()
        .map(|s| {
            s.parse().map_err(|message| ConfigError::InvalidValue {
                field: "command".to_string(),
                message,
            })
        })
        .collect()
}

fn parse_env_sets(
    node: &KdlNode,
    state_env: &mut HashMap<String, String>,
    command_env: &mut HashMap<String, String>,
) {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "state" => collect_env(child, state_env),
                "commands" => collect_env(child, command_env),
                _ => {}
            }
        }
    }
}

fn collect_env(node: &KdlNode, env: &mut HashMap<String, String>) {
    if let Some(children) = node.children() {
        for child in children.nodes() {
            let key = child.name().value().to_string();
            if let Some(val) = get_first_string_arg(child) {
                env.insert(key, val);
            }
        }
    }
}

// Helper functions for extracting values from KDL nodes

fn get_first_string_arg(node: &KdlNode) -> Option<String> {
    node.entries()
        .iter()
        .find(|e| e.name().is_none())
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
}

fn get_all_string_args(node: &KdlNode) -> Vec<String> {
    node.entries()
        .iter()
        .filter(|e| e.name().is_none())
        .filter_map(|e| e.value().as_string())
        .map(|s| s.to_string())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let kdl = r#"
            project "vpc" {
                dir "infra/vpc"
            }
        "#;

        let config = parse_config(kdl).unwrap();
        assert_eq!(config.projects.len(), 1);
        assert_eq!(config.projects[0].name, "vpc");
        assert_eq!(config.projects[0].workspace, "default");
        assert!(!config.auto_merge);
    }

    #[test]
    fn parses_projects_with_dependencies_and_workflow() {
        let kdl = r#"
            project "network" {
                dir "infra/network"
            }

            project "cluster" {
                dir "infra/cluster"
                workspace "staging"
                workflow "careful"
                depends-on "network"
                drift-detection
            }

            workflow "careful" {
                plan {
                    init
                    plan "-lock-timeout=3m"
                }
                apply {
                    init
                    apply
                }
                env {
                    state {
                        AWS_PROFILE "state-admin"
                    }
                    commands {
                        TF_LOG "info"
                    }
                }
            }

            auto-merge #true
            report "comment-per-run"
        "#;

        let config = parse_config(kdl).unwrap();
        let cluster = config.project("cluster").unwrap();
        assert_eq!(cluster.depends_on, vec!["network"]);
        assert_eq!(cluster.workspace, "staging");
        assert!(cluster.drift_detection);

        let workflow = config.workflow_for(cluster);
        assert_eq!(workflow.plan_stage.steps.len(), 2);
        assert_eq!(
            workflow.state_env.get("AWS_PROFILE"),
            Some(&"state-admin".to_string())
        );
        assert!(config.auto_merge);
        assert_eq!(config.report_mode, ReportMode::CommentPerRun);
    }

    #[test]
    fn rejects_unknown_workflow_reference() {
        let kdl = r#"
            project "vpc" {
                dir "infra/vpc"
                workflow "nope"
            }
        "#;

        let result = parse_config(kdl);
        assert!(matches!(result, Err(ConfigError::InvalidReference(_))));
    }

    #[test]
    fn rejects_duplicate_project() {
        let kdl = r#"
            project "vpc" {
                dir "a"
            }
            project "vpc" {
                dir "b"
            }
        "#;

        let result = parse_config(kdl);
        assert!(matches!(result, Err(ConfigError::Duplicate(_))));
    }

    #[test]
    fn rejects_dependency_cycle() {
        let kdl = r#"
            project "a" {
                dir "a"
                depends-on "b"
            }
            project "b" {
                dir "b"
                depends-on "a"
            }
        "#;

        let result = parse_config(kdl);
        assert!(matches!(result, Err(ConfigError::CycleDetected(_))));
    }

    #[test]
    fn custom_trigger_commands() {
        let kdl = r#"
            project "vpc" {
                dir "infra/vpc"
            }

            workflow "default" {
                on-pull-request-pushed "plan"
                on-commit-to-default "apply"
            }
        "#;

        let config = parse_config(kdl).unwrap();
        let workflow = config.workflows.get("default").unwrap();
        assert_eq!(workflow.on_pull_request_pushed, vec![JobCommand::Plan]);
        assert_eq!(workflow.on_commit_to_default, vec![JobCommand::Apply]);
    }
}
