//! Terraflow CLI.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "terraflow")]
#[command(about = "Plan/apply orchestrator for infrastructure projects", long_about = None)]
struct Cli {
    /// Path to the orchestrator configuration file
    #[arg(long, env = "TERRAFLOW_CONFIG", default_value = "terraflow.kdl")]
    config: String,

    /// Repository checkout root; project directories resolve against it
    #[arg(long, env = "TERRAFLOW_ROOT", default_value = ".")]
    root: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a batch of jobs for a change request or commit
    Run {
        /// Scope the batch to a single project (the batch then no longer
        /// covers all impacted projects)
        #[arg(long)]
        project: Option<String>,

        /// Pre-converted batch as JSON, bypassing config-driven job
        /// construction
        #[arg(long)]
        jobs_file: Option<String>,

        /// Commands to run, overriding the workflow's trigger defaults
        #[arg(long = "command")]
        commands: Vec<String>,

        /// Pull request number of the originating change request
        #[arg(long, env = "TERRAFLOW_PR_NUMBER")]
        pr: Option<u64>,

        /// Actor requesting the run
        #[arg(long, env = "TERRAFLOW_ACTOR", default_value = "terraflow")]
        actor: String,

        /// Repository identifier, e.g. "org/repo"
        #[arg(long, env = "TERRAFLOW_REPO")]
        namespace: String,

        /// Name of the triggering event
        #[arg(long, env = "TERRAFLOW_EVENT", default_value = "manual")]
        event: String,

        #[command(flatten)]
        backends: BackendArgs,
    },
    /// Run drift detection for projects that enabled it
    Drift {
        #[arg(long, env = "TERRAFLOW_ACTOR", default_value = "terraflow")]
        actor: String,

        #[arg(long, env = "TERRAFLOW_REPO")]
        namespace: String,

        #[command(flatten)]
        backends: BackendArgs,
    },
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(default_value = "terraflow.kdl")]
        path: String,
    },
    /// Force-release a project's lock (operator recovery)
    Unlock {
        /// Project name
        project: String,

        #[arg(long, env = "TERRAFLOW_REPO")]
        namespace: String,

        #[command(flatten)]
        backends: BackendArgs,
    },
}

#[derive(clap::Args)]
struct BackendArgs {
    /// Directory for stored plan artifacts
    #[arg(long, env = "TERRAFLOW_PLANS_DIR", default_value = ".terraflow/plans")]
    plans_dir: String,

    /// Lock store backend
    #[arg(long, env = "TERRAFLOW_LOCK_BACKEND", default_value = "memory")]
    lock_backend: String,

    /// Connection string for the postgres lock backend
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Token for the change-request service
    #[arg(long, env = "GITHUB_TOKEN")]
    github_token: Option<String>,

    /// Policy service endpoint; absent means allow-all
    #[arg(long, env = "TERRAFLOW_POLICY_URL")]
    policy_url: Option<String>,

    /// Token for the policy service
    #[arg(long, env = "TERRAFLOW_POLICY_TOKEN")]
    policy_token: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let exit_code = match cli.command {
        Commands::Run {
            project,
            jobs_file,
            commands,
            pr,
            actor,
            namespace,
            event,
            backends,
        } => {
            commands::run(commands::RunArgs {
                config_path: cli.config,
                root: cli.root,
                project,
                jobs_file,
                commands,
                pr,
                actor,
                namespace,
                event,
                backends,
            })
            .await?
        }
        Commands::Drift {
            actor,
            namespace,
            backends,
        } => commands::drift(&cli.config, &cli.root, &actor, &namespace, backends).await?,
        Commands::Validate { path } => commands::validate(&path)?,
        Commands::Unlock {
            project,
            namespace,
            backends,
        } => commands::unlock(&cli.config, &project, &namespace, backends).await?,
    };

    std::process::exit(exit_code);
}
