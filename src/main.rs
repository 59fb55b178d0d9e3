use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use autopilot::orchestrator::{EvidenceOptions, StartOptions};
use autopilot::provider::ProviderChoice;

mod cmd;

/// Exit code after Ctrl-C.
const EXIT_INTERRUPTED: i32 = 130;

#[derive(Parser)]
#[command(name = "autopilot")]
#[command(
    version,
    about = "Turn a tracked work item into a branch, a pull request and an evidence pack"
)]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create or reuse the branch, tracker item and pull request for a work item
    Start {
        /// Work item identifier, e.g. ACF-0042
        id: String,

        #[arg(long, value_enum, default_value_t = ProviderChoice::Auto)]
        provider: ProviderChoice,

        /// Base branch (defaults to AUTOPILOT_BASE_BRANCH, then autopilot.toml)
        #[arg(long)]
        base_branch: Option<String>,

        /// Open the pull request as a draft
        #[arg(long)]
        draft: bool,

        /// Simulate every remote call and skip git mutations
        #[arg(long)]
        dry_run: bool,

        /// Commit the review pack and state file
        #[arg(long)]
        commit: bool,

        /// Push the branch (implies --commit)
        #[arg(long)]
        push: bool,

        /// Fail instead of running offline when credentials are missing
        #[arg(long)]
        require_integration: bool,

        /// Ignore untracked files in the clean-worktree check
        #[arg(long)]
        allow_untracked: bool,
    },
    /// Run local checks, write the review pack and upsert the PR evidence comment
    Evidence {
        id: String,

        #[arg(long, value_enum, default_value_t = ProviderChoice::Auto)]
        provider: ProviderChoice,

        /// Run the fast local checks
        #[arg(long)]
        run_local: bool,

        /// Run the full verification suite (implies --run-local)
        #[arg(long)]
        full_verify: bool,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        require_integration: bool,
    },
    /// Show the recorded state for a work item
    Status { id: String },
    /// View, validate or initialize configuration
    Config {
        #[command(subcommand)]
        command: Option<ConfigCommands>,
    },
}

#[derive(Subcommand, Clone)]
pub enum ConfigCommands {
    /// Show the effective configuration
    Show,
    /// Validate autopilot.toml and show any warnings
    Validate,
    /// Write a default autopilot.toml
    Init,
}

async fn run(cli: Cli, project_dir: PathBuf) -> Result<i32> {
    match cli.command {
        Commands::Start {
            id,
            provider,
            base_branch,
            draft,
            dry_run,
            commit,
            push,
            require_integration,
            allow_untracked,
        } => {
            let options = StartOptions {
                provider,
                base_branch,
                draft,
                dry_run,
                commit,
                push,
                require_integration,
                allow_untracked,
            };
            cmd::cmd_start(&project_dir, &id, options).await
        }
        Commands::Evidence {
            id,
            provider,
            run_local,
            full_verify,
            dry_run,
            require_integration,
        } => {
            let options = EvidenceOptions {
                provider,
                run_local,
                full_verify,
                dry_run,
                require_integration,
            };
            cmd::cmd_evidence(&project_dir, &id, options).await
        }
        Commands::Status { id } => cmd::cmd_status(&project_dir, &id),
        Commands::Config { command } => cmd::cmd_config(&project_dir, command),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    autopilot::telemetry::init_tracing(cli.log_json, cli.verbose);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    if let Err(e) = dotenvy::from_path(project_dir.join(".env"))
        && !e.not_found()
    {
        tracing::warn!(error = %e, "ignoring unreadable .env");
    }

    let code = tokio::select! {
        code = run(cli, project_dir) => code?,
        _ = tokio::signal::ctrl_c() => {
            eprintln!("Interrupted; state up to the last checkpoint is kept.");
            EXIT_INTERRUPTED
        }
    };
    std::process::exit(code);
}
