use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use helix::cmd;

#[derive(Parser)]
#[command(name = "helix")]
#[command(version, about = "Orchestrates a coding-agent CLI through declarative multi-phase project workflows")]
pub struct Cli {
    /// Verbose logging (stderr at debug, plus more detailed progress output)
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to a helix config TOML file (overrides HELIX_CONFIG and project discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a project's phases end to end
    Run {
        /// Path to the project directory
        project_path: PathBuf,

        /// Resume a previous run, skipping already-completed phases
        #[arg(long)]
        resume: bool,

        /// Render instructions and report what would run without invoking the agent
        #[arg(long)]
        dry_run: bool,

        /// Start at this phase id, dropping every phase before it
        #[arg(long)]
        phase: Option<String>,

        /// Override the model escalation chain with a single model
        #[arg(long)]
        model: Option<String>,
    },
    /// Print per-phase state, retries, and the last error for a project
    Status {
        /// Path to the project directory
        project_path: PathBuf,
    },
    /// Replay a job's event stream
    Logs {
        /// Job id to replay
        job_id: String,

        /// Path to the project directory the job ran in
        #[arg(long, default_value = ".")]
        project_path: PathBuf,

        /// Keep streaming new events until the job reaches a terminal state
        #[arg(long)]
        follow: bool,
    },
    /// Request cooperative cancellation of a running job
    Stop {
        /// Job id to cancel
        job_id: String,

        /// Path to the project directory the job ran in
        #[arg(long, default_value = ".")]
        project_path: PathBuf,
    },
    /// List jobs recorded for a project, newest first
    Jobs {
        /// Path to the project directory
        project_path: PathBuf,

        /// Maximum number of jobs to list
        #[arg(long, default_value = "20")]
        limit: usize,
    },
    /// Run the self-evolution pipeline: execute, deploy, validate, integrate
    Evolve {
        /// Path to the project directory
        project_path: PathBuf,

        /// Name to identify this evolution project by (defaults to the directory name)
        #[arg(long)]
        name: Option<String>,

        /// Twin tree to deploy to and validate against (defaults to the configured test_root)
        #[arg(long)]
        twin_root: Option<PathBuf>,

        /// Git remote to fetch from before deploying
        #[arg(long, default_value = "origin")]
        remote: String,

        /// Branch to reset the twin tree to before deploying
        #[arg(long, default_value = "main")]
        baseline_branch: String,

        /// Test command to run in the twin tree, e.g. `pytest -q`
        #[arg(long, num_args = 1.., default_value = "pytest")]
        test_command: Vec<String>,

        /// Path to the recorded baseline.json used to separate pre-existing failures from regressions
        #[arg(long)]
        baseline_file: Option<PathBuf>,

        /// Path to a `.permanent_skips` file of test node ids to ignore
        #[arg(long)]
        permanent_skips_file: Option<PathBuf>,

        /// Integrate into production automatically once validation passes
        #[arg(long)]
        auto_integrate: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_dir = std::env::temp_dir().join("helix-logs");
    let _guard = helix::logging::init(cli.verbose, &log_dir).ok();

    let exit_code = match cli.command {
        Commands::Run { project_path, resume, dry_run, phase, model } => {
            cmd::cmd_run(cmd::run::RunArgs {
                project_path,
                resume,
                dry_run,
                phase,
                model,
                config_path: cli.config.clone(),
                verbose: cli.verbose,
            })
            .await?
        }
        Commands::Status { project_path } => {
            cmd::cmd_status(cmd::status::StatusArgs { project_path })?
        }
        Commands::Logs { job_id, project_path, follow } => {
            cmd::cmd_logs(cmd::logs::LogsArgs { project_path, job_id, follow }).await?
        }
        Commands::Stop { job_id, project_path } => {
            cmd::cmd_stop(cmd::stop::StopArgs { project_path, job_id })?
        }
        Commands::Jobs { project_path, limit } => {
            cmd::cmd_jobs(cmd::jobs::JobsArgs { project_path, limit })?
        }
        Commands::Evolve {
            project_path,
            name,
            twin_root,
            remote,
            baseline_branch,
            test_command,
            baseline_file,
            permanent_skips_file,
            auto_integrate,
        } => {
            cmd::cmd_evolve(cmd::evolve::EvolveArgs {
                project_path,
                project_name: name,
                twin_root,
                remote,
                baseline_branch,
                test_command,
                baseline_path: baseline_file,
                permanent_skips_path: permanent_skips_file,
                auto_integrate,
                config_path: cli.config.clone(),
            })
            .await?
        }
    };

    std::process::exit(exit_code);
}
