//! Sluice CLI
//!
//! Register data sources, run ETL pipelines, and inspect run history.

use anyhow::Result;
use clap::{ArgGroup, Parser, Subcommand};
use sluice_core::{ApiFormat, LoadMode, RunStatus, Stage};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod output;
mod project;

/// Sluice - extract, transform and load tabular data with an auditable run ledger
#[derive(Parser)]
#[command(name = "sluice")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "sluice.yaml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize a new Sluice project
    Init {
        /// Directory to initialize (defaults to current directory)
        #[arg(default_value = ".")]
        path: String,

        /// Project name (defaults to directory name)
        #[arg(short, long)]
        name: Option<String>,
    },

    /// Manage jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Run a job's pipeline
    Run {
        /// Job id
        job_id: i64,
    },

    /// Show the log trail of a run
    Logs {
        /// Run id
        run_id: i64,
    },

    /// Show a job's runs, newest first
    History {
        /// Job id
        job_id: i64,
    },

    /// Summarize runs and recent log activity
    Overview {
        /// Only runs of this job
        #[arg(long)]
        job: Option<i64>,

        /// Only runs in this state (running, success, failed)
        #[arg(long)]
        status: Option<RunStatus>,

        /// Only log entries from this stage (extract, transform, load, general)
        #[arg(long)]
        stage: Option<Stage>,
    },

    /// Show a job's destination table
    Data {
        /// Job id
        job_id: i64,

        /// Maximum rows to show
        #[arg(short, long, default_value_t = sluice_runtime::pipeline::DEFAULT_PREVIEW_ROWS)]
        limit: usize,
    },

    /// Fail runs stuck in `running` past the staleness window
    Cleanup,
}

#[derive(Subcommand)]
enum JobCommands {
    /// Register a new job
    #[command(group(ArgGroup::new("source").required(true).args(["csv", "api_url"])))]
    Create {
        /// Job name
        #[arg(long)]
        name: String,

        /// Job description
        #[arg(long)]
        description: Option<String>,

        /// Owning user
        #[arg(long, env = "USER", default_value = "local")]
        owner: String,

        /// Destination write mode (replace, append)
        #[arg(long, default_value = "replace")]
        load_mode: LoadMode,

        /// CSV file to stage as the source
        #[arg(long)]
        csv: Option<String>,

        /// API endpoint to GET
        #[arg(long)]
        api_url: Option<String>,

        /// API response format (json, csv)
        #[arg(long, default_value = "json", requires = "api_url")]
        api_format: ApiFormat,
    },

    /// List jobs
    List,

    /// Show a job and its runs
    Show {
        /// Job id
        job_id: i64,
    },

    /// Delete a job and its run history
    Delete {
        /// Job id
        job_id: i64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let json_layer = cli.json_logs.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
    });
    let text_layer = (!cli.json_logs).then(|| tracing_subscriber::fmt::layer().with_writer(std::io::stderr));

    tracing_subscriber::registry()
        .with(filter)
        .with(json_layer)
        .with(text_layer)
        .init();

    match cli.command {
        Commands::Init { path, name } => {
            commands::init::run(&path, name.as_deref()).await?;
        }
        Commands::Job { command } => match command {
            JobCommands::Create {
                name,
                description,
                owner,
                load_mode,
                csv,
                api_url,
                api_format,
            } => {
                let source = commands::job::source_spec(csv, api_url, api_format)?;
                commands::job::create(&cli.config, name, description, owner, load_mode, source)
                    .await?;
            }
            JobCommands::List => {
                commands::job::list(&cli.config).await?;
            }
            JobCommands::Show { job_id } => {
                commands::job::show(&cli.config, job_id).await?;
            }
            JobCommands::Delete { job_id } => {
                commands::job::delete(&cli.config, job_id).await?;
            }
        },
        Commands::Run { job_id } => {
            commands::run::run(&cli.config, job_id).await?;
        }
        Commands::Logs { run_id } => {
            commands::logs::run(&cli.config, run_id).await?;
        }
        Commands::History { job_id } => {
            commands::history::run(&cli.config, job_id).await?;
        }
        Commands::Overview { job, status, stage } => {
            commands::overview::run(&cli.config, job, status, stage).await?;
        }
        Commands::Data { job_id, limit } => {
            commands::data::run(&cli.config, job_id, limit).await?;
        }
        Commands::Cleanup => {
            commands::cleanup::run(&cli.config).await?;
        }
    }

    Ok(())
}
