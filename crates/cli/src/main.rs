//! `workflow-engine` CLI entry-point.
//!
//! Available sub-commands:
//! - `serve`: start the API server.
//! - `migrate`: run pending database migrations.
//! - `validate`: validate a workflow JSON file.
//! - `run`: execute a workflow file once against in-memory storage.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use db::{MemoryStore, PgStore, Store};
use engine::{ExecutorConfig, RunContext, TriggerKind, WorkflowDefinition, WorkflowService};
use providers::Providers;

#[derive(Parser)]
#[command(
    name = "workflow-engine",
    about = "Sequential workflow automation engine",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the REST API server.
    Serve {
        #[arg(long, env = "WORKFLOW_BIND", default_value = "0.0.0.0:8080")]
        bind: String,
        /// Postgres connection string; without it everything is kept in memory.
        #[arg(long, env = "DATABASE_URL")]
        database_url: Option<String>,
        #[command(flatten)]
        executor: ExecutorArgs,
    },
    /// Run pending database migrations.
    Migrate {
        #[arg(long, env = "DATABASE_URL")]
        database_url: String,
    },
    /// Validate a workflow definition JSON file.
    Validate {
        /// Path to the workflow JSON file.
        path: PathBuf,
    },
    /// Execute a workflow definition once and print the execution record.
    Run {
        /// Path to the workflow JSON file.
        path: PathBuf,
        /// JSON object passed to the run as its context.
        #[arg(long, default_value = "{}")]
        context: String,
        #[command(flatten)]
        executor: ExecutorArgs,
    },
}

#[derive(Args)]
struct ExecutorArgs {
    /// Per-step deadline in seconds.
    #[arg(long, env = "WORKFLOW_STEP_TIMEOUT_SECS", default_value_t = 30)]
    step_timeout_secs: u64,
    /// Retries for transient webhook failures.
    #[arg(long, env = "WORKFLOW_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,
}

impl ExecutorArgs {
    fn config(&self) -> ExecutorConfig {
        ExecutorConfig {
            step_timeout: Duration::from_secs(self.step_timeout_secs),
            max_retries: self.max_retries,
            ..ExecutorConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Serve { bind, database_url, executor } => {
            let store: Arc<dyn Store> = match database_url {
                Some(url) => {
                    let pool = db::pool::create_pool(&url, 10)
                        .await
                        .context("failed to connect to database")?;
                    db::pool::run_migrations(&pool).await.context("migration failed")?;
                    Arc::new(PgStore::new(pool))
                }
                None => {
                    info!("DATABASE_URL not set, using in-memory storage");
                    Arc::new(MemoryStore::new())
                }
            };
            let service = WorkflowService::new(store, Providers::development()?, executor.config());
            info!("Starting API server on {bind}");
            api::serve(&bind, api::AppState::new(service)).await?;
        }
        Command::Migrate { database_url } => {
            info!("Running migrations");
            let pool = db::pool::create_pool(&database_url, 2)
                .await
                .context("failed to connect to database")?;
            db::pool::run_migrations(&pool).await.context("migration failed")?;
            info!("Migrations applied successfully");
        }
        Command::Validate { path } => {
            let definition = read_definition(&path)?;
            match engine::validate_steps(&definition.steps) {
                Ok(order) => println!("Workflow is valid. Execution order: {order:?}"),
                Err(e) => {
                    eprintln!("Validation failed: {e}");
                    std::process::exit(1);
                }
            }
        }
        Command::Run { path, context, executor } => {
            let definition = read_definition(&path)?;
            let context: RunContext =
                serde_json::from_str(&context).context("--context must be a JSON object")?;

            let service = WorkflowService::new(
                Arc::new(MemoryStore::new()),
                Providers::development()?,
                executor.config(),
            );
            let workflow = service.create_workflow(definition).await?;
            let execution = service
                .execute_workflow(workflow.id, context, TriggerKind::Manual)
                .await?;

            println!("{}", serde_json::to_string_pretty(&execution)?);
            if execution.error.is_some() {
                bail!("workflow '{}' failed", workflow.name);
            }
        }
    }

    Ok(())
}

fn read_definition(path: &Path) -> Result<WorkflowDefinition> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("cannot read file {}", path.display()))?;
    serde_json::from_str(&content).context("invalid workflow JSON")
}
