use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use labelwork_core::resolution::{AnnotationFilter, ResolutionOptions};
use labelwork_core::types::{RowId, Timestamp};
use labelwork_worker::config::{LogFormat, WorkerConfig};
use labelwork_worker::store::MemoryStore;
use labelwork_worker::workflow::Workflow;

#[derive(Parser)]
#[command(name = "labelwork-worker", version, about = "Annotation workflow worker")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sample a scope's items and create its assignments
    Distribute { scope_id: String },
    /// Recompute the status of every assignment in a scope
    Refresh { scope_id: String },
    /// Recompute the status of one assignment
    RefreshAssignment { assignment_id: RowId },
    /// Resolve a scope's annotations into consensus
    Resolve {
        scope_id: String,
        /// Only aggregate annotations by these annotators
        #[arg(long = "user", env = "RESOLVE_USERS", value_delimiter = ',')]
        users: Vec<String>,
        /// Only aggregate these label keys
        #[arg(long = "key", env = "RESOLVE_KEYS", value_delimiter = ',')]
        keys: Vec<String>,
        /// Only aggregate these repeats
        #[arg(long = "repeat", env = "RESOLVE_REPEATS", value_delimiter = ',')]
        repeats: Vec<u32>,
    },
    /// Report inter-rater agreement per label of a scope
    Agreement { scope_id: String },
    /// Count annotations written since a timestamp (RFC 3339)
    Pending { scope_id: String, since: Timestamp },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "labelwork_worker=debug,labelwork_core=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Plain => registry
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_writer(std::io::stderr),
            )
            .init(),
    }

    // --- Store ---
    let store = Arc::new(MemoryStore::open(&config.snapshot_path).await?);
    let workflow = Workflow::new(Arc::clone(&store), config.resolution.clone());

    match cli.cmd {
        Command::Distribute { scope_id } => print(&workflow.create_assignments(&scope_id).await?)?,
        Command::Refresh { scope_id } => print(&workflow.refresh_scope(&scope_id).await?)?,
        Command::RefreshAssignment { assignment_id } => {
            print(&workflow.refresh_assignment(assignment_id).await?)?
        }
        Command::Resolve {
            scope_id,
            users,
            keys,
            repeats,
        } => {
            let options = ResolutionOptions {
                filter: AnnotationFilter::users(users)
                    .with_keys(keys)
                    .with_repeats(repeats),
                ..config.resolution.clone()
            };
            print(&workflow.resolve_scope_with(&scope_id, options).await?)?
        }
        Command::Agreement { scope_id } => print(&workflow.scope_agreement(&scope_id).await?)?,
        Command::Pending { scope_id, since } => {
            print(&workflow.pending_changes(&scope_id, since).await?)?
        }
    }

    if let Some(output) = &config.output_path {
        store.save(output).await?;
        tracing::info!(path = %output.display(), "Snapshot written");
    }

    Ok(())
}

fn print(value: &impl Serialize) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
