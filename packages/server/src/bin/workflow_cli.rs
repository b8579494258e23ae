//! Operator CLI for diagnosing and repairing workflow requests
//!
//! Every command prints a single JSON document on stdout.

use anyhow::{Context, Result};
use approval_core::common::RequestId;
use approval_core::config::Config;
use approval_core::domains::workflow::actions::{diagnose, repair, scan_stuck, DiagnosticReport};
use approval_core::domains::workflow::error::WorkflowError;
use approval_core::domains::workflow::store::PgWorkflowStore;
use clap::{Parser, Subcommand};
use serde::Serialize;
use sqlx::PgPool;

#[derive(Parser)]
#[command(name = "workflow_cli")]
#[command(about = "Diagnose and repair approval workflow requests")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report divergences for one request
    Diagnose { request_id: String },

    /// Finalize one request whose approvals say it is complete
    Repair { request_id: String },

    /// Diagnose all open requests and list the divergent ones
    Scan {
        /// Maximum number of candidate requests to inspect
        #[arg(
            long,
            default_value_t = 100,
            value_parser = clap::value_parser!(i64).range(1..)
        )]
        limit: i64,
        /// Also repair every fixable request found
        #[arg(long)]
        repair: bool,
    },
}

// ============================================================================
// JSON Response Types
// ============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ScanEntry {
    report: DiagnosticReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    repair: Option<RepairOutcome>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RepairOutcome {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ErrorOutput {
    success: bool,
    error: String,
    retryable: bool,
}

fn output<T: Serialize>(value: &T) -> Result<()> {
    println!(
        "{}",
        serde_json::to_string_pretty(value).context("Failed to serialize output")?
    );
    Ok(())
}

// ============================================================================
// Main
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,approval_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let store = get_store().await?;

    let result = match cli.command {
        Commands::Diagnose { request_id } => cmd_diagnose(&store, &request_id).await,
        Commands::Repair { request_id } => cmd_repair(&store, &request_id).await,
        Commands::Scan { limit, repair } => cmd_scan(&store, limit, repair).await,
    };

    if let Err(err) = result {
        output(&ErrorOutput {
            success: false,
            error: format!("{:#}", err),
            retryable: err
                .downcast_ref::<WorkflowError>()
                .is_some_and(WorkflowError::is_retryable),
        })?;
        std::process::exit(1);
    }

    Ok(())
}

async fn get_store() -> Result<PgWorkflowStore> {
    let config = Config::from_env()?;
    let pool = PgPool::connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    Ok(PgWorkflowStore::new(pool).with_lock_timeout(config.lock_timeout))
}

fn parse_request_id(raw: &str) -> Result<RequestId> {
    RequestId::parse(raw)
        .map_err(|_| WorkflowError::InvalidInput(format!("invalid request id: {}", raw)).into())
}

// ============================================================================
// Commands
// ============================================================================

async fn cmd_diagnose(store: &PgWorkflowStore, raw_id: &str) -> Result<()> {
    let report = diagnose(store, parse_request_id(raw_id)?).await?;
    output(&report)
}

async fn cmd_repair(store: &PgWorkflowStore, raw_id: &str) -> Result<()> {
    let result = repair(store, parse_request_id(raw_id)?).await?;
    output(&result)
}

async fn cmd_scan(store: &PgWorkflowStore, limit: i64, fix: bool) -> Result<()> {
    let reports = scan_stuck(store, limit).await?;

    let mut entries = Vec::with_capacity(reports.len());
    for report in reports {
        let repair = if fix && report.can_fix {
            Some(match repair(store, report.request_id).await {
                Ok(result) => RepairOutcome {
                    success: result.success,
                    message: result.message,
                },
                Err(err) => RepairOutcome {
                    success: false,
                    message: err.to_string(),
                },
            })
        } else {
            None
        };
        entries.push(ScanEntry { report, repair });
    }

    output(&entries)
}
