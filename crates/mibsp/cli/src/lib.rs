//! mibsp-audit - operator CLI for the MIBSP activity ledger
//!
//! - Verify the hash chain in full, over a range, or incrementally from a
//!   pinned checkpoint
//! - Append manual entries
//! - List and filter activity, follow the trail of one complaint
//! - Generate and validate public tracking ids

use std::ffi::OsString;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use mibsp_ledger::AuditLedger;
use mibsp_storage::postgres::PostgresStorage;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod commands;
mod config;
mod error;
mod output;

use commands::{append, log, tracking, verify};
use config::CliConfig;
pub use error::{CliError, CliResult};

const DEFAULT_MAX_CONNECTIONS: u32 = 5;
const CONNECT_TIMEOUT_SECS: u64 = 5;

#[derive(Parser)]
#[command(name = "mibsp-audit")]
#[command(about = "MIBSP activity ledger - verification and audit tooling", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "MIBSP_CONFIG")]
    config: Option<String>,

    /// PostgreSQL connection string (overrides the config file)
    #[arg(long, env = "MIBSP_DATABASE_URL")]
    database_url: Option<String>,

    /// Output format (table, json, yaml)
    #[arg(short, long, default_value = "table")]
    output: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Verify ledger integrity (exit 2 when tampering is found)
    Verify(verify::VerifyArgs),

    /// Append an entry by hand
    Append(append::AppendArgs),

    /// List ledger activity, newest first
    Log(log::LogArgs),

    /// Subject trails and activity counts
    Report {
        #[command(subcommand)]
        command: log::ReportCommands,
    },

    /// Tracking id tools
    TrackingId {
        #[command(subcommand)]
        command: tracking::TrackingCommands,
    },

    /// Show effective configuration
    Config,
}

/// Run using the current process arguments.
pub async fn run() -> CliResult<ExitCode> {
    run_with_args(std::env::args_os()).await
}

/// Run using the provided argument iterator.
pub async fn run_with_args<I, T>(args: I) -> CliResult<ExitCode>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    let cli = Cli::parse_from(args);

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().without_time().with_writer(std::io::stderr))
        .init();

    let mut config = CliConfig::load(cli.config.as_deref())?;
    if cli.database_url.is_some() {
        config.database_url = cli.database_url.clone();
    }

    match cli.command {
        Commands::TrackingId {
            command: tracking::TrackingCommands::Validate { id },
        } => tracking::validate_id(&id, cli.output),
        Commands::Config => {
            println!("Database: {}", redact(config.database_url.as_deref()));
            println!("Checkpoint: {}", config.checkpoint_path()?.display());
            println!("Ledger: {:?}", config.ledger);
            println!("Tracking: {:?}", config.tracking);
            Ok(ExitCode::SUCCESS)
        }
        command => {
            let ledger = connect(&config).await?;
            execute(command, &ledger, &config, cli.output).await
        }
    }
}

async fn execute(
    command: Commands,
    ledger: &AuditLedger,
    config: &CliConfig,
    format: output::OutputFormat,
) -> CliResult<ExitCode> {
    match command {
        Commands::Verify(args) => {
            let checkpoint_path = config.checkpoint_path()?;
            verify::execute(args, ledger, &checkpoint_path, format).await
        }
        Commands::Append(args) => {
            append::execute(args, ledger, format).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Log(args) => {
            log::execute(args, ledger, format).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Report { command } => {
            log::report(command, ledger, format).await?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::TrackingId { command } => match command {
            tracking::TrackingCommands::Generate { issue } => {
                tracking::generate(issue, ledger, format).await?;
                Ok(ExitCode::SUCCESS)
            }
            tracking::TrackingCommands::Validate { id } => tracking::validate_id(&id, format),
        },
        Commands::Config => Ok(ExitCode::SUCCESS),
    }
}

async fn connect(config: &CliConfig) -> CliResult<AuditLedger> {
    let url = config.database_url.as_deref().ok_or_else(|| {
        CliError::Config("no database_url configured (set MIBSP_DATABASE_URL)".into())
    })?;
    let storage = PostgresStorage::connect_with_options(
        url,
        config.max_connections.unwrap_or(DEFAULT_MAX_CONNECTIONS),
        CONNECT_TIMEOUT_SECS,
    )
    .await?;
    info!(database = %redact(Some(url)), "connected to ledger database");
    Ok(AuditLedger::new(
        Arc::new(storage),
        config.ledger.clone(),
        config.tracking.clone(),
    ))
}

/// Hide credentials in a connection string.
fn redact(url: Option<&str>) -> String {
    let Some(url) = url else {
        return "(not set)".to_string();
    };
    match (url.find("://"), url.rfind('@')) {
        (Some(scheme_end), Some(at)) if at > scheme_end => {
            format!("{}://***{}", &url[..scheme_end], &url[at..])
        }
        _ => url.to_string(),
    }
}
