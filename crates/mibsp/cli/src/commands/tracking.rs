//! Tracking id tools

use std::process::ExitCode;

use clap::Subcommand;
use mibsp_ledger::AuditLedger;
use mibsp_types::validate;

use crate::error::CliResult;
use crate::output::{print_error, print_single, print_success, OutputFormat};

#[derive(Debug, Subcommand)]
pub enum TrackingCommands {
    /// Draw a new, unused tracking id
    Generate {
        /// Also record the id as issued
        #[arg(long)]
        issue: bool,
    },

    /// Check the format of a tracking id (exit 1 when malformed)
    Validate {
        /// Candidate id
        id: String,
    },
}

pub fn validate_id(id: &str, format: OutputFormat) -> CliResult<ExitCode> {
    let valid = validate(id);
    match format {
        OutputFormat::Table if valid => print_success(&format!("{id} is a valid tracking id")),
        OutputFormat::Table => print_error(&format!("{id:?} is not a valid tracking id")),
        _ => print_single(&serde_json::json!({ "id": id, "valid": valid }), format)?,
    }
    Ok(if valid {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn generate(issue: bool, ledger: &AuditLedger, format: OutputFormat) -> CliResult<()> {
    let id = if issue {
        ledger.issue_tracking_id().await?
    } else {
        ledger.generate_tracking_id().await?
    };
    match format {
        OutputFormat::Table => println!("{id}"),
        _ => print_single(&serde_json::json!({ "id": id, "issued": issue }), format)?,
    }
    Ok(())
}
