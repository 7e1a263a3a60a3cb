//! Chain verification commands

use std::path::Path;
use std::process::ExitCode;

use clap::Args;
use colored::*;
use mibsp_ledger::{AuditLedger, ScanMode, VerificationResult};
use mibsp_types::LinkHash;

use crate::config::{load_checkpoint, save_checkpoint};
use crate::error::{CliError, CliResult};
use crate::output::{print_error, print_info, print_single, print_success, print_warning, OutputFormat};

/// Exit status reported when verification finds an inconsistency.
pub const TAMPERED_EXIT: u8 = 2;

#[derive(Debug, Args)]
pub struct VerifyArgs {
    /// Enumerate every inconsistency instead of stopping at the first
    #[arg(long)]
    pub full: bool,

    /// First sequence of a range check
    #[arg(long, requires = "to")]
    pub from: Option<u64>,

    /// Last sequence of a range check
    #[arg(long, requires = "from")]
    pub to: Option<u64>,

    /// Trusted link hash of the entry before --from (hex)
    #[arg(long, requires = "from")]
    pub seed: Option<String>,

    /// Resume from the pinned checkpoint and check only newer entries
    #[arg(long, conflicts_with_all = ["from", "to", "seed"])]
    pub incremental: bool,
}

impl VerifyArgs {
    fn mode(&self) -> ScanMode {
        if self.full {
            ScanMode::Forensic
        } else {
            ScanMode::FirstFinding
        }
    }
}

pub async fn execute(
    args: VerifyArgs,
    ledger: &AuditLedger,
    checkpoint_path: &Path,
    format: OutputFormat,
) -> CliResult<ExitCode> {
    let mode = args.mode();

    let result = match (args.from, args.to) {
        (Some(from), Some(to)) => {
            let seed = resolve_seed(from, args.seed.as_deref())?;
            ledger.verify_range(from, to, seed, mode).await?
        }
        _ if args.incremental => match load_checkpoint(checkpoint_path)? {
            Some(checkpoint) => ledger.verify_since(&checkpoint, mode).await?,
            None => {
                print_info("No pinned checkpoint, verifying the full ledger");
                ledger.verify_all(mode).await?
            }
        },
        _ => ledger.verify_all(mode).await?,
    };

    // Range runs never move the pin.
    if args.from.is_none() {
        if let Some(checkpoint) = &result.checkpoint {
            save_checkpoint(checkpoint_path, checkpoint)?;
        }
    }

    report(&result, format)?;
    Ok(exit_code(&result))
}

fn resolve_seed(from: u64, seed: Option<&str>) -> CliResult<LinkHash> {
    match seed {
        Some(hex) => hex
            .parse::<LinkHash>()
            .map_err(|e| CliError::InvalidInput(format!("--seed: {e}"))),
        None if from == 1 => Ok(LinkHash::GENESIS),
        None => Err(CliError::InvalidInput(
            "--seed is required when --from is greater than 1".into(),
        )),
    }
}

pub fn exit_code(result: &VerificationResult) -> ExitCode {
    if result.is_intact() {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(TAMPERED_EXIT)
    }
}

fn report(result: &VerificationResult, format: OutputFormat) -> CliResult<()> {
    if !matches!(format, OutputFormat::Table) {
        return print_single(result, format);
    }

    if result.entries_checked == 0 {
        print_info("Ledger is empty");
    } else if result.is_intact() {
        print_success(&format!(
            "Chain intact: {} entries verified ({}..={})",
            result.entries_checked, result.from, result.to
        ));
    } else {
        print_error(&format!(
            "Chain tampered: {} finding(s) in {}..={}",
            result.findings.len(),
            result.from,
            result.to
        ));
        for finding in &result.findings {
            println!(
                "  {} #{} {}",
                finding.kind.to_string().red().bold(),
                finding.sequence,
                finding.detail.dimmed()
            );
        }
    }

    for regression in &result.clock_regressions {
        print_warning(&format!(
            "Entry #{} is stamped {} before its predecessor ({})",
            regression.sequence, regression.timestamp, regression.previous_timestamp
        ));
    }

    if let Some(checkpoint) = &result.checkpoint {
        println!(
            "  checkpoint #{} {}",
            checkpoint.sequence,
            checkpoint.link_hash.short().dimmed()
        );
    }
    Ok(())
}
