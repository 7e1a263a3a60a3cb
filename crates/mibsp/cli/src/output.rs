//! Output formatting utilities

use crate::error::CliResult;
use colored::*;
use mibsp_ledger::EntrySummary;
use serde::Serialize;
use tabled::{Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty-printed table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
}

/// One ledger row as shown in `log` and `trail` tables.
#[derive(Debug, Serialize, Tabled)]
pub struct EntryRow {
    #[tabled(rename = "SEQ")]
    pub sequence: u64,
    #[tabled(rename = "TIMESTAMP")]
    pub timestamp: String,
    #[tabled(rename = "ROLE")]
    pub role: String,
    #[tabled(rename = "ACTOR")]
    pub actor: String,
    #[tabled(rename = "ACTION")]
    pub action: String,
    #[tabled(rename = "SUBJECT")]
    pub subject: String,
    #[tabled(rename = "DETAIL")]
    pub detail: String,
    #[tabled(rename = "HASH")]
    pub hash: String,
}

impl From<&EntrySummary> for EntryRow {
    fn from(summary: &EntrySummary) -> Self {
        Self {
            sequence: summary.sequence,
            timestamp: summary.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
            role: summary.role.to_string(),
            actor: summary.actor.clone(),
            action: summary.action.to_string(),
            subject: summary.subject.clone(),
            detail: truncate(&summary.detail, 48),
            hash: summary.link_hash.clone(),
        }
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        text.to_string()
    } else {
        let head: String = text.chars().take(max_chars.saturating_sub(3)).collect();
        format!("{head}...")
    }
}

/// Print ledger entries. Tables use [`EntryRow`]; JSON and YAML carry the
/// full summaries.
pub fn print_entries(entries: &[EntrySummary], format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if entries.is_empty() {
                println!("{}", "No results".dimmed());
            } else {
                let rows = entries.iter().map(EntryRow::from).collect::<Vec<_>>();
                println!("{}", Table::new(rows));
            }
            Ok(())
        }
        _ => print_single(entries, format),
    }
}

/// Print a vector of items in the specified format
pub fn print_output<T: Serialize + Tabled>(data: Vec<T>, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table => {
            if data.is_empty() {
                println!("{}", "No results".dimmed());
            } else {
                println!("{}", Table::new(data));
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&data)?),
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(&data)?),
    }
    Ok(())
}

/// Print a single item in the specified format
pub fn print_single<T: Serialize + ?Sized>(data: &T, format: OutputFormat) -> CliResult<()> {
    match format {
        OutputFormat::Table | OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(data)?);
        }
        OutputFormat::Yaml => println!("{}", serde_yaml::to_string(data)?),
    }
    Ok(())
}

pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow(), message);
}

pub fn print_info(message: &str) {
    println!("{} {}", "ℹ".blue(), message);
}
