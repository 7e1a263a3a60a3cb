//! Activity listings

use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};
use mibsp_ledger::{AuditLedger, EntrySummary};
use mibsp_storage::{LedgerQuery, QueryWindow};
use mibsp_types::{Action, ActorRole, SubjectRef};
use serde::Serialize;
use tabled::Tabled;

use crate::error::{CliError, CliResult};
use crate::output::{print_entries, print_output, OutputFormat};

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Only this action
    #[arg(long)]
    pub action: Option<Action>,

    /// Actor id substring (case-insensitive)
    #[arg(long)]
    pub actor: Option<String>,

    /// Only this actor role
    #[arg(long)]
    pub role: Option<ActorRole>,

    /// Exact subject reference
    #[arg(long)]
    pub subject: Option<String>,

    /// Earliest timestamp (RFC 3339)
    #[arg(long)]
    pub since: Option<DateTime<Utc>>,

    /// Latest timestamp (RFC 3339)
    #[arg(long)]
    pub until: Option<DateTime<Utc>>,

    /// Entries per page
    #[arg(long, default_value_t = 50)]
    pub limit: usize,

    /// Page number, starting at 1
    #[arg(long, default_value_t = 1)]
    pub page: usize,
}

impl LogArgs {
    fn query(&self) -> CliResult<LedgerQuery> {
        let subject = self.subject.clone().map(SubjectRef::new).transpose()?;
        Ok(LedgerQuery {
            action: self.action,
            actor: self.actor.clone(),
            role: self.role,
            subject,
            since: self.since,
            until: self.until,
        })
    }
}

/// Ten years.
const MAX_STATS_HOURS: i64 = 24 * 366 * 10;

#[derive(Debug, Subcommand)]
pub enum ReportCommands {
    /// Every entry about one complaint or user, oldest first
    Trail {
        /// Subject reference
        subject: String,
    },

    /// Activity counts for dashboards
    Stats {
        /// Window in hours
        #[arg(
            long,
            default_value_t = 24,
            value_parser = clap::value_parser!(i64).range(1..=MAX_STATS_HOURS)
        )]
        hours: i64,
    },
}

#[derive(Debug, Serialize, Tabled)]
struct StatRow {
    #[tabled(rename = "METRIC")]
    metric: String,
    #[tabled(rename = "VALUE")]
    value: String,
}

pub async fn execute(args: LogArgs, ledger: &AuditLedger, format: OutputFormat) -> CliResult<()> {
    let query = args.query()?;
    let entries = ledger
        .activity()
        .query(&query, QueryWindow::page(args.page, args.limit))
        .await?;
    let summaries = entries.iter().map(EntrySummary::from).collect::<Vec<_>>();
    print_entries(&summaries, format)
}

pub async fn report(
    command: ReportCommands,
    ledger: &AuditLedger,
    format: OutputFormat,
) -> CliResult<()> {
    match command {
        ReportCommands::Trail { subject } => {
            let subject = SubjectRef::new(subject)?;
            let entries = ledger.activity().trail_for(&subject).await?;
            let summaries = entries.iter().map(EntrySummary::from).collect::<Vec<_>>();
            print_entries(&summaries, format)
        }
        ReportCommands::Stats { hours } => {
            let since = window_start(Utc::now(), hours)?;
            let activity = ledger.activity();
            let total = activity.activity_since(since, None).await?;
            let admin = activity.activity_since(since, Some(ActorRole::Admin)).await?;
            let actions = activity
                .actions_in_use()
                .await?
                .iter()
                .map(Action::to_string)
                .collect::<Vec<_>>();

            let rows = vec![
                StatRow {
                    metric: format!("entries (last {hours}h)"),
                    value: total.to_string(),
                },
                StatRow {
                    metric: format!("admin actions (last {hours}h)"),
                    value: admin.to_string(),
                },
                StatRow {
                    metric: "actions in use".to_string(),
                    value: actions.join(", "),
                },
            ];
            print_output(rows, format)
        }
    }
}

fn window_start(now: DateTime<Utc>, hours: i64) -> CliResult<DateTime<Utc>> {
    Duration::try_hours(hours)
        .and_then(|window| now.checked_sub_signed(window))
        .ok_or_else(|| CliError::InvalidInput(format!("--hours {hours} is out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn oversized_stats_window_is_an_error() {
        let now = Utc::now();
        assert_eq!(window_start(now, 24).unwrap(), now - Duration::hours(24));
        assert!(matches!(
            window_start(now, i64::MAX),
            Err(CliError::InvalidInput(_))
        ));
        assert!(window_start(now, i64::MIN).is_err());
    }

    #[test]
    fn empty_subject_filter_is_rejected() {
        let args = LogArgs {
            action: None,
            actor: None,
            role: None,
            subject: Some("  ".to_string()),
            since: None,
            until: None,
            limit: 50,
            page: 1,
        };
        assert!(args.query().is_err());
    }
}
