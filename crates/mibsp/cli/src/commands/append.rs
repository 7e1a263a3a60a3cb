//! Manual ledger entries

use clap::Args;
use mibsp_ledger::{AuditLedger, EntrySummary};
use mibsp_types::{Action, Actor, ActorRole, Detail, SubjectRef};

use crate::error::CliResult;
use crate::output::{print_entries, print_success, OutputFormat};

#[derive(Debug, Args)]
pub struct AppendArgs {
    /// Actor id (ignored for system and anonymous roles)
    #[arg(long, default_value = "system")]
    pub actor: String,

    /// Actor role (admin, officer, system, anonymous)
    #[arg(long, default_value = "system")]
    pub role: ActorRole,

    /// Action code, e.g. status-change
    #[arg(long)]
    pub action: Action,

    /// Subject reference: a tracking id, user:<id>, or free-form key
    #[arg(long)]
    pub subject: String,

    /// Free-text detail
    #[arg(long, default_value = "")]
    pub detail: String,
}

impl AppendArgs {
    fn actor(&self) -> CliResult<Actor> {
        Ok(match self.role {
            ActorRole::System => Actor::system(),
            ActorRole::Anonymous => Actor::anonymous(),
            role => Actor::new(role, self.actor.clone())?,
        })
    }
}

pub async fn execute(args: AppendArgs, ledger: &AuditLedger, format: OutputFormat) -> CliResult<()> {
    let actor = args.actor()?;
    let subject = SubjectRef::new(args.subject)?;
    let entry = ledger
        .append(actor, args.action, subject, Detail::text(args.detail))
        .await?;

    if matches!(format, OutputFormat::Table) {
        print_success(&format!("Appended entry #{}", entry.sequence));
    }
    print_entries(&[EntrySummary::from(&entry)], format)
}
