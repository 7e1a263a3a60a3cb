//! Read-side activity listings for dashboards and operators.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use mibsp_storage::{LedgerQuery, LedgerStore, QueryWindow};
use mibsp_types::{Action, ActorRole, LedgerEntry, SubjectRef};
use serde::{Deserialize, Serialize};

use crate::error::LedgerResult;

/// Display projection of one entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntrySummary {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub role: ActorRole,
    pub actor: String,
    pub action: Action,
    pub subject: String,
    pub detail: String,
    /// First 16 hex characters of the link hash followed by `...`.
    pub link_hash: String,
}

impl From<&LedgerEntry> for EntrySummary {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            sequence: entry.sequence,
            timestamp: entry.timestamp,
            role: entry.actor.role(),
            actor: entry.actor.id().to_string(),
            action: entry.action,
            subject: entry.subject_ref.to_string(),
            detail: entry.detail.to_string(),
            link_hash: entry.link_hash.short(),
        }
    }
}

pub struct ActivityLog {
    store: Arc<dyn LedgerStore>,
}

impl ActivityLog {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Matching entries, newest first.
    pub async fn query(
        &self,
        query: &LedgerQuery,
        window: QueryWindow,
    ) -> LedgerResult<Vec<LedgerEntry>> {
        Ok(self.store.query_entries(query, window).await?)
    }

    /// Every entry about one subject, oldest first.
    pub async fn trail_for(&self, subject: &SubjectRef) -> LedgerResult<Vec<LedgerEntry>> {
        let query = LedgerQuery::for_subject(subject.clone());
        let mut entries = self
            .store
            .query_entries(&query, QueryWindow::default())
            .await?;
        entries.reverse();
        Ok(entries)
    }

    /// Entries recorded at or after `since`, optionally for one role only.
    pub async fn activity_since(
        &self,
        since: DateTime<Utc>,
        role: Option<ActorRole>,
    ) -> LedgerResult<u64> {
        let query = LedgerQuery {
            since: Some(since),
            role,
            ..LedgerQuery::default()
        };
        Ok(self.store.count_entries(&query).await?)
    }

    /// Actions that occur at least once, in taxonomy order.
    pub async fn actions_in_use(&self) -> LedgerResult<Vec<Action>> {
        let mut present = Vec::new();
        for action in Action::ALL {
            let query = LedgerQuery {
                action: Some(action),
                ..LedgerQuery::default()
            };
            if self.store.count_entries(&query).await? > 0 {
                present.push(action);
            }
        }
        Ok(present)
    }
}
