use chrono::{DateTime, Utc};
use mibsp_types::{Action, ActorRole, LedgerEntry, LinkHash, SubjectRef};
use serde::{Deserialize, Serialize};

/// Generic query window for paged reads. `limit == 0` means unbounded.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct QueryWindow {
    pub limit: usize,
    pub offset: usize,
}

impl QueryWindow {
    pub fn first(limit: usize) -> Self {
        Self { limit, offset: 0 }
    }

    pub fn page(page: usize, per_page: usize) -> Self {
        Self {
            limit: per_page,
            offset: page.saturating_sub(1).saturating_mul(per_page),
        }
    }
}

/// Position of the tail an append was computed against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailRef {
    pub sequence: u64,
    pub link_hash: LinkHash,
}

impl From<&LedgerEntry> for TailRef {
    fn from(entry: &LedgerEntry) -> Self {
        Self {
            sequence: entry.sequence,
            link_hash: entry.link_hash,
        }
    }
}

/// One row returned by a verification scan.
///
/// `position` is the key the store files the row under. The row's own
/// `sequence` column is part of the hashed content and may disagree with it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoredEntry {
    Decoded { position: u64, entry: LedgerEntry },
    /// A row whose columns no longer decode into an entry, e.g. an unknown
    /// action code or a malformed hash.
    Undecodable { position: u64, reason: String },
}

impl StoredEntry {
    pub fn position(&self) -> u64 {
        match self {
            Self::Decoded { position, .. } | Self::Undecodable { position, .. } => *position,
        }
    }

    pub fn entry(&self) -> Option<&LedgerEntry> {
        match self {
            Self::Decoded { entry, .. } => Some(entry),
            Self::Undecodable { .. } => None,
        }
    }

    pub fn into_entry(self) -> Option<LedgerEntry> {
        match self {
            Self::Decoded { entry, .. } => Some(entry),
            Self::Undecodable { .. } => None,
        }
    }
}

/// Filters for activity listings. All set filters must match.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerQuery {
    pub action: Option<Action>,
    /// Case-insensitive substring of the actor id.
    pub actor: Option<String>,
    pub role: Option<ActorRole>,
    pub subject: Option<SubjectRef>,
    /// Inclusive lower bound.
    pub since: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    pub until: Option<DateTime<Utc>>,
}

impl LedgerQuery {
    pub fn for_subject(subject: SubjectRef) -> Self {
        Self {
            subject: Some(subject),
            ..Self::default()
        }
    }

    pub fn matches(&self, entry: &LedgerEntry) -> bool {
        if let Some(action) = self.action {
            if entry.action != action {
                return false;
            }
        }
        if let Some(ref actor) = self.actor {
            if !entry
                .actor
                .id()
                .to_lowercase()
                .contains(&actor.to_lowercase())
            {
                return false;
            }
        }
        if let Some(role) = self.role {
            if entry.actor.role() != role {
                return false;
            }
        }
        if let Some(ref subject) = self.subject {
            if &entry.subject_ref != subject {
                return false;
            }
        }
        if let Some(since) = self.since {
            if entry.timestamp < since {
                return false;
            }
        }
        if let Some(until) = self.until {
            if entry.timestamp > until {
                return false;
            }
        }
        true
    }
}
