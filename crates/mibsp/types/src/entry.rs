use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{EntryError, EntryResult};
use crate::hash::{ChainedFields, LinkHash};
use crate::tracking::TrackingId;

const MAX_ACTOR_ID_BYTES: usize = 64;
const SYSTEM_ACTOR_ID: &str = "system";
const ANONYMOUS_ACTOR_ID: &str = "anonymous";

/// Category of a recorded action. Codes are part of the hash encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Action {
    ComplaintSubmitted,
    StatusChange,
    Assignment,
    NotesAdded,
    Login,
    LoginFailed,
    Logout,
    AccountCreated,
    AccountModification,
    ConfigurationChange,
    AdminOverride,
}

impl Action {
    pub const ALL: [Action; 11] = [
        Action::ComplaintSubmitted,
        Action::StatusChange,
        Action::Assignment,
        Action::NotesAdded,
        Action::Login,
        Action::LoginFailed,
        Action::Logout,
        Action::AccountCreated,
        Action::AccountModification,
        Action::ConfigurationChange,
        Action::AdminOverride,
    ];

    /// Stable code; never rename an existing one.
    pub fn code(self) -> &'static str {
        match self {
            Action::ComplaintSubmitted => "complaint-submitted",
            Action::StatusChange => "status-change",
            Action::Assignment => "assignment",
            Action::NotesAdded => "notes-added",
            Action::Login => "login",
            Action::LoginFailed => "login-failed",
            Action::Logout => "logout",
            Action::AccountCreated => "account-created",
            Action::AccountModification => "account-modification",
            Action::ConfigurationChange => "configuration-change",
            Action::AdminOverride => "admin-override",
        }
    }

    /// Whether the action is taken by an authenticated officer or admin.
    pub fn is_privileged(self) -> bool {
        !matches!(self, Action::ComplaintSubmitted | Action::LoginFailed)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for Action {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Action::ALL
            .into_iter()
            .find(|action| action.code() == s)
            .ok_or_else(|| EntryError::UnknownAction(s.to_string()))
    }
}

/// Role of the principal behind an entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActorRole {
    Admin,
    Officer,
    System,
    Anonymous,
}

impl ActorRole {
    pub fn code(self) -> &'static str {
        match self {
            ActorRole::Admin => "admin",
            ActorRole::Officer => "officer",
            ActorRole::System => "system",
            ActorRole::Anonymous => "anonymous",
        }
    }
}

impl fmt::Display for ActorRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ActorRole {
    type Err = EntryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(ActorRole::Admin),
            "officer" => Ok(ActorRole::Officer),
            "system" => Ok(ActorRole::System),
            "anonymous" => Ok(ActorRole::Anonymous),
            other => Err(EntryError::UnknownRole(other.to_string())),
        }
    }
}

/// Principal performing an action. Citizens only ever appear as
/// [`Actor::anonymous`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Actor {
    role: ActorRole,
    id: String,
}

impl Actor {
    pub fn new(role: ActorRole, id: impl Into<String>) -> EntryResult<Self> {
        let id = id.into();
        if id.is_empty() || id.len() > MAX_ACTOR_ID_BYTES {
            return Err(EntryError::InvalidActor(format!(
                "actor id must be 1..={MAX_ACTOR_ID_BYTES} bytes"
            )));
        }
        if id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(EntryError::InvalidActor(format!(
                "actor id {id:?} contains whitespace or control characters"
            )));
        }
        let sentinel = match role {
            ActorRole::System => Some(SYSTEM_ACTOR_ID),
            ActorRole::Anonymous => Some(ANONYMOUS_ACTOR_ID),
            ActorRole::Admin | ActorRole::Officer => None,
        };
        if let Some(expected) = sentinel {
            if id != expected {
                return Err(EntryError::InvalidActor(format!(
                    "{role} actors must use the {expected:?} sentinel id"
                )));
            }
        }
        Ok(Self { role, id })
    }

    /// Rebuild an actor read back from storage. Skips validation: the
    /// link hash vouches for stored rows, not the constructor.
    pub fn from_stored(role: ActorRole, id: impl Into<String>) -> Self {
        Self { role, id: id.into() }
    }

    pub fn role(&self) -> ActorRole {
        self.role
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn officer(id: impl Into<String>) -> EntryResult<Self> {
        Self::new(ActorRole::Officer, id)
    }

    pub fn admin(id: impl Into<String>) -> EntryResult<Self> {
        Self::new(ActorRole::Admin, id)
    }

    /// Sentinel for system-initiated actions.
    pub fn system() -> Self {
        Self {
            role: ActorRole::System,
            id: SYSTEM_ACTOR_ID.to_string(),
        }
    }

    /// Sentinel for unauthenticated callers.
    pub fn anonymous() -> Self {
        Self {
            role: ActorRole::Anonymous,
            id: ANONYMOUS_ACTOR_ID.to_string(),
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.role, self.id)
    }
}

/// Opaque reference to the affected entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectRef(String);

impl SubjectRef {
    pub fn new(raw: impl Into<String>) -> EntryResult<Self> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(EntryError::InvalidSubject("subject reference is empty".into()));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control()) {
            return Err(EntryError::InvalidSubject(format!(
                "{raw:?} contains whitespace or control characters"
            )));
        }
        Ok(Self(raw))
    }

    /// Rebuild a subject read back from storage, without validation.
    pub fn from_stored(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn complaint(id: &TrackingId) -> Self {
        Self(id.as_str().to_string())
    }

    pub fn user(user_id: u64) -> Self {
        Self(format!("user:{user_id}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for SubjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&TrackingId> for SubjectRef {
    fn from(id: &TrackingId) -> Self {
        Self::complaint(id)
    }
}

/// Descriptive payload. Length limits are enforced at append time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Detail(String);

impl Detail {
    pub fn text(text: impl Into<String>) -> Self {
        Self(text.into())
    }

    /// Compact JSON. Object keys of `serde_json::Value` serialize sorted.
    pub fn json<T: Serialize + ?Sized>(value: &T) -> EntryResult<Self> {
        serde_json::to_string(value)
            .map(Self)
            .map_err(|e| EntryError::Serialization(e.to_string()))
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An entry whose position has been chosen but whose link hash is not yet
/// computed.
#[derive(Debug, Clone)]
pub struct EntryDraft {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: Action,
    pub subject_ref: SubjectRef,
    pub detail: Detail,
    pub prev_link_hash: LinkHash,
}

impl EntryDraft {
    fn chained_fields(&self) -> ChainedFields<'_> {
        ChainedFields {
            sequence: self.sequence,
            timestamp: &self.timestamp,
            actor: &self.actor,
            action: self.action,
            subject_ref: &self.subject_ref,
            detail: &self.detail,
            prev_link_hash: &self.prev_link_hash,
        }
    }

    pub fn seal(self) -> LedgerEntry {
        let link_hash = self.chained_fields().link_hash();
        LedgerEntry {
            sequence: self.sequence,
            timestamp: self.timestamp,
            actor: self.actor,
            action: self.action,
            subject_ref: self.subject_ref,
            detail: self.detail,
            prev_link_hash: self.prev_link_hash,
            link_hash,
        }
    }
}

/// One immutable, hash-linked ledger record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub actor: Actor,
    pub action: Action,
    pub subject_ref: SubjectRef,
    pub detail: Detail,
    pub prev_link_hash: LinkHash,
    pub link_hash: LinkHash,
}

impl LedgerEntry {
    pub fn chained_fields(&self) -> ChainedFields<'_> {
        ChainedFields {
            sequence: self.sequence,
            timestamp: &self.timestamp,
            actor: &self.actor,
            action: self.action,
            subject_ref: &self.subject_ref,
            detail: &self.detail,
            prev_link_hash: &self.prev_link_hash,
        }
    }

    /// Recompute the link hash from the stored fields.
    pub fn recompute_link_hash(&self) -> LinkHash {
        self.chained_fields().link_hash()
    }

    pub fn has_consistent_hash(&self) -> bool {
        self.recompute_link_hash() == self.link_hash
    }

    pub fn is_genesis(&self) -> bool {
        self.sequence == 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn draft(sequence: u64, prev: LinkHash) -> EntryDraft {
        EntryDraft {
            sequence,
            timestamp: Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap(),
            actor: Actor::officer("officer_water").unwrap(),
            action: Action::StatusChange,
            subject_ref: SubjectRef::new("MIBA1B2C3D4").unwrap(),
            detail: Detail::text("marked resolved"),
            prev_link_hash: prev,
        }
    }

    #[test]
    fn sealing_is_deterministic() {
        let a = draft(1, LinkHash::GENESIS).seal();
        let b = draft(1, LinkHash::GENESIS).seal();
        assert_eq!(a.link_hash, b.link_hash);
        assert!(a.has_consistent_hash());
        assert!(a.is_genesis());
    }

    #[test]
    fn hash_is_chain_position_sensitive() {
        let first = draft(1, LinkHash::GENESIS).seal();
        let second = draft(2, first.link_hash).seal();
        assert_ne!(first.link_hash, second.link_hash);
        assert_eq!(second.prev_link_hash, first.link_hash);
    }

    #[test]
    fn mutating_any_field_breaks_the_hash() {
        let entry = draft(1, LinkHash::GENESIS).seal();

        let mut changed = entry.clone();
        changed.detail = Detail::text("marked pending");
        assert!(!changed.has_consistent_hash());

        let mut changed = entry.clone();
        changed.actor = Actor::officer("officer_roads").unwrap();
        assert!(!changed.has_consistent_hash());

        let mut changed = entry.clone();
        changed.timestamp += chrono::Duration::microseconds(1);
        assert!(!changed.has_consistent_hash());

        let mut changed = entry;
        changed.action = Action::Assignment;
        assert!(!changed.has_consistent_hash());
    }

    #[test]
    fn action_codes_round_trip() {
        for action in Action::ALL {
            assert_eq!(action.code().parse::<Action>().unwrap(), action);
            let json = serde_json::to_string(&action).unwrap();
            assert_eq!(json, format!("\"{}\"", action.code()));
        }
        assert!("STATUS_UPDATE".parse::<Action>().is_err());
    }

    #[test]
    fn sentinel_actors_are_enforced() {
        assert!(Actor::new(ActorRole::System, "cron").is_err());
        assert!(Actor::new(ActorRole::Anonymous, "citizen-42").is_err());
        assert_eq!(Actor::system().id(), "system");
        assert_eq!(Actor::anonymous().role(), ActorRole::Anonymous);
    }

    #[test]
    fn stored_actor_keeps_what_was_read() {
        let forged = Actor::from_stored(ActorRole::System, "admin_ops");
        assert_eq!(forged.role(), ActorRole::System);
        assert_eq!(forged.id(), "admin_ops");
        assert_ne!(forged, Actor::system());

        let entry = draft(1, LinkHash::GENESIS).seal();
        let mut changed = entry.clone();
        changed.actor = forged;
        assert!(!changed.has_consistent_hash());

        let mut changed = entry;
        changed.subject_ref = SubjectRef::from_stored("");
        assert!(changed.subject_ref.is_empty());
        assert!(!changed.has_consistent_hash());
    }

    #[test]
    fn actor_and_subject_reject_free_text() {
        assert!(Actor::officer("").is_err());
        assert!(Actor::officer("jane doe").is_err());
        assert!(Actor::officer("x".repeat(65)).is_err());
        assert!(SubjectRef::new("").is_err());
        assert!(SubjectRef::new("Jane Doe, 12 Main St").is_err());
        assert_eq!(SubjectRef::user(42).as_str(), "user:42");
    }

    #[test]
    fn json_detail_sorts_object_keys() {
        let value = serde_json::json!({"to": "Closed", "from": "Pending"});
        let detail = Detail::json(&value).unwrap();
        assert_eq!(detail.as_str(), r#"{"from":"Pending","to":"Closed"}"#);
    }

    #[test]
    fn privileged_actions_exclude_citizen_events() {
        assert!(!Action::ComplaintSubmitted.is_privileged());
        assert!(!Action::LoginFailed.is_privileged());
        assert!(Action::StatusChange.is_privileged());
        assert!(Action::AdminOverride.is_privileged());
    }
}
