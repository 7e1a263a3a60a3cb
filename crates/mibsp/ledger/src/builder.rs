//! Chain builder: the only path by which entries enter the ledger.

use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use mibsp_storage::{LedgerStore, StorageError, TailRef};
use mibsp_types::{Action, Actor, Detail, EntryDraft, EntryError, LedgerEntry, LinkHash, SubjectRef};
use tokio::sync::Mutex;
use tracing::{debug, error, instrument, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// Appends hash-linked entries to a [`LedgerStore`].
///
/// The tail is always read from the store, never cached. Appends from this
/// builder are serialized by an async mutex; appends from other processes
/// sharing the store are resolved by the store's compare-and-append, with the
/// loser re-reading the tail and recomputing its entry.
pub struct ChainBuilder {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    config: LedgerConfig,
    append_lock: Mutex<()>,
}

impl ChainBuilder {
    pub fn new(store: Arc<dyn LedgerStore>, config: LedgerConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            config,
            append_lock: Mutex::new(()),
        }
    }

    /// Replace the wall clock used for entry timestamps.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    /// Append one entry and return it once the store has acknowledged it.
    ///
    /// On error nothing was committed. A lost race that persists past
    /// `max_append_attempts` is reported as
    /// `LedgerError::Persistence(StorageError::TailMoved { .. })`.
    #[instrument(
        skip(self, detail),
        fields(actor = %actor, action = %action, subject = %subject_ref)
    )]
    pub async fn append(
        &self,
        actor: Actor,
        action: Action,
        subject_ref: SubjectRef,
        detail: Detail,
    ) -> LedgerResult<LedgerEntry> {
        self.check_bounds(&actor, &subject_ref, &detail)?;

        let _guard = self.append_lock.lock().await;
        let attempts = self.config.max_append_attempts.max(1);
        let mut last_conflict = StorageError::TailMoved {
            expected: None,
            found: None,
        };

        for attempt in 1..=attempts {
            let tail = self.store.read_tail().await.map_err(|err| {
                error!(%err, "failed to read ledger tail");
                err
            })?;

            let entry = self.next_entry(tail.as_ref(), &actor, action, &subject_ref, &detail)?;
            let expected = tail.as_ref().map(TailRef::from);

            match self.store.insert_if_tail_unchanged(expected, &entry).await {
                Ok(()) => {
                    debug!(sequence = entry.sequence, "ledger entry appended");
                    return Ok(entry);
                }
                Err(err @ StorageError::TailMoved { .. }) => {
                    warn!(attempt, %err, "ledger tail moved during append, retrying");
                    last_conflict = err;
                    tokio::task::yield_now().await;
                }
                Err(err) => {
                    error!(sequence = entry.sequence, %err, "ledger append failed");
                    return Err(err.into());
                }
            }
        }

        error!(attempts, "ledger append gave up under contention");
        Err(LedgerError::Persistence(last_conflict))
    }

    fn check_bounds(
        &self,
        actor: &Actor,
        subject_ref: &SubjectRef,
        detail: &Detail,
    ) -> LedgerResult<()> {
        // Values rebuilt from storage skip construction checks.
        Actor::new(actor.role(), actor.id())?;
        SubjectRef::new(subject_ref.as_str())?;
        if subject_ref.len() > self.config.max_subject_bytes {
            return Err(EntryError::InvalidSubject(format!(
                "{} bytes exceeds limit of {}",
                subject_ref.len(),
                self.config.max_subject_bytes
            ))
            .into());
        }
        if detail.len() > self.config.max_detail_bytes {
            return Err(EntryError::DetailTooLong {
                len: detail.len(),
                max: self.config.max_detail_bytes,
            }
            .into());
        }
        Ok(())
    }

    fn next_entry(
        &self,
        tail: Option<&LedgerEntry>,
        actor: &Actor,
        action: Action,
        subject_ref: &SubjectRef,
        detail: &Detail,
    ) -> LedgerResult<LedgerEntry> {
        let timestamp = self.clock.now().trunc_subsecs(6);

        let (sequence, prev_link_hash) = match tail {
            Some(tail) => {
                let sequence = tail
                    .sequence
                    .checked_add(1)
                    .ok_or(LedgerError::SequenceOverflow(tail.sequence))?;
                warn_on_regression(tail, &timestamp);
                (sequence, tail.link_hash)
            }
            None => (1, LinkHash::GENESIS),
        };

        Ok(EntryDraft {
            sequence,
            timestamp,
            actor: actor.clone(),
            action,
            subject_ref: subject_ref.clone(),
            detail: detail.clone(),
            prev_link_hash,
        }
        .seal())
    }
}

fn warn_on_regression(tail: &LedgerEntry, timestamp: &DateTime<Utc>) {
    if *timestamp < tail.timestamp {
        warn!(
            tail_sequence = tail.sequence,
            tail_timestamp = %tail.timestamp,
            now = %timestamp,
            "wall clock is behind the ledger tail"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use mibsp_types::ActorRole;
    use mibsp_storage::memory::InMemoryStorage;
    use std::sync::Mutex as StdMutex;

    struct FixedClock(StdMutex<DateTime<Utc>>);

    impl FixedClock {
        fn at(ts: DateTime<Utc>) -> Arc<Self> {
            Arc::new(Self(StdMutex::new(ts)))
        }

        fn set(&self, ts: DateTime<Utc>) {
            *self.0.lock().unwrap() = ts;
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            *self.0.lock().unwrap()
        }
    }

    fn builder(store: Arc<InMemoryStorage>) -> ChainBuilder {
        ChainBuilder::new(store, LedgerConfig::default())
    }

    fn officer() -> Actor {
        Actor::officer("officer_water").unwrap()
    }

    fn subject() -> SubjectRef {
        SubjectRef::new("MIBA1B2C3D4").unwrap()
    }

    #[tokio::test]
    async fn first_entry_links_to_genesis() {
        let store = Arc::new(InMemoryStorage::new());
        let entry = builder(store)
            .append(officer(), Action::StatusChange, subject(), Detail::text("marked resolved"))
            .await
            .unwrap();

        assert_eq!(entry.sequence, 1);
        assert!(entry.prev_link_hash.is_genesis());
        assert!(entry.has_consistent_hash());
    }

    #[tokio::test]
    async fn identical_content_hashes_differently_by_position() {
        let store = Arc::new(InMemoryStorage::new());
        let clock = FixedClock::at(Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap());
        let builder = builder(store).with_clock(clock);

        let first = builder
            .append(officer(), Action::StatusChange, subject(), Detail::text("marked resolved"))
            .await
            .unwrap();
        let second = builder
            .append(officer(), Action::StatusChange, subject(), Detail::text("marked resolved"))
            .await
            .unwrap();

        assert_eq!(second.sequence, 2);
        assert_eq!(second.prev_link_hash, first.link_hash);
        assert_ne!(second.link_hash, first.link_hash);
    }

    #[tokio::test]
    async fn timestamps_are_truncated_to_microseconds() {
        let store = Arc::new(InMemoryStorage::new());
        let ts = Utc.timestamp_opt(1_700_000_000, 123_456_789).unwrap();
        let entry = builder(store)
            .with_clock(FixedClock::at(ts))
            .append(Actor::system(), Action::Login, subject(), Detail::empty())
            .await
            .unwrap();

        assert_eq!(entry.timestamp.timestamp_subsec_nanos(), 123_456_000);
    }

    #[tokio::test]
    async fn clock_regression_does_not_block_appends() {
        let store = Arc::new(InMemoryStorage::new());
        let start = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        let clock = FixedClock::at(start);
        let builder = builder(store).with_clock(clock.clone());

        builder
            .append(officer(), Action::Login, subject(), Detail::empty())
            .await
            .unwrap();
        clock.set(start - Duration::minutes(5));
        let second = builder
            .append(officer(), Action::Logout, subject(), Detail::empty())
            .await
            .unwrap();

        assert_eq!(second.sequence, 2);
        assert!(second.timestamp < start);
    }

    #[tokio::test]
    async fn oversized_detail_is_rejected_before_storage() {
        let store = Arc::new(InMemoryStorage::new());
        let config = LedgerConfig {
            max_detail_bytes: 8,
            ..LedgerConfig::default()
        };
        let result = ChainBuilder::new(store.clone(), config)
            .append(officer(), Action::NotesAdded, subject(), Detail::text("far too long"))
            .await;

        assert_eq!(
            result,
            Err(LedgerError::InvalidEntry(EntryError::DetailTooLong { len: 12, max: 8 }))
        );
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn unvalidated_actor_or_subject_is_rejected() {
        let store = Arc::new(InMemoryStorage::new());
        let builder = builder(store.clone());

        let result = builder
            .append(
                Actor::from_stored(ActorRole::System, "cron"),
                Action::ConfigurationChange,
                subject(),
                Detail::empty(),
            )
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InvalidEntry(EntryError::InvalidActor(_)))
        ));

        let result = builder
            .append(
                Actor::from_stored(ActorRole::Officer, "x".repeat(1 << 20)),
                Action::NotesAdded,
                subject(),
                Detail::empty(),
            )
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InvalidEntry(EntryError::InvalidActor(_)))
        ));

        let result = builder
            .append(officer(), Action::NotesAdded, SubjectRef::from_stored(""), Detail::empty())
            .await;
        assert!(matches!(
            result,
            Err(LedgerError::InvalidEntry(EntryError::InvalidSubject(_)))
        ));
        assert!(store.is_empty().unwrap());
    }

    #[tokio::test]
    async fn rejected_write_is_a_persistence_error() {
        let store = Arc::new(InMemoryStorage::new());
        store.set_reject_writes(true);
        let result = builder(store.clone())
            .append(officer(), Action::Assignment, subject(), Detail::empty())
            .await;

        assert!(matches!(
            result,
            Err(LedgerError::Persistence(StorageError::Backend(_)))
        ));
        assert!(store.read_tail().await.unwrap().is_none());
    }
}
