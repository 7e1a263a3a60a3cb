//! In-memory reference implementation of the MIBSP storage traits.
//!
//! Entries live in an ordered map keyed by sequence. The compare-and-append
//! check runs under the write lock, so concurrent appenders observe the same
//! semantics a transactional backend gives them.

use crate::model::{LedgerQuery, QueryWindow, StoredEntry, TailRef};
use crate::traits::{LedgerStore, TrackingIdRegistry};
use crate::{StorageError, StorageResult};
use async_trait::async_trait;
use mibsp_types::{LedgerEntry, LinkHash, TrackingId};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

/// In-memory MIBSP storage adapter.
#[derive(Default)]
pub struct InMemoryStorage {
    entries: RwLock<BTreeMap<u64, LedgerEntry>>,
    tracking_ids: RwLock<HashSet<TrackingId>>,
    reject_writes: AtomicBool,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> StorageResult<usize> {
        Ok(self.read_entries()?.len())
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.read_entries()?.is_empty())
    }

    fn read_entries(
        &self,
    ) -> StorageResult<std::sync::RwLockReadGuard<'_, BTreeMap<u64, LedgerEntry>>> {
        self.entries
            .read()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))
    }

    fn write_entries(
        &self,
    ) -> StorageResult<std::sync::RwLockWriteGuard<'_, BTreeMap<u64, LedgerEntry>>> {
        self.entries
            .write()
            .map_err(|_| StorageError::Backend("ledger lock poisoned".to_string()))
    }
}

#[cfg(any(test, feature = "testing"))]
impl InMemoryStorage {
    /// Mutate a committed entry in place, bypassing append-only rules.
    pub fn tamper_entry(&self, sequence: u64, edit: impl FnOnce(&mut LedgerEntry)) -> bool {
        match self.entries.write() {
            Ok(mut guard) => match guard.get_mut(&sequence) {
                Some(entry) => {
                    edit(entry);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Remove a committed entry, leaving its neighbours in place.
    pub fn excise_entry(&self, sequence: u64) -> Option<LedgerEntry> {
        self.entries
            .write()
            .ok()
            .and_then(|mut guard| guard.remove(&sequence))
    }

    /// Insert an entry verbatim, with no chain checks.
    pub fn insert_raw(&self, entry: LedgerEntry) {
        if let Ok(mut guard) = self.entries.write() {
            guard.insert(entry.sequence, entry);
        }
    }

    /// Make every subsequent write fail with a backend error.
    pub fn set_reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }
}

#[async_trait]
impl LedgerStore for InMemoryStorage {
    async fn read_tail(&self) -> StorageResult<Option<LedgerEntry>> {
        let guard = self.read_entries()?;
        Ok(guard.last_key_value().map(|(_, entry)| entry.clone()))
    }

    async fn insert_if_tail_unchanged(
        &self,
        expected_tail: Option<TailRef>,
        entry: &LedgerEntry,
    ) -> StorageResult<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("storage is rejecting writes".to_string()));
        }

        let mut guard = self.write_entries()?;
        let current = guard.last_key_value().map(|(_, tail)| TailRef::from(tail));
        if current != expected_tail {
            return Err(StorageError::TailMoved {
                expected: expected_tail.map(|t| t.sequence),
                found: current.map(|t| t.sequence),
            });
        }

        let (next_sequence, prev_hash) = match expected_tail {
            Some(tail) => {
                let next = tail.sequence.checked_add(1).ok_or_else(|| {
                    StorageError::InvariantViolation(format!(
                        "no sequence follows tail {}",
                        tail.sequence
                    ))
                })?;
                (next, tail.link_hash)
            }
            None => (1, LinkHash::GENESIS),
        };
        if entry.sequence != next_sequence {
            return Err(StorageError::InvariantViolation(format!(
                "entry sequence {} does not follow tail (expected {next_sequence})",
                entry.sequence
            )));
        }
        if entry.prev_link_hash != prev_hash {
            return Err(StorageError::InvariantViolation(format!(
                "entry {} does not link to the current tail",
                entry.sequence
            )));
        }

        guard.insert(entry.sequence, entry.clone());
        Ok(())
    }

    async fn scan_ascending(&self, from: u64, to: u64) -> StorageResult<Vec<StoredEntry>> {
        if from > to {
            return Ok(vec![]);
        }
        let guard = self.read_entries()?;
        Ok(guard
            .range(from..=to)
            .map(|(position, entry)| StoredEntry::Decoded {
                position: *position,
                entry: entry.clone(),
            })
            .collect())
    }

    async fn get_entry(&self, sequence: u64) -> StorageResult<Option<LedgerEntry>> {
        let guard = self.read_entries()?;
        Ok(guard.get(&sequence).cloned())
    }

    async fn query_entries(
        &self,
        query: &LedgerQuery,
        window: QueryWindow,
    ) -> StorageResult<Vec<LedgerEntry>> {
        let guard = self.read_entries()?;
        let values = guard
            .values()
            .rev()
            .filter(|entry| query.matches(entry))
            .cloned()
            .collect::<Vec<_>>();
        Ok(apply_window(values, window))
    }

    async fn count_entries(&self, query: &LedgerQuery) -> StorageResult<u64> {
        let guard = self.read_entries()?;
        Ok(guard.values().filter(|entry| query.matches(entry)).count() as u64)
    }
}

#[async_trait]
impl TrackingIdRegistry for InMemoryStorage {
    async fn exists(&self, id: &TrackingId) -> StorageResult<bool> {
        let guard = self
            .tracking_ids
            .read()
            .map_err(|_| StorageError::Backend("tracking id lock poisoned".to_string()))?;
        Ok(guard.contains(id))
    }

    async fn register(&self, id: &TrackingId) -> StorageResult<bool> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("storage is rejecting writes".to_string()));
        }
        let mut guard = self
            .tracking_ids
            .write()
            .map_err(|_| StorageError::Backend("tracking id lock poisoned".to_string()))?;
        Ok(guard.insert(id.clone()))
    }
}

fn apply_window<T>(items: Vec<T>, window: QueryWindow) -> Vec<T> {
    let iter = items.into_iter().skip(window.offset);
    if window.limit == 0 {
        iter.collect()
    } else {
        iter.take(window.limit).collect()
    }
}
