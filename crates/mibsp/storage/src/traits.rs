use crate::model::{LedgerQuery, QueryWindow, StoredEntry, TailRef};
use crate::StorageResult;
use async_trait::async_trait;
use mibsp_types::{LedgerEntry, TrackingId};

/// Durable, append-only entry store.
///
/// Implementations must never expose a partially written entry to readers and
/// must refuse updates and deletes of committed entries.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Entry with the highest sequence, if any.
    async fn read_tail(&self) -> StorageResult<Option<LedgerEntry>>;

    /// Atomically insert `entry` only if the current tail still equals
    /// `expected_tail` (`None` = the ledger is empty).
    ///
    /// Returns [`crate::StorageError::TailMoved`] when another writer won the
    /// race; the caller re-reads the tail and recomputes.
    async fn insert_if_tail_unchanged(
        &self,
        expected_tail: Option<TailRef>,
        entry: &LedgerEntry,
    ) -> StorageResult<()>;

    /// Rows filed under `from..=to`, ascending by position.
    ///
    /// Rows are decoded structurally. A row that cannot be decoded comes back
    /// as [`StoredEntry::Undecodable`] rather than failing the whole scan.
    async fn scan_ascending(&self, from: u64, to: u64) -> StorageResult<Vec<StoredEntry>>;

    /// One entry by sequence.
    async fn get_entry(&self, sequence: u64) -> StorageResult<Option<LedgerEntry>>;

    /// Filtered entries, newest first.
    async fn query_entries(
        &self,
        query: &LedgerQuery,
        window: QueryWindow,
    ) -> StorageResult<Vec<LedgerEntry>>;

    /// Number of entries matching `query`.
    async fn count_entries(&self, query: &LedgerQuery) -> StorageResult<u64>;
}

/// Registry of issued tracking identifiers.
#[async_trait]
pub trait TrackingIdRegistry: Send + Sync {
    async fn exists(&self, id: &TrackingId) -> StorageResult<bool>;

    /// Record `id` as issued. Returns `false` if it was already present.
    async fn register(&self, id: &TrackingId) -> StorageResult<bool>;
}

/// Unified storage bundle used by MIBSP runtime surfaces.
pub trait MibspStorage: LedgerStore + TrackingIdRegistry + Send + Sync {}

impl<T> MibspStorage for T where T: LedgerStore + TrackingIdRegistry + Send + Sync {}
