//! MIBSP storage collaborators.
//!
//! The ledger core never keeps chain state in memory between calls. Every
//! append is a compare-and-append against the store's current tail, so any
//! number of worker processes can share one source of truth:
//! - [`LedgerStore`]: `read_tail`, `insert_if_tail_unchanged`,
//!   `scan_ascending`, plus filtered queries for dashboards
//! - [`TrackingIdRegistry`]: `exists` / `register` for public identifiers
//!
//! Adapters:
//! - [`memory::InMemoryStorage`] for tests, demos, and embedding
//! - `postgres::PostgresStorage` (feature `postgres`) as the transactional
//!   source of truth, with an append-only trigger on the entry table

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod error;
pub mod memory;
mod model;
#[cfg(feature = "postgres")]
pub mod postgres;
mod traits;

pub use error::{StorageError, StorageResult};
pub use model::{LedgerQuery, QueryWindow, StoredEntry, TailRef};
pub use traits::{LedgerStore, MibspStorage, TrackingIdRegistry};
