//! MIBSP core types.
//!
//! This crate defines the vocabulary shared by the ledger and its storage
//! adapters:
//! - the immutable [`LedgerEntry`] and its hash-linkage rule
//! - the canonical, versioned byte encoding fed to the link hash
//! - the public [`TrackingId`] format and its pure validator
//!
//! The canonical encoding in [`hash`] is a compatibility surface: changing it
//! invalidates every previously computed link hash.

#![deny(unsafe_code)]
#![warn(rust_2018_idioms)]

mod entry;
mod error;
pub mod hash;
pub mod tracking;

pub use entry::{Action, Actor, ActorRole, Detail, EntryDraft, LedgerEntry, SubjectRef};
pub use error::{EntryError, EntryResult};
pub use hash::{LinkHash, CANONICAL_ENCODING_VERSION, LINK_HASH_LEN};
pub use tracking::{
    validate, TrackingId, TRACKING_ID_ALPHABET, TRACKING_ID_LEN, TRACKING_ID_PREFIX,
    TRACKING_ID_SUFFIX_LEN,
};
