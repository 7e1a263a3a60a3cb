use mibsp_storage::StorageError;
use mibsp_types::EntryError;
use thiserror::Error;

pub type LedgerResult<T> = Result<T, LedgerError>;

/// Errors returned by append and verification calls.
///
/// Tampering is not an error: verification reports it as findings on a
/// successful [`crate::VerificationResult`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Storage unavailable or the write was rejected. The entry is not part
    /// of the chain.
    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("invalid entry: {0}")]
    InvalidEntry(#[from] EntryError),

    #[error("invalid range: from {from} to {to}")]
    InvalidRange { from: u64, to: u64 },

    #[error("range starting at {from} lies beyond the ledger tail {tail:?}")]
    RangeBeyondTail { from: u64, tail: Option<u64> },

    #[error("sequence space exhausted after {0}")]
    SequenceOverflow(u64),
}

/// Errors returned by tracking id issuance.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TrackingError {
    /// Every attempt collided with an issued id. Indicates a broken random
    /// source or an exhausted id space and must be treated as fatal.
    #[error("tracking id generation exhausted after {attempts} attempts")]
    Exhausted { attempts: u32 },

    #[error("persistence error: {0}")]
    Persistence(#[from] StorageError),

    #[error("random source unavailable: {0}")]
    RandomSource(String),

    #[error("invalid tracking id: {0}")]
    Invalid(#[from] EntryError),
}
