use thiserror::Error;

/// Result type for model construction and parsing.
pub type EntryResult<T> = Result<T, EntryError>;

/// Errors raised while building or parsing ledger model values.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EntryError {
    #[error("invalid tracking id: {0:?}")]
    InvalidTrackingId(String),

    #[error("invalid link hash: {0:?}")]
    InvalidHash(String),

    #[error("invalid actor: {0}")]
    InvalidActor(String),

    #[error("invalid subject reference: {0}")]
    InvalidSubject(String),

    #[error("detail is {len} bytes, limit is {max}")]
    DetailTooLong { len: usize, max: usize },

    #[error("unknown action code: {0:?}")]
    UnknownAction(String),

    #[error("unknown actor role: {0:?}")]
    UnknownRole(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}
