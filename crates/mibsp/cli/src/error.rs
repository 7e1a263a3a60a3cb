//! CLI error types

use mibsp_ledger::{LedgerError, TrackingError};
use mibsp_storage::StorageError;
use mibsp_types::EntryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Tracking id error: {0}")]
    Tracking(#[from] TrackingError),

    #[error("Invalid entry: {0}")]
    Entry(#[from] EntryError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

pub type CliResult<T> = Result<T, CliError>;
