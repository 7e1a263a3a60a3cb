//! Ledger and tracking id tuning.

use serde::{Deserialize, Serialize};

/// Chain builder and verifier settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Compare-and-append attempts before an append gives up when other
    /// processes keep winning the tail.
    pub max_append_attempts: u32,
    /// Entries fetched per storage round-trip during verification.
    pub verify_page_size: u64,
    pub max_detail_bytes: usize,
    pub max_subject_bytes: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_append_attempts: 32,
            verify_page_size: 500,
            max_detail_bytes: 4096,
            max_subject_bytes: 128,
        }
    }
}

/// Tracking id generator settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackingConfig {
    /// Draws before generation is reported as exhausted.
    pub max_attempts: u32,
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self { max_attempts: 16 }
    }
}
