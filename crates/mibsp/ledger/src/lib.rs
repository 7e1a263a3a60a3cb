//! MIBSP activity ledger.
//!
//! A tamper-evident, append-only record of every privileged action taken in
//! the complaint portal. Each entry carries the hash of its predecessor, so
//! any edit, deletion, or reordering of history is detectable by a full or
//! incremental scan.
//!
//! - [`ChainBuilder`]: `append`, serialized in-process and guarded by the
//!   store's compare-and-append across processes
//! - [`ChainVerifier`]: `verify_all`, `verify_range`, `verify_since`
//! - [`TrackingIdGenerator`]: public complaint identifiers
//! - [`ActivityLog`]: filtered listings for dashboards
//!
//! [`AuditLedger`] bundles these over one shared store.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]
#![warn(rust_2018_idioms)]

mod activity;
mod builder;
mod clock;
mod config;
mod error;
mod tracking;
mod verifier;

use std::sync::Arc;

use mibsp_storage::memory::InMemoryStorage;
use mibsp_storage::MibspStorage;
use mibsp_types::{Action, Actor, Detail, LedgerEntry, LinkHash, SubjectRef, TrackingId};

pub use activity::{ActivityLog, EntrySummary};
pub use builder::ChainBuilder;
pub use clock::{Clock, SystemClock};
pub use config::{LedgerConfig, TrackingConfig};
pub use error::{LedgerError, LedgerResult, TrackingError};
pub use tracking::{TrackingIdGenerator, TrackingResult};
pub use verifier::{
    Checkpoint, ChainVerifier, ClockRegression, Finding, FindingKind, ScanMode,
    VerificationResult, VerificationStatus,
};

/// The ledger surface exposed to the rest of the portal.
pub struct AuditLedger {
    builder: ChainBuilder,
    verifier: ChainVerifier,
    tracking: TrackingIdGenerator,
    activity: ActivityLog,
}

impl AuditLedger {
    pub fn new<S>(
        storage: Arc<S>,
        ledger_config: LedgerConfig,
        tracking_config: TrackingConfig,
    ) -> Self
    where
        S: MibspStorage + 'static,
    {
        let verifier = ChainVerifier::new(storage.clone(), &ledger_config);
        Self {
            builder: ChainBuilder::new(storage.clone(), ledger_config),
            verifier,
            tracking: TrackingIdGenerator::new(storage.clone(), tracking_config),
            activity: ActivityLog::new(storage),
        }
    }

    /// Ledger backed by process memory, with default settings.
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(InMemoryStorage::new()),
            LedgerConfig::default(),
            TrackingConfig::default(),
        )
    }

    pub async fn append(
        &self,
        actor: Actor,
        action: Action,
        subject_ref: SubjectRef,
        detail: Detail,
    ) -> LedgerResult<LedgerEntry> {
        self.builder.append(actor, action, subject_ref, detail).await
    }

    pub async fn verify_all(&self, mode: ScanMode) -> LedgerResult<VerificationResult> {
        self.verifier.verify_all(mode).await
    }

    pub async fn verify_range(
        &self,
        from: u64,
        to: u64,
        seed: LinkHash,
        mode: ScanMode,
    ) -> LedgerResult<VerificationResult> {
        self.verifier.verify_range(from, to, seed, mode).await
    }

    pub async fn verify_since(
        &self,
        checkpoint: &Checkpoint,
        mode: ScanMode,
    ) -> LedgerResult<VerificationResult> {
        self.verifier.verify_since(checkpoint, mode).await
    }

    /// Generate an unused tracking id without reserving it.
    pub async fn generate_tracking_id(&self) -> TrackingResult<TrackingId> {
        self.tracking.generate().await
    }

    /// Generate a tracking id and record it as issued.
    pub async fn issue_tracking_id(&self) -> TrackingResult<TrackingId> {
        self.tracking.issue().await
    }

    pub fn activity(&self) -> &ActivityLog {
        &self.activity
    }
}
