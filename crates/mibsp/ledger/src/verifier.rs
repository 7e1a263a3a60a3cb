//! Read-only chain verification.
//!
//! Each row is checked in ascending order against three rules:
//! 1. it decodes, its stored link hash equals the hash recomputed from its
//!    fields, and its declared sequence matches the position it is filed
//!    under ([`FindingKind::ContentTampering`])
//! 2. its position is exactly one past its predecessor's
//!    ([`FindingKind::SequenceGap`])
//! 3. its `prev_link_hash` equals the predecessor's recomputed hash
//!    ([`FindingKind::ChainBreak`])
//!
//! Findings are located by storage position, never by a value read from the
//! row. The trusted predecessor hash is always the *recomputed* one, so a
//! tampered entry never launders a forged hash forward.

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use mibsp_storage::{LedgerStore, StoredEntry};
use mibsp_types::LinkHash;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::LedgerConfig;
use crate::error::{LedgerError, LedgerResult};

/// How far a verification run goes after the first inconsistency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ScanMode {
    /// Stop at the earliest inconsistency.
    #[default]
    FirstFinding,
    /// Keep scanning and enumerate every inconsistency.
    Forensic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FindingKind {
    ContentTampering,
    ChainBreak,
    SequenceGap,
}

impl FindingKind {
    pub fn code(self) -> &'static str {
        match self {
            FindingKind::ContentTampering => "content-tampering",
            FindingKind::ChainBreak => "chain-break",
            FindingKind::SequenceGap => "sequence-gap",
        }
    }
}

impl fmt::Display for FindingKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One detected inconsistency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub sequence: u64,
    pub kind: FindingKind,
    pub detail: String,
}

/// An entry stamped earlier than its predecessor. Not a tamper finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClockRegression {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub previous_timestamp: DateTime<Utc>,
}

/// Last verified position and its trusted link hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub sequence: u64,
    pub link_hash: LinkHash,
    pub verified_at: DateTime<Utc>,
}

/// Terminal state of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "kebab-case")]
pub enum VerificationStatus {
    Intact,
    Tampered { sequence: u64, kind: FindingKind },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationResult {
    /// First sequence examined.
    pub from: u64,
    /// Last sequence examined (the tail snapshot, or the requested bound).
    pub to: u64,
    pub entries_checked: u64,
    pub findings: Vec<Finding>,
    pub clock_regressions: Vec<ClockRegression>,
    /// Present only when the run found nothing and checked at least one entry.
    pub checkpoint: Option<Checkpoint>,
}

impl VerificationResult {
    fn empty(from: u64, to: u64) -> Self {
        Self {
            from,
            to,
            entries_checked: 0,
            findings: Vec::new(),
            clock_regressions: Vec::new(),
            checkpoint: None,
        }
    }

    pub fn is_intact(&self) -> bool {
        self.findings.is_empty()
    }

    pub fn first_finding(&self) -> Option<&Finding> {
        self.findings.first()
    }

    pub fn status(&self) -> VerificationStatus {
        match self.first_finding() {
            None => VerificationStatus::Intact,
            Some(finding) => VerificationStatus::Tampered {
                sequence: finding.sequence,
                kind: finding.kind,
            },
        }
    }
}

/// Verifies chain integrity against a [`LedgerStore`].
///
/// Verification never writes and tolerates the tail growing mid-scan: the
/// upper bound is fixed from a tail snapshot taken when the run starts.
pub struct ChainVerifier {
    store: Arc<dyn LedgerStore>,
    page_size: u64,
}

impl ChainVerifier {
    pub fn new(store: Arc<dyn LedgerStore>, config: &LedgerConfig) -> Self {
        Self {
            store,
            page_size: config.verify_page_size.max(1),
        }
    }

    /// Verify the whole ledger from the genesis entry to the current tail.
    #[instrument(skip(self))]
    pub async fn verify_all(&self, mode: ScanMode) -> LedgerResult<VerificationResult> {
        let Some(tail) = self.store.read_tail().await? else {
            info!("ledger is empty, nothing to verify");
            return Ok(VerificationResult::empty(1, 0));
        };
        self.scan(1, tail.sequence, LinkHash::GENESIS, mode).await
    }

    /// Verify `from..=to`, trusting `seed` as the link hash of entry
    /// `from - 1` (the genesis sentinel when `from == 1`).
    ///
    /// `to` is clamped to the tail observed when the run starts. A window
    /// starting past that tail is [`LedgerError::RangeBeyondTail`].
    #[instrument(skip(self, seed))]
    pub async fn verify_range(
        &self,
        from: u64,
        to: u64,
        seed: LinkHash,
        mode: ScanMode,
    ) -> LedgerResult<VerificationResult> {
        if from == 0 || from > to {
            return Err(LedgerError::InvalidRange { from, to });
        }
        let tail = self.store.read_tail().await?.map(|t| t.sequence);
        let to = match tail {
            Some(tail) if from <= tail => to.min(tail),
            _ => return Err(LedgerError::RangeBeyondTail { from, tail }),
        };
        self.scan(from, to, seed, mode).await
    }

    /// Re-check a pinned checkpoint, then verify everything after it.
    ///
    /// Detects tail truncation (the checkpointed entry is gone) and rewrites
    /// of already-verified history (the entry no longer carries the pinned
    /// hash), neither of which a bare range scan can see.
    #[instrument(skip(self, checkpoint), fields(checkpoint = checkpoint.sequence))]
    pub async fn verify_since(
        &self,
        checkpoint: &Checkpoint,
        mode: ScanMode,
    ) -> LedgerResult<VerificationResult> {
        let pinned = self
            .store
            .scan_ascending(checkpoint.sequence, checkpoint.sequence)
            .await?
            .into_iter()
            .next();
        let finding = pinned_finding(checkpoint, pinned.as_ref());

        if let Some(finding) = finding {
            warn!(sequence = finding.sequence, kind = %finding.kind, "checkpoint no longer holds");
            let mut result = VerificationResult::empty(checkpoint.sequence, checkpoint.sequence);
            result.entries_checked = 1;
            result.findings.push(finding);
            return Ok(result);
        }

        let tail = self
            .store
            .read_tail()
            .await?
            .map_or(checkpoint.sequence, |t| t.sequence);
        if tail <= checkpoint.sequence {
            debug!("no entries after checkpoint");
            let mut result = VerificationResult::empty(checkpoint.sequence, checkpoint.sequence);
            result.entries_checked = 1;
            result.checkpoint = Some(checkpoint.clone());
            return Ok(result);
        }

        self.scan(checkpoint.sequence + 1, tail, checkpoint.link_hash, mode)
            .await
    }

    async fn scan(
        &self,
        from: u64,
        to: u64,
        seed: LinkHash,
        mode: ScanMode,
    ) -> LedgerResult<VerificationResult> {
        let mut state = ScanState::new(from, to, seed, mode);
        let mut cursor = from;

        while cursor <= to && !state.stopped {
            let page_end = cursor.saturating_add(self.page_size - 1).min(to);
            let page = self.store.scan_ascending(cursor, page_end).await?;
            debug!(from = cursor, to = page_end, fetched = page.len(), "verifying page");

            for stored in &page {
                state.check(stored);
                if state.stopped {
                    break;
                }
            }

            match page_end.checked_add(1) {
                Some(next) => cursor = next,
                None => break,
            }
        }

        state.finish_missing_tail();
        let result = state.into_result();

        if result.is_intact() {
            info!(
                from = result.from,
                to = result.to,
                entries = result.entries_checked,
                "ledger chain intact"
            );
        } else {
            for finding in &result.findings {
                warn!(
                    sequence = finding.sequence,
                    kind = %finding.kind,
                    detail = %finding.detail,
                    "ledger inconsistency"
                );
            }
        }
        for regression in &result.clock_regressions {
            warn!(
                sequence = regression.sequence,
                timestamp = %regression.timestamp,
                previous = %regression.previous_timestamp,
                "ledger timestamp earlier than predecessor"
            );
        }

        Ok(result)
    }
}

/// Whether the checkpointed row still holds exactly what was verified.
fn pinned_finding(checkpoint: &Checkpoint, pinned: Option<&StoredEntry>) -> Option<Finding> {
    let sequence = checkpoint.sequence;
    let (kind, detail) = match pinned {
        None => (
            FindingKind::SequenceGap,
            "checkpointed entry is missing".to_string(),
        ),
        Some(StoredEntry::Undecodable { reason, .. }) => (
            FindingKind::ContentTampering,
            format!("checkpointed row cannot be decoded: {reason}"),
        ),
        Some(StoredEntry::Decoded { entry, .. }) => {
            let recomputed = entry.recompute_link_hash();
            if recomputed != entry.link_hash {
                (
                    FindingKind::ContentTampering,
                    format!(
                        "stored link hash {} does not match recomputed {}",
                        entry.link_hash.short(),
                        recomputed.short()
                    ),
                )
            } else if entry.sequence != sequence {
                (
                    FindingKind::ContentTampering,
                    format!("checkpointed entry declares sequence {}", entry.sequence),
                )
            } else if recomputed != checkpoint.link_hash {
                (
                    FindingKind::ChainBreak,
                    format!(
                        "checkpointed entry no longer hashes to pinned {}",
                        checkpoint.link_hash.short()
                    ),
                )
            } else {
                return None;
            }
        }
    };
    Some(Finding {
        sequence,
        kind,
        detail,
    })
}

struct ScanState {
    from: u64,
    to: u64,
    mode: ScanMode,
    expected_sequence: u64,
    /// `None` after a row that could not be decoded.
    trusted_hash: Option<LinkHash>,
    last_checked: Option<(u64, LinkHash)>,
    previous_timestamp: Option<DateTime<Utc>>,
    entries_checked: u64,
    findings: Vec<Finding>,
    clock_regressions: Vec<ClockRegression>,
    stopped: bool,
}

impl ScanState {
    fn new(from: u64, to: u64, seed: LinkHash, mode: ScanMode) -> Self {
        Self {
            from,
            to,
            mode,
            expected_sequence: from,
            trusted_hash: Some(seed),
            last_checked: None,
            previous_timestamp: None,
            entries_checked: 0,
            findings: Vec::new(),
            clock_regressions: Vec::new(),
            stopped: false,
        }
    }

    fn record(&mut self, sequence: u64, kind: FindingKind, detail: String) {
        self.findings.push(Finding {
            sequence,
            kind,
            detail,
        });
        if self.mode == ScanMode::FirstFinding {
            self.stopped = true;
        }
    }

    fn check(&mut self, stored: &StoredEntry) {
        self.entries_checked += 1;
        let position = stored.position();
        let entry = match stored {
            StoredEntry::Decoded { entry, .. } => entry,
            StoredEntry::Undecodable { reason, .. } => {
                self.record(
                    position,
                    FindingKind::ContentTampering,
                    format!("row cannot be decoded: {reason}"),
                );
                if !self.stopped {
                    self.check_continuity(position);
                }
                self.trusted_hash = None;
                self.expected_sequence = position.saturating_add(1);
                return;
            }
        };
        let recomputed = entry.recompute_link_hash();

        if recomputed != entry.link_hash {
            self.record(
                position,
                FindingKind::ContentTampering,
                format!(
                    "stored link hash {} does not match recomputed {}",
                    entry.link_hash.short(),
                    recomputed.short()
                ),
            );
        } else if entry.sequence != position {
            self.record(
                position,
                FindingKind::ContentTampering,
                format!("entry declares sequence {}", entry.sequence),
            );
        }
        if self.stopped {
            return;
        }

        if self.check_continuity(position) {
            match self.trusted_hash {
                Some(trusted) if trusted == entry.prev_link_hash => {}
                Some(trusted) => self.record(
                    position,
                    FindingKind::ChainBreak,
                    format!(
                        "prev link hash {} does not match predecessor {}",
                        entry.prev_link_hash.short(),
                        trusted.short()
                    ),
                ),
                None => self.record(
                    position,
                    FindingKind::ChainBreak,
                    "predecessor could not be decoded".to_string(),
                ),
            }
        }
        if self.stopped {
            return;
        }

        if let Some(previous) = self.previous_timestamp {
            if entry.timestamp < previous {
                self.clock_regressions.push(ClockRegression {
                    sequence: position,
                    timestamp: entry.timestamp,
                    previous_timestamp: previous,
                });
            }
        }

        self.previous_timestamp = Some(entry.timestamp);
        self.trusted_hash = Some(recomputed);
        self.last_checked = Some((position, recomputed));
        self.expected_sequence = position.saturating_add(1);
    }

    /// Records a gap when `position` is not the next expected one. Returns
    /// whether the row directly follows its predecessor.
    fn check_continuity(&mut self, position: u64) -> bool {
        if position == self.expected_sequence {
            return true;
        }
        self.record(
            position,
            FindingKind::SequenceGap,
            format!(
                "expected sequence {}, found {position}",
                self.expected_sequence
            ),
        );
        false
    }

    /// Entries absent between the last one seen and the upper bound.
    fn finish_missing_tail(&mut self) {
        if self.stopped || self.expected_sequence > self.to {
            return;
        }
        let missing_from = self.expected_sequence;
        self.record(
            missing_from,
            FindingKind::SequenceGap,
            format!("entries {missing_from}..={} are missing", self.to),
        );
    }

    fn into_result(self) -> VerificationResult {
        let checkpoint = match (self.findings.is_empty(), self.last_checked) {
            (true, Some((sequence, link_hash))) => Some(Checkpoint {
                sequence,
                link_hash,
                verified_at: Utc::now(),
            }),
            _ => None,
        };
        VerificationResult {
            from: self.from,
            to: self.to,
            entries_checked: self.entries_checked,
            findings: self.findings,
            clock_regressions: self.clock_regressions,
            checkpoint,
        }
    }
}
