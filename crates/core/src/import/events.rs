//! Structured audit events produced while importing, and the per-batch report
//! that collects them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::identity::Fingerprint;
use crate::models::CanonicalId;

/// One observable step of an import.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ImportEvent {
    /// A new identity was stored.
    IdentityCreated {
        fingerprint: Fingerprint,
        canonical_id: CanonicalId,
    },
    /// The identity was already stored; it resolved to `canonical_id`.
    IdentityMatched {
        fingerprint: Fingerprint,
        canonical_id: CanonicalId,
    },
    /// A raw identity failed validation and was skipped.
    InvalidIdentitySkipped { source: String, reason: String },
    /// `from` was merged into the pre-existing `into`.
    MergePerformed {
        from: CanonicalId,
        into: CanonicalId,
    },
    /// A merge was refused because `locked` is locked.
    MergeRefusedLocked {
        fingerprint: Fingerprint,
        locked: CanonicalId,
        working: CanonicalId,
    },
    /// An enrollment was stored.
    EnrollmentApplied {
        canonical_id: CanonicalId,
        organization: String,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// A claim's period was truncated to the valid range.
    EnrollmentClamped {
        canonical_id: CanonicalId,
        organization: String,
        claimed_start: DateTime<Utc>,
        claimed_end: DateTime<Utc>,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },
    /// The enrollment already existed.
    EnrollmentDuplicate {
        canonical_id: CanonicalId,
        organization: String,
    },
    /// The registry rejected an enrollment; the candidate's remaining claims
    /// were dropped.
    EnrollmentFailed {
        canonical_id: CanonicalId,
        organization: String,
        cause: String,
    },
}

impl ImportEvent {
    /// Emit this event as a tracing record.
    pub fn log(&self) {
        match self {
            Self::IdentityCreated {
                fingerprint,
                canonical_id,
            } => debug!(%fingerprint, %canonical_id, "identity created"),
            Self::IdentityMatched {
                fingerprint,
                canonical_id,
            } => debug!(%fingerprint, %canonical_id, "identity already registered"),
            Self::InvalidIdentitySkipped { source, reason } => {
                warn!(source = %source, reason = %reason, "skipping invalid identity")
            }
            Self::MergePerformed { from, into } => {
                info!(%from, %into, "merged individuals")
            }
            Self::MergeRefusedLocked {
                fingerprint,
                locked,
                working,
            } => warn!(%fingerprint, %locked, %working, "individual is locked, not merging"),
            Self::EnrollmentApplied {
                canonical_id,
                organization,
                ..
            } => debug!(%canonical_id, organization = %organization, "enrollment applied"),
            Self::EnrollmentClamped {
                canonical_id,
                organization,
                start,
                end,
                ..
            } => info!(%canonical_id, organization = %organization, %start, %end, "enrollment period clamped"),
            Self::EnrollmentDuplicate {
                canonical_id,
                organization,
            } => debug!(%canonical_id, organization = %organization, "enrollment already exists"),
            Self::EnrollmentFailed {
                canonical_id,
                organization,
                cause,
            } => warn!(%canonical_id, organization = %organization, cause = %cause, "enrollment failed"),
        }
    }
}

/// A candidate whose enrollment phase was aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateFailure {
    /// Position of the candidate in the input sequence.
    pub index: usize,
    pub canonical_id: CanonicalId,
    pub cause: String,
}

/// Outcome of one import batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportReport {
    pub job_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// Candidates processed.
    pub candidates: usize,
    /// Identities created across the batch.
    pub total_created: usize,
    pub enrollments_applied: usize,
    pub events: Vec<ImportEvent>,
    pub failures: Vec<CandidateFailure>,
}

impl ImportReport {
    pub fn new() -> Self {
        Self {
            job_id: Uuid::new_v4(),
            started_at: Utc::now(),
            completed_at: None,
            candidates: 0,
            total_created: 0,
            enrollments_applied: 0,
            events: Vec::new(),
            failures: Vec::new(),
        }
    }

    /// Record an event, emitting it to the log as well.
    pub fn record(&mut self, event: ImportEvent) {
        event.log();
        self.events.push(event);
    }

    pub fn merges(&self) -> usize {
        self.count(|e| matches!(e, ImportEvent::MergePerformed { .. }))
    }

    pub fn refused_merges(&self) -> usize {
        self.count(|e| matches!(e, ImportEvent::MergeRefusedLocked { .. }))
    }

    pub fn skipped_identities(&self) -> usize {
        self.count(|e| matches!(e, ImportEvent::InvalidIdentitySkipped { .. }))
    }

    fn count(&self, pred: impl Fn(&ImportEvent) -> bool) -> usize {
        self.events.iter().filter(|e| pred(e)).count()
    }
}

impl Default for ImportReport {
    fn default() -> Self {
        Self::new()
    }
}
