//! Merge reconciliation for one candidate individual.
//!
//! The candidate's raw identities are folded in order over a
//! [`ReconcileState`]. Each [`step`] asks the registry to create the identity
//! under the current working canonical id and reacts to the outcome:
//!
//! - created: adopt the new individual if nothing is adopted yet;
//! - invalid: skip the identity;
//! - already stored under another individual: merge the working individual
//!   into the stored one, unless the stored one is locked.
//!
//! The stored individual always survives a merge, which keeps canonical ids
//! stable across imports and makes re-imports create nothing.

use tracing::debug;

use crate::errors::RegistryError;
use crate::identity::Fingerprint;
use crate::models::{CandidateIndividual, CanonicalId, Individual, RawIdentity};
use crate::registry::IdentityRegistry;

use super::events::ImportEvent;

/// Accumulator threaded through the identities of one candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileState {
    /// Individual the candidate currently resolves to.
    pub working: Option<CanonicalId>,
    /// Identities created so far.
    pub created: usize,
}

/// Result of reconciling a whole candidate.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// `None` when every identity of the candidate was invalid.
    pub canonical_id: Option<CanonicalId>,
    pub created: usize,
    pub events: Vec<ImportEvent>,
}

/// Apply one raw identity to `state`.
///
/// Only storage failures are returned as errors; invalid identities, known
/// fingerprints and locked individuals are outcomes reported by the event.
pub fn step<R: IdentityRegistry + ?Sized>(
    registry: &R,
    state: ReconcileState,
    identity: &RawIdentity,
) -> Result<(ReconcileState, ImportEvent), RegistryError> {
    let ReconcileState { working, created } = state;

    match registry.add_identity(identity, working.as_ref()) {
        Ok(stored) => {
            let event = ImportEvent::IdentityCreated {
                fingerprint: stored.fingerprint,
                canonical_id: stored.individual.clone(),
            };
            let working = working.or(Some(stored.individual));
            Ok((
                ReconcileState {
                    working,
                    created: created + 1,
                },
                event,
            ))
        }
        Err(RegistryError::InvalidValue(reason)) => Ok((
            ReconcileState { working, created },
            ImportEvent::InvalidIdentitySkipped {
                source: identity.source.clone(),
                reason,
            },
        )),
        Err(RegistryError::AlreadyExists { id, .. }) => {
            let fingerprint: Fingerprint = id.parse().map_err(RegistryError::from)?;
            let stored = registry.find_identity(&fingerprint)?;
            let owner = registry.find_individual(&stored.individual)?;
            resolve_existing(registry, working, created, fingerprint, owner)
        }
        Err(err) => Err(err),
    }
}

fn resolve_existing<R: IdentityRegistry + ?Sized>(
    registry: &R,
    working: Option<CanonicalId>,
    created: usize,
    fingerprint: Fingerprint,
    stored: Individual,
) -> Result<(ReconcileState, ImportEvent), RegistryError> {
    let stored_id = stored.canonical_id;

    let working_id = match working {
        Some(id) if id != stored_id => id,
        _ => {
            return Ok((
                ReconcileState {
                    working: Some(stored_id.clone()),
                    created,
                },
                ImportEvent::IdentityMatched {
                    fingerprint,
                    canonical_id: stored_id,
                },
            ))
        }
    };

    let refused = |locked: CanonicalId, working: CanonicalId| {
        let event = ImportEvent::MergeRefusedLocked {
            fingerprint: fingerprint.clone(),
            locked,
            working: working.clone(),
        };
        (
            ReconcileState {
                working: Some(working),
                created,
            },
            event,
        )
    };

    if stored.is_locked {
        return Ok(refused(stored_id, working_id));
    }

    match registry.merge(std::slice::from_ref(&working_id), &stored_id) {
        Ok(_) => {
            debug!(from = %working_id, into = %stored_id, "working individual absorbed");
            Ok((
                ReconcileState {
                    working: Some(stored_id.clone()),
                    created,
                },
                ImportEvent::MergePerformed {
                    from: working_id,
                    into: stored_id,
                },
            ))
        }
        // The working individual itself is locked; it may not be merged away.
        Err(RegistryError::Locked(_)) => Ok(refused(working_id.clone(), working_id)),
        Err(err) => Err(err),
    }
}

/// Reconcile every identity of `candidate`, in order.
pub fn reconcile<R: IdentityRegistry + ?Sized>(
    registry: &R,
    candidate: &CandidateIndividual,
) -> Result<Reconciliation, RegistryError> {
    let mut events = Vec::with_capacity(candidate.identities.len());

    let state = candidate
        .identities
        .iter()
        .try_fold(ReconcileState::default(), |state, identity| {
            let (next, event) = step(registry, state, identity)?;
            events.push(event);
            Ok::<_, RegistryError>(next)
        })?;

    Ok(Reconciliation {
        canonical_id: state.working,
        created: state.created,
        events,
    })
}
