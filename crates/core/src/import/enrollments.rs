//! Applies enrollment claims to an individual once its canonical id is known.

use crate::errors::{LoadError, RegistryError};
use crate::models::{max_period_date, min_period_date, CanonicalId, EnrollmentClaim};
use crate::registry::IdentityRegistry;

use super::events::ImportEvent;

/// Apply `claims` to the individual `canonical_id`, in order.
///
/// Organizations are created on first reference. Periods are clamped to
/// `[min_period_date(), max_period_date()]`. Duplicate enrollments are
/// ignored. Returns the number of enrollments stored.
///
/// # Errors
///
/// The first claim the registry rejects (invalid period, unknown individual
/// or organization) stops processing with [`LoadError::Rejected`]; claims
/// after it are not applied.
pub fn apply_enrollments<R: IdentityRegistry + ?Sized>(
    registry: &R,
    canonical_id: &CanonicalId,
    claims: &[EnrollmentClaim],
    events: &mut Vec<ImportEvent>,
) -> Result<usize, LoadError> {
    let mut applied = 0;

    for claim in claims {
        let rejected = |cause: String| LoadError::Rejected {
            canonical_id: canonical_id.to_string(),
            organization: claim.organization.clone(),
            cause,
        };

        match registry.add_organization(&claim.organization) {
            Ok(_) | Err(RegistryError::AlreadyExists { .. }) => {}
            Err(RegistryError::InvalidValue(cause)) => return Err(rejected(cause)),
            Err(err) => return Err(err.into()),
        }

        let start = claim.start.max(min_period_date());
        let end = claim.end.min(max_period_date());
        if start != claim.start || end != claim.end {
            events.push(ImportEvent::EnrollmentClamped {
                canonical_id: canonical_id.clone(),
                organization: claim.organization.clone(),
                claimed_start: claim.start,
                claimed_end: claim.end,
                start,
                end,
            });
        }

        match registry.enroll(canonical_id, &claim.organization, start, end) {
            Ok(enrollment) => {
                applied += 1;
                events.push(ImportEvent::EnrollmentApplied {
                    canonical_id: canonical_id.clone(),
                    organization: enrollment.organization,
                    start: enrollment.start,
                    end: enrollment.end,
                });
            }
            Err(RegistryError::AlreadyExists { .. }) => {
                events.push(ImportEvent::EnrollmentDuplicate {
                    canonical_id: canonical_id.clone(),
                    organization: claim.organization.clone(),
                });
            }
            Err(err @ (RegistryError::InvalidValue(_) | RegistryError::NotFound { .. })) => {
                return Err(rejected(err.to_string()));
            }
            Err(err) => return Err(err.into()),
        }
    }

    Ok(applied)
}
