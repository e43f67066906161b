//! The identity registry gateway consumed by the import engine.
//!
//! The engine never touches storage directly; it drives these operations and
//! reacts to their errors. [`Database`](crate::db::Database) is the SQLite
//! implementation.
//!
//! Implementations must make `add_identity` atomic create-if-absent, so two
//! concurrent imports cannot both create the same fingerprint.

use chrono::{DateTime, Utc};

use crate::errors::RegistryError;
use crate::identity::Fingerprint;
use crate::models::{
    CanonicalId, Enrollment, Individual, Organization, RawIdentity, StoredIdentity,
};

/// Storage operations the import engine depends on.
pub trait IdentityRegistry {
    /// Store `identity` under its fingerprint.
    ///
    /// With `canonical_id` unset a new individual is created whose canonical
    /// id is the new fingerprint; otherwise the identity joins that
    /// individual.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::AlreadyExists`] with the fingerprint as `id` when
    ///   the fingerprint is already stored.
    /// - [`RegistryError::InvalidValue`] when the attributes cannot be
    ///   fingerprinted.
    /// - [`RegistryError::NotFound`] when `canonical_id` is unknown.
    fn add_identity(
        &self,
        identity: &RawIdentity,
        canonical_id: Option<&CanonicalId>,
    ) -> Result<StoredIdentity, RegistryError>;

    /// Look up a stored identity by fingerprint.
    fn find_identity(&self, fingerprint: &Fingerprint) -> Result<StoredIdentity, RegistryError>;

    /// Look up an individual. Retired canonical ids resolve to the individual
    /// they were merged into.
    fn find_individual(&self, canonical_id: &CanonicalId) -> Result<Individual, RegistryError>;

    /// Create an organization. Duplicates yield [`RegistryError::AlreadyExists`].
    fn add_organization(&self, name: &str) -> Result<Organization, RegistryError>;

    /// Enroll an individual in an organization for `[from, to]`.
    fn enroll(
        &self,
        canonical_id: &CanonicalId,
        organization: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Enrollment, RegistryError>;

    /// Merge every individual in `from` into `to`, which survives.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Locked`] if any individual in `from` is locked.
    fn merge(&self, from: &[CanonicalId], to: &CanonicalId) -> Result<Individual, RegistryError>;
}
