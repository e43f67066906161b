//! [`IdentityRegistry`] backed by the SQLite [`Database`].
//!
//! Every mutating operation runs in one immediate transaction and leaves an
//! `audit_log` row behind.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::Connection;
use tracing::{debug, info};

use super::queries::{self, EnrollmentRow, IndividualRow};
use super::Database;
use crate::errors::RegistryError;
use crate::identity::Fingerprint;
use crate::models::{
    max_period_date, min_period_date, CanonicalId, Enrollment, Individual, Organization, Profile,
    RawIdentity, StoredIdentity,
};
use crate::registry::IdentityRegistry;

fn not_found(entity: &str, id: impl Into<String>) -> RegistryError {
    RegistryError::NotFound {
        entity: entity.into(),
        id: id.into(),
    }
}

fn active_individual(conn: &Connection, id: &CanonicalId) -> Result<IndividualRow, RegistryError> {
    queries::resolve_individual(conn, id.as_str())?.ok_or_else(|| not_found("individual", id.as_str()))
}

/// Record `[start, end]` for `mk` in organization `org_id`, unioning it with
/// any overlapping enrollments.
///
/// Returns `None` when an existing enrollment already covers the period.
fn absorb_period(
    conn: &Connection,
    mk: &str,
    org_id: i64,
    organization: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<Option<EnrollmentRow>, RegistryError> {
    let existing = queries::list_enrollments(conn, mk, Some(org_id))?;

    if existing.iter().any(|e| e.start <= start && end <= e.end) {
        return Ok(None);
    }

    let overlapping: Vec<&EnrollmentRow> = existing
        .iter()
        .filter(|e| e.start <= end && start <= e.end)
        .collect();
    let merged_start = overlapping.iter().fold(start, |acc, e| acc.min(e.start));
    let merged_end = overlapping.iter().fold(end, |acc, e| acc.max(e.end));

    for row in &overlapping {
        queries::delete_enrollment(conn, row.id)?;
    }
    let id = queries::insert_enrollment(conn, mk, org_id, &merged_start, &merged_end)?;
    if !overlapping.is_empty() {
        debug!(mk, org_id, merged = overlapping.len(), "unioned overlapping enrollments");
    }

    Ok(Some(EnrollmentRow {
        id,
        individual: mk.to_string(),
        organization_id: org_id,
        organization: organization.to_string(),
        start: merged_start,
        end: merged_end,
    }))
}

fn validate_period(from: &DateTime<Utc>, to: &DateTime<Utc>) -> Result<(), RegistryError> {
    if from > to {
        return Err(RegistryError::InvalidValue(format!(
            "'start' date {} cannot be greater than 'end' date {}",
            from, to
        )));
    }
    if *from < min_period_date() || *from > max_period_date() {
        return Err(RegistryError::InvalidValue(format!(
            "'start' date {} is out of bounds",
            from
        )));
    }
    if *to < min_period_date() || *to > max_period_date() {
        return Err(RegistryError::InvalidValue(format!(
            "'end' date {} is out of bounds",
            to
        )));
    }
    Ok(())
}

impl IdentityRegistry for Database {
    fn add_identity(
        &self,
        identity: &RawIdentity,
        canonical_id: Option<&CanonicalId>,
    ) -> Result<StoredIdentity, RegistryError> {
        let fingerprint = identity.fingerprint()?;

        self.transaction(|conn| {
            if queries::get_identity(conn, &fingerprint)?.is_some() {
                return Err(RegistryError::AlreadyExists {
                    entity: "identity".into(),
                    id: fingerprint.to_string(),
                });
            }

            let mk = match canonical_id {
                Some(id) => active_individual(conn, id)?.mk,
                None => {
                    let profile = Profile {
                        name: identity.name.clone().filter(|s| !s.is_empty()),
                        email: identity.email.clone().filter(|s| !s.is_empty()),
                        is_bot: false,
                    };
                    queries::insert_individual(conn, fingerprint.as_str(), &profile)?;
                    queries::insert_audit_log(conn, "individual_created", Some(fingerprint.as_str()), None)?;
                    fingerprint.to_string()
                }
            };

            queries::insert_identity(conn, &fingerprint, identity, &mk)?;
            queries::touch_individual(conn, &mk)?;
            queries::insert_audit_log(
                conn,
                "identity_added",
                Some(&mk),
                Some(&format!("{} ({})", fingerprint, identity.source)),
            )?;

            queries::get_identity(conn, &fingerprint)?
                .ok_or_else(|| not_found("identity", fingerprint.as_str()))
        })
    }

    fn find_identity(&self, fingerprint: &Fingerprint) -> Result<StoredIdentity, RegistryError> {
        queries::get_identity(&self.conn(), fingerprint)?
            .ok_or_else(|| not_found("identity", fingerprint.as_str()))
    }

    fn find_individual(&self, canonical_id: &CanonicalId) -> Result<Individual, RegistryError> {
        let conn = self.conn();
        let row = active_individual(&conn, canonical_id)?;
        Ok(queries::load_individual(&conn, &row)?)
    }

    fn add_organization(&self, name: &str) -> Result<Organization, RegistryError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RegistryError::InvalidValue(
                "organization name cannot be empty".into(),
            ));
        }

        self.transaction(|conn| {
            if queries::get_organization(conn, name)?.is_some() {
                return Err(RegistryError::AlreadyExists {
                    entity: "organization".into(),
                    id: name.to_string(),
                });
            }
            let org = queries::insert_organization(conn, name)?;
            queries::insert_audit_log(conn, "organization_added", None, Some(name))?;
            Ok(org)
        })
    }

    fn enroll(
        &self,
        canonical_id: &CanonicalId,
        organization: &str,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Enrollment, RegistryError> {
        validate_period(&from, &to)?;

        self.transaction(|conn| {
            let individual = active_individual(conn, canonical_id)?;
            let org = queries::get_organization(conn, organization.trim())?
                .ok_or_else(|| not_found("organization", organization))?;

            let row = absorb_period(conn, &individual.mk, org.id, &org.name, from, to)?.ok_or_else(|| {
                RegistryError::AlreadyExists {
                    entity: "enrollment".into(),
                    id: format!("{}@{} [{}, {}]", individual.mk, org.name, from, to),
                }
            })?;

            queries::touch_individual(conn, &individual.mk)?;
            queries::insert_audit_log(
                conn,
                "enrollment_added",
                Some(&individual.mk),
                Some(&format!(
                    "{} [{}, {}]",
                    org.name,
                    row.start.to_rfc3339_opts(SecondsFormat::AutoSi, true),
                    row.end.to_rfc3339_opts(SecondsFormat::AutoSi, true)
                )),
            )?;

            Ok(Enrollment {
                canonical_id: CanonicalId::new(individual.mk),
                organization: org.name,
                start: row.start,
                end: row.end,
            })
        })
    }

    fn merge(&self, from: &[CanonicalId], to: &CanonicalId) -> Result<Individual, RegistryError> {
        if from.is_empty() {
            return Err(RegistryError::InvalidValue(
                "at least one individual must be merged".into(),
            ));
        }
        if from.contains(to) {
            return Err(RegistryError::InvalidValue(format!(
                "'{}' cannot be both merge source and target",
                to
            )));
        }

        // Fixed ascending order, so concurrent merges touch rows in the same sequence.
        let mut sources: Vec<&CanonicalId> = from.iter().collect();
        sources.sort();
        sources.dedup();

        self.transaction(|conn| {
            let target = active_individual(conn, to)?;
            let mut target_profile = queries::get_profile(conn, &target.mk)?;

            for id in sources {
                let source = active_individual(conn, id)?;
                if source.mk == target.mk {
                    continue;
                }
                if source.is_locked {
                    return Err(RegistryError::Locked(source.mk));
                }

                let moved = queries::reassign_identities(conn, &source.mk, &target.mk)?;

                for enrollment in queries::list_enrollments(conn, &source.mk, None)? {
                    absorb_period(
                        conn,
                        &target.mk,
                        enrollment.organization_id,
                        &enrollment.organization,
                        enrollment.start,
                        enrollment.end,
                    )?;
                    queries::delete_enrollment(conn, enrollment.id)?;
                }

                let source_profile = queries::get_profile(conn, &source.mk)?;
                if target_profile.name.is_none() {
                    target_profile.name = source_profile.name;
                }
                if target_profile.email.is_none() {
                    target_profile.email = source_profile.email;
                }
                target_profile.is_bot |= source_profile.is_bot;

                queries::retire_individual(conn, &source.mk, &target.mk)?;
                queries::insert_audit_log(
                    conn,
                    "merge",
                    Some(&target.mk),
                    Some(&format!("merged {} ({} identities)", source.mk, moved)),
                )?;
                info!(from = %source.mk, to = %target.mk, moved, "merged individuals");
            }

            queries::update_profile(conn, &target.mk, &target_profile)?;
            queries::touch_individual(conn, &target.mk)?;

            let refreshed = queries::get_individual_row(conn, &target.mk)?
                .ok_or_else(|| not_found("individual", target.mk.as_str()))?;
            Ok(queries::load_individual(conn, &refreshed)?)
        })
    }
}

impl Database {
    /// Lock an individual against automatic merges.
    pub fn lock(&self, canonical_id: &CanonicalId) -> Result<Individual, RegistryError> {
        self.set_lock(canonical_id, true)
    }

    /// Remove the lock from an individual.
    pub fn unlock(&self, canonical_id: &CanonicalId) -> Result<Individual, RegistryError> {
        self.set_lock(canonical_id, false)
    }

    fn set_lock(&self, canonical_id: &CanonicalId, locked: bool) -> Result<Individual, RegistryError> {
        self.transaction(|conn| {
            let row = active_individual(conn, canonical_id)?;
            queries::set_locked(conn, &row.mk, locked)?;
            queries::insert_audit_log(
                conn,
                if locked { "lock" } else { "unlock" },
                Some(&row.mk),
                None,
            )?;
            let refreshed = queries::get_individual_row(conn, &row.mk)?
                .ok_or_else(|| not_found("individual", row.mk.as_str()))?;
            Ok(queries::load_individual(conn, &refreshed)?)
        })
    }
}
