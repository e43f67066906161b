//! Import driver: reconciles candidate individuals and applies their
//! enrollments, one candidate at a time and in input order.
//!
//! Per candidate:
//!
//! 1. Reconcile its identities into a canonical id ([`reconciler`]).
//! 2. If it resolved to an individual, apply its enrollment claims
//!    ([`enrollments`]).
//!
//! A candidate whose enrollments are rejected is recorded in the report and
//! the batch moves on. Storage failures abort the batch.

pub mod enrollments;
pub mod events;
pub mod reconciler;

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use tracing::{info, warn};

use crate::connector::IdentitiesConnector;
use crate::errors::{ImportError, LoadError};
use crate::models::CandidateIndividual;
use crate::registry::IdentityRegistry;

pub use enrollments::apply_enrollments;
pub use events::{CandidateFailure, ImportEvent, ImportReport};
pub use reconciler::{reconcile, step, ReconcileState, Reconciliation};

/// Drives imports against one registry.
///
/// Only one import runs at a time per `Importer`; fingerprint creation has to
/// observe the effects of every earlier candidate.
pub struct Importer<'a, R: IdentityRegistry + ?Sized> {
    registry: &'a R,
    running: AtomicBool,
}

impl<'a, R: IdentityRegistry + ?Sized> Importer<'a, R> {
    pub fn new(registry: &'a R) -> Self {
        Self {
            registry,
            running: AtomicBool::new(false),
        }
    }

    /// Fetch candidates from `connector` and load them.
    pub fn import_identities(
        &self,
        connector: &dyn IdentitiesConnector,
    ) -> Result<ImportReport, ImportError> {
        info!(backend = connector.name(), "fetching individuals");
        let individuals = connector.get_individuals()?;
        self.load(individuals)
    }

    /// Load `candidates` into the registry and report what happened.
    ///
    /// `total_created` counts identities created; identities that were
    /// already stored and enrollments are not included.
    pub fn load<I>(&self, candidates: I) -> Result<ImportReport, ImportError>
    where
        I: IntoIterator<Item = CandidateIndividual>,
    {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(ImportError::AlreadyRunning);
        }
        let _guard = RunningGuard(&self.running);

        self.load_all(candidates)
    }

    /// Check if an import is currently running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn load_all<I>(&self, candidates: I) -> Result<ImportReport, ImportError>
    where
        I: IntoIterator<Item = CandidateIndividual>,
    {
        let mut report = ImportReport::new();
        info!(job_id = %report.job_id, "loading individuals");

        for (index, candidate) in candidates.into_iter().enumerate() {
            report.candidates += 1;

            let reconciliation = reconcile(self.registry, &candidate)?;
            report.total_created += reconciliation.created;
            for event in reconciliation.events {
                report.record(event);
            }

            let canonical_id = match reconciliation.canonical_id {
                Some(id) => id,
                None => {
                    warn!(index, "no valid identities, skipping enrollments");
                    continue;
                }
            };

            let mut events = Vec::new();
            let outcome = apply_enrollments(
                self.registry,
                &canonical_id,
                &candidate.enrollments,
                &mut events,
            );
            for event in events {
                report.record(event);
            }

            match outcome {
                Ok(applied) => report.enrollments_applied += applied,
                Err(LoadError::Rejected {
                    organization,
                    cause,
                    ..
                }) => {
                    report.record(ImportEvent::EnrollmentFailed {
                        canonical_id: canonical_id.clone(),
                        organization: organization.clone(),
                        cause: cause.clone(),
                    });
                    report.failures.push(CandidateFailure {
                        index,
                        canonical_id,
                        cause: format!("{}: {}", organization, cause),
                    });
                }
                Err(LoadError::Registry(err)) => return Err(err.into()),
            }
        }

        report.completed_at = Some(Utc::now());
        info!(
            job_id = %report.job_id,
            candidates = report.candidates,
            created = report.total_created,
            failures = report.failures.len(),
            "individuals loaded"
        );
        Ok(report)
    }
}

/// Clears the `running` flag on drop, including on panic.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Load `candidates` into `registry`, returning the number of identities
/// created.
pub fn import_all<R, I>(registry: &R, candidates: I) -> Result<usize, ImportError>
where
    R: IdentityRegistry + ?Sized,
    I: IntoIterator<Item = CandidateIndividual>,
{
    Ok(Importer::new(registry).load(candidates)?.total_created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    use crate::db::Database;
    use crate::models::{EnrollmentClaim, RawIdentity};

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn candidate(usernames: &[&str], enrollments: Vec<EnrollmentClaim>) -> CandidateIndividual {
        CandidateIndividual {
            identities: usernames
                .iter()
                .map(|u| RawIdentity::new("scm", Some(&format!("{}@example.com", u)), None, Some(u)))
                .collect(),
            enrollments,
        }
    }

    #[test]
    fn test_load_counts_created_identities() {
        let db = setup_db();
        let report = Importer::new(&db)
            .load(vec![candidate(&["a", "b"], vec![]), candidate(&["c"], vec![])])
            .unwrap();
        assert_eq!(report.candidates, 2);
        assert_eq!(report.total_created, 3);
        assert_eq!(db.count_individuals().unwrap(), 2);
        assert!(report.completed_at.is_some());
    }

    #[test]
    fn test_rejected_enrollment_does_not_stop_batch() {
        let db = setup_db();
        let bad = EnrollmentClaim::new(
            "Example",
            Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap(),
        );
        let report = Importer::new(&db)
            .load(vec![
                candidate(&["a"], vec![bad]),
                candidate(&["b"], vec![EnrollmentClaim::unbounded("Example")]),
            ])
            .unwrap();

        assert_eq!(report.total_created, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].index, 0);
        assert_eq!(report.enrollments_applied, 1);
        assert!(report
            .events
            .iter()
            .any(|e| matches!(e, ImportEvent::EnrollmentFailed { .. })));
    }

    #[test]
    fn test_candidate_without_valid_identities_skips_enrollments() {
        let db = setup_db();
        let report = Importer::new(&db)
            .load(vec![CandidateIndividual {
                identities: vec![RawIdentity::new("", Some("x@example.com"), None, None)],
                enrollments: vec![EnrollmentClaim::unbounded("Example")],
            }])
            .unwrap();
        assert_eq!(report.total_created, 0);
        assert_eq!(report.skipped_identities(), 1);
        assert!(db.organizations().unwrap().is_empty());
    }

    #[test]
    fn test_running_flag_is_cleared() {
        let db = setup_db();
        let importer = Importer::new(&db);
        importer.load(vec![candidate(&["a"], vec![])]).unwrap();
        assert!(!importer.is_running());
        importer.load(vec![candidate(&["a"], vec![])]).unwrap();
    }

    #[test]
    fn test_import_all_returns_total() {
        let db = setup_db();
        let batch = vec![candidate(&["a", "b"], vec![])];
        assert_eq!(import_all(&db, batch.clone()).unwrap(), 2);
        assert_eq!(import_all(&db, batch).unwrap(), 0);
    }
}
