//! End-to-end import tests.
//!
//! These tests drive the real `Importer` with:
//! - Candidate files read through the JSON and TOML connectors
//! - Real SQLite databases on disk (via `tempfile`)
//!
//! No network I/O.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{TimeZone, Utc};
use serde_json::json;
use tempfile::TempDir;

use idmerge_core::connector::{self, JsonFileConnector};
use idmerge_core::db::Database;
use idmerge_core::import::{ImportEvent, Importer};
use idmerge_core::models::{max_period_date, min_period_date, CandidateIndividual, CanonicalId};
use idmerge_core::{fingerprint, IdentityRegistry, RawIdentity};

// ===========================================================================
// Helpers
// ===========================================================================

struct Env {
    dir: TempDir,
    db: Database,
}

impl Env {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("data").join("idmerge.db")).unwrap();
        db.initialize().unwrap();
        Env { dir, db }
    }

    fn write_json(&self, name: &str, value: serde_json::Value) -> PathBuf {
        let path = self.dir.path().join(name);
        std::fs::write(&path, serde_json::to_string_pretty(&value).unwrap()).unwrap();
        path
    }

    fn import_file(&self, path: &Path) -> idmerge_core::ImportReport {
        Importer::new(&self.db)
            .import_identities(&JsonFileConnector::new(path))
            .unwrap()
    }

    /// Register an identity outside of any import, returning its owner.
    fn seed(&self, source: &str, email: &str, username: &str) -> CanonicalId {
        self.db
            .add_identity(&RawIdentity::new(source, Some(email), None, Some(username)), None)
            .unwrap()
            .individual
    }

    fn owner_of(&self, source: &str, email: &str, username: &str) -> CanonicalId {
        let fp = fingerprint(source, Some(email), None, Some(username)).unwrap();
        let stored = self.db.find_identity(&fp).unwrap();
        self.db.find_individual(&stored.individual).unwrap().canonical_id
    }

    /// Current owners of the given `(source, email, username)` identities.
    fn owners(&self, identities: &[(&str, &str, &str)]) -> BTreeSet<CanonicalId> {
        identities
            .iter()
            .map(|(source, email, username)| self.owner_of(source, email, username))
            .collect()
    }
}

fn identity(source: &str, email: &str, username: &str) -> serde_json::Value {
    json!({ "source": source, "email": email, "username": username })
}

// ===========================================================================
// Fingerprints
// ===========================================================================

#[test]
fn test_fingerprint_is_stable_and_case_accent_insensitive() {
    let a = fingerprint("scm", Some("jsmith@example.com"), Some("John Smith"), Some("jsmith")).unwrap();
    let b = fingerprint("scm", Some("JSMITH@EXAMPLE.COM"), Some("Jöhn Smith"), Some("JSMITH")).unwrap();
    assert_eq!(a, b);
    assert_eq!(a.as_str(), "a9b403e150dd4af8953a52a4bb841051e4b705d9");
}

// ===========================================================================
// Idempotency
// ===========================================================================

#[test]
fn test_import_twice_creates_nothing_the_second_time() {
    let env = Env::new();
    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [
            { "identities": [
                identity("scm", "jsmith@example.com", "jsmith"),
                identity("mls", "jsmith@example.com", "jsmith"),
            ]},
            { "identities": [
                identity("scm", "jdoe@example.com", "jdoe"),
                // Same fingerprint as the first identity: not distinct.
                identity("scm", "JDOE@example.com", "JDoe"),
            ]},
        ]}),
    );
    let imported = [
        ("scm", "jsmith@example.com", "jsmith"),
        ("mls", "jsmith@example.com", "jsmith"),
        ("scm", "jdoe@example.com", "jdoe"),
    ];

    let first = env.import_file(&path);
    assert_eq!(first.total_created, 3);
    let after_first = env.owners(&imported);
    assert_eq!(after_first.len(), 2);

    let second = env.import_file(&path);
    assert_eq!(second.total_created, 0);
    assert_eq!(second.merges(), 0);
    assert_eq!(env.owners(&imported), after_first);
    assert_eq!(env.db.count_individuals().unwrap(), 2);
    assert_eq!(env.db.count_identities().unwrap(), 3);
}

// ===========================================================================
// Merge survivor and lock protection
// ===========================================================================

#[test]
fn test_pre_existing_individual_survives_merge() {
    let env = Env::new();
    let y = env.seed("scm", "jsmith@example.com", "jsmith");

    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [
            { "identities": [identity("mls", "john@example.com", "john")] },
            { "identities": [
                identity("mls", "john@example.com", "john"),
                identity("scm", "jsmith@example.com", "jsmith"),
            ]},
        ]}),
    );
    let report = env.import_file(&path);
    let x = env.owner_of("mls", "john@example.com", "john");

    assert_eq!(x, y);
    assert_eq!(report.merges(), 1);
    assert_eq!(env.db.count_individuals().unwrap(), 1);

    let survivor = env.db.find_individual(&y).unwrap();
    assert_eq!(survivor.canonical_id, y);
    assert_eq!(survivor.identities.len(), 2);
}

#[test]
fn test_locked_individual_is_not_merged() {
    let env = Env::new();
    let y = env.seed("scm", "jsmith@example.com", "jsmith");
    env.db.lock(&y).unwrap();

    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [
            { "identities": [identity("mls", "john@example.com", "john")] },
            { "identities": [
                identity("mls", "john@example.com", "john"),
                identity("scm", "jsmith@example.com", "jsmith"),
            ]},
        ]}),
    );
    let report = env.import_file(&path);
    let x = env.owner_of("mls", "john@example.com", "john");

    assert_ne!(x, y);
    assert_eq!(report.merges(), 0);
    assert_eq!(report.refused_merges(), 1);
    assert_eq!(env.db.count_individuals().unwrap(), 2);

    let x = env.db.find_individual(&x).unwrap();
    assert!(!x.is_locked);
    assert_eq!(x.identities.len(), 1);
    assert_eq!(env.db.find_individual(&y).unwrap().identities.len(), 1);
}

/// Candidate B lists the identity of the pre-existing individual first, so
/// that individual becomes the working one and is merged into the owner of
/// the second identity.
fn stored_identity_first(env: &Env) -> PathBuf {
    env.write_json(
        "individuals.json",
        json!({ "individuals": [
            { "identities": [identity("mls", "john@example.com", "john")] },
            { "identities": [
                identity("scm", "jsmith@example.com", "jsmith"),
                identity("mls", "john@example.com", "john"),
            ]},
        ]}),
    )
}

#[test]
fn test_stored_identity_first_merges_into_later_owner() {
    let env = Env::new();
    let y = env.seed("scm", "jsmith@example.com", "jsmith");

    let report = env.import_file(&stored_identity_first(&env));
    let x = env.owner_of("mls", "john@example.com", "john");

    assert_ne!(x, y);
    assert_eq!(report.merges(), 1);
    assert_eq!(report.refused_merges(), 0);
    assert!(report.events.iter().any(|e| matches!(
        e,
        ImportEvent::MergePerformed { from, into } if *from == y && *into == x
    )));

    // The retired id resolves to the survivor.
    let resolved = env.db.find_individual(&y).unwrap();
    assert_eq!(resolved.canonical_id, x);
    assert_eq!(resolved.identities.len(), 2);
    assert_eq!(env.owner_of("scm", "jsmith@example.com", "jsmith"), x);
    assert_eq!(env.db.count_individuals().unwrap(), 1);
}

#[test]
fn test_stored_identity_first_locked_is_not_merged_away() {
    let env = Env::new();
    let y = env.seed("scm", "jsmith@example.com", "jsmith");
    env.db.lock(&y).unwrap();

    let report = env.import_file(&stored_identity_first(&env));
    let x = env.owner_of("mls", "john@example.com", "john");

    assert_ne!(x, y);
    assert_eq!(report.merges(), 0);
    assert_eq!(report.refused_merges(), 1);
    assert_eq!(env.db.count_individuals().unwrap(), 2);

    let y_now = env.db.find_individual(&y).unwrap();
    assert_eq!(y_now.canonical_id, y);
    assert!(y_now.is_locked);
    assert_eq!(y_now.identities.len(), 1);

    let x_now = env.db.find_individual(&x).unwrap();
    assert!(!x_now.is_locked);
    assert_eq!(x_now.identities.len(), 1);
}

// ===========================================================================
// Enrollments
// ===========================================================================

#[test]
fn test_enrollment_periods_are_clamped() {
    let env = Env::new();
    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [{
            "identities": [identity("scm", "jsmith@example.com", "jsmith")],
            "enrollments": [
                { "organization": "Example", "start": "1800-01-01T00:00:00Z", "end": "2005-01-01T00:00:00Z" },
                { "organization": "Bitergia", "start": "2010-01-01T00:00:00Z", "end": "2300-01-01T00:00:00Z" },
            ],
        }]}),
    );
    let report = env.import_file(&path);
    assert_eq!(report.enrollments_applied, 2);

    let id = env.owner_of("scm", "jsmith@example.com", "jsmith");
    let enrollments = env.db.find_individual(&id).unwrap().enrollments;
    let example = enrollments.iter().find(|e| e.organization == "Example").unwrap();
    let bitergia = enrollments.iter().find(|e| e.organization == "Bitergia").unwrap();

    assert_eq!(example.start, min_period_date());
    assert_eq!(example.end, Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(bitergia.start, Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap());
    assert_eq!(bitergia.end, max_period_date());
}

#[test]
fn test_repeated_enrollments_are_tolerated() {
    let env = Env::new();
    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [{
            "identities": [identity("scm", "jsmith@example.com", "jsmith")],
            "enrollments": [
                { "organization": "Example", "start": "2000-01-01T00:00:00Z", "end": "2005-01-01T00:00:00Z" },
                { "organization": "Example", "start": "2000-01-01T00:00:00Z", "end": "2005-01-01T00:00:00Z" },
            ],
        }]}),
    );

    let first = env.import_file(&path);
    assert!(first.failures.is_empty());
    assert_eq!(first.enrollments_applied, 1);

    let second = env.import_file(&path);
    assert!(second.failures.is_empty());
    assert_eq!(second.enrollments_applied, 0);

    let id = env.owner_of("scm", "jsmith@example.com", "jsmith");
    assert_eq!(env.db.find_individual(&id).unwrap().enrollments.len(), 1);
}

#[test]
fn test_subsecond_enrollment_reimport_is_duplicate() {
    let env = Env::new();
    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [{
            "identities": [identity("scm", "jsmith@example.com", "jsmith")],
            "enrollments": [
                { "organization": "Example", "start": "2000-01-01T00:00:00.500Z", "end": "2005-01-01T00:00:00.500Z" },
            ],
        }]}),
    );

    let first = env.import_file(&path);
    assert_eq!(first.enrollments_applied, 1);

    let second = env.import_file(&path);
    assert_eq!(second.enrollments_applied, 0);
    assert!(second
        .events
        .iter()
        .any(|e| matches!(e, ImportEvent::EnrollmentDuplicate { .. })));

    let id = env.owner_of("scm", "jsmith@example.com", "jsmith");
    let stored = &env.db.find_individual(&id).unwrap().enrollments[0];
    let half = chrono::Duration::milliseconds(500);
    assert_eq!(stored.start, Utc.with_ymd_and_hms(2000, 1, 1, 0, 0, 0).unwrap() + half);
    assert_eq!(stored.end, Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap() + half);
    assert_eq!(env.db.count_audit_log(Some("enrollment_added")).unwrap(), 1);
}

// ===========================================================================
// Resilience
// ===========================================================================

#[test]
fn test_invalid_identity_does_not_spoil_candidate() {
    let env = Env::new();
    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [{
            "identities": [
                { "source": "", "email": "broken@example.com" },
                identity("scm", "jsmith@example.com", "jsmith"),
            ],
            "enrollments": [{ "organization": "Example" }],
        }]}),
    );
    let report = env.import_file(&path);

    assert_eq!(report.total_created, 1);
    assert_eq!(report.skipped_identities(), 1);
    let id = env.owner_of("scm", "jsmith@example.com", "jsmith");
    assert_eq!(env.db.find_individual(&id).unwrap().enrollments.len(), 1);
}

#[test]
fn test_rejected_enrollment_does_not_abort_batch() {
    let env = Env::new();
    let path = env.write_json(
        "individuals.json",
        json!({ "individuals": [
            {
                "identities": [identity("scm", "jsmith@example.com", "jsmith")],
                "enrollments": [
                    { "organization": "Example", "start": "2010-01-01T00:00:00Z", "end": "2000-01-01T00:00:00Z" },
                ],
            },
            {
                "identities": [identity("scm", "jdoe@example.com", "jdoe")],
                "enrollments": [{ "organization": "Example" }],
            },
        ]}),
    );
    let report = env.import_file(&path);

    assert_eq!(report.candidates, 2);
    assert_eq!(report.total_created, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.enrollments_applied, 1);
    assert!(report
        .events
        .iter()
        .any(|e| matches!(e, ImportEvent::EnrollmentFailed { organization, .. } if organization == "Example")));
}

// ===========================================================================
// Connectors and persistence
// ===========================================================================

#[test]
fn test_toml_backend_and_reopened_database() {
    let env = Env::new();
    let path = env.dir.path().join("individuals.toml");
    std::fs::write(
        &path,
        r#"
[[individuals]]
identities = [
    { source = "scm", email = "jsmith@example.com", username = "jsmith" },
    { source = "mls", email = "jsmith@example.com", name = "John Smith" },
]
enrollments = [{ organization = "Example", start = "2010-01-01T00:00:00Z" }]
"#,
    )
    .unwrap();

    let backend = connector::from_name("toml", &path).unwrap();
    let report = Importer::new(&env.db).import_identities(backend.as_ref()).unwrap();
    assert_eq!(report.total_created, 2);

    let db_path = env.dir.path().join("data").join("idmerge.db");
    drop(env.db);
    let reopened = Database::new(&db_path).unwrap();
    reopened.initialize().unwrap();

    let fp = fingerprint("scm", Some("jsmith@example.com"), None, Some("jsmith")).unwrap();
    let stored = reopened.find_identity(&fp).unwrap();
    let individual = reopened.find_individual(&stored.individual).unwrap();
    assert_eq!(individual.identities.len(), 2);
    assert_eq!(individual.enrollments.len(), 1);
    assert_eq!(individual.enrollments[0].end, max_period_date());
    assert!(reopened.count_audit_log(Some("enrollment_added")).unwrap() >= 1);
}

#[test]
fn test_report_serializes_to_json() {
    let env = Env::new();
    let report = Importer::new(&env.db)
        .load(vec![CandidateIndividual {
            identities: vec![RawIdentity::new("scm", Some("jsmith@example.com"), None, None)],
            enrollments: vec![],
        }])
        .unwrap();

    let value = serde_json::to_value(&report).unwrap();
    assert_eq!(value["total_created"], 1);
    assert_eq!(value["events"][0]["event"], "identity_created");
}
