//! Typed query helpers for every table in the idmerge database.
//!
//! Helpers take a `&Connection` so registry operations can compose several of
//! them inside one transaction.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::identity::Fingerprint;
use crate::models::{
    CanonicalId, Enrollment, Individual, Organization, Profile, RawIdentity, StoredIdentity,
};

/// Longest `merged_into` chain followed before giving up.
const MAX_MERGE_DEPTH: usize = 64;

// ---------------------------------------------------------------------------
// Domain structs returned by queries
// ---------------------------------------------------------------------------

/// A row from the `individuals` table.
#[derive(Debug, Clone)]
pub struct IndividualRow {
    pub mk: String,
    pub is_locked: bool,
    pub merged_into: Option<String>,
    pub created_at: String,
    pub last_modified: String,
}

/// A row from the `enrollments` table joined with its organization name.
#[derive(Debug, Clone)]
pub struct EnrollmentRow {
    pub id: i64,
    pub individual: String,
    pub organization_id: i64,
    pub organization: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl EnrollmentRow {
    pub fn to_model(&self) -> Enrollment {
        Enrollment {
            canonical_id: CanonicalId::new(self.individual.clone()),
            organization: self.organization.clone(),
            start: self.start,
            end: self.end,
        }
    }
}

/// A row from the `audit_log` table.
#[derive(Debug, Clone)]
pub struct AuditLogEntry {
    pub id: i64,
    pub action: String,
    pub canonical_id: Option<String>,
    pub details: Option<String>,
    pub created_at: String,
}

// ---------------------------------------------------------------------------
// Timestamps
// ---------------------------------------------------------------------------

/// Format a timestamp for storage.
///
/// Always nine fractional digits: lossless, and fixed width so text order is
/// time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Parse a stored timestamp.
pub fn parse_timestamp(column: &str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DatabaseError::CorruptValue {
            column: column.into(),
            value: value.into(),
        })
}

/// Row bookkeeping stamps only need whole seconds.
fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

// -- individuals ------------------------------------------------------------

/// Fetch the raw `individuals` row for `mk`, retired or not.
pub fn get_individual_row(conn: &Connection, mk: &str) -> Result<Option<IndividualRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT mk, is_locked, merged_into, created_at, last_modified
             FROM individuals WHERE mk = ?1",
            params![mk],
            |row| {
                Ok(IndividualRow {
                    mk: row.get(0)?,
                    is_locked: row.get::<_, i64>(1)? != 0,
                    merged_into: row.get(2)?,
                    created_at: row.get(3)?,
                    last_modified: row.get(4)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

/// Follow `merged_into` links from `mk` to the surviving individual.
///
/// Returns `None` when `mk` was never stored.
pub fn resolve_individual(conn: &Connection, mk: &str) -> Result<Option<IndividualRow>, DatabaseError> {
    let mut current = match get_individual_row(conn, mk)? {
        Some(row) => row,
        None => return Ok(None),
    };
    for _ in 0..MAX_MERGE_DEPTH {
        let next = match current.merged_into.as_deref() {
            Some(next) => next.to_string(),
            None => return Ok(Some(current)),
        };
        current = match get_individual_row(conn, &next)? {
            Some(row) => row,
            None => return Ok(None),
        };
    }
    Err(DatabaseError::CorruptValue {
        column: "individuals.merged_into".into(),
        value: mk.into(),
    })
}

/// Insert a new individual together with its profile.
pub fn insert_individual(conn: &Connection, mk: &str, profile: &Profile) -> Result<(), DatabaseError> {
    let now = now();
    conn.execute(
        "INSERT INTO individuals (mk, is_locked, merged_into, created_at, last_modified)
         VALUES (?1, 0, NULL, ?2, ?2)",
        params![mk, now],
    )?;
    conn.execute(
        "INSERT INTO profiles (mk, name, email, is_bot) VALUES (?1, ?2, ?3, ?4)",
        params![mk, profile.name, profile.email, profile.is_bot as i64],
    )?;
    debug!(mk, "inserted individual");
    Ok(())
}

/// Bump an individual's `last_modified`.
pub fn touch_individual(conn: &Connection, mk: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE individuals SET last_modified = ?1 WHERE mk = ?2",
        params![now(), mk],
    )?;
    Ok(())
}

/// Set the lock flag. Returns the number of rows changed.
pub fn set_locked(conn: &Connection, mk: &str, locked: bool) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE individuals SET is_locked = ?1, last_modified = ?2 WHERE mk = ?3",
        params![locked as i64, now(), mk],
    )?;
    Ok(changed)
}

/// Retire `from`: it now resolves to `to`.
pub fn retire_individual(conn: &Connection, from: &str, to: &str) -> Result<(), DatabaseError> {
    conn.execute(
        "UPDATE individuals SET merged_into = ?1, last_modified = ?2 WHERE mk = ?3",
        params![to, now(), from],
    )?;
    Ok(())
}

// -- profiles ---------------------------------------------------------------

pub fn get_profile(conn: &Connection, mk: &str) -> Result<Profile, DatabaseError> {
    let profile = conn
        .query_row(
            "SELECT name, email, is_bot FROM profiles WHERE mk = ?1",
            params![mk],
            |row| {
                Ok(Profile {
                    name: row.get(0)?,
                    email: row.get(1)?,
                    is_bot: row.get::<_, i64>(2)? != 0,
                })
            },
        )
        .optional()?;
    Ok(profile.unwrap_or_default())
}

pub fn update_profile(conn: &Connection, mk: &str, profile: &Profile) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO profiles (mk, name, email, is_bot) VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(mk) DO UPDATE SET
            name = excluded.name,
            email = excluded.email,
            is_bot = excluded.is_bot",
        params![mk, profile.name, profile.email, profile.is_bot as i64],
    )?;
    Ok(())
}

// -- identities -------------------------------------------------------------

type IdentityColumns = (
    String,
    String,
    Option<String>,
    Option<String>,
    Option<String>,
    String,
    String,
);

fn identity_from_columns(cols: IdentityColumns) -> Result<StoredIdentity, DatabaseError> {
    let (uuid, source, email, name, username, individual, last_modified) = cols;
    let fingerprint: Fingerprint = uuid.parse().map_err(|_| DatabaseError::CorruptValue {
        column: "identities.uuid".into(),
        value: uuid.clone(),
    })?;
    Ok(StoredIdentity {
        fingerprint,
        source,
        email,
        name,
        username,
        individual: CanonicalId::new(individual),
        last_modified: parse_timestamp("identities.last_modified", &last_modified)?,
    })
}

fn identity_columns(row: &rusqlite::Row<'_>) -> rusqlite::Result<IdentityColumns> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

pub fn get_identity(conn: &Connection, fingerprint: &Fingerprint) -> Result<Option<StoredIdentity>, DatabaseError> {
    let cols = conn
        .query_row(
            "SELECT uuid, source, email, name, username, individual, last_modified
             FROM identities WHERE uuid = ?1",
            params![fingerprint.as_str()],
            identity_columns,
        )
        .optional()?;
    cols.map(identity_from_columns).transpose()
}

pub fn insert_identity(
    conn: &Connection,
    fingerprint: &Fingerprint,
    identity: &RawIdentity,
    mk: &str,
) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO identities (uuid, source, email, name, username, individual, last_modified)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            fingerprint.as_str(),
            identity.source,
            identity.email,
            identity.name,
            identity.username,
            mk,
            now()
        ],
    )?;
    debug!(uuid = %fingerprint, mk, "inserted identity");
    Ok(())
}

pub fn list_identities(conn: &Connection, mk: &str) -> Result<Vec<StoredIdentity>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT uuid, source, email, name, username, individual, last_modified
         FROM identities WHERE individual = ?1 ORDER BY source, uuid",
    )?;
    let rows = stmt
        .query_map(params![mk], identity_columns)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(identity_from_columns).collect()
}

/// Move every identity owned by `from` to `to`. Returns the number moved.
pub fn reassign_identities(conn: &Connection, from: &str, to: &str) -> Result<usize, DatabaseError> {
    let moved = conn.execute(
        "UPDATE identities SET individual = ?1, last_modified = ?2 WHERE individual = ?3",
        params![to, now(), from],
    )?;
    Ok(moved)
}

// -- organizations ----------------------------------------------------------

pub fn get_organization(conn: &Connection, name: &str) -> Result<Option<Organization>, DatabaseError> {
    let org = conn
        .query_row(
            "SELECT id, name FROM organizations WHERE name = ?1",
            params![name],
            |row| {
                Ok(Organization {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        )
        .optional()?;
    Ok(org)
}

pub fn insert_organization(conn: &Connection, name: &str) -> Result<Organization, DatabaseError> {
    conn.execute(
        "INSERT INTO organizations (name, created_at) VALUES (?1, ?2)",
        params![name, now()],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, name, "inserted organization");
    Ok(Organization {
        id,
        name: name.to_string(),
    })
}

pub fn list_organizations(conn: &Connection) -> Result<Vec<Organization>, DatabaseError> {
    let mut stmt = conn.prepare("SELECT id, name FROM organizations ORDER BY name")?;
    let orgs = stmt
        .query_map([], |row| {
            Ok(Organization {
                id: row.get(0)?,
                name: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(orgs)
}

// -- enrollments ------------------------------------------------------------

/// List enrollments of `mk`, optionally restricted to one organization.
pub fn list_enrollments(
    conn: &Connection,
    mk: &str,
    organization_id: Option<i64>,
) -> Result<Vec<EnrollmentRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT e.id, e.individual, e.organization_id, o.name, e.start_date, e.end_date
         FROM enrollments e JOIN organizations o ON o.id = e.organization_id
         WHERE e.individual = ?1 AND (?2 IS NULL OR e.organization_id = ?2)
         ORDER BY e.start_date, o.name",
    )?;
    let rows = stmt
        .query_map(params![mk, organization_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, individual, organization_id, organization, start, end)| {
            Ok(EnrollmentRow {
                id,
                individual,
                organization_id,
                organization,
                start: parse_timestamp("enrollments.start_date", &start)?,
                end: parse_timestamp("enrollments.end_date", &end)?,
            })
        })
        .collect()
}

pub fn insert_enrollment(
    conn: &Connection,
    mk: &str,
    organization_id: i64,
    start: &DateTime<Utc>,
    end: &DateTime<Utc>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO enrollments (individual, organization_id, start_date, end_date)
         VALUES (?1, ?2, ?3, ?4)",
        params![mk, organization_id, format_timestamp(start), format_timestamp(end)],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, mk, organization_id, "inserted enrollment");
    Ok(id)
}

pub fn delete_enrollment(conn: &Connection, id: i64) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM enrollments WHERE id = ?1", params![id])?;
    Ok(())
}

// -- composite --------------------------------------------------------------

/// Load a full individual (profile, identities, enrollments) by its own
/// canonical id, without following merges.
pub fn load_individual(conn: &Connection, row: &IndividualRow) -> Result<Individual, DatabaseError> {
    let enrollments = list_enrollments(conn, &row.mk, None)?
        .iter()
        .map(EnrollmentRow::to_model)
        .collect();
    Ok(Individual {
        canonical_id: CanonicalId::new(row.mk.clone()),
        is_locked: row.is_locked,
        profile: get_profile(conn, &row.mk)?,
        identities: list_identities(conn, &row.mk)?,
        enrollments,
        created_at: parse_timestamp("individuals.created_at", &row.created_at)?,
        last_modified: parse_timestamp("individuals.last_modified", &row.last_modified)?,
    })
}

// -- audit_log --------------------------------------------------------------

/// Insert an audit-log entry.
pub fn insert_audit_log(
    conn: &Connection,
    action: &str,
    canonical_id: Option<&str>,
    details: Option<&str>,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (action, canonical_id, details, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![action, canonical_id, details, now()],
    )?;
    let id = conn.last_insert_rowid();
    debug!(id, action, "inserted audit_log entry");
    Ok(id)
}

// ---------------------------------------------------------------------------
// Database-level convenience wrappers
// ---------------------------------------------------------------------------

impl Database {
    /// List recent audit-log entries, newest first.
    pub fn list_audit_log(&self, limit: u32) -> Result<Vec<AuditLogEntry>, DatabaseError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT id, action, canonical_id, details, created_at
             FROM audit_log ORDER BY id DESC LIMIT ?1",
        )?;
        let entries = stmt
            .query_map(params![limit], |row| {
                Ok(AuditLogEntry {
                    id: row.get(0)?,
                    action: row.get(1)?,
                    canonical_id: row.get(2)?,
                    details: row.get(3)?,
                    created_at: row.get(4)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    /// Count audit-log entries, optionally for one action.
    pub fn count_audit_log(&self, action: Option<&str>) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM audit_log WHERE ?1 IS NULL OR action = ?1",
            params![action],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of active (not retired) individuals.
    pub fn count_individuals(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM individuals WHERE merged_into IS NULL",
            [],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    /// Number of stored identities.
    pub fn count_identities(&self) -> Result<i64, DatabaseError> {
        let conn = self.conn();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM identities", [], |row| row.get(0))?;
        Ok(count)
    }

    /// All organizations, by name.
    pub fn organizations(&self) -> Result<Vec<Organization>, DatabaseError> {
        list_organizations(&self.conn())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn setup_db() -> Database {
        let db = Database::in_memory().unwrap();
        db.initialize().unwrap();
        db
    }

    fn fp(username: &str) -> Fingerprint {
        Fingerprint::generate("scm", None, None, Some(username)).unwrap()
    }

    #[test]
    fn test_timestamp_format_roundtrip() {
        let ts = Utc.with_ymd_and_hms(1900, 1, 1, 0, 0, 0).unwrap();
        let text = format_timestamp(&ts);
        assert_eq!(text, "1900-01-01T00:00:00.000000000Z");
        assert_eq!(parse_timestamp("t", &text).unwrap(), ts);
        assert!(parse_timestamp("t", "yesterday").is_err());
    }

    #[test]
    fn test_timestamp_keeps_subseconds_and_order() {
        let whole = Utc.with_ymd_and_hms(2005, 1, 1, 0, 0, 0).unwrap();
        let half = whole + chrono::Duration::milliseconds(500);

        let text = format_timestamp(&half);
        assert_eq!(text, "2005-01-01T00:00:00.500000000Z");
        assert_eq!(parse_timestamp("t", &text).unwrap(), half);
        assert_eq!(text.len(), format_timestamp(&whole).len());
        assert!(format_timestamp(&whole) < text);
    }

    #[test]
    fn test_individual_and_identity_crud() {
        let db = setup_db();
        let conn = db.conn();
        let id = fp("jsmith");
        let raw = RawIdentity::new("scm", None, None, Some("jsmith"));

        insert_individual(&conn, id.as_str(), &Profile::default()).unwrap();
        insert_identity(&conn, &id, &raw, id.as_str()).unwrap();

        let stored = get_identity(&conn, &id).unwrap().unwrap();
        assert_eq!(stored.individual.as_str(), id.as_str());
        assert_eq!(stored.username.as_deref(), Some("jsmith"));

        let row = get_individual_row(&conn, id.as_str()).unwrap().unwrap();
        let individual = load_individual(&conn, &row).unwrap();
        assert_eq!(individual.identities.len(), 1);
        assert!(!individual.is_locked);
    }

    #[test]
    fn test_resolve_follows_merge_chain() {
        let db = setup_db();
        let conn = db.conn();
        for mk in ["a", "b", "c"] {
            insert_individual(&conn, mk, &Profile::default()).unwrap();
        }
        retire_individual(&conn, "a", "b").unwrap();
        retire_individual(&conn, "b", "c").unwrap();

        assert_eq!(resolve_individual(&conn, "a").unwrap().unwrap().mk, "c");
        assert_eq!(resolve_individual(&conn, "c").unwrap().unwrap().mk, "c");
        assert!(resolve_individual(&conn, "zzz").unwrap().is_none());
    }

    #[test]
    fn test_organization_names_are_case_insensitive() {
        let db = setup_db();
        let conn = db.conn();
        insert_organization(&conn, "Example").unwrap();
        assert!(get_organization(&conn, "EXAMPLE").unwrap().is_some());
        assert!(insert_organization(&conn, "example").is_err());
    }

    #[test]
    fn test_enrollment_crud() {
        let db = setup_db();
        let conn = db.conn();
        insert_individual(&conn, "a", &Profile::default()).unwrap();
        let org = insert_organization(&conn, "Example").unwrap();
        let start = Utc.with_ymd_and_hms(2010, 1, 1, 0, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2012, 1, 1, 0, 0, 0).unwrap();

        let id = insert_enrollment(&conn, "a", org.id, &start, &end).unwrap();
        let rows = list_enrollments(&conn, "a", Some(org.id)).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].organization, "Example");
        assert_eq!(rows[0].start, start);

        delete_enrollment(&conn, id).unwrap();
        assert!(list_enrollments(&conn, "a", None).unwrap().is_empty());
    }

    #[test]
    fn test_audit_log() {
        let db = setup_db();
        insert_audit_log(&db.conn(), "lock", Some("abc"), Some("manual")).unwrap();
        let entries = db.list_audit_log(10).unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].canonical_id.as_deref(), Some("abc"));
        assert_eq!(db.count_audit_log(None).unwrap(), 1);
        assert_eq!(db.count_audit_log(Some("merge")).unwrap(), 0);
    }
}
