//! Database schema definitions and migration runner.
//!
//! Migrations are simple SQL strings applied in order. The `schema_version`
//! user-version pragma tracks which migrations have already been applied.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order. Each entry is `(version, description, sql)`.
/// Versions start at 1. The current schema version is stored in the SQLite
/// `user_version` pragma.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "registry schema",
        r#"
        CREATE TABLE IF NOT EXISTS individuals (
            mk              TEXT PRIMARY KEY,
            is_locked       INTEGER NOT NULL DEFAULT 0,
            merged_into     TEXT REFERENCES individuals (mk),
            created_at      TEXT NOT NULL,
            last_modified   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_individuals_merged_into ON individuals (merged_into);

        CREATE TABLE IF NOT EXISTS profiles (
            mk      TEXT PRIMARY KEY REFERENCES individuals (mk),
            name    TEXT,
            email   TEXT,
            is_bot  INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE IF NOT EXISTS identities (
            uuid            TEXT PRIMARY KEY,
            source          TEXT NOT NULL,
            email           TEXT,
            name            TEXT,
            username        TEXT,
            individual      TEXT NOT NULL REFERENCES individuals (mk),
            last_modified   TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_identities_individual ON identities (individual);

        CREATE TABLE IF NOT EXISTS organizations (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT NOT NULL UNIQUE COLLATE NOCASE,
            created_at  TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS enrollments (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            individual      TEXT    NOT NULL REFERENCES individuals (mk),
            organization_id INTEGER NOT NULL REFERENCES organizations (id),
            start_date      TEXT    NOT NULL,
            end_date        TEXT    NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_enrollments_individual ON enrollments (individual, organization_id);
        "#,
    ),
    (
        2,
        "audit log",
        r#"
        CREATE TABLE IF NOT EXISTS audit_log (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            action          TEXT NOT NULL,
            canonical_id    TEXT,
            details         TEXT,
            created_at      TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_audit_log_created_at ON audit_log (created_at);
        CREATE INDEX IF NOT EXISTS idx_audit_log_action ON audit_log (action);
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied successfully");
        }
    }

    Ok(())
}

/// Read the current schema version from the SQLite `user_version` pragma.
fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

/// Set the schema version via the SQLite `user_version` pragma.
fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}
