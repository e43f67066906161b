//! SQLite storage for the identity registry.
//!
//! [`Database`] owns the connection; [`schema`] migrates it, [`queries`] holds
//! per-table helpers and [`registry`] implements
//! [`IdentityRegistry`](crate::registry::IdentityRegistry) on top of them.

pub mod queries;
pub mod registry;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, TransactionBehavior};
use tracing::{debug, info, warn};

use crate::errors::DatabaseError;

/// How long a writer waits on a locked registry before failing.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Handle to one registry database.
///
/// Registry operations serialize on the inner connection; concurrent importers
/// in other processes are kept apart by SQLite's write lock.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open (or create) the registry at `path`, creating missing parent
    /// directories.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, DatabaseError> {
        let path = path.as_ref();
        info!(path = %path.display(), "opening registry database");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        Self::configure(conn)
    }

    /// Open a private in-memory registry.
    pub fn in_memory() -> Result<Self, DatabaseError> {
        Self::configure(Connection::open_in_memory()?)
    }

    fn configure(conn: Connection) -> Result<Self, DatabaseError> {
        // Identities, profiles and enrollments all reference individuals.
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Bring the schema up to date.
    pub fn initialize(&self) -> Result<(), DatabaseError> {
        let conn = self.conn();
        schema::run_migrations(&conn)?;
        debug!("registry schema is up to date");
        Ok(())
    }

    /// Lock the connection. A poisoned lock is recovered: every write runs in
    /// a transaction, so a panicking holder leaves nothing half-applied.
    pub fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            warn!("registry connection mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Run `f` in an immediate transaction, committing on `Ok` and rolling
    /// back on `Err`.
    ///
    /// The write lock is taken before `f` runs, so a lookup followed by an
    /// insert inside `f` cannot race another importer.
    pub fn transaction<F, T, E>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Connection) -> Result<T, E>,
        E: From<rusqlite::Error>,
    {
        let mut conn = self.conn();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let result = f(&tx)?;
        tx.commit()?;
        Ok(result)
    }
}
