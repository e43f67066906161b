//! Error types for the idmerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.

use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Import(#[from] ImportError),
}

// ---------------------------------------------------------------------------
// Identity errors
// ---------------------------------------------------------------------------

/// Errors raised while validating identity attributes or building a
/// fingerprint from them.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentityError {
    /// The identity attributes cannot produce a fingerprint.
    #[error("invalid identity input: {0}")]
    InvalidInput(String),
}

// ---------------------------------------------------------------------------
// Registry errors
// ---------------------------------------------------------------------------

/// Errors returned by an [`IdentityRegistry`](crate::registry::IdentityRegistry).
///
/// `AlreadyExists` is a steady-state condition during imports, not a failure:
/// the reconciler uses it to detect fingerprints owned by another individual.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The entity is already stored. For identities `id` is the fingerprint.
    #[error("{entity} '{id}' already exists")]
    AlreadyExists { entity: String, id: String },

    /// A value failed validation.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// The entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// The individual is locked and cannot be merged away.
    #[error("individual {0} is locked")]
    Locked(String),

    /// Storage failure.
    #[error(transparent)]
    Database(#[from] DatabaseError),
}

impl From<rusqlite::Error> for RegistryError {
    fn from(err: rusqlite::Error) -> Self {
        RegistryError::Database(DatabaseError::SqliteError(err))
    }
}

impl From<IdentityError> for RegistryError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::InvalidInput(detail) => RegistryError::InvalidValue(detail),
        }
    }
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite persistence layer.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A stored value could not be decoded.
    #[error("corrupt {column} value '{value}'")]
    CorruptValue { column: String, value: String },

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Load errors
// ---------------------------------------------------------------------------

/// Errors raised while applying enrollment claims for a resolved individual.
#[derive(Debug, Error)]
pub enum LoadError {
    /// The registry rejected an enrollment. Aborts the remaining claims of
    /// the current candidate only.
    #[error("cannot enroll {canonical_id} in '{organization}': {cause}")]
    Rejected {
        canonical_id: String,
        organization: String,
        cause: String,
    },

    /// Storage failure while enrolling. Aborts the whole batch.
    #[error("enrollment storage error: {0}")]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// Import errors
// ---------------------------------------------------------------------------

/// Errors that abort an import batch.
#[derive(Debug, Error)]
pub enum ImportError {
    /// Another import is in progress on the same importer.
    #[error("an import is already running")]
    AlreadyRunning,

    /// Storage failure; the batch stops at the failing candidate.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The connector could not produce candidates.
    #[error(transparent)]
    Connector(#[from] ConnectorError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Connector errors
// ---------------------------------------------------------------------------

/// Errors from connectors producing candidate individuals.
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// No connector is registered under the requested name.
    #[error("unknown connector backend '{0}'")]
    UnknownBackend(String),

    /// The input file does not exist.
    #[error("connector input not found: {0}")]
    FileNotFound(String),

    /// The input could not be parsed into candidate individuals.
    #[error("connector parse error in '{path}': {detail}")]
    ParseError { path: String, detail: String },

    /// Generic I/O error.
    #[error("connector I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = RegistryError::AlreadyExists {
            entity: "identity".into(),
            id: "abc".into(),
        };
        assert_eq!(err.to_string(), "identity 'abc' already exists");

        let err = RegistryError::Locked("0123".into());
        assert_eq!(err.to_string(), "individual 0123 is locked");

        let err = LoadError::Rejected {
            canonical_id: "0123".into(),
            organization: "Example".into(),
            cause: "period is inverted".into(),
        };
        assert!(err.to_string().contains("Example"));

        let err = ConnectorError::UnknownBackend("ldap".into());
        assert!(err.to_string().contains("ldap"));
    }

    #[test]
    fn test_identity_error_becomes_invalid_value() {
        let err: RegistryError = IdentityError::InvalidInput("source is empty".into()).into();
        assert!(matches!(err, RegistryError::InvalidValue(ref d) if d == "source is empty"));
    }

    #[test]
    fn test_core_error_from_subsystem() {
        let err: CoreError = ConfigError::FileNotFound("x.toml".into()).into();
        assert!(matches!(err, CoreError::Config(_)));

        let err: CoreError = LoadError::Registry(RegistryError::InvalidValue("x".into())).into();
        assert!(matches!(err, CoreError::Load(_)));

        let err: CoreError = ImportError::AlreadyRunning.into();
        assert_eq!(err.to_string(), "an import is already running");
    }
}
