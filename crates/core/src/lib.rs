//! idmerge core library.
//!
//! Identity fingerprinting, the SQLite-backed identity registry, candidate
//! reconciliation, enrollment loading and the import driver that ties them
//! together.

pub mod config;
pub mod connector;
pub mod db;
pub mod errors;
pub mod identity;
pub mod import;
pub mod models;
pub mod registry;

// Re-exports for convenience.
pub use config::AppConfig;
pub use connector::IdentitiesConnector;
pub use db::Database;
pub use identity::{canonicalize, fingerprint, unaccent, Fingerprint};
pub use import::{ImportEvent, ImportReport, Importer};
pub use models::{CandidateIndividual, CanonicalId, EnrollmentClaim, RawIdentity};
pub use registry::IdentityRegistry;
