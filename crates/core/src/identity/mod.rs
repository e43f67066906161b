//! Identity keys: text canonicalization and deterministic fingerprints.
//!
//! Two raw identities denote the same stored identity exactly when their
//! fingerprints are equal.

pub mod canonical;
pub mod fingerprint;

pub use canonical::{canonicalize, unaccent};
pub use fingerprint::{fingerprint, Fingerprint, FINGERPRINT_LEN};
