//! Deterministic identity fingerprints.
//!
//! A fingerprint is the SHA-1 hex digest of
//! `source:email:name:username`, lower-cased, with `name` unaccented first.
//! It is persisted as the identity key, so the recipe must never change.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};

use super::canonical::canonicalize;
use crate::errors::IdentityError;

/// Length of a hex-encoded fingerprint (160-bit digest).
pub const FINGERPRINT_LEN: usize = 40;

/// Stable identifier of a `(source, email, name, username)` tuple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fingerprint(String);

impl Fingerprint {
    /// Generate the fingerprint for an identity.
    ///
    /// Equal tuples modulo letter case, and modulo accents in `name`, yield
    /// the same fingerprint.
    ///
    /// # Errors
    ///
    /// [`IdentityError::InvalidInput`] when `source` is empty or absent, or
    /// when `email`, `name` and `username` are all empty or absent.
    pub fn generate(
        source: &str,
        email: Option<&str>,
        name: Option<&str>,
        username: Option<&str>,
    ) -> Result<Self, IdentityError> {
        if source.is_empty() {
            return Err(IdentityError::InvalidInput(
                "'source' cannot be an empty string".into(),
            ));
        }
        if [email, name, username]
            .into_iter()
            .all(|v| v.map_or(true, str::is_empty))
        {
            return Err(IdentityError::InvalidInput(
                "identity data cannot be empty".into(),
            ));
        }

        let joined = [
            source.to_string(),
            email.unwrap_or_default().to_string(),
            canonicalize(name),
            username.unwrap_or_default().to_string(),
        ]
        .join(":")
        .to_lowercase();

        let digest = Sha1::digest(joined.as_bytes());
        Ok(Self(hex::encode(digest)))
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Free-function form of [`Fingerprint::generate`].
pub fn fingerprint(
    source: &str,
    email: Option<&str>,
    name: Option<&str>,
    username: Option<&str>,
) -> Result<Fingerprint, IdentityError> {
    Fingerprint::generate(source, email, name, username)
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Fingerprint {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        if normalized.len() != FINGERPRINT_LEN
            || !normalized.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(IdentityError::InvalidInput(format!(
                "'{}' is not a {}-character hex fingerprint",
                s, FINGERPRINT_LEN
            )));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Fingerprint {
    type Error = IdentityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Fingerprint> for String {
    fn from(fp: Fingerprint) -> Self {
        fp.0
    }
}
