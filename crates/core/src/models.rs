//! Domain model types used throughout idmerge.
//!
//! Input types (`RawIdentity`, `CandidateIndividual`, `EnrollmentClaim`) are
//! produced by connectors; stored types (`StoredIdentity`, `Individual`,
//! `Organization`, `Enrollment`) are returned by the registry.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::Fingerprint;

// ---------------------------------------------------------------------------
// Period bounds
// ---------------------------------------------------------------------------

/// 1900-01-01T00:00:00Z as a Unix timestamp.
const MIN_PERIOD_TIMESTAMP: i64 = -2_208_988_800;

/// 2100-01-01T00:00:00Z as a Unix timestamp.
const MAX_PERIOD_TIMESTAMP: i64 = 4_102_444_800;

/// Earliest date an enrollment period may start.
pub fn min_period_date() -> DateTime<Utc> {
    DateTime::from_timestamp(MIN_PERIOD_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Latest date an enrollment period may end.
pub fn max_period_date() -> DateTime<Utc> {
    DateTime::from_timestamp(MAX_PERIOD_TIMESTAMP, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// Canonical id
// ---------------------------------------------------------------------------

/// Canonical id ("master key") of an individual.
///
/// Assigned from the fingerprint of the individual's first identity and kept
/// stable for as long as the individual survives merges.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CanonicalId(String);

impl CanonicalId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<Fingerprint> for CanonicalId {
    fn from(fp: Fingerprint) -> Self {
        Self(fp.into())
    }
}

impl From<&Fingerprint> for CanonicalId {
    fn from(fp: &Fingerprint) -> Self {
        Self(fp.as_str().to_string())
    }
}

impl fmt::Display for CanonicalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Connector input
// ---------------------------------------------------------------------------

/// One data source's view of a person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawIdentity {
    pub source: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl RawIdentity {
    pub fn new(
        source: impl Into<String>,
        email: Option<&str>,
        name: Option<&str>,
        username: Option<&str>,
    ) -> Self {
        Self {
            source: source.into(),
            email: email.map(str::to_string),
            name: name.map(str::to_string),
            username: username.map(str::to_string),
        }
    }

    /// Fingerprint of this identity's attributes.
    pub fn fingerprint(&self) -> Result<Fingerprint, crate::errors::IdentityError> {
        Fingerprint::generate(
            &self.source,
            self.email.as_deref(),
            self.name.as_deref(),
            self.username.as_deref(),
        )
    }
}

/// Affiliation claim awaiting a resolved individual.
///
/// Missing bounds default to the global period bounds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrollmentClaim {
    pub organization: String,
    #[serde(default = "min_period_date")]
    pub start: DateTime<Utc>,
    #[serde(default = "max_period_date")]
    pub end: DateTime<Utc>,
}

impl EnrollmentClaim {
    pub fn new(organization: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            organization: organization.into(),
            start,
            end,
        }
    }

    /// Claim covering the whole valid period.
    pub fn unbounded(organization: impl Into<String>) -> Self {
        Self::new(organization, min_period_date(), max_period_date())
    }
}

/// Input unit: identities the source asserts belong to one person, plus
/// that person's affiliations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateIndividual {
    #[serde(default)]
    pub identities: Vec<RawIdentity>,
    #[serde(default)]
    pub enrollments: Vec<EnrollmentClaim>,
}

// ---------------------------------------------------------------------------
// Stored entities
// ---------------------------------------------------------------------------

/// A raw identity persisted under its fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredIdentity {
    pub fingerprint: Fingerprint,
    pub source: String,
    pub email: Option<String>,
    pub name: Option<String>,
    pub username: Option<String>,
    /// Canonical id of the owning individual.
    pub individual: CanonicalId,
    pub last_modified: DateTime<Utc>,
}

/// Profile data attached to an individual.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub name: Option<String>,
    pub email: Option<String>,
    pub is_bot: bool,
}

/// A consolidated real-world person.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Individual {
    pub canonical_id: CanonicalId,
    pub is_locked: bool,
    pub profile: Profile,
    pub identities: Vec<StoredIdentity>,
    pub enrollments: Vec<Enrollment>,
    pub created_at: DateTime<Utc>,
    pub last_modified: DateTime<Utc>,
}

/// An organization individuals can be enrolled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Organization {
    pub id: i64,
    pub name: String,
}

/// A stored affiliation of an individual with an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrollment {
    pub canonical_id: CanonicalId,
    pub organization: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}
