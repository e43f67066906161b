//! Connectors produce candidate individuals for an import.
//!
//! The built-in backends read a file holding an `individuals` array:
//!
//! ```toml
//! [[individuals]]
//! identities = [
//!     { source = "scm", email = "jsmith@example.com", username = "jsmith" },
//!     { source = "mls", email = "john.smith@example.com", name = "John Smith" },
//! ]
//! enrollments = [
//!     { organization = "Example", start = "2010-01-01T00:00:00Z", end = "2015-06-30T00:00:00Z" },
//!     { organization = "Bitergia" },
//! ]
//! ```
//!
//! Enrollment bounds are RFC 3339 strings; omitted bounds cover the whole
//! valid period.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::ConnectorError;
use crate::models::CandidateIndividual;

/// Backend names accepted by [`from_name`].
pub const BACKENDS: &[&str] = &["json", "toml"];

/// A source of candidate individuals.
pub trait IdentitiesConnector {
    /// Backend name, used in logs.
    fn name(&self) -> &str;

    /// Fetch every candidate individual the source holds, in source order.
    fn get_individuals(&self) -> Result<Vec<CandidateIndividual>, ConnectorError>;
}

/// On-disk document shared by the file backends.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndividualsFile {
    #[serde(default)]
    pub individuals: Vec<CandidateIndividual>,
}

/// Reads candidates from a JSON file.
#[derive(Debug, Clone)]
pub struct JsonFileConnector {
    path: PathBuf,
}

impl JsonFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentitiesConnector for JsonFileConnector {
    fn name(&self) -> &str {
        "json"
    }

    fn get_individuals(&self) -> Result<Vec<CandidateIndividual>, ConnectorError> {
        let contents = read_input(&self.path)?;
        let data: IndividualsFile =
            serde_json::from_str(&contents).map_err(|e| parse_error(&self.path, e))?;
        debug!(count = data.individuals.len(), "parsed individuals");
        Ok(data.individuals)
    }
}

/// Reads candidates from a TOML file.
#[derive(Debug, Clone)]
pub struct TomlFileConnector {
    path: PathBuf,
}

impl TomlFileConnector {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl IdentitiesConnector for TomlFileConnector {
    fn name(&self) -> &str {
        "toml"
    }

    fn get_individuals(&self) -> Result<Vec<CandidateIndividual>, ConnectorError> {
        let contents = read_input(&self.path)?;
        let data: IndividualsFile =
            toml::from_str(&contents).map_err(|e| parse_error(&self.path, e))?;
        debug!(count = data.individuals.len(), "parsed individuals");
        Ok(data.individuals)
    }
}

/// Build the connector registered under `name`, reading from `path`.
pub fn from_name(
    name: &str,
    path: impl Into<PathBuf>,
) -> Result<Box<dyn IdentitiesConnector>, ConnectorError> {
    match name.to_ascii_lowercase().as_str() {
        "json" => Ok(Box::new(JsonFileConnector::new(path))),
        "toml" => Ok(Box::new(TomlFileConnector::new(path))),
        _ => Err(ConnectorError::UnknownBackend(name.to_string())),
    }
}

fn read_input(path: &Path) -> Result<String, ConnectorError> {
    info!(path = %path.display(), "reading individuals");
    if !path.exists() {
        return Err(ConnectorError::FileNotFound(path.display().to_string()));
    }
    Ok(std::fs::read_to_string(path)?)
}

fn parse_error(path: &Path, err: impl std::fmt::Display) -> ConnectorError {
    ConnectorError::ParseError {
        path: path.display().to_string(),
        detail: err.to_string(),
    }
}
