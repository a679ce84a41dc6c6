//! Error taxonomy for the graph recorder and the version engines.
//!
//! Parse and match failures are always surfaced as errors. None of the
//! version APIs ever turn unparsable input into a negative match.

use std::path::PathBuf;

use thiserror::Error;

use crate::models::Ecosystem;

/// A component could not be constructed from its natural-key fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentityError {
    #[error("property {field} of component type {ecosystem} is required")]
    MissingField {
        ecosystem: Ecosystem,
        field: &'static str,
    },

    #[error("property {field} of component type {ecosystem} must not contain whitespace: {value:?}")]
    InvalidField {
        ecosystem: Ecosystem,
        field: &'static str,
        value: String,
    },
}

/// A version or a version constraint violates its ecosystem grammar.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VersionError {
    #[error("{input:?} is not a valid version: {reason}")]
    MalformedVersion { input: String, reason: String },

    #[error("the version specification {input:?} is not valid: {reason}")]
    MalformedSpecifier { input: String, reason: String },
}

impl VersionError {
    pub(crate) fn version(input: &str, reason: impl Into<String>) -> Self {
        VersionError::MalformedVersion {
            input: input.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn specifier(input: &str, reason: impl Into<String>) -> Self {
        VersionError::MalformedSpecifier {
            input: input.to_string(),
            reason: reason.into(),
        }
    }
}

/// Structural problems found while sealing a per-file graph.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GraphError {
    #[error("{location}: {child_id:?} references parent {parent_id:?}, which was never registered")]
    UnknownParentReference {
        location: String,
        parent_id: String,
        child_id: String,
    },
}

/// Failure of a single manifest; the scan logs it and moves on.
#[derive(Error, Debug)]
pub enum ScanError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse {path}: {details}")]
    Parse { path: PathBuf, details: String },

    #[error(transparent)]
    Identity(#[from] IdentityError),

    #[error(transparent)]
    Version(#[from] VersionError),

    #[error(transparent)]
    Graph(#[from] GraphError),
}

impl ScanError {
    pub(crate) fn parse(path: &std::path::Path, details: impl std::fmt::Display) -> Self {
        ScanError::Parse {
            path: path.to_path_buf(),
            details: details.to_string(),
        }
    }
}

/// Read a manifest into memory, attaching the path to any I/O failure.
pub(crate) fn read_manifest(path: &std::path::Path) -> Result<String, ScanError> {
    std::fs::read_to_string(path).map_err(|source| ScanError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_the_offending_input() {
        let err = VersionError::version("notvalid", "expected a release number");
        assert_eq!(
            err.to_string(),
            "\"notvalid\" is not a valid version: expected a release number"
        );

        let err = IdentityError::MissingField {
            ecosystem: Ecosystem::Pip,
            field: "version",
        };
        assert_eq!(
            err.to_string(),
            "property version of component type Pip is required"
        );
    }
}
