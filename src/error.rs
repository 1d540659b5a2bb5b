// src/error.rs

//! Error types for the image packaging client
//!
//! Expected domain outcomes (ambiguous patterns, non-leaf removals, partial
//! network failures, index damage) are distinct variants so callers can react
//! to each one; only I/O and database faults fall through the ambient ones.

use crate::repository::AuthorityFailures;
use std::path::PathBuf;
use thiserror::Error;

/// Hint attached to every search-index failure that a rebuild repairs
pub const REBUILD_INDEX_HINT: &str = "Please rebuild the index with 'pkg rebuild-index'.";

/// Hint attached to index permission failures
pub const PERMISSIONS_HINT: &str =
    "Failure of consistent use of privileges when running pkg commands is often a source of this problem.";

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // ------------------------------------------------------------------
    // Format / validation
    // ------------------------------------------------------------------
    #[error("Invalid package FMRI '{0}'")]
    InvalidFmri(String),

    #[error("Invalid version '{version}': {reason}")]
    InvalidVersion { version: String, reason: String },

    #[error("Invalid package pattern '{0}'")]
    InvalidPattern(String),

    #[error("Authority prefix '{0}' is invalid")]
    InvalidPrefix(String),

    #[error("Authority URL '{0}' is invalid")]
    InvalidUrl(String),

    #[error("Authority '{0}' does not exist; an origin URL is required to create it")]
    MissingOrigin(String),

    // ------------------------------------------------------------------
    // Authorities
    // ------------------------------------------------------------------
    #[error("No such authority: {0}")]
    UnknownAuthority(String),

    #[error("Removal of preferred authority '{0}' is not allowed")]
    PreferredAuthority(String),

    // ------------------------------------------------------------------
    // Resolution
    // ------------------------------------------------------------------
    #[error("No packages matching: {}", .0.join(", "))]
    PatternsNotFound(Vec<String>),

    #[error("'{pattern}' matches multiple packages: {}", .matches.join(", "))]
    AmbiguousMatch { pattern: String, matches: Vec<String> },

    #[error("'{0}' matches no installed packages")]
    NotInstalled(String),

    // ------------------------------------------------------------------
    // Aggregate network failures
    // ------------------------------------------------------------------
    #[error("{0}")]
    CatalogRefresh(AuthorityFailures),

    #[error("Some servers failed to respond: {0}")]
    SearchFailed(AuthorityFailures),

    #[error("Maximum number of timeouts exceeded during download ({0})")]
    TransferTimedOut(usize),

    // ------------------------------------------------------------------
    // Dependency consistency
    // ------------------------------------------------------------------
    #[error("Cannot remove '{package}' due to the following packages that depend on it: {}", .dependents.join(", "))]
    NonLeaf {
        package: String,
        dependents: Vec<String>,
    },

    #[error("No version of '{package}' satisfies: {}", .constraints.join("; "))]
    Unsatisfiable {
        package: String,
        constraints: Vec<String>,
    },

    // ------------------------------------------------------------------
    // Search index
    // ------------------------------------------------------------------
    #[error("Search index not found at {0}")]
    NoIndex(PathBuf),

    #[error("The search index appears corrupted: {0}")]
    InconsistentIndex(String),

    #[error("Result of partial indexing found. Could not make {0} because it already exists")]
    PartialIndexing(PathBuf),

    #[error("Insufficient permissions to write the search index at {0}")]
    IndexPermission(PathBuf),

    // ------------------------------------------------------------------
    // Plan execution
    // ------------------------------------------------------------------
    #[error("Action '{action}' of {package} failed: {reason}")]
    Execution {
        package: String,
        action: String,
        reason: String,
    },

    #[error("Operation cancelled during {0}")]
    Cancelled(String),

    #[error("Image plan is {found}, expected {expected}")]
    InvalidPlanState {
        expected: &'static str,
        found: &'static str,
    },

    // ------------------------------------------------------------------
    // Ambient
    // ------------------------------------------------------------------
    #[error("Catalog for authority '{authority}' is corrupt: {reason}")]
    CatalogCorrupt { authority: String, reason: String },

    #[error("'{0}' is not an install image")]
    ImageNotFound(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Download error: {0}")]
    DownloadError(String),

    #[error("Checksum mismatch for {path}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    #[error("Transaction error: {0}")]
    TransactionError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// True for the search-index failures that never roll back package state
    pub fn is_index_error(&self) -> bool {
        matches!(
            self,
            Error::NoIndex(_)
                | Error::InconsistentIndex(_)
                | Error::PartialIndexing(_)
                | Error::IndexPermission(_)
        )
    }

    /// Remediation text for failures the user can fix directly
    pub fn remediation(&self) -> Option<&'static str> {
        match self {
            Error::NoIndex(_) | Error::InconsistentIndex(_) | Error::PartialIndexing(_) => {
                Some(REBUILD_INDEX_HINT)
            }
            Error::IndexPermission(_) => Some(PERMISSIONS_HINT),
            _ => None,
        }
    }

    /// Map a filesystem error raised while writing the index
    pub(crate) fn from_index_io(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        if err.kind() == std::io::ErrorKind::PermissionDenied {
            Error::IndexPermission(path.into())
        } else {
            Error::Io(err)
        }
    }
}
