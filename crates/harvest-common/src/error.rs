//! Error types for mbz-harvest

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for harvest operations
pub type Result<T> = std::result::Result<T, HarvestError>;

/// Main error type for the harvest pipeline
#[derive(Error, Debug)]
pub enum HarvestError {
    /// The input path does not exist or is not a `.mbz` archive.
    /// Fatal: aborts the whole run.
    #[error("invalid archive: {path} ({reason})")]
    InvalidArchive { path: PathBuf, reason: String },

    /// The extracted archive has no forum activity directory.
    /// Fatal for the archive it was raised on.
    #[error("no forum activity found under {0}")]
    ForumNotFound(PathBuf),

    /// The catalog lookup for a dataset slug failed (transport error,
    /// non-success status, or `success: false` body). Recovered by
    /// discarding the in-flight post.
    #[error("catalog enrichment failed for '{slug}': {reason}")]
    EnrichmentFailed { slug: String, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("XML error: {0}")]
    Xml(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("CSV error: {0}")]
    Csv(String),
}

impl HarvestError {
    pub fn invalid_archive(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::InvalidArchive {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn enrichment_failed(slug: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::EnrichmentFailed {
            slug: slug.into(),
            reason: reason.into(),
        }
    }
}
