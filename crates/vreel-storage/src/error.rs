//! Storage error types.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// A malformed or out-of-range checkpoint field.
///
/// `location` names where the field lives: `checkpoint`, `payload`,
/// `segment <id>`, `source <id>` or `metric stream <id>`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid checkpoint field `{field}` at {location}: {reason}")]
pub struct ValidationError {
    pub field: String,
    pub location: String,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            location: location.into(),
            reason: reason.into(),
        }
    }

    /// Error located on a segment.
    pub fn segment(field: impl Into<String>, segment_id: &str, reason: impl Into<String>) -> Self {
        Self::new(field, format!("segment {}", segment_id), reason)
    }

    /// Error located on a source record.
    pub fn source(field: impl Into<String>, source_id: &str, reason: impl Into<String>) -> Self {
        Self::new(field, format!("source {}", source_id), reason)
    }
}

/// Errors that can occur during checkpoint storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Checkpoint not found: {0}")]
    NotFound(PathBuf),

    #[error("Segment not found: {0}")]
    SegmentNotFound(String),

    #[error("Checkpoint directory is locked by another run ({path}): {holder}")]
    Locked { path: PathBuf, holder: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StorageError {
    pub fn not_found(path: impl Into<PathBuf>) -> Self {
        Self::NotFound(path.into())
    }

    pub fn validation(field: impl Into<String>, location: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation(ValidationError::new(field, location, reason))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::NotFound(_))
    }

    pub fn as_validation(&self) -> Option<&ValidationError> {
        match self {
            StorageError::Validation(e) => Some(e),
            _ => None,
        }
    }
}
