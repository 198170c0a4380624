//! Pipeline error types.

use thiserror::Error;

use vreel_media::MediaError;
use vreel_models::Stage;
use vreel_storage::{StorageError, ValidationError};

pub type PipelineResult<T> = Result<T, PipelineError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Checkpoint validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("Unreadable source {source_id}: {reason}")]
    Input { source_id: String, reason: String },

    #[error(
        "No segment reaches the quality threshold {threshold:.1} \
         ({eligible} of {total} eligible, best quality {best_quality:?})"
    )]
    InsufficientContent {
        threshold: f64,
        total: usize,
        eligible: usize,
        best_quality: Option<f64>,
    },

    #[error("Extraction failed for {source_id}: {reason}")]
    ExtractionFailure { source_id: String, reason: String },

    #[error("Resource exhausted while processing {source_id}: {reason}")]
    ResourceExhaustion { source_id: String, reason: String },

    #[error("Stage {stage} needs a checkpoint from stage {required}, none found")]
    CheckpointMissing { stage: Stage, required: Stage },

    #[error("Checkpoint sources do not match this run: {0}")]
    SourceMismatch(String),

    #[error("Another run holds the checkpoint directory: {0}")]
    RunLocked(String),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PipelineError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn source_mismatch(msg: impl Into<String>) -> Self {
        Self::SourceMismatch(msg.into())
    }

    /// Classify a media error raised while handling one source.
    pub fn from_media(source_id: &str, err: MediaError) -> Self {
        let source_id = source_id.to_string();
        if err.is_input_error() {
            Self::Input {
                source_id,
                reason: err.to_string(),
            }
        } else {
            Self::ExtractionFailure {
                source_id,
                reason: err.to_string(),
            }
        }
    }

    /// Errors that only cost the affected source, not the run.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Input { .. })
    }

    /// Errors after which the controller keeps the stage's partial output.
    pub fn preserves_partial(&self) -> bool {
        matches!(
            self,
            PipelineError::ExtractionFailure { .. } | PipelineError::ResourceExhaustion { .. }
        )
    }

    /// Short label used for logs and run-outcome metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::Validation(_) => "validation",
            PipelineError::Input { .. } => "input",
            PipelineError::InsufficientContent { .. } => "insufficient_content",
            PipelineError::ExtractionFailure { .. } => "extraction_failure",
            PipelineError::ResourceExhaustion { .. } => "resource_exhaustion",
            PipelineError::CheckpointMissing { .. } => "checkpoint_missing",
            PipelineError::SourceMismatch(_) => "source_mismatch",
            PipelineError::RunLocked(_) => "run_locked",
            PipelineError::Cancelled => "cancelled",
            PipelineError::Config(_) => "config",
            PipelineError::Storage(_) => "storage",
            PipelineError::Io(_) => "io",
        }
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::Validation(e) => PipelineError::Validation(e),
            StorageError::Locked { path, holder } => {
                PipelineError::RunLocked(format!("{} ({})", path.display(), holder))
            }
            other => PipelineError::Storage(other),
        }
    }
}
