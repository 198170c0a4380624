//! Structured stage logging utilities.
//!
//! Provides consistent, structured logging for pipeline stages with
//! tracing spans and contextual information.

use tracing::{error, info, warn, Span};
use vreel_models::Stage;

/// Stage logger for structured logging with consistent formatting.
///
/// Every event carries the run ID and the stage being executed.
#[derive(Debug, Clone)]
pub struct StageLogger {
    run_id: String,
    stage: Stage,
}

impl StageLogger {
    /// Create a new logger for one stage of a run.
    pub fn new(run_id: &str, stage: Stage) -> Self {
        Self {
            run_id: run_id.to_string(),
            stage,
        }
    }

    /// Log the start of the stage.
    pub fn log_start(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            stage = self.stage.number(),
            stage_name = self.stage.as_str(),
            "Stage started: {}", message
        );
    }

    /// Log a progress update during the stage.
    pub fn log_progress(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            stage = self.stage.number(),
            stage_name = self.stage.as_str(),
            "Stage progress: {}", message
        );
    }

    /// Log a warning during the stage.
    pub fn log_warning(&self, message: &str) {
        warn!(
            run_id = %self.run_id,
            stage = self.stage.number(),
            stage_name = self.stage.as_str(),
            "Stage warning: {}", message
        );
    }

    /// Log an error during the stage.
    pub fn log_error(&self, message: &str) {
        error!(
            run_id = %self.run_id,
            stage = self.stage.number(),
            stage_name = self.stage.as_str(),
            "Stage error: {}", message
        );
    }

    /// Log the completion of the stage.
    pub fn log_completion(&self, message: &str) {
        info!(
            run_id = %self.run_id,
            stage = self.stage.number(),
            stage_name = self.stage.as_str(),
            "Stage completed: {}", message
        );
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    /// Create a tracing span for this stage.
    pub fn create_span(&self) -> Span {
        tracing::info_span!(
            "stage",
            run_id = %self.run_id,
            stage = self.stage.number(),
            stage_name = self.stage.as_str()
        )
    }
}
