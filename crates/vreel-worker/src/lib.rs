//! Highlight pipeline worker.
//!
//! This crate provides:
//! - Candidate segmentation from frame metric streams
//! - Quality ranking and classification
//! - Quality-first highlight assembly on the global timeline
//! - A checkpointed controller with resume, single-stage runs and cancellation

pub mod assembler;
pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod ranker;
pub mod segmenter;
pub mod state;

pub use assembler::{assemble, Assembly, AssemblyParams};
pub use config::PipelineConfig;
pub use controller::{validate_checkpoint, PipelineController, RunReport};
pub use error::{PipelineError, PipelineResult};
pub use logging::StageLogger;
pub use ranker::{rank_segments, RankerParams, Ranking};
pub use segmenter::Segmenter;
pub use state::{PipelineState, RunMode};
