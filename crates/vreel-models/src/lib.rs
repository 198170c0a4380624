//! Shared data models for the VReel highlight pipeline.
//!
//! This crate provides Serde-serializable types for:
//! - Source recordings and their global-timeline placement
//! - Candidate segments, classification tags and manual edits
//! - Frame metric streams and quality weights
//! - Stage identifiers and versioned checkpoint records

pub mod checkpoint;
pub mod metric;
pub mod segment;
pub mod source;
pub mod stage;
pub mod timestamp;

// Re-export common types
pub use checkpoint::{
    checkpoint_schema, AssembledPayload, Checkpoint, RankedPayload, SegmentedPayload, StagePayload,
    CHECKPOINT_FORMAT_VERSION, SELECTION_ALGORITHM,
};
pub use metric::{
    clamp_score, default_score_weights, is_valid_score, round_one_decimal, MetricKind,
    MetricSample, MetricStream, MetricWeight, MAX_SCORE, MIN_SCORE,
};
pub use segment::{
    ClassificationTag, Segment, SegmentEdit, SegmentId, MAX_SEGMENT_SECS, MIN_SEGMENT_SECS,
};
pub use source::{SkippedSource, Source, SourceId};
pub use stage::{CheckpointStatus, SegmenterParams, ShortFragmentPolicy, Stage, TailPolicy};
