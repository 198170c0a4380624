//! Checkpoint models.
//!
//! One checkpoint file is written per stage. The envelope is shared; the
//! payload carries the stage-specific parameters and the segment list.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::metric::{MetricStream, MetricWeight};
use crate::segment::Segment;
use crate::source::{SkippedSource, Source, SourceId};
use crate::stage::{CheckpointStatus, SegmenterParams, Stage};

/// Version of the checkpoint file layout.
pub const CHECKPOINT_FORMAT_VERSION: u32 = 1;

/// Identifier of the selection algorithm recorded by the Assembler.
pub const SELECTION_ALGORITHM: &str = "greedy_quality_variety";

/// A persisted snapshot of one stage's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Checkpoint {
    pub format_version: u32,
    /// Version of the pipeline that wrote the checkpoint
    pub pipeline_version: String,
    pub stage: Stage,
    #[serde(default)]
    pub status: CheckpointStatus,
    pub created_at: DateTime<Utc>,
    /// Wall time spent producing this output (seconds)
    pub stage_duration_secs: f64,
    /// Identifiers of every source the run was asked to process
    pub source_ids: BTreeSet<SourceId>,
    /// Validated source records
    pub sources: Vec<Source>,
    pub payload: StagePayload,
}

impl Checkpoint {
    /// Create a complete checkpoint stamped with the current time.
    pub fn new(
        stage: Stage,
        source_ids: BTreeSet<SourceId>,
        sources: Vec<Source>,
        payload: StagePayload,
    ) -> Self {
        Self {
            format_version: CHECKPOINT_FORMAT_VERSION,
            pipeline_version: env!("CARGO_PKG_VERSION").to_string(),
            stage,
            status: CheckpointStatus::Complete,
            created_at: Utc::now(),
            stage_duration_secs: 0.0,
            source_ids,
            sources,
            payload,
        }
    }

    pub fn with_duration(mut self, secs: f64) -> Self {
        self.stage_duration_secs = secs;
        self
    }

    pub fn partial(mut self) -> Self {
        self.status = CheckpointStatus::Partial;
        self
    }

    pub fn is_partial(&self) -> bool {
        self.status == CheckpointStatus::Partial
    }

    pub fn segments(&self) -> &[Segment] {
        self.payload.segments()
    }

    pub fn segments_mut(&mut self) -> &mut Vec<Segment> {
        self.payload.segments_mut()
    }

    pub fn source(&self, id: &SourceId) -> Option<&Source> {
        self.sources.iter().find(|s| &s.id == id)
    }
}

/// Stage-specific content of a checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StagePayload {
    Segmented(SegmentedPayload),
    Ranked(RankedPayload),
    Assembled(AssembledPayload),
}

impl StagePayload {
    /// Stage this payload belongs to.
    pub fn stage(&self) -> Stage {
        match self {
            StagePayload::Segmented(_) => Stage::Segmentation,
            StagePayload::Ranked(_) => Stage::Ranking,
            StagePayload::Assembled(_) => Stage::Assembly,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            StagePayload::Segmented(_) => "segmented",
            StagePayload::Ranked(_) => "ranked",
            StagePayload::Assembled(_) => "assembled",
        }
    }

    pub fn segments(&self) -> &[Segment] {
        match self {
            StagePayload::Segmented(p) => &p.segments,
            StagePayload::Ranked(p) => &p.segments,
            StagePayload::Assembled(p) => &p.segments,
        }
    }

    pub fn segments_mut(&mut self) -> &mut Vec<Segment> {
        match self {
            StagePayload::Segmented(p) => &mut p.segments,
            StagePayload::Ranked(p) => &mut p.segments,
            StagePayload::Assembled(p) => &mut p.segments,
        }
    }
}

/// Stage 1 output: timing-only segments plus the metric streams they were cut from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentedPayload {
    pub sample_interval_secs: f64,
    pub segmenter: SegmenterParams,
    pub metric_streams: Vec<MetricStream>,
    #[serde(default)]
    pub skipped_sources: Vec<SkippedSource>,
    pub total_segments: usize,
    pub segments: Vec<Segment>,
}

/// Stage 2 output: scored and tagged segments.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RankedPayload {
    pub min_quality_threshold: f64,
    pub score_weights: Vec<MetricWeight>,
    pub eligible_count: usize,
    /// Metric streams carried over from stage 1 so ranking can be repeated
    #[serde(default)]
    pub metric_streams: Vec<MetricStream>,
    pub segments: Vec<Segment>,
}

/// Stage 3 output: the selected segments in global chronological order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct AssembledPayload {
    pub target_duration: f64,
    pub actual_duration: f64,
    pub selection_algorithm: String,
    pub min_spacing_secs: f64,
    /// Temporal distribution of the selection (0..1)
    pub variety_score: f64,
    /// Set when eligible content was shorter than the target
    #[serde(default)]
    pub target_shortfall: bool,
    pub segments: Vec<Segment>,
}

/// JSON Schema describing checkpoint files.
pub fn checkpoint_schema() -> schemars::schema::RootSchema {
    schemars::schema_for!(Checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metric::default_score_weights;
    use crate::segment::SegmentId;

    fn ranked_checkpoint() -> Checkpoint {
        let mut segment = Segment::new(SegmentId::from("a_seg_0000"), SourceId::from("a"), 0.0, 10.0);
        segment.quality_score = Some(7.5);

        Checkpoint::new(
            Stage::Ranking,
            [SourceId::from("a")].into_iter().collect(),
            Vec::new(),
            StagePayload::Ranked(RankedPayload {
                min_quality_threshold: 7.0,
                score_weights: default_score_weights(),
                eligible_count: 1,
                metric_streams: Vec::new(),
                segments: vec![segment],
            }),
        )
    }

    #[test]
    fn test_payload_is_tagged() {
        let checkpoint = ranked_checkpoint();
        let value = serde_json::to_value(&checkpoint).unwrap();

        assert_eq!(value["stage"], 2);
        assert_eq!(value["status"], "complete");
        assert_eq!(value["payload"]["kind"], "ranked");
        assert_eq!(value["payload"]["segments"][0]["quality_score"], 7.5);
    }

    #[test]
    fn test_checkpoint_roundtrip() {
        let checkpoint = ranked_checkpoint().with_duration(1.5).partial();
        let json = serde_json::to_string_pretty(&checkpoint).unwrap();
        let back: Checkpoint = serde_json::from_str(&json).unwrap();

        assert_eq!(back, checkpoint);
        assert!(back.is_partial());
        assert_eq!(back.payload.stage(), Stage::Ranking);
        assert_eq!(back.segments().len(), 1);
    }

    #[test]
    fn test_schema_generation() {
        let schema = checkpoint_schema();
        let json = serde_json::to_string(&schema).unwrap();
        assert!(json.contains("quality_score"));
        assert!(json.contains("source_ids"));
    }
}
