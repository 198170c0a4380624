//! Candidate segment models.

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::metric::MetricKind;
use crate::source::SourceId;

/// Shortest allowed segment (seconds).
pub const MIN_SEGMENT_SECS: f64 = 5.0;

/// Longest allowed segment (seconds).
pub const MAX_SEGMENT_SECS: f64 = 15.0;

/// Tolerance used when comparing segment timing against the bounds.
pub const DURATION_EPSILON: f64 = 1e-6;

/// Unique identifier for a segment within a run.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(transparent)]
pub struct SegmentId(pub String);

impl SegmentId {
    /// Build the identifier of the `index`-th segment of a source.
    pub fn for_source(source_id: &SourceId, index: usize) -> Self {
        Self(format!("{}_seg_{:04}", source_id, index))
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SegmentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Descriptive label derived from metric thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "kebab-case")]
pub enum ClassificationTag {
    HighAction,
    Static,
    DynamicScene,
    VisuallyRich,
    HighlightCandidate,
    Neutral,
}

impl ClassificationTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClassificationTag::HighAction => "high-action",
            ClassificationTag::Static => "static",
            ClassificationTag::DynamicScene => "dynamic-scene",
            ClassificationTag::VisuallyRich => "visually-rich",
            ClassificationTag::HighlightCandidate => "highlight-candidate",
            ClassificationTag::Neutral => "neutral",
        }
    }
}

impl fmt::Display for ClassificationTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A bounded-duration candidate clip from one source.
///
/// The Segmenter fills the timing fields, the Ranker the scores, tags and
/// eligibility, and the Assembler the inclusion flag and timeline position.
/// Once `manually_edited` is set every field is caller-authoritative.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Segment {
    pub segment_id: SegmentId,
    pub source_id: SourceId,
    /// Start offset within the source (seconds)
    pub start_time: f64,
    /// End offset within the source (seconds)
    pub end_time: f64,
    /// `end_time - start_time`
    pub duration: f64,
    #[serde(default)]
    pub motion_score: Option<f64>,
    #[serde(default)]
    pub scene_score: Option<f64>,
    #[serde(default)]
    pub composition_score: Option<f64>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub tags: Vec<ClassificationTag>,
    /// Eligibility as computed by the Ranker
    #[serde(default)]
    pub eligible: Option<bool>,
    /// Explicit inclusion decision; `None` means undecided
    #[serde(default)]
    pub included: Option<bool>,
    #[serde(default)]
    pub manually_edited: bool,
    /// Position on the global timeline, set by the Assembler
    #[serde(default)]
    pub global_start: Option<DateTime<Utc>>,
    /// Index in the assembled timeline, set by the Assembler
    #[serde(default)]
    pub timeline_index: Option<usize>,
}

impl Segment {
    /// Create a segment carrying only timing information.
    pub fn new(id: SegmentId, source_id: SourceId, start_time: f64, end_time: f64) -> Self {
        Self {
            segment_id: id,
            source_id,
            start_time,
            end_time,
            duration: end_time - start_time,
            motion_score: None,
            scene_score: None,
            composition_score: None,
            quality_score: None,
            tags: Vec::new(),
            eligible: None,
            included: None,
            manually_edited: false,
            global_start: None,
            timeline_index: None,
        }
    }

    /// Per-metric score.
    pub fn score(&self, kind: MetricKind) -> Option<f64> {
        match kind {
            MetricKind::Motion => self.motion_score,
            MetricKind::Scene => self.scene_score,
            MetricKind::Composition => self.composition_score,
        }
    }

    pub fn set_score(&mut self, kind: MetricKind, value: f64) {
        match kind {
            MetricKind::Motion => self.motion_score = Some(value),
            MetricKind::Scene => self.scene_score = Some(value),
            MetricKind::Composition => self.composition_score = Some(value),
        }
    }

    /// Whether the segment qualifies for assembly at the given threshold.
    pub fn is_eligible(&self, threshold: f64) -> bool {
        self.included != Some(false)
            && self.quality_score.map(|q| q >= threshold).unwrap_or(false)
    }

    /// Whether the duration respects the segment bounds.
    pub fn has_valid_duration(&self) -> bool {
        self.duration >= MIN_SEGMENT_SECS - DURATION_EPSILON
            && self.duration <= MAX_SEGMENT_SECS + DURATION_EPSILON
    }

    pub fn has_tag(&self, tag: ClassificationTag) -> bool {
        self.tags.contains(&tag)
    }
}

/// Field-level manual edit of one segment.
///
/// Absent fields are left untouched. Applying an edit always marks the
/// segment as manually edited.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmentEdit {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub motion_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scene_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composition_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<ClassificationTag>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included: Option<bool>,
}

impl SegmentEdit {
    pub fn exclude() -> Self {
        Self {
            included: Some(false),
            ..Self::default()
        }
    }

    pub fn with_quality(mut self, quality: f64) -> Self {
        self.quality_score = Some(quality);
        self
    }

    pub fn with_included(mut self, included: bool) -> Self {
        self.included = Some(included);
        self
    }

    /// Apply the edit in place.
    pub fn apply(&self, segment: &mut Segment) {
        if let Some(v) = self.motion_score {
            segment.motion_score = Some(v);
        }
        if let Some(v) = self.scene_score {
            segment.scene_score = Some(v);
        }
        if let Some(v) = self.composition_score {
            segment.composition_score = Some(v);
        }
        if let Some(v) = self.quality_score {
            segment.quality_score = Some(v);
        }
        if let Some(tags) = &self.tags {
            segment.tags = tags.clone();
        }
        if let Some(v) = self.included {
            segment.included = Some(v);
        }
        segment.manually_edited = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn segment(quality: Option<f64>) -> Segment {
        let mut s = Segment::new(SegmentId::from("a_seg_0000"), SourceId::from("a"), 0.0, 10.0);
        s.quality_score = quality;
        s
    }

    #[test]
    fn test_segment_id_format() {
        let id = SegmentId::for_source(&SourceId::from("GX01"), 7);
        assert_eq!(id.as_str(), "GX01_seg_0007");
    }

    #[test]
    fn test_eligibility() {
        assert!(segment(Some(7.0)).is_eligible(7.0));
        assert!(!segment(Some(6.9)).is_eligible(7.0));
        assert!(!segment(None).is_eligible(7.0));

        let mut excluded = segment(Some(9.0));
        excluded.included = Some(false);
        assert!(!excluded.is_eligible(7.0));

        let mut kept = segment(Some(9.0));
        kept.included = Some(true);
        assert!(kept.is_eligible(7.0));
    }

    #[test]
    fn test_duration_bounds() {
        let s = Segment::new(SegmentId::from("x"), SourceId::from("a"), 0.0, 5.0);
        assert!(s.has_valid_duration());
        let s = Segment::new(SegmentId::from("x"), SourceId::from("a"), 0.0, 15.0);
        assert!(s.has_valid_duration());
        let s = Segment::new(SegmentId::from("x"), SourceId::from("a"), 0.0, 4.0);
        assert!(!s.has_valid_duration());
    }

    #[test]
    fn test_tag_serialization() {
        let json = serde_json::to_string(&ClassificationTag::HighlightCandidate).unwrap();
        assert_eq!(json, "\"highlight-candidate\"");
        assert_eq!(ClassificationTag::HighAction.to_string(), "high-action");
    }

    #[test]
    fn test_edit_marks_manual() {
        let mut s = segment(Some(5.0));
        SegmentEdit::default().with_quality(8.5).apply(&mut s);
        assert_eq!(s.quality_score, Some(8.5));
        assert!(s.manually_edited);
        assert_eq!(s.included, None);

        SegmentEdit::exclude().apply(&mut s);
        assert_eq!(s.included, Some(false));
        assert_eq!(s.quality_score, Some(8.5));
    }
}
