//! Frame metric models.
//!
//! A metric stream is the per-source output of frame analysis: one sample
//! per sampled frame, each carrying the scores the metrics produced for it.
//! Stage 1 persists these streams so that ranking can be repeated without
//! decoding the recordings again.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::source::SourceId;

/// Lowest score any metric may report.
pub const MIN_SCORE: f64 = 1.0;

/// Highest score any metric may report.
pub const MAX_SCORE: f64 = 10.0;

/// Clamp a value into the score range.
pub fn clamp_score(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_SCORE;
    }
    value.clamp(MIN_SCORE, MAX_SCORE)
}

/// Whether a value lies in the score range.
pub fn is_valid_score(value: f64) -> bool {
    (MIN_SCORE..=MAX_SCORE).contains(&value)
}

/// Round half away from zero to one decimal.
pub fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Identifies one frame metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// Fraction of moving pixels between consecutive frames
    Motion,
    /// Colour histogram change between consecutive frames
    Scene,
    /// Edges, colour variety and exposure of a single frame
    Composition,
}

impl MetricKind {
    /// All metrics in their canonical order.
    pub const ALL: [MetricKind; 3] = [MetricKind::Motion, MetricKind::Scene, MetricKind::Composition];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Motion => "motion",
            MetricKind::Scene => "scene",
            MetricKind::Composition => "composition",
        }
    }

    /// Name of the per-segment score field this metric fills.
    pub fn score_field(&self) -> &'static str {
        match self {
            MetricKind::Motion => "motion_score",
            MetricKind::Scene => "scene_score",
            MetricKind::Composition => "composition_score",
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Scores measured for one sampled frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricSample {
    /// Offset of the frame within its source (seconds)
    pub time: f64,
    /// Score per metric; pairwise metrics are absent on the first frame
    pub scores: BTreeMap<MetricKind, f64>,
    /// Hard scene-cut candidate between the previous frame and this one
    #[serde(default)]
    pub scene_cut: bool,
}

impl MetricSample {
    pub fn new(time: f64) -> Self {
        Self {
            time,
            scores: BTreeMap::new(),
            scene_cut: false,
        }
    }

    pub fn score(&self, kind: MetricKind) -> Option<f64> {
        self.scores.get(&kind).copied()
    }
}

/// Ordered metric samples for one source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricStream {
    pub source_id: SourceId,
    /// Seconds between consecutive samples
    pub interval_secs: f64,
    /// Samples in ascending time order
    pub samples: Vec<MetricSample>,
}

impl MetricStream {
    pub fn new(source_id: SourceId, interval_secs: f64) -> Self {
        Self {
            source_id,
            interval_secs,
            samples: Vec::new(),
        }
    }

    /// Times of all hard scene-cut candidates, ascending.
    pub fn scene_cuts(&self) -> Vec<f64> {
        self.samples
            .iter()
            .filter(|s| s.scene_cut)
            .map(|s| s.time)
            .collect()
    }

    /// Samples whose time lies in `[start, end)`.
    pub fn window(&self, start: f64, end: f64) -> impl Iterator<Item = &MetricSample> {
        self.samples
            .iter()
            .filter(move |s| s.time >= start && s.time < end)
    }
}

/// Contribution of one metric to the quality score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct MetricWeight {
    pub metric: MetricKind,
    pub weight: f64,
}

/// Default quality weights: scene 60%, motion 25%, composition 15%.
pub fn default_score_weights() -> Vec<MetricWeight> {
    vec![
        MetricWeight {
            metric: MetricKind::Scene,
            weight: 0.6,
        },
        MetricWeight {
            metric: MetricKind::Motion,
            weight: 0.25,
        },
        MetricWeight {
            metric: MetricKind::Composition,
            weight: 0.15,
        },
    ]
}
