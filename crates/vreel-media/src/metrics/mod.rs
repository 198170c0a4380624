//! Frame metrics.
//!
//! Every metric implements [`FrameMetric`]: a pure function of the current
//! sampled frame and, for pairwise metrics, the frame sampled before it.
//! Metrics hold no mutable state, so one [`MetricSet`] can score many frames
//! concurrently.
//!
//! ```text
//! previous frame ─┐
//!                 ├─► Motion ──────┐
//! current frame ──┼─► Scene ───────┼─► MetricSample { scores, scene_cut }
//!                 └─► Composition ─┘
//! ```

mod composition;
mod motion;
mod scene;

use serde::{Deserialize, Serialize};

use vreel_models::{clamp_score, MetricKind, MetricSample};

use crate::frame::Frame;

pub use composition::{CompositionMetric, CompositionParts};
pub use motion::MotionMetric;
pub use scene::{chi_squared_distance, color_histogram, SceneChangeMetric};

/// Result of one metric on one frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Measurement {
    /// Score in `[1, 10]`
    pub score: f64,
    /// Whether the metric flags a hard scene cut before this frame
    pub scene_cut: bool,
}

impl Measurement {
    pub fn score(score: f64) -> Self {
        Self {
            score: clamp_score(score),
            scene_cut: false,
        }
    }

    pub fn with_cut(mut self, cut: bool) -> Self {
        self.scene_cut = cut;
        self
    }
}

/// A bounded per-frame signal.
pub trait FrameMetric: Send + Sync {
    /// Which score this metric produces.
    fn kind(&self) -> MetricKind;

    /// Measure `current`, optionally against the frame sampled before it.
    ///
    /// Returns `None` when the metric cannot be computed for this frame,
    /// e.g. a pairwise metric on the first frame of a source.
    fn measure(&self, previous: Option<&Frame>, current: &Frame) -> Option<Measurement>;
}

/// Thresholds shared by the standard metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricConfig {
    /// Luma delta above which a pixel counts as moving
    pub motion_pixel_threshold: u8,
    /// Histogram distance above which a scene cut is flagged
    pub scene_cut_threshold: f64,
    /// Histogram bins per colour channel
    pub histogram_bins: u32,
    /// Gradient magnitude above which a pixel counts as an edge
    pub edge_threshold: f64,
}

impl Default for MetricConfig {
    fn default() -> Self {
        Self {
            motion_pixel_threshold: 25,
            scene_cut_threshold: 0.3,
            histogram_bins: 8,
            edge_threshold: 100.0,
        }
    }
}

/// Ordered collection of metrics applied to every sampled frame.
pub struct MetricSet {
    metrics: Vec<Box<dyn FrameMetric>>,
}

impl MetricSet {
    /// Motion, Scene-Change and Composition with the given thresholds.
    pub fn standard(config: &MetricConfig) -> Self {
        Self::new()
            .with_metric(MotionMetric::new(config.motion_pixel_threshold))
            .with_metric(SceneChangeMetric::new(
                config.histogram_bins,
                config.scene_cut_threshold,
            ))
            .with_metric(CompositionMetric::new(config.edge_threshold))
    }

    pub fn new() -> Self {
        Self {
            metrics: Vec::new(),
        }
    }

    pub fn with_metric(mut self, metric: impl FrameMetric + 'static) -> Self {
        self.metrics.push(Box::new(metric));
        self
    }

    pub fn kinds(&self) -> Vec<MetricKind> {
        self.metrics.iter().map(|m| m.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }

    /// Run every metric on one frame.
    pub fn measure(&self, previous: Option<&Frame>, current: &Frame) -> MetricSample {
        let mut sample = MetricSample::new(current.time);
        for metric in &self.metrics {
            if let Some(m) = metric.measure(previous, current) {
                sample.scores.insert(metric.kind(), m.score);
                sample.scene_cut |= m.scene_cut;
            }
        }
        sample
    }
}

impl Default for MetricSet {
    fn default() -> Self {
        Self::standard(&MetricConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_frames;

    #[test]
    fn test_standard_set_order() {
        let set = MetricSet::default();
        assert_eq!(
            set.kinds(),
            vec![MetricKind::Motion, MetricKind::Scene, MetricKind::Composition]
        );
    }

    #[test]
    fn test_first_frame_has_only_single_frame_metrics() {
        let set = MetricSet::default();
        let frame = test_frames::solid(0, 32, 18, [100, 100, 100]);
        let sample = set.measure(None, &frame);

        assert_eq!(sample.time, 0.0);
        assert!(sample.score(MetricKind::Motion).is_none());
        assert!(sample.score(MetricKind::Scene).is_none());
        assert!(sample.score(MetricKind::Composition).is_some());
        assert!(!sample.scene_cut);
    }

    #[test]
    fn test_static_frames_score_low() {
        let set = MetricSet::default();
        let a = test_frames::solid(0, 32, 18, [128, 128, 128]);
        let b = test_frames::solid(1, 32, 18, [128, 128, 128]);
        let sample = set.measure(Some(&a), &b);

        assert_eq!(sample.score(MetricKind::Motion), Some(1.0));
        assert_eq!(sample.score(MetricKind::Scene), Some(1.0));
        let composition = sample.score(MetricKind::Composition).unwrap();
        assert!(composition >= 1.0 && composition <= 2.1, "composition = {}", composition);
        assert!(!sample.scene_cut);
    }

    #[test]
    fn test_hard_cut_is_flagged() {
        let set = MetricSet::default();
        let a = test_frames::solid(0, 32, 18, [10, 10, 10]);
        let b = test_frames::solid(1, 32, 18, [240, 30, 30]);
        let sample = set.measure(Some(&a), &b);

        assert!(sample.scene_cut);
        assert_eq!(sample.score(MetricKind::Scene), Some(10.0));
        assert_eq!(sample.score(MetricKind::Motion), Some(10.0));
    }
}
