//! Motion metric based on grayscale frame differencing.

use image::GrayImage;

use vreel_models::{MetricKind, MAX_SCORE, MIN_SCORE};

use super::{FrameMetric, Measurement};
use crate::frame::Frame;

/// Slope of the fraction-to-score mapping before saturation.
const MOTION_GAIN: f64 = 30.0;

/// Scores how much of the picture changed between two sampled frames.
#[derive(Debug, Clone)]
pub struct MotionMetric {
    pixel_threshold: u8,
}

impl MotionMetric {
    pub fn new(pixel_threshold: u8) -> Self {
        Self { pixel_threshold }
    }

    /// Fraction of pixels whose luma changed by more than the threshold.
    pub fn moving_fraction(&self, previous: &GrayImage, current: &GrayImage) -> f64 {
        if previous.dimensions() != current.dimensions() {
            return 1.0;
        }
        let total = current.as_raw().len();
        if total == 0 {
            return 0.0;
        }
        let moving = previous
            .as_raw()
            .iter()
            .zip(current.as_raw())
            .filter(|(a, b)| a.abs_diff(**b) > self.pixel_threshold)
            .count();
        moving as f64 / total as f64
    }

    /// Map a moving-pixel fraction onto the score range.
    ///
    /// Small amounts of motion climb quickly; anything above 30% of the
    /// frame saturates at the maximum.
    pub fn score_fraction(fraction: f64) -> f64 {
        (MIN_SCORE + fraction * MOTION_GAIN).min(MAX_SCORE)
    }
}

impl Default for MotionMetric {
    fn default() -> Self {
        Self::new(25)
    }
}

impl FrameMetric for MotionMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Motion
    }

    fn measure(&self, previous: Option<&Frame>, current: &Frame) -> Option<Measurement> {
        let previous = previous?;
        let fraction = self.moving_fraction(&previous.luma(), &current.luma());
        Some(Measurement::score(Self::score_fraction(fraction)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn test_score_fraction_saturates() {
        assert_eq!(MotionMetric::score_fraction(0.0), 1.0);
        assert!((MotionMetric::score_fraction(0.1) - 4.0).abs() < 1e-9);
        assert_eq!(MotionMetric::score_fraction(0.5), 10.0);
        assert_eq!(MotionMetric::score_fraction(1.0), 10.0);
    }

    #[test]
    fn test_moving_fraction_respects_threshold() {
        let metric = MotionMetric::default();
        let a = GrayImage::from_pixel(10, 10, Luma([100]));
        let mut b = a.clone();
        // 20 pixels change by more than the threshold, 10 by exactly it
        for x in 0..10 {
            b.put_pixel(x, 0, Luma([200]));
            b.put_pixel(x, 1, Luma([0]));
            b.put_pixel(x, 2, Luma([125]));
        }

        let fraction = metric.moving_fraction(&a, &b);
        assert!((fraction - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_requires_previous_frame() {
        let metric = MotionMetric::default();
        let frame = crate::frame::test_frames::solid(0, 4, 4, [0, 0, 0]);
        assert!(metric.measure(None, &frame).is_none());
        let m = metric.measure(Some(&frame), &frame).unwrap();
        assert_eq!(m.score, 1.0);
        assert!(!m.scene_cut);
    }
}
