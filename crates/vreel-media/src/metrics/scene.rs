//! Scene-change metric based on colour histogram distance.

use image::RgbImage;

use vreel_models::{MetricKind, MIN_SCORE};

use super::{FrameMetric, Measurement};
use crate::frame::Frame;

/// Scale applied to the histogram distance before clamping.
const SCENE_GAIN: f64 = 10.0;

/// Scores colour distribution change between two sampled frames and flags
/// hard cuts.
#[derive(Debug, Clone)]
pub struct SceneChangeMetric {
    bins_per_channel: u32,
    cut_threshold: f64,
}

impl SceneChangeMetric {
    pub fn new(bins_per_channel: u32, cut_threshold: f64) -> Self {
        Self {
            bins_per_channel: bins_per_channel.clamp(2, 64),
            cut_threshold,
        }
    }

    pub fn cut_threshold(&self) -> f64 {
        self.cut_threshold
    }

    /// Raw histogram distance between two frames, in `[0, 1]`.
    pub fn distance(&self, previous: &RgbImage, current: &RgbImage) -> f64 {
        let h1 = color_histogram(previous, self.bins_per_channel);
        let h2 = color_histogram(current, self.bins_per_channel);
        chi_squared_distance(&h1, &h2)
    }

    /// Map a histogram distance onto the score range.
    pub fn score_distance(distance: f64) -> f64 {
        MIN_SCORE + distance * SCENE_GAIN
    }
}

impl Default for SceneChangeMetric {
    fn default() -> Self {
        Self::new(8, 0.3)
    }
}

impl FrameMetric for SceneChangeMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Scene
    }

    fn measure(&self, previous: Option<&Frame>, current: &Frame) -> Option<Measurement> {
        let previous = previous?;
        let distance = self.distance(&previous.image, &current.image);
        Some(Measurement::score(Self::score_distance(distance)).with_cut(distance > self.cut_threshold))
    }
}

/// RGB histogram with `bins^3` entries normalised to unit mass.
pub fn color_histogram(image: &RgbImage, bins: u32) -> Vec<f64> {
    let bins = bins as usize;
    let mut histogram = vec![0.0; bins * bins * bins];

    for pixel in image.pixels() {
        let [r, g, b] = pixel.0;
        let r_bin = (r as usize * bins) / 256;
        let g_bin = (g as usize * bins) / 256;
        let b_bin = (b as usize * bins) / 256;
        histogram[r_bin * bins * bins + g_bin * bins + b_bin] += 1.0;
    }

    let total: f64 = histogram.iter().sum();
    if total > 0.0 {
        for val in &mut histogram {
            *val /= total;
        }
    }
    histogram
}

/// Symmetric chi-squared distance between two normalised histograms.
///
/// Returns a value in `[0, 1]`: 0 for identical distributions, 1 for
/// disjoint ones.
pub fn chi_squared_distance(h1: &[f64], h2: &[f64]) -> f64 {
    const EPSILON: f64 = 1e-10;

    if h1.len() != h2.len() {
        return 1.0;
    }

    let mut distance = 0.0;
    for (a, b) in h1.iter().zip(h2.iter()) {
        let sum = a + b + EPSILON;
        let diff = a - b;
        distance += (diff * diff) / sum;
    }

    (distance / 2.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_frames;

    #[test]
    fn test_histogram_is_normalised() {
        let frame = test_frames::noise(0, 40, 30, 1);
        let hist = color_histogram(&frame.image, 8);
        assert_eq!(hist.len(), 512);
        let total: f64 = hist.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_chi_squared_bounds() {
        let a = vec![0.5, 0.5, 0.0, 0.0];
        let b = vec![0.0, 0.0, 0.5, 0.5];
        assert!(chi_squared_distance(&a, &a) < 1e-9);
        assert!((chi_squared_distance(&a, &b) - 1.0).abs() < 1e-6);
        assert_eq!(chi_squared_distance(&a, &[1.0]), 1.0);
    }

    #[test]
    fn test_small_change_is_not_a_cut() {
        let metric = SceneChangeMetric::default();
        let a = test_frames::solid(0, 16, 16, [100, 100, 100]);
        let mut b = a.clone();
        // Recolour one row out of sixteen
        for x in 0..16 {
            b.image.put_pixel(x, 0, image::Rgb([250, 20, 20]));
        }

        let m = metric.measure(Some(&a), &b).unwrap();
        assert!(!m.scene_cut);
        assert!(m.score > 1.0 && m.score < 3.0, "score = {}", m.score);
    }

    #[test]
    fn test_disjoint_frames_cut() {
        let metric = SceneChangeMetric::default();
        let a = test_frames::solid(0, 16, 16, [0, 0, 0]);
        let b = test_frames::solid(1, 16, 16, [255, 255, 255]);

        let m = metric.measure(Some(&a), &b).unwrap();
        assert!(m.scene_cut);
        assert_eq!(m.score, 10.0);
    }
}
