//! Composition metric: edge density, colour variety and exposure.

use image::imageops::{self, FilterType};
use image::{GrayImage, RgbImage};
use std::collections::HashSet;

use vreel_models::MetricKind;

use super::{FrameMetric, Measurement};
use crate::frame::Frame;

/// Side of the thumbnail used for counting distinct colours.
const COLOR_THUMBNAIL_SIDE: u32 = 50;

/// Distinct colours at which colour variety saturates.
const COLOR_SATURATION: f64 = 1000.0;

/// Mean luma band considered well exposed (exclusive).
const BRIGHTNESS_BAND: (f64, f64) = (40.0, 220.0);

const EDGE_WEIGHT: f64 = 0.5;
const COLOR_WEIGHT: f64 = 0.3;
const BRIGHTNESS_WEIGHT: f64 = 0.2;

/// Component scores of the composition metric.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompositionParts {
    pub edge: f64,
    pub color: f64,
    pub brightness: f64,
}

impl CompositionParts {
    pub fn combined(&self) -> f64 {
        EDGE_WEIGHT * self.edge + COLOR_WEIGHT * self.color + BRIGHTNESS_WEIGHT * self.brightness
    }
}

/// Scores the visual richness of a single frame.
#[derive(Debug, Clone)]
pub struct CompositionMetric {
    edge_threshold: f64,
}

impl CompositionMetric {
    pub fn new(edge_threshold: f64) -> Self {
        Self { edge_threshold }
    }

    pub fn parts(&self, image: &RgbImage, luma: &GrayImage) -> CompositionParts {
        let density = edge_density(luma, self.edge_threshold);
        let distinct = distinct_colors(image);
        let diversity = (distinct as f64 / COLOR_SATURATION).min(1.0);
        let mean = mean_luma(luma);

        CompositionParts {
            edge: (density * 100.0).min(10.0),
            color: (diversity * 20.0).min(10.0),
            brightness: if mean > BRIGHTNESS_BAND.0 && mean < BRIGHTNESS_BAND.1 {
                10.0
            } else {
                5.0
            },
        }
    }
}

impl Default for CompositionMetric {
    fn default() -> Self {
        Self::new(100.0)
    }
}

impl FrameMetric for CompositionMetric {
    fn kind(&self) -> MetricKind {
        MetricKind::Composition
    }

    fn measure(&self, _previous: Option<&Frame>, current: &Frame) -> Option<Measurement> {
        let parts = self.parts(&current.image, &current.luma());
        Some(Measurement::score(parts.combined()))
    }
}

/// Fraction of interior pixels whose Sobel gradient magnitude exceeds `threshold`.
pub fn edge_density(luma: &GrayImage, threshold: f64) -> f64 {
    let (w, h) = luma.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| luma.get_pixel(x, y).0[0] as i32;
    let threshold_sq = threshold * threshold;
    let mut edges = 0usize;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = (px(x + 1, y - 1) + 2 * px(x + 1, y) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2 * px(x - 1, y) + px(x - 1, y + 1));
            let gy = (px(x - 1, y + 1) + 2 * px(x, y + 1) + px(x + 1, y + 1))
                - (px(x - 1, y - 1) + 2 * px(x, y - 1) + px(x + 1, y - 1));
            let magnitude_sq = (gx * gx + gy * gy) as f64;
            if magnitude_sq > threshold_sq {
                edges += 1;
            }
        }
    }

    edges as f64 / ((w - 2) as f64 * (h - 2) as f64)
}

/// Number of distinct colours in a heavily downsampled copy of the frame.
pub fn distinct_colors(image: &RgbImage) -> usize {
    let thumbnail = imageops::resize(
        image,
        COLOR_THUMBNAIL_SIDE,
        COLOR_THUMBNAIL_SIDE,
        FilterType::Triangle,
    );
    thumbnail.pixels().map(|p| p.0).collect::<HashSet<[u8; 3]>>().len()
}

pub fn mean_luma(luma: &GrayImage) -> f64 {
    let raw = luma.as_raw();
    if raw.is_empty() {
        return 0.0;
    }
    raw.iter().map(|&v| v as u64).sum::<u64>() as f64 / raw.len() as f64
}
