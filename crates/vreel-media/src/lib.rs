#![deny(unreachable_patterns)]
//! Media ingest and frame analysis for the VReel pipeline.
//!
//! This crate provides:
//! - FFprobe-based ingest with MP4 header validation
//! - FFmpeg raw-video frame sampling behind the [`FrameSource`] seam
//! - Motion, Scene-Change and Composition frame metrics
//! - Batched, parallel per-source analysis producing metric streams

pub mod analysis;
pub mod error;
pub mod frame;
pub mod metrics;
pub mod probe;
pub mod sampler;

pub use analysis::{analyze_source, score_batch, DEFAULT_BATCH_SIZE};
pub use error::{MediaError, MediaResult};
pub use frame::Frame;
pub use metrics::{FrameMetric, Measurement, MetricConfig, MetricSet};
pub use probe::{probe_source, source_from_probe};
pub use sampler::{FfmpegFrameSource, FrameReader, FrameSource, SamplingOptions, HD_ANALYSIS_WIDTH};
