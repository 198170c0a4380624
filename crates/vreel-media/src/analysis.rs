//! Per-source frame analysis.
//!
//! Frames are pulled from a [`FrameReader`] in bounded batches. Each batch is
//! scored on the rayon pool inside `spawn_blocking`; the last frame of a
//! batch is carried over so pairwise metrics see every consecutive pair.
//! Samples are collected in frame order, so the resulting stream does not
//! depend on which worker finished first.

use rayon::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};

use vreel_models::{MetricSample, MetricStream, Source};

use crate::error::{MediaError, MediaResult};
use crate::frame::Frame;
use crate::metrics::MetricSet;
use crate::sampler::{FrameSource, SamplingOptions};

/// Default number of frames scored per batch.
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Score a batch of consecutive frames.
///
/// `previous` is the frame sampled just before `frames[0]`, if any.
pub fn score_batch(metrics: &MetricSet, previous: Option<&Frame>, frames: &[Frame]) -> Vec<MetricSample> {
    (0..frames.len())
        .into_par_iter()
        .map(|i| {
            let prev = if i == 0 { previous } else { frames.get(i - 1) };
            metrics.measure(prev, &frames[i])
        })
        .collect()
}

/// Sample a source and score every sampled frame.
pub async fn analyze_source(
    frame_source: &dyn FrameSource,
    source: &Source,
    sampling: &SamplingOptions,
    metrics: Arc<MetricSet>,
    batch_size: usize,
) -> MediaResult<MetricStream> {
    let batch_size = batch_size.max(1);
    let mut reader = frame_source.open(source, sampling).await?;
    let mut stream = MetricStream::new(source.id.clone(), sampling.interval_secs);
    let mut previous: Option<Frame> = None;
    let mut batch: Vec<Frame> = Vec::with_capacity(batch_size);

    info!(
        source_id = %source.id,
        duration = source.duration_secs,
        interval = sampling.interval_secs,
        "[ANALYSIS] Sampling source"
    );

    loop {
        let next = reader.next_frame().await?;
        let exhausted = next.is_none();
        if let Some(frame) = next {
            batch.push(frame);
        }

        if batch.len() >= batch_size || (exhausted && !batch.is_empty()) {
            let frames = std::mem::take(&mut batch);
            let carried = previous.take();
            let metrics = Arc::clone(&metrics);

            let (samples, last) = tokio::task::spawn_blocking(move || {
                let samples = score_batch(&metrics, carried.as_ref(), &frames);
                (samples, frames.into_iter().last())
            })
            .await
            .map_err(|e| MediaError::metric_failed(format!("frame scoring task failed: {}", e)))?;

            debug!(
                source_id = %source.id,
                scored = samples.len(),
                "[ANALYSIS] Scored batch"
            );
            stream.samples.extend(samples);
            previous = last;
        }

        if exhausted {
            break;
        }
    }

    if stream.samples.is_empty() {
        return Err(MediaError::decode_failed(format!(
            "no frames could be decoded from {}",
            source.path.display()
        )));
    }

    info!(
        source_id = %source.id,
        samples = stream.samples.len(),
        scene_cuts = stream.scene_cuts().len(),
        "[ANALYSIS] Source analysed"
    );

    Ok(stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::test_frames;
    use crate::sampler::FrameReader;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use vreel_models::{MetricKind, SourceId};

    struct VecSource {
        frames: Mutex<Option<Vec<Frame>>>,
    }

    struct VecReader {
        frames: std::vec::IntoIter<Frame>,
    }

    #[async_trait]
    impl FrameReader for VecReader {
        async fn next_frame(&mut self) -> MediaResult<Option<Frame>> {
            Ok(self.frames.next())
        }
    }

    #[async_trait]
    impl FrameSource for VecSource {
        async fn probe(&self, path: &Path) -> MediaResult<Source> {
            Err(MediaError::FileNotFound(path.to_path_buf()))
        }

        async fn open(&self, _source: &Source, _options: &SamplingOptions) -> MediaResult<Box<dyn FrameReader>> {
            let frames = self.frames.lock().unwrap().take().unwrap_or_default();
            Ok(Box::new(VecReader {
                frames: frames.into_iter(),
            }))
        }
    }

    fn source() -> Source {
        Source {
            id: SourceId::from("clip"),
            path: PathBuf::from("clip.mp4"),
            duration_secs: 10.0,
            width: 32,
            height: 18,
            frame_rate: 30.0,
            has_audio: false,
            video_codec: String::new(),
            container: String::new(),
            size_bytes: 0,
            recorded_at: Utc::now(),
        }
    }

    fn frames() -> Vec<Frame> {
        (0..10)
            .map(|i| {
                if i < 5 {
                    test_frames::solid(i, 32, 18, [20, 20, 20])
                } else {
                    test_frames::solid(i, 32, 18, [230, 230, 230])
                }
            })
            .collect()
    }

    #[test]
    fn test_score_batch_uses_carried_frame() {
        let metrics = MetricSet::default();
        let all = frames();
        let first = score_batch(&metrics, None, &all[..5]);
        let second = score_batch(&metrics, all.get(4), &all[5..]);

        assert!(first[0].score(MetricKind::Motion).is_none());
        assert!(second[0].scene_cut, "cut at the batch boundary must be seen");
        assert!(second[1..].iter().all(|s| !s.scene_cut));
    }

    #[tokio::test]
    async fn test_batching_does_not_change_result() {
        let metrics = Arc::new(MetricSet::default());
        let sampling = SamplingOptions::default();

        let small = VecSource {
            frames: Mutex::new(Some(frames())),
        };
        let large = VecSource {
            frames: Mutex::new(Some(frames())),
        };

        let a = analyze_source(&small, &source(), &sampling, Arc::clone(&metrics), 3)
            .await
            .unwrap();
        let b = analyze_source(&large, &source(), &sampling, metrics, 64)
            .await
            .unwrap();

        assert_eq!(a, b);
        assert_eq!(a.samples.len(), 10);
        assert_eq!(a.scene_cuts(), vec![5.0]);
    }

    #[tokio::test]
    async fn test_empty_source_is_a_decode_failure() {
        let empty = VecSource {
            frames: Mutex::new(Some(Vec::new())),
        };
        let err = analyze_source(&empty, &source(), &SamplingOptions::default(), Arc::new(MetricSet::default()), 8)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::DecodeFailed(_)));
    }
}
