//! Candidate segment detection.
//!
//! A source is cut at hard scene-cut candidates once the open segment has
//! reached the minimum length, and unconditionally whenever it reaches the
//! maximum. What happens to fragments below the minimum is governed by
//! [`ShortFragmentPolicy`] and [`TailPolicy`].

use tracing::debug;

use vreel_models::timestamp::round_millis;
use vreel_models::{
    MetricStream, Segment, SegmentId, SegmenterParams, ShortFragmentPolicy, Source, TailPolicy,
};

const EPS: f64 = 1e-6;

/// Cuts sources into bounded, non-overlapping candidate segments.
#[derive(Debug, Clone, Copy, Default)]
pub struct Segmenter {
    params: SegmenterParams,
}

impl Segmenter {
    pub fn new(params: SegmenterParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &SegmenterParams {
        &self.params
    }

    /// Timing-only segments for one source.
    pub fn segment(&self, source: &Source, stream: &MetricStream) -> Vec<Segment> {
        let spans = self.boundaries(source.duration_secs, &stream.scene_cuts());

        let segments: Vec<Segment> = spans
            .into_iter()
            .enumerate()
            .map(|(i, (start, end))| {
                Segment::new(
                    SegmentId::for_source(&source.id, i),
                    source.id.clone(),
                    round_millis(start),
                    round_millis(end),
                )
            })
            .collect();

        debug!(
            source_id = %source.id,
            duration = source.duration_secs,
            segments = segments.len(),
            "Segmented source"
        );
        segments
    }

    /// Segment spans `(start, end)` for a source of `duration` seconds with
    /// scene cuts at `cuts`.
    pub fn boundaries(&self, duration: f64, cuts: &[f64]) -> Vec<(f64, f64)> {
        let min = self.params.min_segment_secs;
        let max = self.params.max_segment_secs;

        let mut cuts: Vec<f64> = cuts
            .iter()
            .copied()
            .filter(|c| c.is_finite() && *c > EPS && *c < duration - EPS)
            .collect();
        cuts.sort_by(|a, b| a.total_cmp(b));
        cuts.dedup_by(|a, b| (*a - *b).abs() < EPS);

        let mut spans = Vec::new();
        let mut start = 0.0;

        for cut in cuts {
            if cut <= start + EPS {
                continue;
            }
            while cut - start > max + EPS {
                spans.push((start, start + max));
                start += max;
            }
            if cut - start >= min - EPS {
                spans.push((start, cut));
                start = cut;
            } else if self.params.short_fragment_policy == ShortFragmentPolicy::Drop {
                start = cut;
            }
        }

        while duration - start > max + EPS {
            spans.push((start, start + max));
            start += max;
        }

        let tail = duration - start;
        if tail >= min - EPS {
            spans.push((start, duration));
        } else if tail > EPS && self.params.tail_policy == TailPolicy::MergeIntoPrevious {
            self.merge_tail(&mut spans, start, duration);
        }

        spans
    }

    /// Fold a short tail into the segment ending where it starts, splitting
    /// the two evenly if the merge would exceed the maximum.
    fn merge_tail(&self, spans: &mut Vec<(f64, f64)>, tail_start: f64, end: f64) {
        let min = self.params.min_segment_secs;
        let max = self.params.max_segment_secs;

        let Some(last) = spans.last_mut() else {
            return;
        };
        if (last.1 - tail_start).abs() > EPS {
            // Not adjacent: a dropped fragment sits in between
            return;
        }

        let merged = end - last.0;
        if merged <= max + EPS {
            last.1 = end;
        } else if merged / 2.0 >= min - EPS {
            let mid = last.0 + merged / 2.0;
            last.1 = mid;
            spans.push((mid, end));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::path::PathBuf;
    use vreel_models::{MetricSample, SourceId};

    fn segmenter() -> Segmenter {
        Segmenter::default()
    }

    fn with_policies(short: ShortFragmentPolicy, tail: TailPolicy) -> Segmenter {
        Segmenter::new(SegmenterParams {
            short_fragment_policy: short,
            tail_policy: tail,
            ..SegmenterParams::default()
        })
    }

    #[test]
    fn test_no_cuts_splits_at_maximum() {
        let spans = segmenter().boundaries(60.0, &[]);
        assert_eq!(spans, vec![(0.0, 15.0), (15.0, 30.0), (30.0, 45.0), (45.0, 60.0)]);

        let spans = segmenter().boundaries(20.0, &[]);
        assert_eq!(spans, vec![(0.0, 15.0), (15.0, 20.0)]);
    }

    #[test]
    fn test_cut_closes_segment_past_minimum() {
        let spans = segmenter().boundaries(30.0, &[3.0, 8.0, 20.0]);
        // The cut at 3s is too early and is absorbed into [0, 8]
        assert_eq!(spans, vec![(0.0, 8.0), (8.0, 20.0), (20.0, 30.0)]);
    }

    #[test]
    fn test_drop_short_fragment() {
        let s = with_policies(ShortFragmentPolicy::Drop, TailPolicy::MergeIntoPrevious);
        let spans = s.boundaries(30.0, &[3.0, 8.0, 20.0]);
        assert_eq!(spans, vec![(3.0, 8.0), (8.0, 20.0), (20.0, 30.0)]);
    }

    #[test]
    fn test_tail_merge_rebalances() {
        let spans = segmenter().boundaries(32.0, &[]);
        assert_eq!(spans, vec![(0.0, 15.0), (15.0, 23.5), (23.5, 32.0)]);

        let spans = segmenter().boundaries(23.0, &[10.0, 20.0]);
        assert_eq!(spans, vec![(0.0, 10.0), (10.0, 23.0)]);
    }

    #[test]
    fn test_tail_drop() {
        let s = with_policies(ShortFragmentPolicy::MergeIntoNext, TailPolicy::Drop);
        let spans = s.boundaries(32.0, &[]);
        assert_eq!(spans, vec![(0.0, 15.0), (15.0, 30.0)]);
    }

    #[test]
    fn test_source_shorter_than_minimum() {
        assert!(segmenter().boundaries(4.0, &[1.0, 2.0]).is_empty());
    }

    #[test]
    fn test_bounds_hold_for_many_cut_patterns() {
        let mut seed: u64 = 7;
        let policies = [
            (ShortFragmentPolicy::MergeIntoNext, TailPolicy::MergeIntoPrevious),
            (ShortFragmentPolicy::Drop, TailPolicy::MergeIntoPrevious),
            (ShortFragmentPolicy::MergeIntoNext, TailPolicy::Drop),
            (ShortFragmentPolicy::Drop, TailPolicy::Drop),
        ];

        for round in 0..200 {
            seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let duration = 5.0 + (seed >> 40) as f64 % 200.0;
            let mut cuts = Vec::new();
            let mut t = 0.0;
            loop {
                seed = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                t += 0.5 + ((seed >> 33) % 120) as f64 / 10.0;
                if t >= duration {
                    break;
                }
                cuts.push(t);
            }

            let (short, tail) = policies[round % policies.len()];
            let spans = with_policies(short, tail).boundaries(duration, &cuts);

            let mut previous_end = 0.0;
            for (start, end) in spans {
                let len = end - start;
                assert!(len >= 5.0 - 1e-6 && len <= 15.0 + 1e-6, "length {len} in round {round}");
                assert!(start >= previous_end - 1e-6, "overlap in round {round}");
                assert!(end <= duration + 1e-6);
                previous_end = end;
            }
        }
    }

    #[test]
    fn test_segments_carry_ids_and_rounded_timing() {
        let source = Source {
            id: SourceId::from("dive"),
            path: PathBuf::from("dive.mp4"),
            duration_secs: 20.0004,
            width: 640,
            height: 360,
            frame_rate: 30.0,
            has_audio: false,
            video_codec: "h264".to_string(),
            container: "mov,mp4".to_string(),
            size_bytes: 0,
            recorded_at: Utc::now(),
        };
        let mut stream = MetricStream::new(source.id.clone(), 1.0);
        let mut sample = MetricSample::new(7.0);
        sample.scene_cut = true;
        stream.samples.push(sample);

        let segments = segmenter().segment(&source, &stream);
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].segment_id.as_str(), "dive_seg_0000");
        assert_eq!(segments[1].segment_id.as_str(), "dive_seg_0001");
        assert_eq!(segments[0].end_time, 7.0);
        assert_eq!(segments[1].end_time, 20.0);
        assert!(segments.iter().all(|s| s.has_valid_duration()));
        assert!(segments.iter().all(|s| s.quality_score.is_none()));
    }
}
