//! Highlight assembly.
//!
//! Selection walks eligible segments best-first under a duration budget
//! and a same-source spacing rule. The accepted set is then re-sorted onto
//! the global timeline, so presentation order never depends on quality.

use std::cmp::Ordering;
use std::collections::HashMap;

use vreel_models::{Segment, Source, SourceId};

use crate::error::{PipelineError, PipelineResult};

const EPS: f64 = 1e-6;

#[derive(Debug, Clone)]
pub struct AssemblyParams {
    pub target_duration_secs: f64,
    pub min_spacing_secs: f64,
    pub min_quality_threshold: f64,
}

/// The selected, chronologically ordered highlight.
#[derive(Debug, Clone)]
pub struct Assembly {
    pub segments: Vec<Segment>,
    pub actual_duration: f64,
    pub variety_score: f64,
    pub target_shortfall: bool,
    pub warnings: Vec<String>,
}

struct Candidate<'a> {
    segment: &'a Segment,
    source: &'a Source,
    /// Seconds since the epoch on the global timeline
    global: f64,
}

fn quality(segment: &Segment) -> f64 {
    segment.quality_score.unwrap_or(0.0)
}

/// Best quality first, then earliest global time, then id.
fn selection_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    quality(b.segment)
        .total_cmp(&quality(a.segment))
        .then(a.global.total_cmp(&b.global))
        .then_with(|| a.segment.segment_id.cmp(&b.segment.segment_id))
}

fn chronological_order(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    a.global
        .total_cmp(&b.global)
        .then_with(|| a.segment.segment_id.cmp(&b.segment.segment_id))
}

/// Temporal spread of a selection in `[0, 1]`: one minus the coefficient of
/// variation of the gaps between consecutive start times.
pub fn variety_score(global_starts: &[f64]) -> f64 {
    if global_starts.len() < 2 {
        return 1.0;
    }
    let gaps: Vec<f64> = global_starts.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let mean = gaps.iter().sum::<f64>() / gaps.len() as f64;
    let variance = gaps.iter().map(|g| (g - mean).powi(2)).sum::<f64>() / gaps.len() as f64;
    (1.0 - variance.sqrt() / (mean + 1.0)).clamp(0.0, 1.0)
}

/// Select and order segments for the highlight.
///
/// # Errors
///
/// Returns [`PipelineError::InsufficientContent`] if nothing is eligible and
/// [`PipelineError::SourceMismatch`] if a segment's source is unknown.
pub fn assemble(segments: &[Segment], sources: &[Source], params: &AssemblyParams) -> PipelineResult<Assembly> {
    let by_id: HashMap<&SourceId, &Source> = sources.iter().map(|s| (&s.id, s)).collect();

    let mut eligible = Vec::new();
    for segment in segments.iter().filter(|s| s.is_eligible(params.min_quality_threshold)) {
        let source = *by_id.get(&segment.source_id).ok_or_else(|| {
            PipelineError::source_mismatch(format!(
                "segment {} references unknown source {}",
                segment.segment_id, segment.source_id
            ))
        })?;
        eligible.push(Candidate {
            segment,
            source,
            global: source.global_secs(segment.start_time),
        });
    }

    if eligible.is_empty() {
        return Err(PipelineError::InsufficientContent {
            threshold: params.min_quality_threshold,
            total: segments.len(),
            eligible: 0,
            best_quality: segments.iter().filter_map(|s| s.quality_score).max_by(|a, b| a.total_cmp(b)),
        });
    }

    let target = params.target_duration_secs;
    let available: f64 = eligible.iter().map(|c| c.segment.duration).sum();
    let mut warnings = Vec::new();

    let mut selected: Vec<Candidate<'_>> = if available < target - EPS {
        warnings.push(format!(
            "target exceeds available content: {:.1}s requested, {:.1}s eligible; using all {} segments",
            target,
            available,
            eligible.len()
        ));
        eligible
    } else {
        let average = available / eligible.len() as f64;
        eligible.sort_by(selection_order);

        let mut chosen: Vec<Candidate<'_>> = Vec::new();
        let mut total = 0.0;
        for candidate in eligible {
            if total >= target - EPS {
                break;
            }
            let duration = candidate.segment.duration;
            if total + duration > target + average + EPS {
                continue;
            }
            let crowded = chosen.iter().any(|c| {
                c.segment.source_id == candidate.segment.source_id
                    && (c.global - candidate.global).abs() < params.min_spacing_secs - EPS
            });
            if crowded {
                continue;
            }
            total += duration;
            chosen.push(candidate);
        }

        if total < target - EPS {
            warnings.push(format!(
                "selection reached {:.1}s of the {:.1}s target under the spacing rule",
                total, target
            ));
        }
        chosen
    };

    selected.sort_by(chronological_order);

    let starts: Vec<f64> = selected.iter().map(|c| c.global).collect();
    let mut output = Vec::with_capacity(selected.len());
    for (index, candidate) in selected.iter().enumerate() {
        let mut segment = candidate.segment.clone();
        segment.included = Some(true);
        segment.global_start = Some(candidate.source.global_time(segment.start_time));
        segment.timeline_index = Some(index);
        output.push(segment);
    }

    let actual_duration: f64 = output.iter().map(|s| s.duration).sum();

    Ok(Assembly {
        target_shortfall: actual_duration < target - EPS,
        actual_duration,
        variety_score: variety_score(&starts),
        segments: output,
        warnings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use std::path::PathBuf;
    use vreel_models::SegmentId;

    fn source(id: &str, duration: f64, offset_secs: i64) -> Source {
        Source {
            id: SourceId::from(id),
            path: PathBuf::from(format!("{}.mp4", id)),
            duration_secs: duration,
            width: 1920,
            height: 1080,
            frame_rate: 30.0,
            has_audio: true,
            video_codec: "h264".to_string(),
            container: "mov,mp4".to_string(),
            size_bytes: 0,
            recorded_at: Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap() + Duration::seconds(offset_secs),
        }
    }

    fn ranked(source: &str, index: usize, start: f64, quality: f64) -> Segment {
        let id = SourceId::from(source);
        let mut s = Segment::new(SegmentId::for_source(&id, index), id, start, start + 10.0);
        s.quality_score = Some(quality);
        s.eligible = Some(quality >= 7.0);
        s
    }

    fn params(target: f64) -> AssemblyParams {
        AssemblyParams {
            target_duration_secs: target,
            min_spacing_secs: 15.0,
            min_quality_threshold: 7.0,
        }
    }

    #[test]
    fn test_quality_first_with_spacing() {
        let sources = vec![source("a", 60.0, 0), source("b", 90.0, 3600)];
        let segments = vec![
            ranked("a", 0, 0.0, 9.0),
            ranked("a", 1, 10.0, 8.0),
            ranked("a", 2, 20.0, 8.0),
            ranked("a", 3, 30.0, 7.0),
            ranked("a", 4, 40.0, 7.0),
            ranked("a", 5, 50.0, 7.0),
            ranked("b", 0, 0.0, 9.0),
            ranked("b", 1, 20.0, 8.0),
            ranked("b", 2, 40.0, 7.0),
            ranked("b", 3, 60.0, 7.0),
        ];

        let assembly = assemble(&segments, &sources, &params(50.0)).unwrap();
        let ids: Vec<&str> = assembly.segments.iter().map(|s| s.segment_id.as_str()).collect();

        assert_eq!(ids, vec!["a_seg_0000", "a_seg_0002", "a_seg_0004", "b_seg_0000", "b_seg_0001"]);
        assert_eq!(assembly.actual_duration, 50.0);
        assert!(!assembly.target_shortfall);
        assert!(assembly.warnings.is_empty());
        for (i, s) in assembly.segments.iter().enumerate() {
            assert_eq!(s.timeline_index, Some(i));
            assert_eq!(s.included, Some(true));
        }
        let starts: Vec<_> = assembly.segments.iter().map(|s| s.global_start.unwrap()).collect();
        assert!(starts.windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_shortfall_takes_everything() {
        let sources = vec![source("a", 120.0, 0)];
        let mut segments: Vec<Segment> = (0..10).map(|i| ranked("a", i, i as f64 * 10.0, 8.0)).collect();
        // Two segments below threshold
        segments[3].quality_score = Some(4.0);
        segments[7].quality_score = Some(5.0);

        let assembly = assemble(&segments, &sources, &params(300.0)).unwrap();
        assert_eq!(assembly.segments.len(), 8);
        assert_eq!(assembly.actual_duration, 80.0);
        assert!(assembly.target_shortfall);
        assert!(assembly.warnings[0].contains("target exceeds available content"));
        // Spacing is not applied when everything is taken
        assert_eq!(assembly.segments[0].segment_id.as_str(), "a_seg_0000");
        assert_eq!(assembly.segments[1].segment_id.as_str(), "a_seg_0001");
    }

    #[test]
    fn test_excluded_segments_are_never_selected() {
        let sources = vec![source("a", 60.0, 0)];
        let mut segments = vec![ranked("a", 0, 0.0, 9.5), ranked("a", 1, 20.0, 8.0)];
        segments[0].included = Some(false);
        segments[0].manually_edited = true;

        let assembly = assemble(&segments, &sources, &params(10.0)).unwrap();
        assert_eq!(assembly.segments.len(), 1);
        assert_eq!(assembly.segments[0].segment_id.as_str(), "a_seg_0001");
    }

    #[test]
    fn test_nothing_eligible() {
        let sources = vec![source("a", 60.0, 0)];
        let segments = vec![ranked("a", 0, 0.0, 3.0)];
        let err = assemble(&segments, &sources, &params(30.0)).unwrap_err();
        assert!(matches!(err, PipelineError::InsufficientContent { .. }));
    }

    #[test]
    fn test_unknown_source() {
        let segments = vec![ranked("ghost", 0, 0.0, 9.0)];
        let err = assemble(&segments, &[], &params(30.0)).unwrap_err();
        assert!(matches!(err, PipelineError::SourceMismatch(_)));
    }

    #[test]
    fn test_variety_score() {
        assert_eq!(variety_score(&[]), 1.0);
        assert_eq!(variety_score(&[5.0]), 1.0);
        assert_eq!(variety_score(&[0.0, 10.0, 20.0, 30.0]), 1.0);
        let clustered = variety_score(&[0.0, 1.0, 2.0, 100.0]);
        assert!(clustered < 0.5, "got {clustered}");
        assert!(clustered >= 0.0);
    }
}
