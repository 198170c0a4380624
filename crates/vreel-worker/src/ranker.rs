//! Segment scoring, classification and eligibility.
//!
//! Each metric is averaged over the samples falling inside a segment, and
//! the averages are combined with the configured weights into a quality
//! score rounded to one decimal. Segments marked `manually_edited` are
//! caller-authoritative and pass through unchanged.

use std::collections::HashMap;

use vreel_models::{
    clamp_score, round_one_decimal, ClassificationTag, MetricKind, MetricStream, MetricWeight,
    Segment, SourceId, MIN_SCORE,
};

use crate::error::{PipelineError, PipelineResult};

/// Tag thresholds.
const HIGH_ACTION_MOTION: f64 = 7.0;
const STATIC_MOTION: f64 = 3.0;
const DYNAMIC_SCENE: f64 = 6.0;
const VISUALLY_RICH_COMPOSITION: f64 = 8.0;
const HIGHLIGHT_MOTION: f64 = 6.0;
const HIGHLIGHT_SCENE: f64 = 6.0;

#[derive(Debug, Clone)]
pub struct RankerParams {
    pub min_quality_threshold: f64,
    pub score_weights: Vec<MetricWeight>,
}

/// Result of ranking every segment of a run.
#[derive(Debug, Clone)]
pub struct Ranking {
    pub segments: Vec<Segment>,
    pub eligible_count: usize,
}

/// Mean of one metric over `[start, end)`, or the minimum score when the
/// span holds no sample for it.
pub fn average_metric(stream: Option<&MetricStream>, kind: MetricKind, start: f64, end: f64) -> f64 {
    let Some(stream) = stream else {
        return MIN_SCORE;
    };

    let (sum, count) = stream
        .window(start, end)
        .filter_map(|s| s.score(kind))
        .fold((0.0, 0usize), |(sum, n), v| (sum + v, n + 1));

    if count == 0 {
        MIN_SCORE
    } else {
        clamp_score(sum / count as f64)
    }
}

/// Weighted quality, rounded to one decimal and clamped to the score range.
pub fn quality_score(segment: &Segment, weights: &[MetricWeight]) -> f64 {
    let weighted: f64 = weights
        .iter()
        .map(|w| w.weight * segment.score(w.metric).unwrap_or(MIN_SCORE))
        .sum();
    clamp_score(round_one_decimal(weighted))
}

/// Classification tags for a set of metric averages.
pub fn classify(motion: f64, scene: f64, composition: f64) -> Vec<ClassificationTag> {
    let mut tags = Vec::new();
    if motion >= HIGH_ACTION_MOTION {
        tags.push(ClassificationTag::HighAction);
    }
    if motion <= STATIC_MOTION {
        tags.push(ClassificationTag::Static);
    }
    if scene >= DYNAMIC_SCENE {
        tags.push(ClassificationTag::DynamicScene);
    }
    if composition >= VISUALLY_RICH_COMPOSITION {
        tags.push(ClassificationTag::VisuallyRich);
    }
    if motion >= HIGHLIGHT_MOTION && scene >= HIGHLIGHT_SCENE {
        tags.push(ClassificationTag::HighlightCandidate);
    }
    if tags.is_empty() {
        tags.push(ClassificationTag::Neutral);
    }
    tags
}

/// Score one segment in place from its source's metric stream.
///
/// Without a stream, scores already on the segment are kept and only the
/// quality and tags are recomputed.
pub fn score_segment(segment: &mut Segment, stream: Option<&MetricStream>, weights: &[MetricWeight]) {
    for kind in MetricKind::ALL {
        let avg = match stream {
            Some(_) => average_metric(stream, kind, segment.start_time, segment.end_time),
            None => segment.score(kind).unwrap_or(MIN_SCORE),
        };
        segment.set_score(kind, avg);
    }
    segment.quality_score = Some(quality_score(segment, weights));
    segment.tags = classify(
        segment.motion_score.unwrap_or(MIN_SCORE),
        segment.scene_score.unwrap_or(MIN_SCORE),
        segment.composition_score.unwrap_or(MIN_SCORE),
    );
}

/// Fill only what a manual editor left empty.
fn complete_edited(segment: &mut Segment, stream: Option<&MetricStream>, weights: &[MetricWeight]) {
    for kind in MetricKind::ALL {
        if segment.score(kind).is_none() {
            let avg = average_metric(stream, kind, segment.start_time, segment.end_time);
            segment.set_score(kind, avg);
        }
    }
    if segment.quality_score.is_none() {
        segment.quality_score = Some(quality_score(segment, weights));
    }
    if segment.tags.is_empty() {
        segment.tags = classify(
            segment.motion_score.unwrap_or(MIN_SCORE),
            segment.scene_score.unwrap_or(MIN_SCORE),
            segment.composition_score.unwrap_or(MIN_SCORE),
        );
    }
}

/// Score, tag and judge every segment.
///
/// # Errors
///
/// Returns [`PipelineError::InsufficientContent`] when no segment reaches
/// the threshold.
pub fn rank_segments(
    segments: Vec<Segment>,
    streams: &[MetricStream],
    params: &RankerParams,
) -> PipelineResult<Ranking> {
    let by_source: HashMap<&SourceId, &MetricStream> =
        streams.iter().map(|s| (&s.source_id, s)).collect();

    let mut ranked = Vec::with_capacity(segments.len());
    for mut segment in segments {
        let stream = by_source.get(&segment.source_id).copied();
        if segment.manually_edited {
            complete_edited(&mut segment, stream, &params.score_weights);
        } else {
            score_segment(&mut segment, stream, &params.score_weights);
        }
        segment.eligible = Some(segment.is_eligible(params.min_quality_threshold));
        ranked.push(segment);
    }

    let eligible_count = ranked
        .iter()
        .filter(|s| s.is_eligible(params.min_quality_threshold))
        .count();

    if eligible_count == 0 {
        let best_quality = ranked
            .iter()
            .filter_map(|s| s.quality_score)
            .max_by(|a, b| a.total_cmp(b));
        return Err(PipelineError::InsufficientContent {
            threshold: params.min_quality_threshold,
            total: ranked.len(),
            eligible: 0,
            best_quality,
        });
    }

    Ok(Ranking {
        segments: ranked,
        eligible_count,
    })
}
