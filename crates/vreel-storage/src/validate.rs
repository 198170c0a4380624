//! Checkpoint validation.
//!
//! Validation runs on the raw JSON tree before typed deserialization so
//! that every problem can be reported with the offending field and where it
//! lives (`segment <id>`, `source <id>`, ...), including fields a hand
//! editor deleted or set to `null`.

use chrono::{DateTime, FixedOffset};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;
use tokio::fs;

use vreel_models::timestamp::{format_seconds, format_span};
use vreel_models::{
    is_valid_score, Checkpoint, ClassificationTag, MetricKind, ShortFragmentPolicy, Stage,
    TailPolicy, CHECKPOINT_FORMAT_VERSION, MAX_SEGMENT_SECS, MIN_SEGMENT_SECS,
};

use crate::error::{StorageError, StorageResult, ValidationError};

const CHECKPOINT: &str = "checkpoint";
const PAYLOAD: &str = "payload";

/// Tolerance for derived timing fields.
const TIME_EPSILON: f64 = 1e-3;

/// Tolerance for score weights summing to one.
const WEIGHT_SUM_EPSILON: f64 = 0.01;

type Object = Map<String, Value>;
type VResult<T> = Result<T, ValidationError>;

/// Read, validate and parse a checkpoint file.
///
/// The file is read from disk on every call.
pub async fn validate_checkpoint(path: impl AsRef<Path>) -> StorageResult<Checkpoint> {
    let path = path.as_ref();
    let bytes = match fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(StorageError::not_found(path));
        }
        Err(e) => return Err(e.into()),
    };

    let value: Value = serde_json::from_slice(&bytes).map_err(|e| {
        ValidationError::new(
            CHECKPOINT,
            format!("line {} column {}", e.line(), e.column()),
            format!("malformed JSON: {}", e),
        )
    })?;

    Ok(parse_checkpoint(value)?)
}

/// Validate a JSON tree and convert it into a [`Checkpoint`].
pub fn parse_checkpoint(value: Value) -> VResult<Checkpoint> {
    validate_checkpoint_value(&value)?;
    serde_json::from_value(value)
        .map_err(|e| ValidationError::new(CHECKPOINT, CHECKPOINT, e.to_string()))
}

/// Validate a checkpoint JSON tree, returning its stage.
pub fn validate_checkpoint_value(value: &Value) -> VResult<Stage> {
    let root = value
        .as_object()
        .ok_or_else(|| ValidationError::new(CHECKPOINT, CHECKPOINT, "expected a JSON object"))?;

    let version = require_u64(root, "format_version", CHECKPOINT)?;
    if version != CHECKPOINT_FORMAT_VERSION as u64 {
        return Err(ValidationError::new(
            "format_version",
            CHECKPOINT,
            format!("unsupported version {} (expected {})", version, CHECKPOINT_FORMAT_VERSION),
        ));
    }
    require_str(root, "pipeline_version", CHECKPOINT)?;

    let stage_number = require_u64(root, "stage", CHECKPOINT)?;
    let stage = u8::try_from(stage_number)
        .ok()
        .and_then(Stage::from_number)
        .ok_or_else(|| {
            ValidationError::new("stage", CHECKPOINT, format!("unknown stage {}", stage_number))
        })?;

    if let Some(status) = get(root, "status") {
        match status.as_str() {
            Some("complete") | Some("partial") => {}
            _ => {
                return Err(ValidationError::new(
                    "status",
                    CHECKPOINT,
                    "expected \"complete\" or \"partial\"",
                ))
            }
        }
    }

    require_timestamp(root, "created_at", CHECKPOINT)?;
    let duration = require_number(root, "stage_duration_secs", CHECKPOINT)?;
    if duration < 0.0 {
        return Err(ValidationError::new("stage_duration_secs", CHECKPOINT, "must not be negative"));
    }

    let source_ids = validate_source_ids(root)?;
    validate_sources(root, &source_ids)?;

    let payload = require_object(root, "payload", CHECKPOINT)?;
    let kind = require_str(payload, "kind", PAYLOAD)?;
    let expected = match stage {
        Stage::Segmentation => "segmented",
        Stage::Ranking => "ranked",
        Stage::Assembly => "assembled",
    };
    if kind != expected {
        return Err(ValidationError::new(
            "kind",
            PAYLOAD,
            format!("stage {} requires payload kind \"{}\", found \"{}\"", stage.number(), expected, kind),
        ));
    }

    let segments = require_array(payload, "segments", PAYLOAD)?;

    match stage {
        Stage::Segmentation => validate_segmented(payload, segments.len(), &source_ids)?,
        Stage::Ranking => validate_ranked(payload, &source_ids)?,
        Stage::Assembly => validate_assembled(payload, segments)?,
    }

    validate_segments(segments, stage, &source_ids)?;
    Ok(stage)
}

fn validate_source_ids(root: &Object) -> VResult<BTreeSet<String>> {
    let ids = require_array(root, "source_ids", CHECKPOINT)?;
    if ids.is_empty() {
        return Err(ValidationError::new("source_ids", CHECKPOINT, "must list at least one source"));
    }

    let mut set = BTreeSet::new();
    for id in ids {
        let id = id
            .as_str()
            .ok_or_else(|| ValidationError::new("source_ids", CHECKPOINT, "expected strings"))?;
        if !set.insert(id.to_string()) {
            return Err(ValidationError::new(
                "source_ids",
                CHECKPOINT,
                format!("duplicate source id {}", id),
            ));
        }
    }
    Ok(set)
}

fn validate_sources(root: &Object, source_ids: &BTreeSet<String>) -> VResult<()> {
    let sources = require_array(root, "sources", CHECKPOINT)?;

    for (i, source) in sources.iter().enumerate() {
        let obj = source.as_object().ok_or_else(|| {
            ValidationError::new("sources", format!("source #{}", i), "expected an object")
        })?;
        let id = require_str(obj, "id", &format!("source #{}", i))?;
        let location = format!("source {}", id);

        if !source_ids.contains(id) {
            return Err(ValidationError::source("id", id, "not listed in source_ids"));
        }
        require_str(obj, "path", &location)?;
        require_positive(obj, "duration_secs", &location)?;
        require_positive(obj, "frame_rate", &location)?;
        for field in ["width", "height"] {
            if require_u64(obj, field, &location)? == 0 {
                return Err(ValidationError::source(field, id, "must be greater than zero"));
            }
        }
        require_bool(obj, "has_audio", &location)?;
        require_timestamp(obj, "recorded_at", &location)?;
    }
    Ok(())
}

fn validate_segmented(payload: &Object, segment_count: usize, source_ids: &BTreeSet<String>) -> VResult<()> {
    require_positive(payload, "sample_interval_secs", PAYLOAD)?;

    let params = require_object(payload, "segmenter", PAYLOAD)?;
    let location = "payload.segmenter";
    let min = require_positive(params, "min_segment_secs", location)?;
    let max = require_positive(params, "max_segment_secs", location)?;
    if min > max {
        return Err(ValidationError::new(
            "max_segment_secs",
            location,
            "must not be smaller than min_segment_secs",
        ));
    }
    optional_enum::<ShortFragmentPolicy>(params, "short_fragment_policy", location)?;
    optional_enum::<TailPolicy>(params, "tail_policy", location)?;

    validate_metric_streams(payload, source_ids, true)?;

    let total = require_u64(payload, "total_segments", PAYLOAD)?;
    if total as usize != segment_count {
        return Err(ValidationError::new(
            "total_segments",
            PAYLOAD,
            format!("declares {} segments but the list holds {}", total, segment_count),
        ));
    }
    Ok(())
}

fn validate_ranked(payload: &Object, source_ids: &BTreeSet<String>) -> VResult<()> {
    let threshold = require_number(payload, "min_quality_threshold", PAYLOAD)?;
    if !is_valid_score(threshold) {
        return Err(ValidationError::new(
            "min_quality_threshold",
            PAYLOAD,
            format!("{} is outside [1.0, 10.0]", threshold),
        ));
    }

    let weights = require_array(payload, "score_weights", PAYLOAD)?;
    let mut seen = BTreeSet::new();
    let mut total = 0.0;
    for weight in weights {
        let obj = weight
            .as_object()
            .ok_or_else(|| ValidationError::new("score_weights", PAYLOAD, "expected objects"))?;
        let metric: MetricKind = require_enum(obj, "metric", "payload.score_weights")?;
        let value = require_number(obj, "weight", "payload.score_weights")?;
        if value < 0.0 {
            return Err(ValidationError::new(
                "score_weights",
                PAYLOAD,
                format!("weight for {} is negative", metric),
            ));
        }
        if !seen.insert(metric) {
            return Err(ValidationError::new(
                "score_weights",
                PAYLOAD,
                format!("duplicate weight for {}", metric),
            ));
        }
        total += value;
    }
    if let Some(missing) = MetricKind::ALL.iter().find(|m| !seen.contains(*m)) {
        return Err(ValidationError::new(
            "score_weights",
            PAYLOAD,
            format!("missing weight for {}", missing),
        ));
    }
    if (total - 1.0).abs() > WEIGHT_SUM_EPSILON {
        return Err(ValidationError::new(
            "score_weights",
            PAYLOAD,
            format!("weights must sum to 1.0, got {:.3}", total),
        ));
    }

    require_u64(payload, "eligible_count", PAYLOAD)?;
    validate_metric_streams(payload, source_ids, false)?;
    Ok(())
}

fn validate_assembled(payload: &Object, segments: &[Value]) -> VResult<()> {
    require_positive(payload, "target_duration", PAYLOAD)?;
    let actual = require_number(payload, "actual_duration", PAYLOAD)?;
    if actual < 0.0 {
        return Err(ValidationError::new("actual_duration", PAYLOAD, "must not be negative"));
    }
    let algorithm = require_str(payload, "selection_algorithm", PAYLOAD)?;
    if algorithm.is_empty() {
        return Err(ValidationError::new("selection_algorithm", PAYLOAD, "must not be empty"));
    }
    let spacing = require_number(payload, "min_spacing_secs", PAYLOAD)?;
    if spacing < 0.0 {
        return Err(ValidationError::new("min_spacing_secs", PAYLOAD, "must not be negative"));
    }
    let variety = require_number(payload, "variety_score", PAYLOAD)?;
    if !(0.0..=1.0).contains(&variety) {
        return Err(ValidationError::new("variety_score", PAYLOAD, format!("{} is outside [0, 1]", variety)));
    }
    optional_bool(payload, "target_shortfall", PAYLOAD)?;

    let total: f64 = segments
        .iter()
        .filter_map(|s| s.get("duration").and_then(Value::as_f64))
        .sum();
    if (total - actual).abs() > TIME_EPSILON * (segments.len().max(1) as f64) {
        return Err(ValidationError::new(
            "actual_duration",
            PAYLOAD,
            format!("{:.3} does not match the selected segments ({:.3})", actual, total),
        ));
    }
    Ok(())
}

fn validate_metric_streams(payload: &Object, source_ids: &BTreeSet<String>, required: bool) -> VResult<()> {
    let streams = match get(payload, "metric_streams") {
        Some(_) => require_array(payload, "metric_streams", PAYLOAD)?,
        None if required => {
            return Err(ValidationError::new("metric_streams", PAYLOAD, "required field is missing"))
        }
        None => return Ok(()),
    };

    for (i, stream) in streams.iter().enumerate() {
        let obj = stream.as_object().ok_or_else(|| {
            ValidationError::new("metric_streams", format!("metric stream #{}", i), "expected an object")
        })?;
        let id = require_str(obj, "source_id", &format!("metric stream #{}", i))?;
        let location = format!("metric stream {}", id);
        if !source_ids.contains(id) {
            return Err(ValidationError::new("source_id", location, "not listed in source_ids"));
        }
        require_positive(obj, "interval_secs", &location)?;

        let samples = require_array(obj, "samples", &location)?;
        let mut last_time = f64::NEG_INFINITY;
        for sample in samples {
            let sample = sample
                .as_object()
                .ok_or_else(|| ValidationError::new("samples", location.clone(), "expected objects"))?;
            let time = require_number(sample, "time", &location)?;
            if time < 0.0 || time < last_time {
                return Err(ValidationError::new(
                    "time",
                    location,
                    format!("sample at {} is negative or out of order", time),
                ));
            }
            last_time = time;

            let scores = require_object(sample, "scores", &location)?;
            for (key, score) in scores {
                if serde_json::from_value::<MetricKind>(Value::String(key.clone())).is_err() {
                    return Err(ValidationError::new(
                        "scores",
                        location,
                        format!("unknown metric {}", key),
                    ));
                }
                match score.as_f64() {
                    Some(v) if is_valid_score(v) => {}
                    _ => {
                        return Err(ValidationError::new(
                            "scores",
                            location,
                            format!("{} score at {}s is outside [1.0, 10.0]", key, time),
                        ))
                    }
                }
            }
            optional_bool(sample, "scene_cut", &location)?;
        }
    }
    Ok(())
}

fn validate_segments(segments: &[Value], stage: Stage, source_ids: &BTreeSet<String>) -> VResult<()> {
    let mut seen = HashSet::new();
    let mut last_per_source: HashMap<String, (f64, String)> = HashMap::new();
    let mut last_global: Option<DateTime<FixedOffset>> = None;
    let scored = stage >= Stage::Ranking;

    for (i, segment) in segments.iter().enumerate() {
        let obj = segment.as_object().ok_or_else(|| {
            ValidationError::new("segments", format!("segment #{}", i), "expected an object")
        })?;

        let id = match get(obj, "segment_id").and_then(Value::as_str) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => {
                return Err(ValidationError::segment(
                    "segment_id",
                    &format!("#{}", i),
                    "required non-empty string",
                ))
            }
        };
        let location = format!("segment {}", id);

        if !seen.insert(id.clone()) {
            return Err(ValidationError::segment("segment_id", &id, "duplicate segment id"));
        }

        let source = require_str(obj, "source_id", &location)?;
        if !source_ids.contains(source) {
            return Err(ValidationError::segment(
                "source_id",
                &id,
                format!("{} is not listed in source_ids", source),
            ));
        }

        let start = require_number(obj, "start_time", &location)?;
        if start < 0.0 {
            return Err(ValidationError::segment("start_time", &id, "must not be negative"));
        }
        let end = require_number(obj, "end_time", &location)?;
        if end <= start {
            return Err(ValidationError::segment(
                "end_time",
                &id,
                format!("end_time {} must be greater than start_time {}", end, start),
            ));
        }
        let duration = require_number(obj, "duration", &location)?;
        if (duration - (end - start)).abs() > TIME_EPSILON {
            return Err(ValidationError::segment(
                "duration",
                &id,
                format!("{} does not equal end_time - start_time ({})", duration, end - start),
            ));
        }
        if duration < MIN_SEGMENT_SECS - TIME_EPSILON || duration > MAX_SEGMENT_SECS + TIME_EPSILON {
            return Err(ValidationError::segment(
                "duration",
                &id,
                format!("{} is outside [{}, {}]", duration, MIN_SEGMENT_SECS, MAX_SEGMENT_SECS),
            ));
        }

        if let Some((previous_end, previous_id)) = last_per_source.get(source) {
            if start < previous_end - TIME_EPSILON {
                return Err(ValidationError::segment(
                    "start_time",
                    &id,
                    format!(
                        "{} overlaps or precedes segment {} ending at {}",
                        format_span(start, end),
                        previous_id,
                        format_seconds(*previous_end)
                    ),
                ));
            }
        }
        last_per_source.insert(source.to_string(), (end, id.clone()));

        for field in MetricKind::ALL
            .iter()
            .map(MetricKind::score_field)
            .chain(std::iter::once("quality_score"))
        {
            match optional_number(obj, field, &location)? {
                Some(v) if !is_valid_score(v) => {
                    return Err(ValidationError::segment(
                        field,
                        &id,
                        format!("{} is outside [1.0, 10.0]", v),
                    ))
                }
                Some(_) => {}
                None if scored => {
                    return Err(ValidationError::segment(field, &id, "required field is missing"))
                }
                None => {}
            }
        }

        match get(obj, "tags") {
            Some(tags) => {
                let tags = tags
                    .as_array()
                    .ok_or_else(|| ValidationError::segment("tags", &id, "expected an array"))?;
                for tag in tags {
                    if serde_json::from_value::<ClassificationTag>(tag.clone()).is_err() {
                        return Err(ValidationError::segment("tags", &id, format!("unknown tag {}", tag)));
                    }
                }
                if scored && tags.is_empty() {
                    return Err(ValidationError::segment("tags", &id, "scored segments carry at least one tag"));
                }
            }
            None if scored => {
                return Err(ValidationError::segment("tags", &id, "required field is missing"))
            }
            None => {}
        }

        optional_bool(obj, "eligible", &location)?;
        optional_bool(obj, "included", &location)?;
        optional_bool(obj, "manually_edited", &location)?;

        if stage == Stage::Assembly {
            let global = require_timestamp(obj, "global_start", &location)?;
            if let Some(previous) = last_global {
                if global < previous {
                    return Err(ValidationError::segment(
                        "global_start",
                        &id,
                        "segments are not in chronological order",
                    ));
                }
            }
            last_global = Some(global);

            let index = require_u64(obj, "timeline_index", &location)?;
            if index as usize != i {
                return Err(ValidationError::segment(
                    "timeline_index",
                    &id,
                    format!("expected {}, found {}", i, index),
                ));
            }
        }
    }
    Ok(())
}

/// Field lookup treating `null` as absent.
fn get<'a>(obj: &'a Object, key: &str) -> Option<&'a Value> {
    obj.get(key).filter(|v| !v.is_null())
}

fn missing(key: &str, location: &str) -> ValidationError {
    ValidationError::new(key, location, "required field is missing")
}

fn require_number(obj: &Object, key: &str, location: &str) -> VResult<f64> {
    let value = get(obj, key).ok_or_else(|| missing(key, location))?;
    value
        .as_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| ValidationError::new(key, location, "expected a finite number"))
}

fn optional_number(obj: &Object, key: &str, location: &str) -> VResult<Option<f64>> {
    match get(obj, key) {
        Some(_) => require_number(obj, key, location).map(Some),
        None => Ok(None),
    }
}

fn require_positive(obj: &Object, key: &str, location: &str) -> VResult<f64> {
    let value = require_number(obj, key, location)?;
    if value <= 0.0 {
        return Err(ValidationError::new(key, location, "must be greater than zero"));
    }
    Ok(value)
}

fn require_u64(obj: &Object, key: &str, location: &str) -> VResult<u64> {
    let value = get(obj, key).ok_or_else(|| missing(key, location))?;
    value
        .as_u64()
        .ok_or_else(|| ValidationError::new(key, location, "expected a non-negative integer"))
}

fn require_str<'a>(obj: &'a Object, key: &str, location: &str) -> VResult<&'a str> {
    let value = get(obj, key).ok_or_else(|| missing(key, location))?;
    value
        .as_str()
        .ok_or_else(|| ValidationError::new(key, location, "expected a string"))
}

fn require_bool(obj: &Object, key: &str, location: &str) -> VResult<bool> {
    let value = get(obj, key).ok_or_else(|| missing(key, location))?;
    value
        .as_bool()
        .ok_or_else(|| ValidationError::new(key, location, "expected true or false"))
}

fn optional_bool(obj: &Object, key: &str, location: &str) -> VResult<Option<bool>> {
    match get(obj, key) {
        Some(_) => require_bool(obj, key, location).map(Some),
        None => Ok(None),
    }
}

fn require_array<'a>(obj: &'a Object, key: &str, location: &str) -> VResult<&'a Vec<Value>> {
    let value = get(obj, key).ok_or_else(|| missing(key, location))?;
    value
        .as_array()
        .ok_or_else(|| ValidationError::new(key, location, "expected an array"))
}

fn require_object<'a>(obj: &'a Object, key: &str, location: &str) -> VResult<&'a Object> {
    let value = get(obj, key).ok_or_else(|| missing(key, location))?;
    value
        .as_object()
        .ok_or_else(|| ValidationError::new(key, location, "expected an object"))
}

fn require_timestamp(obj: &Object, key: &str, location: &str) -> VResult<DateTime<FixedOffset>> {
    let raw = require_str(obj, key, location)?;
    DateTime::parse_from_rfc3339(raw)
        .map_err(|e| ValidationError::new(key, location, format!("invalid RFC 3339 timestamp: {}", e)))
}

fn require_enum<T: DeserializeOwned>(obj: &Object, key: &str, location: &str) -> VResult<T> {
    let value = get(obj, key).ok_or_else(|| missing(key, location))?;
    serde_json::from_value(value.clone())
        .map_err(|_| ValidationError::new(key, location, format!("unknown value {}", value)))
}

fn optional_enum<T: DeserializeOwned>(obj: &Object, key: &str, location: &str) -> VResult<Option<T>> {
    match get(obj, key) {
        Some(_) => require_enum(obj, key, location).map(Some),
        None => Ok(None),
    }
}
