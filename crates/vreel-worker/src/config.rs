//! Pipeline configuration.

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use vreel_media::{MetricConfig, SamplingOptions, DEFAULT_BATCH_SIZE, HD_ANALYSIS_WIDTH};
use vreel_models::{
    default_score_weights, is_valid_score, MetricKind, MetricWeight, SegmenterParams,
    ShortFragmentPolicy, SourceId, TailPolicy,
};

use crate::error::{PipelineError, PipelineResult};
use crate::state::RunMode;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Source recordings, in the order given
    pub inputs: Vec<PathBuf>,
    /// Directory receiving the run report
    pub output_dir: PathBuf,
    /// Directory holding stage checkpoints
    pub checkpoint_dir: PathBuf,
    /// Requested highlight length (seconds)
    pub target_duration_secs: f64,
    /// Minimum quality for a segment to be eligible
    pub min_quality_threshold: f64,
    /// Quality weights per metric
    pub score_weights: Vec<MetricWeight>,
    /// Seconds between sampled frames
    pub sample_interval_secs: f64,
    /// Analysis frame width
    pub analysis_width: u32,
    /// Minimum distance between two selected segments of one source (seconds)
    pub min_spacing_secs: f64,
    pub segmenter: SegmenterParams,
    pub metrics: MetricConfig,
    /// Maximum sources analysed concurrently
    pub max_source_parallel: usize,
    /// Per-source analysis timeout
    pub source_timeout: Duration,
    /// Frames scored per batch
    pub batch_size: usize,
    pub run_mode: RunMode,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            inputs: Vec::new(),
            output_dir: PathBuf::from("output"),
            checkpoint_dir: PathBuf::from("output/checkpoints"),
            target_duration_secs: 300.0,
            min_quality_threshold: 7.0,
            score_weights: default_score_weights(),
            sample_interval_secs: 1.0,
            analysis_width: SamplingOptions::default().analysis_width,
            min_spacing_secs: 15.0,
            segmenter: SegmenterParams::default(),
            metrics: MetricConfig::default(),
            max_source_parallel: 2,
            source_timeout: Duration::from_secs(1800), // 30 minutes
            batch_size: DEFAULT_BATCH_SIZE,
            run_mode: RunMode::All,
        }
    }
}

impl PipelineConfig {
    /// Create config from `VREEL_*` environment variables.
    pub fn from_env() -> PipelineResult<Self> {
        let defaults = Self::default();

        let inputs = std::env::var("VREEL_INPUTS")
            .map(|s| {
                s.split(',')
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .map(PathBuf::from)
                    .collect()
            })
            .unwrap_or_default();

        let output_dir = std::env::var("VREEL_OUTPUT_DIR")
            .map(PathBuf::from)
            .unwrap_or(defaults.output_dir);
        let checkpoint_dir = std::env::var("VREEL_CHECKPOINT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| output_dir.join("checkpoints"));

        let resize_to_hd = std::env::var("VREEL_RESIZE_TO_HD")
            .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        let analysis_width = if resize_to_hd {
            HD_ANALYSIS_WIDTH
        } else {
            env_parse("VREEL_ANALYSIS_WIDTH")?.unwrap_or(defaults.analysis_width)
        };

        let short_fragment_policy = match std::env::var("VREEL_SHORT_FRAGMENT_POLICY") {
            Ok(v) => parse_short_fragment_policy(&v)?,
            Err(_) => defaults.segmenter.short_fragment_policy,
        };
        let tail_policy = match std::env::var("VREEL_TAIL_POLICY") {
            Ok(v) => parse_tail_policy(&v)?,
            Err(_) => defaults.segmenter.tail_policy,
        };

        let run_mode = match std::env::var("VREEL_RUN_MODE") {
            Ok(v) => v.parse().map_err(PipelineError::config)?,
            Err(_) => defaults.run_mode,
        };

        let config = Self {
            inputs,
            output_dir,
            checkpoint_dir,
            target_duration_secs: env_parse("VREEL_TARGET_DURATION")?
                .unwrap_or(defaults.target_duration_secs),
            min_quality_threshold: env_parse("VREEL_MIN_QUALITY")?
                .unwrap_or(defaults.min_quality_threshold),
            score_weights: defaults.score_weights,
            sample_interval_secs: env_parse("VREEL_SAMPLE_INTERVAL")?
                .unwrap_or(defaults.sample_interval_secs),
            analysis_width,
            min_spacing_secs: env_parse("VREEL_MIN_SPACING_SECS")?
                .unwrap_or(defaults.min_spacing_secs),
            segmenter: SegmenterParams {
                short_fragment_policy,
                tail_policy,
                ..defaults.segmenter
            },
            metrics: MetricConfig {
                scene_cut_threshold: env_parse("VREEL_SCENE_CUT_THRESHOLD")?
                    .unwrap_or(defaults.metrics.scene_cut_threshold),
                ..defaults.metrics
            },
            max_source_parallel: env_parse("VREEL_MAX_SOURCE_PARALLEL")?
                .unwrap_or(defaults.max_source_parallel),
            source_timeout: Duration::from_secs(
                env_parse("VREEL_SOURCE_TIMEOUT_SECS")?.unwrap_or(defaults.source_timeout.as_secs()),
            ),
            batch_size: env_parse("VREEL_BATCH_SIZE")?.unwrap_or(defaults.batch_size),
            run_mode,
        };

        config.validate()?;
        Ok(config)
    }

    /// Check ranges and input paths.
    pub fn validate(&self) -> PipelineResult<()> {
        if !is_positive(self.target_duration_secs) {
            return Err(PipelineError::config("target duration must be greater than zero"));
        }
        if !is_valid_score(self.min_quality_threshold) {
            return Err(PipelineError::config(format!(
                "quality threshold {} is outside [1.0, 10.0]",
                self.min_quality_threshold
            )));
        }
        if !is_positive(self.sample_interval_secs) {
            return Err(PipelineError::config("sample interval must be greater than zero"));
        }
        if self.min_spacing_secs < 0.0 {
            return Err(PipelineError::config("minimum spacing must not be negative"));
        }
        if self.analysis_width < 2 {
            return Err(PipelineError::config("analysis width must be at least 2 pixels"));
        }
        if self.max_source_parallel == 0 {
            return Err(PipelineError::config("at least one source must be analysed at a time"));
        }
        let seg = &self.segmenter;
        if !is_positive(seg.min_segment_secs) || seg.min_segment_secs > seg.max_segment_secs {
            return Err(PipelineError::config(format!(
                "invalid segment bounds [{}, {}]",
                seg.min_segment_secs, seg.max_segment_secs
            )));
        }

        let total: f64 = self.score_weights.iter().map(|w| w.weight).sum();
        let covered = MetricKind::ALL
            .iter()
            .all(|k| self.score_weights.iter().any(|w| w.metric == *k));
        if !covered || (total - 1.0).abs() > 0.01 {
            return Err(PipelineError::config("score weights must cover every metric and sum to 1"));
        }

        if self.inputs.is_empty() && !self.run_mode.is_resume() {
            return Err(PipelineError::config("no input recordings given (VREEL_INPUTS)"));
        }

        let mut seen = BTreeSet::new();
        for path in &self.inputs {
            let is_mp4 = path
                .extension()
                .map(|e| e.eq_ignore_ascii_case("mp4"))
                .unwrap_or(false);
            if !is_mp4 {
                return Err(PipelineError::config(format!(
                    "{} is not an .mp4 file",
                    path.display()
                )));
            }
            if !seen.insert(SourceId::from_path(path)) {
                return Err(PipelineError::config(format!(
                    "duplicate source id for {}",
                    path.display()
                )));
            }
        }

        Ok(())
    }

    /// Identifiers of the configured inputs.
    pub fn source_ids(&self) -> BTreeSet<SourceId> {
        self.inputs.iter().map(SourceId::from_path).collect()
    }

    pub fn sampling(&self) -> SamplingOptions {
        SamplingOptions {
            interval_secs: self.sample_interval_secs,
            analysis_width: self.analysis_width,
        }
    }
}

fn is_positive(v: f64) -> bool {
    v.is_finite() && v > 0.0
}

/// Parse an optional variable; a value that is set but malformed is an error.
fn env_parse<T: std::str::FromStr>(key: &str) -> PipelineResult<Option<T>> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| PipelineError::config(format!("{} has an invalid value '{}'", key, raw.trim()))),
        Err(_) => Ok(None),
    }
}

fn parse_short_fragment_policy(value: &str) -> PipelineResult<ShortFragmentPolicy> {
    match value.trim().to_lowercase().as_str() {
        "merge_into_next" | "merge" => Ok(ShortFragmentPolicy::MergeIntoNext),
        "drop" => Ok(ShortFragmentPolicy::Drop),
        other => Err(PipelineError::config(format!("unknown short fragment policy '{}'", other))),
    }
}

fn parse_tail_policy(value: &str) -> PipelineResult<TailPolicy> {
    match value.trim().to_lowercase().as_str() {
        "merge_into_previous" | "merge" => Ok(TailPolicy::MergeIntoPrevious),
        "drop" => Ok(TailPolicy::Drop),
        other => Err(PipelineError::config(format!("unknown tail policy '{}'", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vreel_models::Stage;

    fn config_with(inputs: &[&str]) -> PipelineConfig {
        PipelineConfig {
            inputs: inputs.iter().map(PathBuf::from).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = config_with(&["a.mp4", "b.MP4"]);
        assert!(config.validate().is_ok());
        assert_eq!(config.min_spacing_secs, 15.0);
        assert_eq!(config.min_quality_threshold, 7.0);
        assert_eq!(config.source_ids().len(), 2);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(config_with(&["a.mov"]).validate().is_err());
        assert!(config_with(&["x/a.mp4", "y/a.mp4"]).validate().is_err());
        assert!(config_with(&[]).validate().is_err());

        let resume = PipelineConfig {
            run_mode: RunMode::From(Stage::Assembly),
            ..Default::default()
        };
        assert!(resume.validate().is_ok());
    }

    #[test]
    fn test_rejects_out_of_range_values() {
        let mut config = config_with(&["a.mp4"]);
        config.min_quality_threshold = 11.0;
        assert!(config.validate().is_err());

        let mut config = config_with(&["a.mp4"]);
        config.target_duration_secs = 0.0;
        assert!(config.validate().is_err());

        let mut config = config_with(&["a.mp4"]);
        config.score_weights.pop();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_policy_parsing() {
        assert_eq!(parse_tail_policy("drop").unwrap(), TailPolicy::Drop);
        assert_eq!(
            parse_short_fragment_policy("MERGE_INTO_NEXT").unwrap(),
            ShortFragmentPolicy::MergeIntoNext
        );
        assert!(parse_tail_policy("stretch").is_err());
    }

    #[test]
    fn test_malformed_number_is_a_config_error() {
        std::env::set_var("VREEL_TEST_MIN_QUALITY", "7,5");
        let err = env_parse::<f64>("VREEL_TEST_MIN_QUALITY").unwrap_err();
        assert!(matches!(err, PipelineError::Config(ref msg) if msg.contains("VREEL_TEST_MIN_QUALITY")));

        std::env::set_var("VREEL_TEST_MIN_QUALITY", " 6.5 ");
        assert_eq!(env_parse::<f64>("VREEL_TEST_MIN_QUALITY").unwrap(), Some(6.5));
        std::env::remove_var("VREEL_TEST_MIN_QUALITY");

        assert_eq!(env_parse::<f64>("VREEL_TEST_UNSET_VALUE").unwrap(), None);
    }
}
