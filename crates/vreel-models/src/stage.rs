//! Pipeline stage identifiers and stage parameters.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::segment::{MAX_SEGMENT_SECS, MIN_SEGMENT_SECS};

/// One of the ordered pipeline steps.
///
/// Serialized as its stage number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub enum Stage {
    Segmentation,
    Ranking,
    Assembly,
}

impl Stage {
    /// Stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Segmentation, Stage::Ranking, Stage::Assembly];

    pub fn number(&self) -> u8 {
        match self {
            Stage::Segmentation => 1,
            Stage::Ranking => 2,
            Stage::Assembly => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Stage::Segmentation),
            2 => Some(Stage::Ranking),
            3 => Some(Stage::Assembly),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Segmentation => "segmentation",
            Stage::Ranking => "ranking",
            Stage::Assembly => "assembly",
        }
    }

    /// Stage whose checkpoint this stage consumes.
    pub fn previous(&self) -> Option<Stage> {
        Stage::from_number(self.number().saturating_sub(1))
    }

    pub fn next(&self) -> Option<Stage> {
        Stage::from_number(self.number() + 1)
    }

    /// This stage and every stage after it.
    pub fn and_later(&self) -> impl Iterator<Item = Stage> {
        let n = self.number();
        Stage::ALL.into_iter().filter(move |s| s.number() >= n)
    }
}

impl TryFrom<u8> for Stage {
    type Error = String;

    fn try_from(n: u8) -> Result<Self, Self::Error> {
        Stage::from_number(n).ok_or_else(|| format!("unknown stage number {}", n))
    }
}

impl From<Stage> for u8 {
    fn from(stage: Stage) -> u8 {
        stage.number()
    }
}

impl JsonSchema for Stage {
    fn schema_name() -> String {
        "Stage".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        <u8>::json_schema(gen)
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.number(), self.as_str())
    }
}

/// Whether a checkpoint holds a finished stage output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    #[default]
    Complete,
    /// Output of a stage that halted mid-way; never consumed by later stages
    Partial,
}

/// What to do with a fragment that closes before reaching the minimum length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum ShortFragmentPolicy {
    /// Keep the segment open so the fragment becomes part of the following one
    #[default]
    MergeIntoNext,
    /// Discard the fragment and start a fresh segment at the cut
    Drop,
}

/// What to do with a below-minimum remainder at the end of a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema, Default)]
#[serde(rename_all = "snake_case")]
pub enum TailPolicy {
    /// Extend the preceding segment, rebalancing the two if that exceeds the maximum
    #[default]
    MergeIntoPrevious,
    /// Discard the remainder
    Drop,
}

/// Segmentation constraints recorded in the stage-1 checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SegmenterParams {
    pub min_segment_secs: f64,
    pub max_segment_secs: f64,
    #[serde(default)]
    pub short_fragment_policy: ShortFragmentPolicy,
    #[serde(default)]
    pub tail_policy: TailPolicy,
}

impl Default for SegmenterParams {
    fn default() -> Self {
        Self {
            min_segment_secs: MIN_SEGMENT_SECS,
            max_segment_secs: MAX_SEGMENT_SECS,
            short_fragment_policy: ShortFragmentPolicy::default(),
            tail_policy: TailPolicy::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_numbering() {
        assert_eq!(Stage::Ranking.number(), 2);
        assert_eq!(Stage::Ranking.previous(), Some(Stage::Segmentation));
        assert_eq!(Stage::Segmentation.previous(), None);
        assert_eq!(Stage::Assembly.next(), None);
        assert_eq!(
            Stage::Ranking.and_later().collect::<Vec<_>>(),
            vec![Stage::Ranking, Stage::Assembly]
        );
    }

    #[test]
    fn test_stage_serializes_as_number() {
        assert_eq!(serde_json::to_string(&Stage::Assembly).unwrap(), "3");
        let stage: Stage = serde_json::from_str("1").unwrap();
        assert_eq!(stage, Stage::Segmentation);
        assert!(serde_json::from_str::<Stage>("7").is_err());
    }

    #[test]
    fn test_policy_defaults() {
        let params = SegmenterParams::default();
        assert_eq!(params.short_fragment_policy, ShortFragmentPolicy::MergeIntoNext);
        assert_eq!(params.tail_policy, TailPolicy::MergeIntoPrevious);
        assert_eq!(
            serde_json::to_string(&TailPolicy::MergeIntoPrevious).unwrap(),
            "\"merge_into_previous\""
        );
    }
}
