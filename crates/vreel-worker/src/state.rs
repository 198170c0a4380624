//! Pipeline state machine.
//!
//! Every legal move is listed in [`TRANSITIONS`]; the controller never
//! decides stage order any other way.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use vreel_models::Stage;

/// Where a run stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Pending,
    Segmented,
    Ranked,
    Assembled,
    /// A stage failed; earlier checkpoints are left for a later resume
    Halted,
}

/// `(from, stage, to)`: running `stage` in state `from` leads to `to`.
pub const TRANSITIONS: [(PipelineState, Stage, PipelineState); 3] = [
    (PipelineState::Pending, Stage::Segmentation, PipelineState::Segmented),
    (PipelineState::Segmented, Stage::Ranking, PipelineState::Ranked),
    (PipelineState::Ranked, Stage::Assembly, PipelineState::Assembled),
];

impl PipelineState {
    /// State reached after successfully running `stage` from `self`.
    pub fn transition(self, stage: Stage) -> Option<PipelineState> {
        TRANSITIONS
            .iter()
            .find(|(from, s, _)| *from == self && *s == stage)
            .map(|(_, _, to)| *to)
    }

    /// State a run must be in before `stage` may execute.
    pub fn entry_for(stage: Stage) -> PipelineState {
        TRANSITIONS
            .iter()
            .find(|(_, s, _)| *s == stage)
            .map(|(from, _, _)| *from)
            .unwrap_or(PipelineState::Pending)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Pending => "pending",
            PipelineState::Segmented => "segmented",
            PipelineState::Ranked => "ranked",
            PipelineState::Assembled => "assembled",
            PipelineState::Halted => "halted",
        }
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What a single invocation executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "mode", content = "stage", rename_all = "snake_case")]
pub enum RunMode {
    /// Every stage from scratch
    #[default]
    All,
    /// Resume at a stage from the previous stage's checkpoint
    From(Stage),
    /// Exactly one stage
    Single(Stage),
}

impl RunMode {
    /// Stages executed, in order.
    pub fn stages(&self) -> Vec<Stage> {
        match self {
            RunMode::All => Stage::ALL.to_vec(),
            RunMode::From(stage) => stage.and_later().collect(),
            RunMode::Single(stage) => vec![*stage],
        }
    }

    pub fn first_stage(&self) -> Stage {
        match self {
            RunMode::All => Stage::Segmentation,
            RunMode::From(stage) | RunMode::Single(stage) => *stage,
        }
    }

    /// Whether the run begins from an existing checkpoint.
    pub fn is_resume(&self) -> bool {
        self.first_stage() != Stage::Segmentation
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::All => write!(f, "all"),
            RunMode::From(stage) => write!(f, "from:{}", stage.number()),
            RunMode::Single(stage) => write!(f, "single:{}", stage.number()),
        }
    }
}

impl FromStr for RunMode {
    type Err = String;

    /// Parses `all`, `from:<n>` or `single:<n>`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "all" {
            return Ok(RunMode::All);
        }

        let (mode, number) = s
            .split_once(':')
            .ok_or_else(|| format!("invalid run mode '{}'", s))?;
        let stage = number
            .parse::<u8>()
            .ok()
            .and_then(Stage::from_number)
            .ok_or_else(|| format!("invalid stage '{}' in run mode", number))?;

        match mode {
            "from" => Ok(RunMode::From(stage)),
            "single" => Ok(RunMode::Single(stage)),
            _ => Err(format!("invalid run mode '{}'", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transition_table() {
        assert_eq!(
            PipelineState::Pending.transition(Stage::Segmentation),
            Some(PipelineState::Segmented)
        );
        assert_eq!(
            PipelineState::Segmented.transition(Stage::Ranking),
            Some(PipelineState::Ranked)
        );
        assert_eq!(
            PipelineState::Ranked.transition(Stage::Assembly),
            Some(PipelineState::Assembled)
        );

        // Out-of-order moves are rejected
        assert_eq!(PipelineState::Pending.transition(Stage::Assembly), None);
        assert_eq!(PipelineState::Assembled.transition(Stage::Segmentation), None);
        assert_eq!(PipelineState::Halted.transition(Stage::Ranking), None);
    }

    #[test]
    fn test_entry_states() {
        assert_eq!(PipelineState::entry_for(Stage::Segmentation), PipelineState::Pending);
        assert_eq!(PipelineState::entry_for(Stage::Ranking), PipelineState::Segmented);
        assert_eq!(PipelineState::entry_for(Stage::Assembly), PipelineState::Ranked);
    }

    #[test]
    fn test_run_mode_stages() {
        assert_eq!(RunMode::All.stages(), Stage::ALL.to_vec());
        assert_eq!(RunMode::From(Stage::Segmentation).stages(), RunMode::All.stages());
        assert_eq!(
            RunMode::From(Stage::Ranking).stages(),
            vec![Stage::Ranking, Stage::Assembly]
        );
        assert_eq!(RunMode::Single(Stage::Ranking).stages(), vec![Stage::Ranking]);
        assert!(RunMode::Single(Stage::Assembly).is_resume());
        assert!(!RunMode::All.is_resume());
    }

    #[test]
    fn test_run_mode_parse() {
        assert_eq!("all".parse::<RunMode>().unwrap(), RunMode::All);
        assert_eq!("from:2".parse::<RunMode>().unwrap(), RunMode::From(Stage::Ranking));
        assert_eq!("Single:3".parse::<RunMode>().unwrap(), RunMode::Single(Stage::Assembly));
        assert!("from:4".parse::<RunMode>().is_err());
        assert!("resume".parse::<RunMode>().is_err());
        assert_eq!(RunMode::From(Stage::Ranking).to_string(), "from:2");
    }
}
