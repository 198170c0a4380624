//! Stage checkpoint store.
//!
//! One file per stage lives in the checkpoint directory. Every load reads
//! the file afresh and validates it, so manual edits made between runs are
//! always picked up.

use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, warn};

use vreel_models::{Checkpoint, Segment, SegmentEdit, SegmentId, Stage};

use crate::error::{StorageError, StorageResult, ValidationError};
use crate::fs_utils::{remove_if_exists, write_atomic};
use crate::lock::RunLock;
use crate::validate::{validate_checkpoint, validate_checkpoint_value};

/// Filesystem-backed checkpoint store.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File name of a stage's checkpoint.
    pub fn file_name(stage: Stage) -> &'static str {
        match stage {
            Stage::Segmentation => "stage1_segmented.json",
            Stage::Ranking => "stage2_ranked.json",
            Stage::Assembly => "stage3_assembled.json",
        }
    }

    pub fn path_for(&self, stage: Stage) -> PathBuf {
        self.dir.join(Self::file_name(stage))
    }

    /// Where a halted stage leaves its partial output.
    pub fn partial_path_for(&self, stage: Stage) -> PathBuf {
        let name = Self::file_name(stage).replace(".json", ".partial.json");
        self.dir.join(name)
    }

    /// Take the exclusive run lock for this directory.
    pub fn lock(&self, run_id: &str) -> StorageResult<RunLock> {
        RunLock::acquire(&self.dir, run_id)
    }

    pub async fn exists(&self, stage: Stage) -> bool {
        fs::try_exists(self.path_for(stage)).await.unwrap_or(false)
    }

    /// Validate and atomically write a checkpoint.
    ///
    /// Complete checkpoints go to the stage file and clear any partial
    /// output of the same stage; partial checkpoints go to the partial file.
    pub async fn save(&self, checkpoint: &Checkpoint) -> StorageResult<PathBuf> {
        let value = serde_json::to_value(checkpoint)?;
        validate_checkpoint_value(&value)?;

        let stage = checkpoint.stage;
        let path = if checkpoint.is_partial() {
            self.partial_path_for(stage)
        } else {
            self.path_for(stage)
        };

        let data = serde_json::to_vec_pretty(&value)?;
        write_atomic(&path, &data).await?;

        if !checkpoint.is_partial() {
            remove_if_exists(self.partial_path_for(stage)).await?;
        }

        info!(
            stage = stage.number(),
            status = ?checkpoint.status,
            segments = checkpoint.segments().len(),
            path = %path.display(),
            "Checkpoint written"
        );
        Ok(path)
    }

    /// Load the complete checkpoint of a stage.
    pub async fn load(&self, stage: Stage) -> StorageResult<Checkpoint> {
        let path = self.path_for(stage);
        let checkpoint = validate_checkpoint(&path).await?;

        if checkpoint.stage != stage {
            return Err(ValidationError::new(
                "stage",
                "checkpoint",
                format!("{} holds stage {}, expected {}", path.display(), checkpoint.stage, stage),
            )
            .into());
        }
        if checkpoint.is_partial() {
            return Err(ValidationError::new(
                "status",
                "checkpoint",
                "partial output cannot be consumed by later stages",
            )
            .into());
        }

        debug!(stage = stage.number(), path = %path.display(), "Checkpoint loaded");
        Ok(checkpoint)
    }

    /// Load the partial output of a halted stage, if any.
    pub async fn load_partial(&self, stage: Stage) -> StorageResult<Option<Checkpoint>> {
        match validate_checkpoint(self.partial_path_for(stage)).await {
            Ok(checkpoint) => Ok(Some(checkpoint)),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Remove checkpoints of `stage` and every later stage.
    ///
    /// Returns the stages whose complete checkpoint was removed.
    pub async fn invalidate_from(&self, stage: Stage) -> StorageResult<Vec<Stage>> {
        let mut removed = Vec::new();
        for later in stage.and_later() {
            if remove_if_exists(self.path_for(later)).await? {
                removed.push(later);
            }
            remove_if_exists(self.partial_path_for(later)).await?;
        }

        if !removed.is_empty() {
            warn!(
                from_stage = stage.number(),
                removed = ?removed.iter().map(Stage::number).collect::<Vec<_>>(),
                "Invalidated downstream checkpoints"
            );
        }
        Ok(removed)
    }

    /// Apply a manual edit to one segment of a stored checkpoint.
    ///
    /// The edited checkpoint is validated before it replaces the old file.
    pub async fn edit_segment(
        &self,
        stage: Stage,
        segment_id: &SegmentId,
        edit: &SegmentEdit,
    ) -> StorageResult<Segment> {
        let mut checkpoint = self.load(stage).await?;

        let segment = checkpoint
            .segments_mut()
            .iter_mut()
            .find(|s| &s.segment_id == segment_id)
            .ok_or_else(|| StorageError::SegmentNotFound(segment_id.to_string()))?;
        edit.apply(segment);
        let updated = segment.clone();

        self.save(&checkpoint).await?;
        info!(stage = stage.number(), segment_id = %segment_id, "Segment edited");
        Ok(updated)
    }
}
