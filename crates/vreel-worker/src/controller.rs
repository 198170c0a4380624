//! Pipeline controller.
//!
//! Drives the stages through the transitions in [`crate::state`], loading
//! each stage's input freshly from the checkpoint store and writing its
//! output atomically. A failing stage halts the run; extraction failures
//! keep whatever stage-1 output exists as a partial checkpoint.

use futures::future::join_all;
use metrics::{counter, histogram};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{watch, Semaphore};
use tracing::{error, info, Instrument};
use uuid::Uuid;

use vreel_media::{analyze_source, FrameSource, MetricSet, SamplingOptions};
use vreel_models::{
    AssembledPayload, Checkpoint, MetricStream, RankedPayload, Segment, SegmentedPayload,
    SkippedSource, Source, SourceId, Stage, StagePayload, SELECTION_ALGORITHM,
};
use vreel_storage::{write_atomic, CheckpointStore, ValidationError};

use crate::assembler::{assemble, AssemblyParams};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, PipelineResult};
use crate::logging::StageLogger;
use crate::ranker::{rank_segments, RankerParams};
use crate::segmenter::Segmenter;
use crate::state::{PipelineState, RunMode};

/// Metric names as constants for consistency.
pub mod names {
    pub const STAGE_DURATION_SECONDS: &str = "vreel_stage_duration_seconds";
    pub const SOURCE_ANALYSIS_SECONDS: &str = "vreel_source_analysis_seconds";
    pub const RUNS_TOTAL: &str = "vreel_runs_total";
    pub const SOURCES_SKIPPED_TOTAL: &str = "vreel_sources_skipped_total";
    pub const SEGMENTS_PRODUCED_TOTAL: &str = "vreel_segments_produced_total";
}

/// Summary of one invocation.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub mode: RunMode,
    pub resumed: bool,
    pub final_state: PipelineState,
    pub stages_executed: Vec<Stage>,
    pub eligible_count: Option<usize>,
    pub selected_count: Option<usize>,
    pub actual_duration: Option<f64>,
    pub warnings: Vec<String>,
    pub checkpoints: Vec<PathBuf>,
}

impl RunReport {
    fn new(run_id: &str, mode: RunMode) -> Self {
        Self {
            run_id: run_id.to_string(),
            mode,
            resumed: mode.is_resume(),
            final_state: PipelineState::entry_for(mode.first_stage()),
            stages_executed: Vec::new(),
            eligible_count: None,
            selected_count: None,
            actual_duration: None,
            warnings: Vec::new(),
            checkpoints: Vec::new(),
        }
    }

    fn record(&mut self, output: &StageOutput) {
        let checkpoint = &output.checkpoint;
        self.stages_executed.push(checkpoint.stage);
        self.checkpoints.push(output.path.clone());
        self.warnings.extend(output.warnings.iter().cloned());

        match &checkpoint.payload {
            StagePayload::Segmented(_) => {}
            StagePayload::Ranked(p) => self.eligible_count = Some(p.eligible_count),
            StagePayload::Assembled(p) => {
                self.selected_count = Some(p.segments.len());
                self.actual_duration = Some(p.actual_duration);
            }
        }
    }

    /// Write the report as `run_report.json` in `dir`.
    pub async fn write_to(&self, dir: &Path) -> PipelineResult<PathBuf> {
        let path = dir.join("run_report.json");
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| PipelineError::config(format!("cannot serialize run report: {}", e)))?;
        write_atomic(&path, &data).await?;
        Ok(path)
    }
}

/// What a stage produced.
struct StageOutput {
    checkpoint: Checkpoint,
    path: PathBuf,
    warnings: Vec<String>,
}

impl StageOutput {
    fn new(checkpoint: Checkpoint) -> Self {
        Self {
            checkpoint,
            path: PathBuf::new(),
            warnings: Vec::new(),
        }
    }
}

/// Validate a checkpoint file without running anything.
pub async fn validate_checkpoint(path: impl AsRef<Path>) -> PipelineResult<Checkpoint> {
    Ok(vreel_storage::validate_checkpoint(path).await?)
}

/// Orchestrates Segmentation, Ranking and Assembly.
pub struct PipelineController {
    config: PipelineConfig,
    store: CheckpointStore,
    frame_source: Arc<dyn FrameSource>,
    metric_set: Arc<MetricSet>,
    cancel: watch::Receiver<bool>,
    run_id: String,
}

impl PipelineController {
    pub fn new(config: PipelineConfig, frame_source: Arc<dyn FrameSource>) -> Self {
        // Without a caller-supplied channel the run can never be cancelled
        let (_tx, cancel) = watch::channel(false);
        Self {
            store: CheckpointStore::new(&config.checkpoint_dir),
            metric_set: Arc::new(MetricSet::standard(&config.metrics)),
            config,
            frame_source,
            cancel,
            run_id: Uuid::new_v4().to_string(),
        }
    }

    /// Observe `true` on this channel as a request to stop.
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn store(&self) -> &CheckpointStore {
        &self.store
    }

    fn check_cancelled(&self) -> PipelineResult<()> {
        if *self.cancel.borrow() {
            return Err(PipelineError::Cancelled);
        }
        Ok(())
    }

    /// Execute the stages selected by `mode`.
    pub async fn run(&self, mode: RunMode) -> PipelineResult<RunReport> {
        let _lock = self.store.lock(&self.run_id)?;
        let mut report = RunReport::new(&self.run_id, mode);
        let started = Instant::now();

        info!(
            run_id = %self.run_id,
            mode = %mode,
            checkpoint_dir = %self.store.dir().display(),
            sources = self.config.inputs.len(),
            "Pipeline run started"
        );

        match self.run_stages(mode, &mut report).await {
            Ok(()) => {
                let labels = [("outcome", "completed".to_string())];
                counter!(names::RUNS_TOTAL, &labels).increment(1);
                info!(
                    run_id = %self.run_id,
                    state = %report.final_state,
                    eligible = ?report.eligible_count,
                    selected = ?report.selected_count,
                    elapsed_secs = started.elapsed().as_secs_f64(),
                    "Pipeline run finished"
                );
                Ok(report)
            }
            Err(e) => {
                report.final_state = PipelineState::Halted;
                let labels = [("outcome", e.kind().to_string())];
                counter!(names::RUNS_TOTAL, &labels).increment(1);
                error!(
                    run_id = %self.run_id,
                    state = %report.final_state,
                    error_kind = e.kind(),
                    completed_stages = ?report.stages_executed.iter().map(Stage::number).collect::<Vec<_>>(),
                    "Pipeline halted: {}", e
                );
                Err(e)
            }
        }
    }

    async fn run_stages(&self, mode: RunMode, report: &mut RunReport) -> PipelineResult<()> {
        let first = mode.first_stage();
        let mut state = PipelineState::entry_for(first);

        // Input is loaded and validated before anything is computed
        let mut previous = match first.previous() {
            Some(required) => Some(self.load_input(first, required).await?),
            None => None,
        };

        for stage in mode.stages() {
            let next = state.transition(stage).ok_or_else(|| {
                PipelineError::config(format!("stage {} cannot run from state {}", stage, state))
            })?;

            let carried = if stage == Stage::Ranking && mode.is_resume() {
                self.manual_edits().await
            } else {
                Vec::new()
            };

            let output = self.execute_stage(stage, previous.as_ref(), &carried).await?;
            report.record(&output);
            state = next;
            report.final_state = state;
            previous = Some(output.checkpoint);
        }
        Ok(())
    }

    /// Run one stage on `previous` and persist its checkpoint.
    ///
    /// Stage 1 ignores `previous`; stages 2 and 3 require the checkpoint of
    /// the stage before them (stage 2 also accepts its own output). Holds the
    /// run lock for the duration of the stage.
    pub async fn run_stage(&self, stage: Stage, previous: Option<&Checkpoint>) -> PipelineResult<Checkpoint> {
        let _lock = self.store.lock(&self.run_id)?;
        self.execute_stage(stage, previous, &[])
            .await
            .map(|output| output.checkpoint)
    }

    async fn execute_stage(
        &self,
        stage: Stage,
        previous: Option<&Checkpoint>,
        carried: &[Segment],
    ) -> PipelineResult<StageOutput> {
        let logger = StageLogger::new(&self.run_id, stage);
        let span = logger.create_span();
        self.stage_body(stage, previous, carried, &logger)
            .instrument(span)
            .await
    }

    async fn stage_body(
        &self,
        stage: Stage,
        previous: Option<&Checkpoint>,
        carried: &[Segment],
        logger: &StageLogger,
    ) -> PipelineResult<StageOutput> {
        self.check_cancelled()?;
        let input = self.stage_input(stage, previous)?;
        logger.log_start(&format!("{} sources configured", self.config.inputs.len()));
        let started = Instant::now();

        let result = match (stage, input) {
            (Stage::Segmentation, _) => self.segment_sources(logger).await,
            (Stage::Ranking, Some(input)) => self.rank(input, carried, logger),
            (Stage::Assembly, Some(input)) => self.assemble(input, logger),
            (stage, None) => Err(PipelineError::CheckpointMissing {
                stage,
                required: stage.previous().unwrap_or(Stage::Segmentation),
            }),
        };
        let mut output = match result {
            Ok(output) => output,
            Err(e) => {
                logger.log_error(&e.to_string());
                return Err(e);
            }
        };

        // A cancelled stage leaves nothing behind
        self.check_cancelled()?;

        let elapsed = started.elapsed().as_secs_f64();
        output.checkpoint = output.checkpoint.with_duration(elapsed);

        // Existing checkpoints are only replaced once the stage has succeeded
        if let Some(next) = stage.next() {
            self.store.invalidate_from(next).await?;
        }
        output.path = self.store.save(&output.checkpoint).await?;

        let labels = [("stage", stage.as_str().to_string())];
        histogram!(names::STAGE_DURATION_SECONDS, &labels).record(elapsed);
        logger.log_completion(&format!(
            "{} segments in {:.2}s -> {}",
            output.checkpoint.segments().len(),
            elapsed,
            output.path.display()
        ));
        Ok(output)
    }

    /// Check that `previous` may feed `stage`.
    fn stage_input<'a>(&self, stage: Stage, previous: Option<&'a Checkpoint>) -> PipelineResult<Option<&'a Checkpoint>> {
        let Some(required) = stage.previous() else {
            return Ok(None);
        };
        let Some(checkpoint) = previous else {
            return Err(PipelineError::CheckpointMissing { stage, required });
        };

        let accepted = checkpoint.stage == required
            || (stage == Stage::Ranking && checkpoint.stage == Stage::Ranking);
        if !accepted {
            return Err(ValidationError::new(
                "stage",
                "checkpoint",
                format!("stage {} cannot consume a stage {} checkpoint", stage, checkpoint.stage),
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

        self.check_sources(checkpoint)?;
        Ok(Some(checkpoint))
    }

    /// A resumed run without configured inputs adopts the checkpoint's sources.
    fn check_sources(&self, checkpoint: &Checkpoint) -> PipelineResult<()> {
        if self.config.inputs.is_empty() {
            return Ok(());
        }
        let expected = self.config.source_ids();
        if checkpoint.source_ids != expected {
            return Err(PipelineError::source_mismatch(format!(
                "stage {} checkpoint was computed from [{}], this run has [{}]",
                checkpoint.stage,
                join_ids(checkpoint.source_ids.iter()),
                join_ids(expected.iter()),
            )));
        }
        Ok(())
    }

    async fn load_input(&self, stage: Stage, required: Stage) -> PipelineResult<Checkpoint> {
        match self.store.load(required).await {
            Ok(checkpoint) => Ok(checkpoint),
            Err(e) if e.is_not_found() => Err(PipelineError::CheckpointMissing { stage, required }),
            Err(e) => Err(e.into()),
        }
    }

    /// Manually edited segments of the stage-2 checkpoint about to be replaced.
    async fn manual_edits(&self) -> Vec<Segment> {
        match self.store.load(Stage::Ranking).await {
            Ok(checkpoint) => checkpoint
                .segments()
                .iter()
                .filter(|s| s.manually_edited)
                .cloned()
                .collect(),
            Err(e) if e.is_not_found() => Vec::new(),
            Err(e) => {
                StageLogger::new(&self.run_id, Stage::Ranking)
                    .log_warning(&format!("existing stage 2 checkpoint not reused: {}", e));
                Vec::new()
            }
        }
    }

    async fn segment_sources(&self, logger: &StageLogger) -> PipelineResult<StageOutput> {
        let source_ids = self.config.source_ids();
        if source_ids.is_empty() {
            return Err(PipelineError::config("no input recordings configured"));
        }

        let mut sources = Vec::new();
        let mut skipped = Vec::new();
        let mut warnings = Vec::new();

        for path in &self.config.inputs {
            self.check_cancelled()?;
            let id = SourceId::from_path(path);
            match self.frame_source.probe(path).await {
                Ok(mut source) => {
                    source.id = id;
                    sources.push(source);
                }
                Err(e) => {
                    let err = PipelineError::from_media(id.as_str(), e);
                    if !err.is_recoverable() {
                        return Err(err);
                    }
                    skip_source(logger, &mut skipped, &mut warnings, id, path, &err);
                }
            }
        }

        logger.log_progress(&format!("analysing {} of {} sources", sources.len(), source_ids.len()));
        let outcomes = self.analyze_all(&sources).await;

        let segmenter = Segmenter::new(self.config.segmenter);
        let mut kept = Vec::new();
        let mut streams = Vec::new();
        let mut segments = Vec::new();
        let mut failure: Option<PipelineError> = None;
        let mut cancelled = false;

        for (source, outcome) in sources.into_iter().zip(outcomes) {
            match outcome {
                Ok(stream) => {
                    segments.extend(segmenter.segment(&source, &stream));
                    streams.push(stream);
                    kept.push(source);
                }
                Err(PipelineError::Cancelled) => cancelled = true,
                Err(err) if err.is_recoverable() => {
                    let path = source.path.clone();
                    skip_source(logger, &mut skipped, &mut warnings, source.id, &path, &err);
                }
                Err(err) => {
                    logger.log_error(&err.to_string());
                    failure.get_or_insert(err);
                }
            }
        }

        if cancelled {
            return Err(PipelineError::Cancelled);
        }

        counter!(names::SEGMENTS_PRODUCED_TOTAL).increment(segments.len() as u64);
        let checkpoint = Checkpoint::new(
            Stage::Segmentation,
            source_ids,
            kept,
            StagePayload::Segmented(SegmentedPayload {
                sample_interval_secs: self.config.sample_interval_secs,
                segmenter: self.config.segmenter,
                metric_streams: streams,
                skipped_sources: skipped,
                total_segments: segments.len(),
                segments,
            }),
        );

        if let Some(err) = failure {
            if err.preserves_partial() {
                match self.store.save(&checkpoint.partial()).await {
                    Ok(path) => logger.log_warning(&format!(
                        "partial stage 1 output preserved at {}",
                        path.display()
                    )),
                    Err(e) => logger.log_error(&format!("could not preserve partial output: {}", e)),
                }
            }
            return Err(err);
        }

        if checkpoint.segments().is_empty() {
            let msg = "no candidate segments were produced".to_string();
            logger.log_warning(&msg);
            warnings.push(msg);
        }

        let mut output = StageOutput::new(checkpoint);
        output.warnings = warnings;
        Ok(output)
    }

    async fn analyze_all(&self, sources: &[Source]) -> Vec<PipelineResult<MetricStream>> {
        let semaphore = Arc::new(Semaphore::new(self.config.max_source_parallel));
        let sampling = self.config.sampling();

        let futures = sources.iter().map(|source| {
            let semaphore = Arc::clone(&semaphore);
            async move {
                let _permit = semaphore.acquire_owned().await.map_err(|_| {
                    PipelineError::ExtractionFailure {
                        source_id: source.id.to_string(),
                        reason: "analysis pool closed".to_string(),
                    }
                })?;
                self.check_cancelled()?;
                self.analyze_one(source, &sampling).await
            }
        });

        join_all(futures).await
    }

    async fn analyze_one(&self, source: &Source, sampling: &SamplingOptions) -> PipelineResult<MetricStream> {
        let started = Instant::now();
        let analysis = analyze_source(
            self.frame_source.as_ref(),
            source,
            sampling,
            Arc::clone(&self.metric_set),
            self.config.batch_size,
        );

        let mut cancel = self.cancel.clone();
        let result = tokio::select! {
            result = tokio::time::timeout(self.config.source_timeout, analysis) => result,
            _ = cancelled(&mut cancel) => return Err(PipelineError::Cancelled),
        };

        match result {
            Ok(Ok(stream)) => {
                histogram!(names::SOURCE_ANALYSIS_SECONDS).record(started.elapsed().as_secs_f64());
                Ok(stream)
            }
            Ok(Err(e)) => Err(PipelineError::from_media(source.id.as_str(), e)),
            Err(_) => Err(PipelineError::ResourceExhaustion {
                source_id: source.id.to_string(),
                reason: format!(
                    "analysis exceeded the {:.0}s timeout",
                    self.config.source_timeout.as_secs_f64()
                ),
            }),
        }
    }

    fn rank(&self, previous: &Checkpoint, carried: &[Segment], logger: &StageLogger) -> PipelineResult<StageOutput> {
        let (segments, streams) = match &previous.payload {
            StagePayload::Segmented(p) => (p.segments.clone(), p.metric_streams.clone()),
            StagePayload::Ranked(p) => (p.segments.clone(), p.metric_streams.clone()),
            StagePayload::Assembled(_) => {
                return Err(ValidationError::new("kind", "payload", "ranking needs segmented or ranked input").into())
            }
        };

        let segments = apply_manual_edits(segments, carried);
        let params = RankerParams {
            min_quality_threshold: self.config.min_quality_threshold,
            score_weights: self.config.score_weights.clone(),
        };
        let ranking = rank_segments(segments, &streams, &params)?;

        logger.log_progress(&format!(
            "{} of {} segments eligible at threshold {:.1}",
            ranking.eligible_count,
            ranking.segments.len(),
            params.min_quality_threshold
        ));

        let checkpoint = Checkpoint::new(
            Stage::Ranking,
            previous.source_ids.clone(),
            previous.sources.clone(),
            StagePayload::Ranked(RankedPayload {
                min_quality_threshold: params.min_quality_threshold,
                score_weights: params.score_weights,
                eligible_count: ranking.eligible_count,
                metric_streams: streams,
                segments: ranking.segments,
            }),
        );
        Ok(StageOutput::new(checkpoint))
    }

    fn assemble(&self, previous: &Checkpoint, logger: &StageLogger) -> PipelineResult<StageOutput> {
        let StagePayload::Ranked(ranked) = &previous.payload else {
            return Err(ValidationError::new("kind", "payload", "assembly needs ranked input").into());
        };

        let params = AssemblyParams {
            target_duration_secs: self.config.target_duration_secs,
            min_spacing_secs: self.config.min_spacing_secs,
            min_quality_threshold: ranked.min_quality_threshold,
        };
        let assembly = assemble(&ranked.segments, &previous.sources, &params)?;

        for warning in &assembly.warnings {
            logger.log_warning(warning);
        }
        logger.log_progress(&format!(
            "selected {} segments, {:.1}s of {:.1}s, variety {:.2}",
            assembly.segments.len(),
            assembly.actual_duration,
            params.target_duration_secs,
            assembly.variety_score
        ));

        let checkpoint = Checkpoint::new(
            Stage::Assembly,
            previous.source_ids.clone(),
            previous.sources.clone(),
            StagePayload::Assembled(AssembledPayload {
                target_duration: params.target_duration_secs,
                actual_duration: assembly.actual_duration,
                selection_algorithm: SELECTION_ALGORITHM.to_string(),
                min_spacing_secs: params.min_spacing_secs,
                variety_score: assembly.variety_score,
                target_shortfall: assembly.target_shortfall,
                segments: assembly.segments,
            }),
        );

        let mut output = StageOutput::new(checkpoint);
        output.warnings = assembly.warnings;
        Ok(output)
    }
}

/// Replace segments with their manually edited counterparts when the
/// timing still matches.
fn apply_manual_edits(segments: Vec<Segment>, edits: &[Segment]) -> Vec<Segment> {
    segments
        .into_iter()
        .map(|segment| {
            edits
                .iter()
                .find(|e| {
                    e.segment_id == segment.segment_id
                        && e.source_id == segment.source_id
                        && (e.start_time - segment.start_time).abs() < 1e-6
                        && (e.end_time - segment.end_time).abs() < 1e-6
                })
                .cloned()
                .unwrap_or(segment)
        })
        .collect()
}

fn skip_source(
    logger: &StageLogger,
    skipped: &mut Vec<SkippedSource>,
    warnings: &mut Vec<String>,
    id: SourceId,
    path: &Path,
    err: &PipelineError,
) {
    let msg = format!("skipping source {}: {}", id, err);
    logger.log_warning(&msg);
    warnings.push(msg);
    counter!(names::SOURCES_SKIPPED_TOTAL).increment(1);
    skipped.push(SkippedSource {
        id,
        path: path.to_path_buf(),
        reason: err.to_string(),
    });
}

fn join_ids<'a>(ids: impl Iterator<Item = &'a SourceId>) -> String {
    ids.map(SourceId::as_str).collect::<Vec<_>>().join(", ")
}

/// Resolves once `true` is observed; never resolves if the sender is gone.
async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow_and_update() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vreel_models::SegmentId;

    fn segment(id: &str, start: f64) -> Segment {
        Segment::new(SegmentId::from(id), SourceId::from("a"), start, start + 10.0)
    }

    #[test]
    fn test_manual_edits_replace_matching_segments() {
        let mut edited = segment("a_seg_0001", 10.0);
        edited.manually_edited = true;
        edited.quality_score = Some(9.0);

        let mut moved = segment("a_seg_0000", 3.0);
        moved.manually_edited = true;

        let out = apply_manual_edits(vec![segment("a_seg_0000", 0.0), segment("a_seg_0001", 10.0)], &[edited.clone(), moved]);
        assert!(!out[0].manually_edited, "timing changed, edit is stale");
        assert_eq!(out[1], edited);
    }

    #[test]
    fn test_report_records_stage_outputs() {
        let mut report = RunReport::new("run", RunMode::From(Stage::Ranking));
        assert!(report.resumed);
        assert_eq!(report.final_state, PipelineState::Segmented);

        let checkpoint = Checkpoint::new(
            Stage::Ranking,
            [SourceId::from("a")].into_iter().collect(),
            Vec::new(),
            StagePayload::Ranked(RankedPayload {
                min_quality_threshold: 7.0,
                score_weights: vreel_models::default_score_weights(),
                eligible_count: 3,
                metric_streams: Vec::new(),
                segments: Vec::new(),
            }),
        );
        let mut output = StageOutput::new(checkpoint);
        output.warnings.push("careful".to_string());
        report.record(&output);

        assert_eq!(report.stages_executed, vec![Stage::Ranking]);
        assert_eq!(report.eligible_count, Some(3));
        assert_eq!(report.warnings, vec!["careful".to_string()]);
    }

    #[tokio::test]
    async fn test_cancelled_future_waits_for_signal() {
        let (tx, mut rx) = watch::channel(false);
        let waiter = tokio::spawn(async move { cancelled(&mut rx).await });
        tx.send(true).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
