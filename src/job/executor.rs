//! Resumable batch synthesis.
//!
//! The executor walks the segments not yet completed in ascending id order,
//! synthesizes each one to a deterministic chunk path and records the outcome
//! in the checkpoint before moving on. Re-running it after a crash or a
//! cancellation picks up exactly where the checkpoint left off.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::checkpoint::Checkpoint;
use super::state::{JobState, Stage};
use crate::text::Segment;
use crate::voice::VoicePlan;
use crate::{NarrateError, Result, SynthesisEngine, SynthesisError, VoiceProfile};

/// Deterministic output path for a segment's audio.
pub fn chunk_path(chunk_dir: &Path, id: usize) -> PathBuf {
    chunk_dir.join(format!("chunk_{id:04}.wav"))
}

/// What happened to one segment.
#[derive(Debug, Clone, PartialEq)]
pub enum SegmentOutcome {
    Synthesized(PathBuf),
    Failed(String),
}

/// Reported to a [`ProgressObserver`] after every attempted segment.
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentProgress {
    pub id: usize,
    /// Completed segments so far, including earlier runs.
    pub done: usize,
    pub total: usize,
    pub outcome: SegmentOutcome,
}

pub trait ProgressObserver {
    fn on_segment(&mut self, progress: &SegmentProgress);
}

impl<F: FnMut(&SegmentProgress)> ProgressObserver for F {
    fn on_segment(&mut self, progress: &SegmentProgress) {
        self(progress)
    }
}

/// Totals for one executor run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    /// Segments synthesized by this run.
    pub synthesized: usize,
    /// Segments already completed before this run started.
    pub skipped: usize,
    /// Segments still failed when the run stopped, ascending.
    pub failed_ids: Vec<usize>,
    pub cancelled: bool,
}

/// Holds the engine's model for the duration of a run and unloads it on
/// every exit path.
pub struct EngineSession<'e, E: SynthesisEngine> {
    engine: &'e mut E,
}

impl<'e, E: SynthesisEngine> EngineSession<'e, E> {
    /// Load `model_path` if given. Engines without a separate model step
    /// can pass `None`.
    pub fn open(engine: &'e mut E, model_path: Option<&Path>) -> std::result::Result<Self, SynthesisError> {
        if let Some(path) = model_path {
            log::info!("Loading synthesis model from {}", path.display());
            engine.load_model(path)?;
        }
        Ok(Self { engine })
    }

    pub fn engine(&mut self) -> &mut E {
        &mut *self.engine
    }
}

impl<E: SynthesisEngine> Drop for EngineSession<'_, E> {
    fn drop(&mut self) {
        self.engine.unload_model();
    }
}

/// Drives synthesis of pending segments against a checkpoint file.
pub struct ResumableExecutor<E: SynthesisEngine> {
    engine: E,
    plan: VoicePlan,
    chunk_dir: PathBuf,
    model_path: Option<PathBuf>,
    max_retries: u32,
    cancel: Arc<AtomicBool>,
    observer: Option<Box<dyn ProgressObserver>>,
}

impl<E: SynthesisEngine> ResumableExecutor<E> {
    pub fn new(engine: E, plan: VoicePlan, chunk_dir: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            plan,
            chunk_dir: chunk_dir.into(),
            model_path: None,
            max_retries: 0,
            cancel: Arc::new(AtomicBool::new(false)),
            observer: None,
        }
    }

    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Extra attempts for transient engine errors within one run.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    /// Swap the observer, returning the previous one.
    pub fn set_observer(
        &mut self,
        observer: Option<Box<dyn ProgressObserver>>,
    ) -> Option<Box<dyn ProgressObserver>> {
        std::mem::replace(&mut self.observer, observer)
    }

    /// Share an existing cancellation flag.
    pub fn with_cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = flag;
        self
    }

    /// Flag checked before each segment. Setting it stops the run after the
    /// segment in flight and moves the job to `Cancelled`.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn into_engine(self) -> E {
        self.engine
    }

    /// Load or create the checkpoint at `state_path` and synthesize every
    /// segment not yet completed.
    pub fn run(&mut self, state_path: &Path, segments: &[Segment]) -> Result<RunSummary> {
        let mut checkpoint = match Checkpoint::open(state_path)? {
            Some(checkpoint) => checkpoint,
            None => Checkpoint::create(state_path, JobState::new(segments.len()))?,
        };
        self.run_with(&mut checkpoint, segments)
    }

    /// Same as [`ResumableExecutor::run`] with an already opened checkpoint.
    pub fn run_with(&mut self, checkpoint: &mut Checkpoint, segments: &[Segment]) -> Result<RunSummary> {
        let state = checkpoint.state();
        if state.stage().is_terminal() {
            return Err(NarrateError::JobTerminated(state.stage()));
        }
        if state.total_segments() != segments.len() {
            return Err(NarrateError::CheckpointMismatch(format!(
                "checkpoint has {} segments, job has {}",
                state.total_segments(),
                segments.len()
            )));
        }
        if let Some(segment) = segments.iter().find(|s| s.id >= segments.len()) {
            return Err(NarrateError::SegmentOutOfRange {
                id: segment.id,
                total: segments.len(),
            });
        }

        let mut pending: Vec<&Segment> = segments.iter().filter(|s| !state.is_completed(s.id)).collect();
        pending.sort_by_key(|s| s.id);
        let mut summary = RunSummary {
            skipped: segments.len() - pending.len(),
            ..RunSummary::default()
        };
        log::info!(
            "Job {}: {} completed, {} pending, {} previously failed",
            state.job_id,
            state.completed_segments().len(),
            pending.len(),
            state.failed_segments().len()
        );

        if checkpoint.state().stage() < Stage::Synthesis {
            checkpoint.advance_stage(Stage::Synthesis)?;
        }
        if pending.is_empty() {
            return Ok(summary);
        }

        let total = segments.len();
        let mut session = EngineSession::open(&mut self.engine, self.model_path.as_deref())?;

        for segment in pending {
            if self.cancel.load(Ordering::SeqCst) {
                log::warn!("Cancellation requested, stopping before segment {}", segment.id);
                checkpoint.advance_stage(Stage::Cancelled)?;
                summary.cancelled = true;
                break;
            }

            let output = chunk_path(&self.chunk_dir, segment.id);
            let voice_name = segment.voice.as_deref().unwrap_or(&segment.speaker);
            let result = match self.plan.get(voice_name) {
                Some(voice) => {
                    synthesize_with_retry(session.engine(), segment, voice, &output, self.max_retries)
                        .map_err(|e| e.to_string())
                }
                None => Err(format!("no voice '{voice_name}' for speaker '{}'", segment.speaker)),
            };

            let outcome = match result {
                Ok(path) => {
                    checkpoint.mark_completed(segment.id)?;
                    summary.synthesized += 1;
                    log::info!(
                        "Segment {} ({}) -> {}",
                        segment.id,
                        segment.speaker,
                        path.display()
                    );
                    SegmentOutcome::Synthesized(path)
                }
                Err(reason) => {
                    checkpoint.mark_failed(segment.id)?;
                    log::error!("Segment {} failed: {reason}", segment.id);
                    SegmentOutcome::Failed(reason)
                }
            };

            if let Some(observer) = self.observer.as_mut() {
                observer.on_segment(&SegmentProgress {
                    id: segment.id,
                    done: checkpoint.state().completed_segments().len(),
                    total,
                    outcome,
                });
            }
        }
        drop(session);

        summary.failed_ids = checkpoint.state().failed_segments().iter().copied().collect();
        log::info!(
            "Synthesis summary: {} synthesized, {} skipped, {} failed{}",
            summary.synthesized,
            summary.skipped,
            summary.failed_ids.len(),
            if summary.cancelled { " (cancelled)" } else { "" }
        );
        Ok(summary)
    }
}

fn synthesize_with_retry<E: SynthesisEngine>(
    engine: &mut E,
    segment: &Segment,
    voice: &VoiceProfile,
    output: &Path,
    max_retries: u32,
) -> std::result::Result<PathBuf, SynthesisError> {
    let mut attempt = 0;
    loop {
        // Whatever sits at `output` now is from an earlier, unrecorded attempt.
        match std::fs::remove_file(output) {
            Ok(()) => log::debug!("Segment {}: discarded stale {}", segment.id, output.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        let result = engine
            .synthesize_to_file(&segment.text, voice, output)
            .and_then(|path| {
                if path.is_file() {
                    Ok(path)
                } else {
                    Err(SynthesisError::MissingOutput(path))
                }
            });
        match result {
            Err(e) if e.is_transient() && attempt < max_retries => {
                attempt += 1;
                log::warn!(
                    "Segment {}: {e}; retrying ({attempt}/{max_retries})",
                    segment.id
                );
            }
            other => return other,
        }
    }
}
