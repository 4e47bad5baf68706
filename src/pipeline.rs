//! End-to-end narration of one document.
//!
//! Each document gets a job directory `<output_dir>/<slug>/` holding the
//! checkpoint (`state.json`), the segment list (`chunks.json`), per-segment
//! audio under `chunks/` and the merged `<slug>.wav`. Calling
//! [`Narrator::narrate`] again for the same document resumes the job.

use std::path::{Path, PathBuf};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::audio::AudioMerger;
use crate::config::NarrationConfig;
use crate::document::Document;
use crate::job::{chunk_path, Checkpoint, JobState, ProgressObserver, ResumableExecutor, SegmentRegistry, Stage};
use crate::text::{voice_summary, ContentFilter, Segmenter};
use crate::voice::{CharacterRegistry, VoiceAssigner};
use crate::{NarrateError, Result, SynthesisEngine};

pub const STATE_FILE: &str = "state.json";
pub const CHUNKS_FILE: &str = "chunks.json";
pub const CHUNK_DIR: &str = "chunks";

/// Outcome of one [`Narrator::narrate`] call.
#[derive(Debug, Clone, PartialEq)]
pub struct NarrationReport {
    pub job_id: String,
    pub job_dir: PathBuf,
    /// Stage the job was left in. `Synthesis` means failed segments remain.
    pub stage: Stage,
    pub total_segments: usize,
    pub synthesized: usize,
    pub skipped: usize,
    pub failed_ids: Vec<usize>,
    /// Speaker label and segment count, in order of first appearance.
    pub voices: Vec<(String, usize)>,
    pub merged_audio: Option<PathBuf>,
}

impl NarrationReport {
    /// One line telling the user where the audio went or how to continue.
    pub fn status_line(&self) -> String {
        if let Some(path) = &self.merged_audio {
            return format!("Saved to {}", path.display());
        }
        if self.stage == Stage::Cancelled {
            return format!(
                "Cancelled with {} of {} segments pending; re-run to resume",
                self.total_segments.saturating_sub(self.skipped + self.synthesized),
                self.total_segments
            );
        }
        if !self.failed_ids.is_empty() {
            return format!("Re-run to retry failed segments {:?}", self.failed_ids);
        }
        format!("Stopped at {:?}", self.stage)
    }
}

/// Drives a document through filtering, segmentation, voice planning,
/// synthesis and merging.
pub struct Narrator<E: SynthesisEngine, M: AudioMerger> {
    config: NarrationConfig,
    registry: CharacterRegistry,
    engine: E,
    merger: M,
    cancel: Arc<AtomicBool>,
    observer: Option<Box<dyn ProgressObserver>>,
}

impl<E: SynthesisEngine, M: AudioMerger> Narrator<E, M> {
    pub fn new(config: NarrationConfig, registry: CharacterRegistry, engine: E, merger: M) -> Self {
        Self {
            config,
            registry,
            engine,
            merger,
            cancel: Arc::new(AtomicBool::new(false)),
            observer: None,
        }
    }

    pub fn with_observer(mut self, observer: impl ProgressObserver + 'static) -> Self {
        self.observer = Some(Box::new(observer));
        self
    }

    pub fn config(&self) -> &NarrationConfig {
        &self.config
    }

    pub fn registry(&self) -> &CharacterRegistry {
        &self.registry
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Setting this flag cancels the running job before its next segment.
    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    /// Directory holding all files of the job for `document`.
    pub fn job_dir(&self, document: &Document) -> PathBuf {
        self.config.output_dir.join(document.slug())
    }

    pub fn narrate(&mut self, document: &Document) -> Result<NarrationReport> {
        self.config.validate()?;
        let job_dir = self.job_dir(document);
        let state_path = job_dir.join(STATE_FILE);
        let chunks_path = job_dir.join(CHUNKS_FILE);
        let chunk_dir = job_dir.join(CHUNK_DIR);

        let existing = if self.config.recover_corrupted_state {
            Checkpoint::open_or_recover(&state_path)?
        } else {
            Checkpoint::open(&state_path)?
        };

        let (mut checkpoint, mut segments) = match existing {
            Some(checkpoint) => self.resume(checkpoint, &chunks_path)?,
            None => self.prepare(document, &job_dir, &state_path, &chunks_path)?,
        };

        // Voice planning always runs so edited reference audio is picked up on resume.
        if checkpoint.state().stage() < Stage::VoicePlanning {
            checkpoint.advance_stage(Stage::VoicePlanning)?;
        }
        let plan = match VoiceAssigner::new(&self.registry, &self.config).plan(&mut segments.chunks) {
            Ok(plan) => plan,
            Err(e) => {
                checkpoint.fail(e.to_string())?;
                return Err(e);
            }
        };
        for profile in plan.values() {
            if let Err(e) = profile.validate() {
                log::warn!("Voice '{}' may sound poor: {e}", profile.name);
            }
        }
        segments.save(&chunks_path)?;
        let voices = voice_summary(&segments.chunks);

        let mut report = NarrationReport {
            job_id: checkpoint.state().job_id.clone(),
            job_dir: job_dir.clone(),
            stage: checkpoint.state().stage(),
            total_segments: segments.len(),
            synthesized: 0,
            skipped: 0,
            failed_ids: Vec::new(),
            voices,
            merged_audio: None,
        };

        if checkpoint.state().stage() <= Stage::Synthesis {
            let mut executor = ResumableExecutor::new(&mut self.engine, plan, &chunk_dir)
                .with_max_retries(self.config.max_retries)
                .with_cancel_flag(Arc::clone(&self.cancel));
            if let Some(path) = &self.config.model_path {
                executor = executor.with_model_path(path);
            }
            executor.set_observer(self.observer.take());
            let summary = executor.run_with(&mut checkpoint, &segments.chunks);
            self.observer = executor.set_observer(None);
            let summary = summary?;

            report.synthesized = summary.synthesized;
            report.skipped = summary.skipped;
            report.failed_ids = summary.failed_ids;
            report.stage = checkpoint.state().stage();

            if summary.cancelled {
                log::warn!("Job {} cancelled", report.job_id);
                return Ok(report);
            }
            if !report.failed_ids.is_empty() {
                log::warn!(
                    "Job {}: {} segments failed ({:?}); re-run to retry before merging",
                    report.job_id,
                    report.failed_ids.len(),
                    report.failed_ids
                );
                return Ok(report);
            }
        } else {
            report.skipped = segments.len();
        }

        let output = job_dir.join(format!("{}.wav", document.slug()));
        if checkpoint.state().stage() <= Stage::AudioMerge {
            checkpoint.advance_stage(Stage::AudioMerge)?;
            let mut ordered: Vec<_> = segments.chunks.iter().collect();
            ordered.sort_by_key(|s| (s.order, s.id));
            let paths: Vec<PathBuf> = ordered.iter().map(|s| chunk_path(&chunk_dir, s.id)).collect();
            checkpoint.set_audio_chunks(paths.clone())?;

            if let Err(e) = self.merger.merge(&paths, &output) {
                checkpoint.fail(e.to_string())?;
                return Err(e);
            }
        }

        checkpoint.advance_stage(Stage::Finalization)?;
        if !self.config.keep_chunks {
            remove_chunks(&chunk_dir)?;
        }
        checkpoint.advance_stage(Stage::Completed)?;
        log::info!("Job {} completed: {}", report.job_id, output.display());

        report.stage = Stage::Completed;
        report.merged_audio = Some(output);
        Ok(report)
    }

    /// Fresh job: clean, segment, persist the segment list, then the checkpoint.
    fn prepare(
        &self,
        document: &Document,
        job_dir: &Path,
        state_path: &Path,
        chunks_path: &Path,
    ) -> Result<(Checkpoint, SegmentRegistry)> {
        log::info!("Starting job for '{}' ({} chars)", document.name, document.text.len());

        let filter = ContentFilter::with_rules(self.registry.text_filters())?;
        let outcome = filter.filter(&document.text);
        if !outcome.removed.is_empty() {
            log::info!("Removed: {}", outcome.removed.join(", "));
        }
        if outcome.text.is_empty() {
            return Err(NarrateError::Document(format!(
                "'{}' has no narratable text after filtering",
                document.name
            )));
        }

        let segments = Segmenter::new(self.config.max_chars, self.config.max_words)
            .segment(&outcome.text, &self.registry);
        let segments = SegmentRegistry::new(segments);
        segments.save(chunks_path)?;

        let mut state = JobState::new(segments.len()).with_output_dir(job_dir);
        if let Some(source) = &document.source {
            state = state.with_input_file(source);
        }
        state.advance_stage(Stage::Segmentation)?;
        let checkpoint = Checkpoint::create(state_path, state)?;
        Ok((checkpoint, segments))
    }

    /// Existing job: reuse the persisted segment list so ids stay stable.
    fn resume(&self, mut checkpoint: Checkpoint, chunks_path: &Path) -> Result<(Checkpoint, SegmentRegistry)> {
        match checkpoint.state().stage() {
            Stage::Completed => return Err(NarrateError::JobTerminated(Stage::Completed)),
            stage @ (Stage::Failed | Stage::Cancelled) => {
                log::info!("Reopening job {} after {stage:?}", checkpoint.state().job_id);
                let reopened = checkpoint.state().reopen();
                checkpoint.replace(reopened)?;
            }
            _ => {}
        }

        if !chunks_path.exists() {
            return Err(NarrateError::CheckpointMismatch(format!(
                "{} exists but {} is missing",
                checkpoint.path().display(),
                chunks_path.display()
            )));
        }
        let segments = SegmentRegistry::load(chunks_path)?;
        if segments.len() != checkpoint.state().total_segments() {
            return Err(NarrateError::CheckpointMismatch(format!(
                "checkpoint has {} segments, {} lists {}",
                checkpoint.state().total_segments(),
                chunks_path.display(),
                segments.len()
            )));
        }

        let state = checkpoint.state();
        log::info!(
            "Resuming job {}: {} completed, {} pending, {} failed",
            state.job_id,
            state.completed_segments().len(),
            state.pending_segments().len(),
            state.failed_segments().len()
        );
        Ok((checkpoint, segments))
    }
}

fn remove_chunks(chunk_dir: &Path) -> Result<()> {
    if chunk_dir.exists() {
        std::fs::remove_dir_all(chunk_dir)?;
        log::debug!("Removed {}", chunk_dir.display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{NarrationReport, Narrator, STATE_FILE};
    use crate::audio::WavMerger;
    use crate::job::{JobState, Stage};
    use crate::voice::CharacterRegistry;
    use crate::{Document, NarrateError, NarrationConfig, SynthesisEngine, SynthesisError, SynthesisResult, VoiceProfile};
    use std::path::Path;

    struct Silence;

    impl SynthesisEngine for Silence {
        type ModelParams = ();

        fn load_model_with_params(&mut self, _: &Path, _: ()) -> Result<(), SynthesisError> {
            Ok(())
        }

        fn unload_model(&mut self) {}

        fn synthesize(&mut self, _: &str, _: &VoiceProfile) -> Result<SynthesisResult, SynthesisError> {
            Ok(SynthesisResult {
                samples: vec![0.0; 160],
                sample_rate: 16_000,
                channels: 1,
            })
        }
    }

    fn config(root: &Path) -> NarrationConfig {
        NarrationConfig {
            reference_audio_dir: root.join("voices"),
            output_dir: root.join("out"),
            ..Default::default()
        }
    }

    #[test]
    fn missing_reference_audio_fails_the_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut narrator = Narrator::new(config(dir.path()), CharacterRegistry::new(), Silence, WavMerger::new(0));
        let document = Document::new("Quiet Book", "The rain kept falling.");

        let err = narrator.narrate(&document).unwrap_err();
        assert!(matches!(err, NarrateError::VoiceReferenceMissing { .. }));

        let state = JobState::load(&narrator.job_dir(&document).join(STATE_FILE)).unwrap();
        assert_eq!(state.stage(), Stage::Failed);
        assert!(state.error.is_some());
    }

    fn report(stage: Stage, failed_ids: Vec<usize>) -> NarrationReport {
        NarrationReport {
            job_id: "job".into(),
            job_dir: "out/book".into(),
            stage,
            total_segments: 4,
            synthesized: 1,
            skipped: 1,
            failed_ids,
            voices: Vec::new(),
            merged_audio: None,
        }
    }

    #[test]
    fn status_line_matches_how_the_run_ended() {
        let cancelled = report(Stage::Cancelled, Vec::new()).status_line();
        assert!(cancelled.starts_with("Cancelled with 2 of 4 segments pending"));
        assert!(!cancelled.contains("failed"));

        let failed = report(Stage::Synthesis, vec![2, 3]).status_line();
        assert_eq!(failed, "Re-run to retry failed segments [2, 3]");

        let mut done = report(Stage::Completed, Vec::new());
        done.merged_audio = Some("out/book/book.wav".into());
        assert_eq!(done.status_line(), "Saved to out/book/book.wav");
    }

    #[test]
    fn empty_document_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut narrator = Narrator::new(config(dir.path()), CharacterRegistry::new(), Silence, WavMerger::new(0));
        let err = narrator.narrate(&Document::new("Blank", "  \n\n 12 \n")).unwrap_err();
        assert!(matches!(err, NarrateError::Document(_)));
    }

    #[test]
    fn job_dir_uses_the_document_slug() {
        let dir = tempfile::tempdir().unwrap();
        let narrator = Narrator::new(config(dir.path()), CharacterRegistry::new(), Silence, WavMerger::new(0));
        assert_eq!(
            narrator.job_dir(&Document::new("Divine Rivals!", "")),
            dir.path().join("out").join("divine_rivals")
        );
    }
}
