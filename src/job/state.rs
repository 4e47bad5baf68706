use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::checkpoint::write_json_atomic;
use crate::{NarrateError, Result};

/// Job lifecycle. Variants are declared in pipeline order, so `Ord` is the
/// forward direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    Pending,
    DocumentLoad,
    TextCleaning,
    Segmentation,
    VoicePlanning,
    Synthesis,
    AudioMerge,
    Finalization,
    Completed,
    Failed,
    Cancelled,
}

impl Stage {
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Completed | Stage::Failed | Stage::Cancelled)
    }
}

/// Durable progress record for one job.
///
/// `completed_segments` and `failed_segments` are disjoint and both lie in
/// `0..total_segments`. Pending segments are derived, never stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobState {
    pub job_id: String,
    #[serde(default)]
    pub input_file: Option<PathBuf>,
    #[serde(default)]
    pub output_dir: PathBuf,
    stage: Stage,
    total_segments: usize,
    #[serde(default)]
    completed_segments: BTreeSet<usize>,
    #[serde(default)]
    failed_segments: BTreeSet<usize>,
    /// Chunk files in playback order, recorded once synthesis is done.
    #[serde(default)]
    pub audio_chunks: Vec<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub error: Option<String>,
}

impl JobState {
    pub fn new(total_segments: usize) -> Self {
        let now = Utc::now();
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            input_file: None,
            output_dir: PathBuf::new(),
            stage: Stage::Pending,
            total_segments,
            completed_segments: BTreeSet::new(),
            failed_segments: BTreeSet::new(),
            audio_chunks: Vec::new(),
            started_at: now,
            updated_at: now,
            completed_at: None,
            error: None,
        }
    }

    pub fn with_input_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.input_file = Some(path.into());
        self
    }

    pub fn with_output_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.output_dir = path.into();
        self
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn total_segments(&self) -> usize {
        self.total_segments
    }

    pub fn completed_segments(&self) -> &BTreeSet<usize> {
        &self.completed_segments
    }

    pub fn failed_segments(&self) -> &BTreeSet<usize> {
        &self.failed_segments
    }

    /// Ids neither completed nor failed, ascending.
    pub fn pending_segments(&self) -> Vec<usize> {
        (0..self.total_segments)
            .filter(|id| !self.completed_segments.contains(id) && !self.failed_segments.contains(id))
            .collect()
    }

    pub fn is_completed(&self, id: usize) -> bool {
        self.completed_segments.contains(&id)
    }

    /// Every segment has been synthesized.
    pub fn all_completed(&self) -> bool {
        self.completed_segments.len() == self.total_segments
    }

    /// Share of segments completed, 0–100. An empty job reports 0.
    pub fn progress_percentage(&self) -> f64 {
        if self.total_segments == 0 {
            return 0.0;
        }
        self.completed_segments.len() as f64 / self.total_segments as f64 * 100.0
    }

    /// Seconds from start to completion, or to the last update while running.
    pub fn duration_seconds(&self) -> f64 {
        let end = self.completed_at.unwrap_or(self.updated_at);
        (end - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    /// Move to `to`. Forward moves may skip stages; `Failed` and `Cancelled`
    /// are reachable from any non-terminal stage. Re-entering the current
    /// stage is a no-op.
    pub fn advance_stage(&mut self, to: Stage) -> Result<()> {
        if to == self.stage {
            return Ok(());
        }
        if self.stage.is_terminal() {
            return Err(NarrateError::JobTerminated(self.stage));
        }
        let allowed = matches!(to, Stage::Failed | Stage::Cancelled) || to > self.stage;
        if !allowed {
            return Err(NarrateError::InvalidStageTransition {
                from: self.stage,
                to,
            });
        }

        log::debug!("Job {}: {:?} -> {:?}", self.job_id, self.stage, to);
        self.stage = to;
        self.touch();
        if to.is_terminal() {
            self.completed_at = Some(self.updated_at);
        }
        Ok(())
    }

    /// Record a job-level failure and move to `Failed`.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        self.advance_stage(Stage::Failed)?;
        self.error = Some(error.into());
        Ok(())
    }

    /// Record a successful segment. A previously failed id is cleared.
    pub fn mark_completed(&mut self, id: usize) -> Result<()> {
        self.check_segment(id)?;
        self.failed_segments.remove(&id);
        self.completed_segments.insert(id);
        self.touch();
        Ok(())
    }

    /// Record a failed attempt. Failure is advisory: the id stays eligible
    /// for the next run. A completed id is never demoted.
    pub fn mark_failed(&mut self, id: usize) -> Result<()> {
        self.check_segment(id)?;
        if self.completed_segments.contains(&id) {
            log::warn!("Segment {id} already completed, ignoring failure");
            return Ok(());
        }
        self.failed_segments.insert(id);
        self.touch();
        Ok(())
    }

    /// A fresh `Synthesis`-stage record for a job that ended early, keeping
    /// every completed segment.
    pub fn reopen(&self) -> Self {
        let mut state = Self {
            stage: Stage::Synthesis,
            failed_segments: BTreeSet::new(),
            audio_chunks: Vec::new(),
            completed_at: None,
            error: None,
            ..self.clone()
        };
        state.touch();
        state
    }

    /// Check the set invariants of a record read from disk.
    pub fn validate(&self) -> std::result::Result<(), String> {
        if let Some(id) = self
            .completed_segments
            .iter()
            .chain(&self.failed_segments)
            .find(|&&id| id >= self.total_segments)
        {
            return Err(format!("segment {id} exceeds total of {}", self.total_segments));
        }
        if let Some(id) = self.completed_segments.intersection(&self.failed_segments).next() {
            return Err(format!("segment {id} is both completed and failed"));
        }
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let state: Self = serde_json::from_str(&contents).map_err(|e| {
            NarrateError::CheckpointCorrupted {
                path: path.to_path_buf(),
                reason: e.to_string(),
            }
        })?;
        state.validate().map_err(|reason| NarrateError::CheckpointCorrupted {
            path: path.to_path_buf(),
            reason,
        })?;
        Ok(state)
    }

    /// Persist atomically: a reader sees either the previous or the new record.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }

    fn check_segment(&self, id: usize) -> Result<()> {
        if self.stage.is_terminal() {
            return Err(NarrateError::JobTerminated(self.stage));
        }
        if id >= self.total_segments {
            return Err(NarrateError::SegmentOutOfRange {
                id,
                total: self.total_segments,
            });
        }
        Ok(())
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::{JobState, Stage};
    use crate::NarrateError;
    use chrono::{Duration, TimeZone, Utc};

    #[test]
    fn pending_is_everything_not_completed_or_failed() {
        let mut state = JobState::new(5);
        state.mark_completed(0).unwrap();
        state.mark_completed(3).unwrap();
        state.mark_failed(1).unwrap();
        assert_eq!(state.pending_segments(), vec![2, 4]);
    }

    #[test]
    fn progress_counts_only_completed_segments() {
        assert_eq!(JobState::new(0).progress_percentage(), 0.0);

        let mut state = JobState::new(4);
        state.mark_completed(0).unwrap();
        state.mark_failed(1).unwrap();
        assert!((state.progress_percentage() - 25.0).abs() < 1e-9);
    }

    #[test]
    fn duration_runs_to_completion_or_last_update() {
        let mut state = JobState::new(1);
        state.started_at = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        state.updated_at = state.started_at + Duration::milliseconds(2_500);
        assert!((state.duration_seconds() - 2.5).abs() < 1e-9);

        state.completed_at = Some(state.started_at + Duration::seconds(90));
        assert!((state.duration_seconds() - 90.0).abs() < 1e-9);
    }

    #[test]
    fn completing_a_failed_segment_clears_the_failure() {
        let mut state = JobState::new(3);
        state.mark_failed(1).unwrap();
        state.mark_completed(1).unwrap();
        assert!(state.failed_segments().is_empty());
        assert!(state.is_completed(1));
    }

    #[test]
    fn completed_segment_is_never_demoted() {
        let mut state = JobState::new(3);
        state.mark_completed(2).unwrap();
        state.mark_failed(2).unwrap();
        assert!(state.is_completed(2));
        assert!(state.failed_segments().is_empty());
    }

    #[test]
    fn out_of_range_ids_are_rejected() {
        let mut state = JobState::new(3);
        assert!(matches!(
            state.mark_completed(3),
            Err(NarrateError::SegmentOutOfRange { id: 3, total: 3 })
        ));
        assert!(state.mark_failed(7).is_err());
    }

    #[test]
    fn stages_only_move_forward() {
        let mut state = JobState::new(1);
        state.advance_stage(Stage::Segmentation).unwrap();
        state.advance_stage(Stage::Synthesis).unwrap();
        state.advance_stage(Stage::Synthesis).unwrap();
        assert!(matches!(
            state.advance_stage(Stage::VoicePlanning),
            Err(NarrateError::InvalidStageTransition {
                from: Stage::Synthesis,
                to: Stage::VoicePlanning
            })
        ));
        assert_eq!(state.stage(), Stage::Synthesis);
    }

    #[test]
    fn failure_states_are_reachable_then_final() {
        let mut state = JobState::new(2);
        state.advance_stage(Stage::Synthesis).unwrap();
        state.advance_stage(Stage::Cancelled).unwrap();
        assert!(state.completed_at.is_some());
        assert!(matches!(
            state.advance_stage(Stage::AudioMerge),
            Err(NarrateError::JobTerminated(Stage::Cancelled))
        ));
        assert!(matches!(state.mark_completed(0), Err(NarrateError::JobTerminated(_))));
    }

    #[test]
    fn fail_records_the_error() {
        let mut state = JobState::new(1);
        state.fail("disk full").unwrap();
        assert_eq!(state.stage(), Stage::Failed);
        assert_eq!(state.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn reopen_keeps_completed_segments() {
        let mut state = JobState::new(4);
        state.advance_stage(Stage::Synthesis).unwrap();
        state.mark_completed(0).unwrap();
        state.mark_failed(1).unwrap();
        state.advance_stage(Stage::Cancelled).unwrap();

        let reopened = state.reopen();
        assert_eq!(reopened.stage(), Stage::Synthesis);
        assert_eq!(reopened.job_id, state.job_id);
        assert_eq!(reopened.pending_segments(), vec![1, 2, 3]);
        assert!(reopened.completed_at.is_none());
    }

    #[test]
    fn stage_serializes_in_screaming_case() {
        let json = serde_json::to_string(&Stage::VoicePlanning).unwrap();
        assert_eq!(json, "\"VOICE_PLANNING\"");
    }

    #[test]
    fn save_and_load_preserve_progress() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = JobState::new(3).with_input_file("book.txt");
        state.mark_completed(1).unwrap();
        state.save(&path).unwrap();

        let loaded = JobState::load(&path).unwrap();
        assert_eq!(loaded, state);
    }

    #[test]
    fn inconsistent_record_is_corrupted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        let mut state = JobState::new(2);
        state.mark_completed(1).unwrap();
        let json = serde_json::to_string(&state)
            .unwrap()
            .replace("\"total_segments\":2", "\"total_segments\":1");
        std::fs::write(&path, json).unwrap();

        assert!(matches!(
            JobState::load(&path),
            Err(NarrateError::CheckpointCorrupted { .. })
        ));
    }
}
