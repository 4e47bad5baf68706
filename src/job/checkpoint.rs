//! Durable job records.
//!
//! Every mutation goes through [`Checkpoint`], which writes the full record
//! to disk before the in-memory copy changes. A crash right after a call
//! leaves the file reflecting that call; a crash right before leaves it
//! reflecting the previous one.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::state::{JobState, Stage};
use crate::text::Segment;
use crate::{NarrateError, Result};

/// Write JSON to a sibling temp file, flush it to disk, then rename it over
/// `path`.
pub(crate) fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut file, value)?;
    file.write_all(b"\n")?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|e| NarrateError::Io(e.error))?;
    sync_dir(dir)?;
    Ok(())
}

// The rename lives in the directory entry, which has its own flush.
#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    fs::File::open(dir)?.sync_all()?;
    Ok(())
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}

/// Single writer for one job's [`JobState`] file.
#[derive(Debug)]
pub struct Checkpoint {
    path: PathBuf,
    state: JobState,
}

impl Checkpoint {
    /// Persist `state` as a new checkpoint at `path`, replacing any file there.
    pub fn create(path: impl Into<PathBuf>, state: JobState) -> Result<Self> {
        let path = path.into();
        state.save(&path)?;
        log::info!("Created job {} at {}", state.job_id, path.display());
        Ok(Self { path, state })
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let state = JobState::load(&path)?;
        Ok(Self { path, state })
    }

    /// Load the checkpoint if one exists. A corrupted file is an error.
    pub fn open(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        if !path.exists() {
            return Ok(None);
        }
        Self::load(path).map(Some)
    }

    /// Like [`Checkpoint::open`], but an unreadable file is moved aside to
    /// `<name>.corrupt-<timestamp>` and reported as absent so the caller can
    /// start over.
    pub fn open_or_recover(path: impl Into<PathBuf>) -> Result<Option<Self>> {
        let path = path.into();
        match Self::open(path.clone()) {
            Err(NarrateError::CheckpointCorrupted { reason, .. }) => {
                let preserved = quarantine(&path)?;
                log::warn!(
                    "Checkpoint {} is corrupted ({reason}); preserved as {} and starting a fresh job",
                    path.display(),
                    preserved.display()
                );
                Ok(None)
            }
            other => other,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    pub fn mark_completed(&mut self, id: usize) -> Result<()> {
        self.update(|state| state.mark_completed(id))
    }

    pub fn mark_failed(&mut self, id: usize) -> Result<()> {
        self.update(|state| state.mark_failed(id))
    }

    pub fn advance_stage(&mut self, stage: Stage) -> Result<()> {
        if self.state.stage() == stage {
            return Ok(());
        }
        self.update(|state| state.advance_stage(stage))
    }

    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        let error = error.into();
        self.update(|state| state.fail(error))
    }

    pub fn set_audio_chunks(&mut self, chunks: Vec<PathBuf>) -> Result<()> {
        self.update(|state| {
            state.audio_chunks = chunks;
            Ok(())
        })
    }

    /// Swap in a whole new record, e.g. one built by [`JobState::reopen`].
    pub fn replace(&mut self, state: JobState) -> Result<()> {
        self.update(|current| {
            *current = state;
            Ok(())
        })
    }

    fn update<T>(&mut self, f: impl FnOnce(&mut JobState) -> Result<T>) -> Result<T> {
        let mut next = self.state.clone();
        let out = f(&mut next)?;
        next.save(&self.path)?;
        self.state = next;
        Ok(out)
    }
}

fn quarantine(path: &Path) -> Result<PathBuf> {
    let file_name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "state.json".to_string());
    let stamp = Utc::now().format("%Y%m%dT%H%M%S%.3fZ");
    let preserved = path.with_file_name(format!("{file_name}.corrupt-{stamp}"));
    fs::rename(path, &preserved)?;
    Ok(preserved)
}

/// The segment list of a job, persisted next to its state so a resumed job
/// sees the same ids.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SegmentRegistry {
    pub chunks: Vec<Segment>,
}

impl SegmentRegistry {
    pub fn new(chunks: Vec<Segment>) -> Self {
        Self { chunks }
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn get(&self, id: usize) -> Option<&Segment> {
        self.chunks.iter().find(|s| s.id == id)
    }

    /// Replace the text of segment `id` in place.
    pub fn refine(&mut self, id: usize, text: impl Into<String>, max_chars: usize) -> Result<()> {
        let total = self.chunks.len();
        let segment = self
            .chunks
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or(NarrateError::SegmentOutOfRange { id, total })?;

        let text: String = text.into();
        let text = text.trim();
        if text.is_empty() {
            return Err(NarrateError::Segment(format!("Refined text for segment {id} is empty")));
        }
        let len = text.chars().count();
        if len > max_chars {
            return Err(NarrateError::Segment(format!(
                "Refined text for segment {id} is {len} characters, limit is {max_chars}"
            )));
        }
        segment.text = text.to_string();
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        let corrupted = |reason: String| NarrateError::CheckpointCorrupted {
            path: path.to_path_buf(),
            reason,
        };
        let registry: Self = serde_json::from_str(&contents).map_err(|e| corrupted(e.to_string()))?;
        if let Some((index, segment)) = registry
            .chunks
            .iter()
            .enumerate()
            .find(|(index, segment)| segment.id != *index)
        {
            return Err(corrupted(format!(
                "chunk at position {index} has id {}",
                segment.id
            )));
        }
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        write_json_atomic(path, self)
    }
}
