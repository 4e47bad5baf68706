//! Job configuration.
//!
//! All settings have defaults, so an empty JSON object is a valid config file.

use std::path::{Path, PathBuf};

use derive_builder::Builder;
use serde::{Deserialize, Serialize};

use crate::{NarrateError, Result};

/// Maximum input length accepted by the speech engine per call.
pub const HARD_CHAR_LIMIT: usize = 800;

/// Default segment size, leaving headroom under [`HARD_CHAR_LIMIT`].
pub const SAFE_CHAR_LIMIT: usize = 750;

/// Default maximum words per segment.
pub const DEFAULT_MAX_WORDS: usize = 250;

/// Settings for one narration job.
#[derive(Debug, Clone, Serialize, Deserialize, Builder)]
#[builder(default)]
#[serde(default)]
pub struct NarrationConfig {
    /// Maximum characters per segment. Must not exceed [`HARD_CHAR_LIMIT`].
    pub max_chars: usize,
    /// Maximum words per segment.
    pub max_words: usize,
    /// Directory holding `<speaker>.wav`, `male.wav`, `female.wav` and `narrator.wav`.
    #[builder(setter(into))]
    pub reference_audio_dir: PathBuf,
    /// Root directory for job state, chunk audio and the merged output.
    #[builder(setter(into))]
    pub output_dir: PathBuf,
    /// Language code passed to the engine (e.g. `"en"`).
    #[builder(setter(into))]
    pub language: String,
    /// Expressiveness, 0.1–1.0.
    pub temperature: f32,
    /// Speed multiplier, 0.5–2.0.
    pub speed: f32,
    pub repetition_penalty: f32,
    /// Extra attempts for transient engine errors within one run.
    pub max_retries: u32,
    /// Crossfade between merged chunks, in milliseconds.
    pub crossfade_ms: u32,
    /// Keep per-segment audio after the merged file is written.
    pub keep_chunks: bool,
    /// Start a fresh job when the state file is unreadable instead of halting.
    pub recover_corrupted_state: bool,
    /// Model location handed to the engine's `load_model`.
    #[builder(setter(into, strip_option))]
    pub model_path: Option<PathBuf>,
}

impl Default for NarrationConfig {
    fn default() -> Self {
        Self {
            max_chars: SAFE_CHAR_LIMIT,
            max_words: DEFAULT_MAX_WORDS,
            reference_audio_dir: PathBuf::from("reference_audio"),
            output_dir: PathBuf::from("output"),
            language: "en".to_string(),
            temperature: 0.75,
            speed: 1.0,
            repetition_penalty: 7.0,
            max_retries: 2,
            crossfade_ms: 100,
            keep_chunks: true,
            recover_corrupted_state: false,
            model_path: None,
        }
    }
}

impl NarrationConfig {
    /// Load a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        log::debug!("Loading config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&content)
            .map_err(|e| NarrateError::Config(format!("Failed to parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        if self.max_chars == 0 || self.max_chars > HARD_CHAR_LIMIT {
            return Err(NarrateError::Config(format!(
                "max_chars must be 1..={HARD_CHAR_LIMIT}, got {}",
                self.max_chars
            )));
        }
        if self.max_words == 0 {
            return Err(NarrateError::Config("max_words must be positive".to_string()));
        }
        if !(0.1..=1.0).contains(&self.temperature) {
            return Err(NarrateError::Config(format!(
                "temperature must be 0.1-1.0, got {}",
                self.temperature
            )));
        }
        if !(0.5..=2.0).contains(&self.speed) {
            return Err(NarrateError::Config(format!(
                "speed must be 0.5-2.0, got {}",
                self.speed
            )));
        }
        Ok(())
    }
}
