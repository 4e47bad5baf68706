use std::path::PathBuf;

use crate::job::state::Stage;

/// Errors reported by a [`SynthesisEngine`](crate::SynthesisEngine).
///
/// The executor uses [`SynthesisError::is_transient`] to decide whether a
/// failed segment may be attempted again within the same run.
#[derive(thiserror::Error, Debug)]
pub enum SynthesisError {
    #[error("Text is {len} characters, engine limit is {max}")]
    TextTooLong { len: usize, max: usize },
    #[error("Refusing to synthesize empty text")]
    EmptyText,
    #[error("Language '{0}' is not supported by this engine")]
    UnsupportedLanguage(String),
    #[error("Model not loaded. Call load_model() first.")]
    ModelNotLoaded,
    #[error("Engine resources exhausted: {0}")]
    ResourceExhausted(String),
    #[error("Engine rate limited: {0}")]
    RateLimited(String),
    #[error("Engine reported success but {0} was not written")]
    MissingOutput(PathBuf),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),
    #[error("Synthesis failed: {0}")]
    Engine(String),
}

impl SynthesisError {
    /// Whether re-running the same request later can reasonably succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            SynthesisError::ResourceExhausted(_) | SynthesisError::RateLimited(_) | SynthesisError::Io(_)
        )
    }
}

/// Main error type for narration jobs.
#[derive(thiserror::Error, Debug)]
pub enum NarrateError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("WAV error: {0}")]
    Wav(#[from] hound::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Document error: {0}")]
    Document(String),

    #[error("No reference audio for speaker '{speaker}' (searched: {searched:?})")]
    VoiceReferenceMissing {
        speaker: String,
        searched: Vec<PathBuf>,
    },

    #[error("Invalid reference audio {path}: {reason}")]
    InvalidVoiceReference { path: PathBuf, reason: String },

    #[error("Invalid voice profile: {0}")]
    InvalidVoiceProfile(String),

    #[error("Checkpoint {path} is unreadable: {reason}")]
    CheckpointCorrupted { path: PathBuf, reason: String },

    #[error("Checkpoint does not match this job: {0}")]
    CheckpointMismatch(String),

    #[error("Stage cannot move from {from:?} to {to:?}")]
    InvalidStageTransition { from: Stage, to: Stage },

    #[error("Segment {id} is outside the job (total segments: {total})")]
    SegmentOutOfRange { id: usize, total: usize },

    #[error("Job already finished with stage {0:?}")]
    JobTerminated(Stage),

    #[error("Segment error: {0}")]
    Segment(String),

    #[error(transparent)]
    Synthesis(#[from] SynthesisError),

    #[error("Audio merge failed: {0}")]
    AudioMerge(String),
}

/// Result type alias for narration operations
pub type Result<T> = std::result::Result<T, NarrateError>;
