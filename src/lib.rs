//! # narrate-rs
//!
//! A Rust library that turns long documents into multi-voice narrated audio.
//!
//! ## Features
//!
//! - **Content filtering**: strips copyright blocks, acknowledgments and production markers
//! - **Speaker attribution**: a cascade of heuristics labels every segment with a speaker
//! - **Bounded segmentation**: segments never exceed the engine's per-call character limit
//! - **Emotion tags**: keyword rules tag segments and can swap in an emotion-specific reference clip
//! - **Resumable synthesis**: a checkpoint is persisted after every segment, so a
//!   multi-hour job can be interrupted and resumed without redoing finished work
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::path::Path;
//! use narrate_rs::{
//!     audio::WavMerger, engines::CommandEngine, pipeline::Narrator, voice::CharacterRegistry,
//!     Document, NarrationConfig,
//! };
//!
//! let config = NarrationConfig::from_file(Path::new("narrate.json"))?;
//! let registry = CharacterRegistry::from_file(Path::new("characters.json"))?;
//! let engine = CommandEngine::new("xtts-cli");
//!
//! let mut narrator = Narrator::new(config, registry, engine, WavMerger::new(100));
//! let report = narrator.narrate(&Document::from_text_file(Path::new("book.txt"))?)?;
//! println!("{:?}", report.merged_audio);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod audio;
pub mod config;
pub mod document;
pub mod engines;
pub mod error;
pub mod job;
pub mod pipeline;
pub mod text;
pub mod voice;

use std::path::{Path, PathBuf};

pub use config::{NarrationConfig, NarrationConfigBuilder, HARD_CHAR_LIMIT, SAFE_CHAR_LIMIT};
pub use document::Document;
pub use error::{NarrateError, Result, SynthesisError};
pub use voice::VoiceProfile;

/// The result of a synthesis (text-to-speech) operation.
///
/// Contains raw f32 audio samples and the sample rate of the output audio.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    /// Raw audio samples as f32 values (interleaved when `channels > 1`)
    pub samples: Vec<f32>,
    /// Sample rate of the audio
    pub sample_rate: u32,
    /// Number of interleaved channels
    pub channels: u16,
}

impl SynthesisResult {
    /// Write the audio to a 32-bit float WAV file.
    pub fn write_wav(&self, path: &Path) -> std::result::Result<(), hound::Error> {
        let spec = hound::WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            writer.write_sample(sample)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Duration of the audio in seconds.
    pub fn duration_secs(&self) -> f64 {
        let frames = self.samples.len() / usize::from(self.channels.max(1));
        frames as f64 / self.sample_rate as f64
    }
}

/// Common interface for the speech-synthesis collaborator.
///
/// Engines clone a voice from the reference audio of a [`VoiceProfile`]. The
/// executor loads the model once per job and unloads it on every exit path.
pub trait SynthesisEngine {
    /// Parameters for configuring model loading (threads, device, etc.)
    type ModelParams: Default;

    /// Load a model from the specified path using default parameters.
    fn load_model(&mut self, model_path: &Path) -> std::result::Result<(), SynthesisError> {
        self.load_model_with_params(model_path, Self::ModelParams::default())
    }

    /// Load a model from the specified path with custom parameters.
    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> std::result::Result<(), SynthesisError>;

    /// Unload the currently loaded model and free associated resources.
    fn unload_model(&mut self);

    /// Hard per-call character limit of the engine.
    fn max_chars(&self) -> usize {
        HARD_CHAR_LIMIT
    }

    /// Synthesize speech for `text` in the given voice.
    fn synthesize(
        &mut self,
        text: &str,
        voice: &VoiceProfile,
    ) -> std::result::Result<SynthesisResult, SynthesisError>;

    /// Synthesize speech and write it to `output_path`.
    ///
    /// Rejects text over [`SynthesisEngine::max_chars`] before touching the
    /// model. Writing the same path twice overwrites it, which keeps a
    /// re-attempted segment free of duplicate output.
    fn synthesize_to_file(
        &mut self,
        text: &str,
        voice: &VoiceProfile,
        output_path: &Path,
    ) -> std::result::Result<PathBuf, SynthesisError> {
        check_text(text, self.max_chars())?;
        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        self.synthesize(text, voice)?.write_wav(output_path)?;
        Ok(output_path.to_path_buf())
    }
}

impl<E: SynthesisEngine> SynthesisEngine for &mut E {
    type ModelParams = E::ModelParams;

    fn load_model(&mut self, model_path: &Path) -> std::result::Result<(), SynthesisError> {
        (**self).load_model(model_path)
    }

    fn load_model_with_params(
        &mut self,
        model_path: &Path,
        params: Self::ModelParams,
    ) -> std::result::Result<(), SynthesisError> {
        (**self).load_model_with_params(model_path, params)
    }

    fn unload_model(&mut self) {
        (**self).unload_model()
    }

    fn max_chars(&self) -> usize {
        (**self).max_chars()
    }

    fn synthesize(
        &mut self,
        text: &str,
        voice: &VoiceProfile,
    ) -> std::result::Result<SynthesisResult, SynthesisError> {
        (**self).synthesize(text, voice)
    }

    fn synthesize_to_file(
        &mut self,
        text: &str,
        voice: &VoiceProfile,
        output_path: &Path,
    ) -> std::result::Result<PathBuf, SynthesisError> {
        (**self).synthesize_to_file(text, voice, output_path)
    }
}

/// Validate text against an engine's hard limit.
pub fn check_text(text: &str, max_chars: usize) -> std::result::Result<(), SynthesisError> {
    if text.trim().is_empty() {
        return Err(SynthesisError::EmptyText);
    }
    let len = text.chars().count();
    if len > max_chars {
        return Err(SynthesisError::TextTooLong { len, max: max_chars });
    }
    Ok(())
}
