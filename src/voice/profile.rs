use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use super::Gender;
use crate::audio::wav_duration_secs;
use crate::config::NarrationConfig;
use crate::{NarrateError, Result};

/// Shortest reference clip the engine can clone a voice from, in seconds.
pub const MIN_REFERENCE_SECS: f64 = 6.0;
/// Longest reference clip worth feeding the engine, in seconds.
pub const MAX_REFERENCE_SECS: f64 = 15.0;

/// Synthesis configuration for one speaker identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceProfile {
    pub name: String,
    pub gender: Gender,
    /// WAV clip the engine clones the voice from.
    pub reference_audio: PathBuf,
    pub language: String,
    /// 0.1–1.0, higher is more expressive.
    pub temperature: f32,
    /// 0.5–2.0.
    pub speed: f32,
    pub repetition_penalty: f32,
}

impl VoiceProfile {
    /// Profile with the synthesis parameters taken from the job config.
    pub fn from_config(
        name: impl Into<String>,
        gender: Gender,
        reference_audio: PathBuf,
        config: &NarrationConfig,
    ) -> Self {
        Self {
            name: name.into(),
            gender,
            reference_audio,
            language: config.language.clone(),
            temperature: config.temperature,
            speed: config.speed,
            repetition_penalty: config.repetition_penalty,
        }
    }

    /// Check parameter ranges and that the reference clip is a 6–15 s WAV.
    pub fn validate(&self) -> Result<()> {
        if !(0.1..=1.0).contains(&self.temperature) {
            return Err(NarrateError::InvalidVoiceProfile(format!(
                "{}: temperature must be 0.1-1.0, got {}",
                self.name, self.temperature
            )));
        }
        if !(0.5..=2.0).contains(&self.speed) {
            return Err(NarrateError::InvalidVoiceProfile(format!(
                "{}: speed must be 0.5-2.0, got {}",
                self.name, self.speed
            )));
        }
        if !self.reference_audio.is_file() {
            return Err(NarrateError::VoiceReferenceMissing {
                speaker: self.name.clone(),
                searched: vec![self.reference_audio.clone()],
            });
        }

        let secs = wav_duration_secs(&self.reference_audio).map_err(|e| {
            NarrateError::InvalidVoiceReference {
                path: self.reference_audio.clone(),
                reason: e.to_string(),
            }
        })?;
        if !(MIN_REFERENCE_SECS..=MAX_REFERENCE_SECS).contains(&secs) {
            return Err(NarrateError::InvalidVoiceReference {
                path: self.reference_audio.clone(),
                reason: format!(
                    "clip is {secs:.1}s, needs {MIN_REFERENCE_SECS}-{MAX_REFERENCE_SECS}s"
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::VoiceProfile;
    use crate::config::NarrationConfig;
    use crate::voice::Gender;
    use crate::NarrateError;
    use std::path::Path;

    fn write_clip(path: &Path, secs: u32) {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec).unwrap();
        for _ in 0..(8_000 * secs) {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();
    }

    #[test]
    fn accepts_clip_within_duration_window() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("female.wav");
        write_clip(&clip, 8);

        let profile = VoiceProfile::from_config("Sadie", Gender::Female, clip, &NarrationConfig::default());
        assert!(profile.validate().is_ok());
    }

    #[test]
    fn rejects_short_clip() {
        let dir = tempfile::tempdir().unwrap();
        let clip = dir.path().join("short.wav");
        write_clip(&clip, 2);

        let profile = VoiceProfile::from_config("Ray", Gender::Male, clip, &NarrationConfig::default());
        assert!(matches!(
            profile.validate(),
            Err(NarrateError::InvalidVoiceReference { .. })
        ));
    }

    #[test]
    fn missing_clip_is_reported_not_substituted() {
        let profile = VoiceProfile::from_config(
            "Ray",
            Gender::Male,
            "/nonexistent/ray.wav".into(),
            &NarrationConfig::default(),
        );
        assert!(matches!(
            profile.validate(),
            Err(NarrateError::VoiceReferenceMissing { .. })
        ));
    }

    #[test]
    fn rejects_out_of_range_temperature() {
        let mut profile = VoiceProfile::from_config(
            "Ray",
            Gender::Male,
            "ray.wav".into(),
            &NarrationConfig::default(),
        );
        profile.temperature = 1.5;
        assert!(matches!(
            profile.validate(),
            Err(NarrateError::InvalidVoiceProfile(_))
        ));
    }
}
