use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::{CharacterRegistry, Gender, VoiceProfile};
use crate::config::NarrationConfig;
use crate::text::Segment;
use crate::{NarrateError, Result};

/// Voice profiles for one job, keyed by profile name (the segment's `voice`).
pub type VoicePlan = BTreeMap<String, VoiceProfile>;

/// Resolves speaker labels to voice profiles backed by reference audio on disk.
///
/// Resolution order:
/// 1. the registry entry named exactly like the label (its `voice_file`)
/// 2. `<dir>/<normalized label>.wav`
/// 3. `<dir>/male.wav` or `<dir>/female.wav` by gender
/// 4. `<dir>/narrator.wav`
///
/// If none exists the label is unresolvable; nothing is substituted silently.
///
/// During [`plan`](Self::plan), a segment tagged with an emotion whose rule
/// names an existing reference clip is voiced from that clip instead.
pub struct VoiceAssigner<'a> {
    registry: &'a CharacterRegistry,
    reference_audio_dir: &'a Path,
    config: &'a NarrationConfig,
}

impl<'a> VoiceAssigner<'a> {
    pub fn new(registry: &'a CharacterRegistry, config: &'a NarrationConfig) -> Self {
        Self {
            registry,
            reference_audio_dir: &config.reference_audio_dir,
            config,
        }
    }

    /// Find the reference audio for one speaker.
    pub fn assign(&self, speaker_label: &str, gender: Gender) -> Result<VoiceProfile> {
        let mut searched = Vec::new();

        if let Some(character) = self.registry.get(speaker_label) {
            if let Some(voice_file) = &character.voice_file {
                // An explicitly configured clip must exist; falling through would
                // hide a broken registry entry behind a generic voice.
                if voice_file.is_file() {
                    return Ok(self.profile(speaker_label, character.gender, voice_file.clone()));
                }
                return Err(NarrateError::VoiceReferenceMissing {
                    speaker: speaker_label.to_string(),
                    searched: vec![voice_file.clone()],
                });
            }
        }

        let named = self
            .reference_audio_dir
            .join(format!("{}.wav", normalize_label(speaker_label)));
        if named.is_file() {
            return Ok(self.profile(speaker_label, gender, named));
        }
        searched.push(named);

        let gendered = match gender {
            Gender::Male => Some("male.wav"),
            Gender::Female => Some("female.wav"),
            Gender::Neutral | Gender::Unknown => None,
        };
        if let Some(file) = gendered {
            let path = self.reference_audio_dir.join(file);
            if path.is_file() {
                return Ok(self.profile(speaker_label, gender, path));
            }
            searched.push(path);
        }

        let narrator = self.reference_audio_dir.join("narrator.wav");
        if narrator.is_file() {
            return Ok(self.profile(speaker_label, gender, narrator));
        }
        searched.push(narrator);

        Err(NarrateError::VoiceReferenceMissing {
            speaker: speaker_label.to_string(),
            searched,
        })
    }

    /// Assign a profile to every distinct speaker and annotate the segments.
    ///
    /// Stops at the first speaker without reference audio.
    pub fn plan(&self, segments: &mut [Segment]) -> Result<VoicePlan> {
        let mut plan = VoicePlan::new();
        for segment in segments.iter_mut() {
            if !plan.contains_key(&segment.speaker) {
                let profile = self.assign(&segment.speaker, segment.gender)?;
                log::info!(
                    "Voice for {}: {}",
                    segment.speaker,
                    profile.reference_audio.display()
                );
                plan.insert(segment.speaker.clone(), profile);
            }

            let key = match self.emotion_clip(&segment.emotion) {
                Some(clip) => {
                    let key = format!("{} ({})", segment.speaker, segment.emotion);
                    if !plan.contains_key(&key) {
                        log::info!("Voice for {key}: {}", clip.display());
                        let profile = self.profile(&key, segment.gender, clip.to_path_buf());
                        plan.insert(key.clone(), profile);
                    }
                    key
                }
                None => segment.speaker.clone(),
            };
            if let Some(profile) = plan.get(&key) {
                segment.voice = Some(profile.name.clone());
                segment.speed = profile.speed;
            }
        }
        Ok(plan)
    }

    /// Reference clip for `emotion`, if its rule names one that exists.
    fn emotion_clip(&self, emotion: &str) -> Option<&'a Path> {
        let clip = self.registry.emotion(emotion)?.reference_audio.as_deref()?;
        if clip.is_file() {
            Some(clip)
        } else {
            log::warn!(
                "Reference clip {} for emotion '{emotion}' not found, using the speaker's voice",
                clip.display()
            );
            None
        }
    }

    fn profile(&self, name: &str, gender: Gender, reference_audio: PathBuf) -> VoiceProfile {
        VoiceProfile::from_config(name, gender, reference_audio, self.config)
    }
}

/// `"Narrator (Female)"` → `"narrator_female"`, `"Sadie Wen"` → `"sadie_wen"`.
pub fn normalize_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for ch in label.chars() {
        if ch.is_alphanumeric() {
            out.extend(ch.to_lowercase());
        } else if !out.ends_with('_') {
            out.push('_');
        }
    }
    out.trim_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::{normalize_label, VoiceAssigner};
    use crate::config::NarrationConfig;
    use crate::text::{DetectionStrategy, Segment};
    use crate::voice::{Character, CharacterRegistry, EmotionRule, Gender};
    use crate::NarrateError;
    use std::path::Path;

    fn touch(path: &Path) {
        std::fs::write(path, b"RIFF").unwrap();
    }

    fn config_for(dir: &Path) -> NarrationConfig {
        NarrationConfig {
            reference_audio_dir: dir.to_path_buf(),
            ..Default::default()
        }
    }

    #[test]
    fn normalizes_labels_for_file_names() {
        assert_eq!(normalize_label("Narrator (Female)"), "narrator_female");
        assert_eq!(normalize_label("Sadie Wen"), "sadie_wen");
    }

    #[test]
    fn registry_entry_wins() {
        let dir = tempfile::tempdir().unwrap();
        let julius = dir.path().join("custom_julius.wav");
        touch(&julius);
        touch(&dir.path().join("male.wav"));
        let registry = CharacterRegistry::new()
            .with(Character::new("Julius Gong", Gender::Male).with_voice_file(&julius));
        let config = config_for(dir.path());

        let profile = VoiceAssigner::new(&registry, &config)
            .assign("Julius Gong", Gender::Male)
            .unwrap();
        assert_eq!(profile.reference_audio, julius);
    }

    #[test]
    fn missing_registry_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("male.wav"));
        let registry = CharacterRegistry::new().with(
            Character::new("Julius Gong", Gender::Male).with_voice_file(dir.path().join("gone.wav")),
        );
        let config = config_for(dir.path());

        let result = VoiceAssigner::new(&registry, &config).assign("Julius Gong", Gender::Male);
        assert!(matches!(result, Err(NarrateError::VoiceReferenceMissing { .. })));
    }

    #[test]
    fn falls_back_from_named_to_gender_to_narrator() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CharacterRegistry::new();
        let config = config_for(dir.path());
        let assigner = VoiceAssigner::new(&registry, &config);

        touch(&dir.path().join("narrator.wav"));
        let profile = assigner.assign("Narrator (Male)", Gender::Male).unwrap();
        assert!(profile.reference_audio.ends_with("narrator.wav"));

        touch(&dir.path().join("male.wav"));
        let profile = assigner.assign("Narrator (Male)", Gender::Male).unwrap();
        assert!(profile.reference_audio.ends_with("male.wav"));

        touch(&dir.path().join("narrator_male.wav"));
        let profile = assigner.assign("Narrator (Male)", Gender::Male).unwrap();
        assert!(profile.reference_audio.ends_with("narrator_male.wav"));
    }

    #[test]
    fn nothing_on_disk_lists_every_candidate() {
        let dir = tempfile::tempdir().unwrap();
        let registry = CharacterRegistry::new();
        let config = config_for(dir.path());

        match VoiceAssigner::new(&registry, &config).assign("Narrator (Female)", Gender::Female) {
            Err(NarrateError::VoiceReferenceMissing { speaker, searched }) => {
                assert_eq!(speaker, "Narrator (Female)");
                assert_eq!(searched.len(), 3);
            }
            other => panic!("expected missing reference, got {other:?}"),
        }
    }

    fn segment(id: usize, speaker: &str, emotion: &str) -> Segment {
        Segment {
            id,
            order: id,
            text: format!("Line {id}."),
            speaker: speaker.to_string(),
            gender: Gender::Female,
            voice: None,
            speed: 1.0,
            emotion: emotion.to_string(),
            strategy: DetectionStrategy::ParagraphStart,
            confidence: 0.7,
        }
    }

    #[test]
    fn emotion_clip_overrides_the_speaker_voice() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("female.wav"));
        let happy = dir.path().join("happy.wav");
        touch(&happy);
        let registry = CharacterRegistry::new()
            .with(Character::new("Sadie Wen", Gender::Female))
            .with_emotion(EmotionRule::new("happy", ["glad"]).with_reference_audio(&happy))
            .with_emotion(EmotionRule::new("sad", ["sadly"]));
        let config = config_for(dir.path());

        let mut segments = vec![
            segment(0, "Sadie Wen", "neutral"),
            segment(1, "Sadie Wen", "happy"),
            segment(2, "Sadie Wen", "sad"),
        ];
        let plan = VoiceAssigner::new(&registry, &config).plan(&mut segments).unwrap();

        assert_eq!(segments[0].voice.as_deref(), Some("Sadie Wen"));
        assert_eq!(segments[1].voice.as_deref(), Some("Sadie Wen (happy)"));
        assert_eq!(segments[2].voice.as_deref(), Some("Sadie Wen"));
        assert_eq!(plan["Sadie Wen (happy)"].reference_audio, happy);
        assert!(plan["Sadie Wen"].reference_audio.ends_with("female.wav"));
    }

    #[test]
    fn missing_emotion_clip_keeps_the_speaker_voice() {
        let dir = tempfile::tempdir().unwrap();
        touch(&dir.path().join("female.wav"));
        let registry = CharacterRegistry::new().with_emotion(
            EmotionRule::new("happy", ["glad"]).with_reference_audio(dir.path().join("gone.wav")),
        );
        let config = config_for(dir.path());

        let mut segments = vec![segment(0, "Narrator (Female)", "happy")];
        let plan = VoiceAssigner::new(&registry, &config).plan(&mut segments).unwrap();
        assert_eq!(segments[0].voice.as_deref(), Some("Narrator (Female)"));
        assert_eq!(plan.len(), 1);
    }
}
