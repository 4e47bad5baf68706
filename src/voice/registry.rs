use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{NarrateError, Result};

/// Character gender, used for pronoun scoring and default voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Neutral,
    #[default]
    Unknown,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Gender::Male => "male",
            Gender::Female => "female",
            Gender::Neutral => "neutral",
            Gender::Unknown => "unknown",
        }
    }
}

/// A known speaker in the story.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Character {
    /// Full name, e.g. `"Sadie Wen"`. Detection matches on the first name.
    pub name: String,
    #[serde(default)]
    pub gender: Gender,
    /// Reference audio for this character, if one was recorded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub voice_file: Option<PathBuf>,
    /// Extra words that point at this character during pronoun scoring.
    #[serde(default)]
    pub keywords: Vec<String>,
}

impl Character {
    pub fn new(name: impl Into<String>, gender: Gender) -> Self {
        Self {
            name: name.into(),
            gender,
            voice_file: None,
            keywords: Vec::new(),
        }
    }

    pub fn with_voice_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.voice_file = Some(path.into());
        self
    }

    pub fn with_keywords<I, S>(mut self, keywords: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.keywords = keywords.into_iter().map(Into::into).collect();
        self
    }

    /// Lowercased first name token.
    pub fn first_name(&self) -> String {
        self.name
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_lowercase()
    }
}

/// A user-supplied regex removal rule applied after the built-in filters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextFilterRule {
    pub pattern: String,
}

/// Keyword rule that tags a segment with an emotion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionRule {
    pub name: String,
    /// Matched as whole words, ignoring case.
    #[serde(default)]
    pub words: Vec<String>,
    /// Clip used for any speaker whose segment carries this emotion.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_audio: Option<PathBuf>,
}

impl EmotionRule {
    pub fn new<I, S>(name: impl Into<String>, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            name: name.into(),
            words: words.into_iter().map(Into::into).collect(),
            reference_audio: None,
        }
    }

    pub fn with_reference_audio(mut self, path: impl Into<PathBuf>) -> Self {
        self.reference_audio = Some(path.into());
        self
    }
}

/// Immutable snapshot of the known characters for one job.
///
/// Order is significant: when pronoun scoring ties, the character registered
/// first wins.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CharacterRegistry {
    #[serde(default)]
    characters: Vec<Character>,
    #[serde(default)]
    text_filters: Vec<TextFilterRule>,
    /// Checked in order; the first rule with a matching word wins.
    #[serde(default)]
    emotions: Vec<EmotionRule>,
}

impl CharacterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a character. A second entry with the same name replaces the
    /// first but keeps its position.
    pub fn add(&mut self, character: Character) {
        match self.characters.iter_mut().find(|c| c.name == character.name) {
            Some(existing) => *existing = character,
            None => self.characters.push(character),
        }
    }

    pub fn with(mut self, character: Character) -> Self {
        self.add(character);
        self
    }

    pub fn add_text_filter(&mut self, pattern: impl Into<String>) {
        self.text_filters.push(TextFilterRule {
            pattern: pattern.into(),
        });
    }

    /// Register an emotion rule, replacing one with the same name in place.
    pub fn add_emotion(&mut self, rule: EmotionRule) {
        match self.emotions.iter_mut().find(|r| r.name == rule.name) {
            Some(existing) => *existing = rule,
            None => self.emotions.push(rule),
        }
    }

    pub fn with_emotion(mut self, rule: EmotionRule) -> Self {
        self.add_emotion(rule);
        self
    }

    pub fn emotions(&self) -> &[EmotionRule] {
        &self.emotions
    }

    pub fn emotion(&self, name: &str) -> Option<&EmotionRule> {
        self.emotions.iter().find(|r| r.name == name)
    }

    pub fn characters(&self) -> &[Character] {
        &self.characters
    }

    pub fn text_filters(&self) -> &[TextFilterRule] {
        &self.text_filters
    }

    pub fn get(&self, name: &str) -> Option<&Character> {
        self.characters.iter().find(|c| c.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    /// Load a registry from JSON.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let registry: Self = serde_json::from_str(&content).map_err(|e| {
            NarrateError::Config(format!("Invalid character registry {}: {e}", path.display()))
        })?;
        log::info!(
            "Loaded {} characters, {} text filters and {} emotions from {}",
            registry.characters.len(),
            registry.text_filters.len(),
            registry.emotions.len(),
            path.display()
        );
        Ok(registry)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}
