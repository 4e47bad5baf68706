//! Speaker attribution.
//!
//! Detection runs an ordered cascade of pure strategies; the first one that
//! produces a match wins. When nothing matches, a narrator label is chosen
//! from pronoun dominance, so detection always yields a speaker.

use std::fmt;

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::voice::{Character, CharacterRegistry, Gender};

pub const FEMALE_NARRATOR: &str = "Narrator (Female)";
pub const MALE_NARRATOR: &str = "Narrator (Male)";

const FEMININE_PRONOUNS: &[&str] = &["she", "her", "hers", "herself"];
const MASCULINE_PRONOUNS: &[&str] = &["he", "him", "his", "himself"];
const KEYWORD_BONUS: usize = 5;

const ATTRIBUTION_VERBS: &[&str] = &[
    "said", "replied", "asked", "exclaimed", "shouted", "whispered", "muttered",
];

// Verb-first and name-first variants, per verb, in priority order.
static DIALOGUE_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    ATTRIBUTION_VERBS
        .iter()
        .flat_map(|verb| [format!(r"\b{verb}\s+(\w+)"), format!(r"(\w+)\s+{verb}\b")])
        .map(|pattern| Regex::new(&pattern).expect("valid regex"))
        .collect()
});

/// Which cascade step produced a detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStrategy {
    DialogueAttribution,
    ParagraphStart,
    FirstSentence,
    PronounScoring,
    NarratorFallback,
}

impl fmt::Display for DetectionStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DetectionStrategy::DialogueAttribution => "dialogue_attribution",
            DetectionStrategy::ParagraphStart => "paragraph_start",
            DetectionStrategy::FirstSentence => "first_sentence",
            DetectionStrategy::PronounScoring => "pronoun_scoring",
            DetectionStrategy::NarratorFallback => "narrator_fallback",
        };
        f.write_str(name)
    }
}

/// A speaker attributed to a span of text.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub speaker: String,
    pub gender: Gender,
    pub confidence: f32,
    pub strategy: DetectionStrategy,
}

impl Detection {
    fn character(character: &Character, confidence: f32, strategy: DetectionStrategy) -> Self {
        Self {
            speaker: character.name.clone(),
            gender: character.gender,
            confidence,
            strategy,
        }
    }
}

type Strategy = fn(&str, &CharacterRegistry) -> Option<Detection>;

/// Cascade order. The narrator fallback is applied after these.
const CASCADE: &[Strategy] = &[
    dialogue_attribution,
    paragraph_start,
    first_sentence,
    pronoun_scoring,
];

/// Attributes text to a speaker from a fixed registry snapshot.
#[derive(Debug, Clone, Copy)]
pub struct SpeakerDetector<'a> {
    registry: &'a CharacterRegistry,
}

impl<'a> SpeakerDetector<'a> {
    pub fn new(registry: &'a CharacterRegistry) -> Self {
        Self { registry }
    }

    pub fn detect(&self, text: &str) -> Detection {
        CASCADE
            .iter()
            .find_map(|strategy| strategy(text, self.registry))
            .unwrap_or_else(|| narrator_fallback(text))
    }

    /// Character whose first name opens `paragraph`, looking only at a short
    /// prefix. Used by the segmenter to spot speaker changes.
    pub fn paragraph_speaker(&self, paragraph: &str) -> Option<&'a Character> {
        name_at_start(paragraph, self.registry, 50, 30)
    }
}

/// `said Ray`, `Julius replied`, ...
pub fn dialogue_attribution(text: &str, registry: &CharacterRegistry) -> Option<Detection> {
    if registry.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    for pattern in DIALOGUE_PATTERNS.iter() {
        for captures in pattern.captures_iter(&lower) {
            let Some(candidate) = captures.get(1) else {
                continue;
            };
            if let Some(character) = registry
                .characters()
                .iter()
                .find(|c| c.first_name() == candidate.as_str())
            {
                return Some(Detection::character(
                    character,
                    0.9,
                    DetectionStrategy::DialogueAttribution,
                ));
            }
        }
    }
    None
}

/// Text opens with a known first name, or names one within its first 30 characters.
pub fn paragraph_start(text: &str, registry: &CharacterRegistry) -> Option<Detection> {
    name_at_start(text, registry, 100, 30)
        .map(|c| Detection::character(c, 0.7, DetectionStrategy::ParagraphStart))
}

/// Same check restricted to the first sentence.
pub fn first_sentence(text: &str, registry: &CharacterRegistry) -> Option<Detection> {
    let sentence = match text.find(['.', '!', '?']) {
        Some(end) => &text[..end],
        None => text,
    };
    name_at_start(sentence, registry, 200, 50)
        .map(|c| Detection::character(c, 0.6, DetectionStrategy::FirstSentence))
}

/// Pronouns matching a character's gender, plus a bonus per keyword hit.
///
/// The strictly highest positive score wins; ties go to the character
/// registered first.
pub fn pronoun_scoring(text: &str, registry: &CharacterRegistry) -> Option<Detection> {
    if registry.is_empty() {
        return None;
    }
    let lower = text.to_lowercase();
    let (feminine, masculine) = pronoun_counts(&lower);

    let mut best: Option<(&Character, usize)> = None;
    for character in registry.characters() {
        let mut score = match character.gender {
            Gender::Female => feminine,
            Gender::Male => masculine,
            Gender::Neutral | Gender::Unknown => 0,
        };
        score += character
            .keywords
            .iter()
            .filter(|k| !k.is_empty() && contains_word(&lower, &k.to_lowercase()))
            .count()
            * KEYWORD_BONUS;

        if score > 0 && best.map_or(true, |(_, top)| score > top) {
            best = Some((character, score));
        }
    }

    best.map(|(c, _)| Detection::character(c, 0.5, DetectionStrategy::PronounScoring))
}

/// Narrator voice chosen by pronoun dominance, female when tied or absent.
pub fn narrator_fallback(text: &str) -> Detection {
    let (feminine, masculine) = pronoun_counts(&text.to_lowercase());
    let (speaker, gender) = if masculine > feminine {
        (MALE_NARRATOR, Gender::Male)
    } else {
        (FEMALE_NARRATOR, Gender::Female)
    };
    Detection {
        speaker: speaker.to_string(),
        gender,
        confidence: 0.3,
        strategy: DetectionStrategy::NarratorFallback,
    }
}

/// (feminine, masculine) pronoun counts over lowercase text.
fn pronoun_counts(lower: &str) -> (usize, usize) {
    let mut feminine = 0;
    let mut masculine = 0;
    for word in lower.split(|c: char| !c.is_alphabetic()) {
        if FEMININE_PRONOUNS.contains(&word) {
            feminine += 1;
        } else if MASCULINE_PRONOUNS.contains(&word) {
            masculine += 1;
        }
    }
    (feminine, masculine)
}

fn name_at_start<'r>(
    text: &str,
    registry: &'r CharacterRegistry,
    prefix_chars: usize,
    inner_chars: usize,
) -> Option<&'r Character> {
    let prefix: String = text
        .trim_start_matches(|c: char| c.is_whitespace() || is_quote(c))
        .chars()
        .take(prefix_chars)
        .flat_map(char::to_lowercase)
        .collect();
    let inner: String = prefix.chars().take(inner_chars).collect();

    let named = || {
        registry
            .characters()
            .iter()
            .map(|c| (c, c.first_name()))
            .filter(|(_, first)| !first.is_empty())
    };

    // An opening name beats any name mentioned later in the prefix.
    if let Some((character, _)) = named().find(|(_, first)| starts_with_word(&prefix, first)) {
        return Some(character);
    }
    named()
        .filter_map(|(c, first)| word_position(&inner, &first).map(|at| (at, c)))
        .min_by_key(|(at, _)| *at)
        .map(|(_, c)| c)
}

fn is_quote(c: char) -> bool {
    matches!(c, '"' | '\'' | '\u{201c}' | '\u{201d}' | '\u{2018}' | '\u{2019}')
}

fn starts_with_word(haystack: &str, word: &str) -> bool {
    haystack.starts_with(word)
        && haystack[word.len()..]
            .chars()
            .next()
            .map_or(true, |c| !c.is_alphanumeric())
}

fn contains_word(haystack: &str, word: &str) -> bool {
    word_position(haystack, word).is_some()
}

/// Byte offset of the first whole-word occurrence of `word`.
fn word_position(haystack: &str, word: &str) -> Option<usize> {
    haystack.match_indices(word).map(|(idx, _)| idx).find(|&idx| {
        let before = haystack[..idx].chars().next_back();
        let after = haystack[idx + word.len()..].chars().next();
        before.map_or(true, |c| !c.is_alphanumeric()) && after.map_or(true, |c| !c.is_alphanumeric())
    })
}
