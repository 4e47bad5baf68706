//! Keyword-driven emotion tagging.

use regex::Regex;

use crate::voice::CharacterRegistry;

/// Emotion assigned when no rule matches.
pub const NEUTRAL: &str = "neutral";

/// Compiled emotion rules from a registry snapshot, in registry order.
#[derive(Debug, Clone, Default)]
pub struct EmotionDetector {
    rules: Vec<(String, Regex)>,
}

impl EmotionDetector {
    pub fn new(registry: &CharacterRegistry) -> Self {
        let mut rules = Vec::new();
        for rule in registry.emotions() {
            let words: Vec<String> = rule
                .words
                .iter()
                .map(|w| w.trim())
                .filter(|w| !w.is_empty())
                .map(regex::escape)
                .collect();
            if words.is_empty() {
                log::debug!("Emotion '{}' has no words, skipping", rule.name);
                continue;
            }
            match Regex::new(&format!(r"(?i)\b(?:{})\b", words.join("|"))) {
                Ok(pattern) => rules.push((rule.name.clone(), pattern)),
                Err(e) => log::warn!("Ignoring emotion '{}': {e}", rule.name),
            }
        }
        Self { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// First emotion with a word in `text`, or [`NEUTRAL`].
    pub fn detect(&self, text: &str) -> &str {
        self.rules
            .iter()
            .find(|(_, pattern)| pattern.is_match(text))
            .map_or(NEUTRAL, |(name, _)| name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::{EmotionDetector, NEUTRAL};
    use crate::voice::{CharacterRegistry, EmotionRule};

    fn registry() -> CharacterRegistry {
        CharacterRegistry::new()
            .with_emotion(EmotionRule::new("happy", ["wonderful", "love"]))
            .with_emotion(EmotionRule::new("sad", ["sadly", "tragic"]))
    }

    #[test]
    fn matches_whole_words_ignoring_case() {
        let detector = EmotionDetector::new(&registry());
        assert_eq!(detector.detect("What a WONDERFUL morning."), "happy");
        assert_eq!(detector.detect("Sadly, the bus was late."), "sad");
        assert_eq!(detector.detect("She wore a glove."), NEUTRAL);
    }

    #[test]
    fn earlier_rule_wins_when_both_match() {
        let detector = EmotionDetector::new(&registry());
        assert_eq!(detector.detect("A tragic ending to a story I love."), "happy");
    }

    #[test]
    fn no_rules_means_neutral() {
        let detector = EmotionDetector::new(&CharacterRegistry::new());
        assert!(detector.is_empty());
        assert_eq!(detector.detect("Wonderful."), NEUTRAL);
    }

    #[test]
    fn words_with_regex_characters_are_literal() {
        let registry = CharacterRegistry::new()
            .with_emotion(EmotionRule::new("alarm", ["help", "", "a.b"]));
        let detector = EmotionDetector::new(&registry);
        assert_eq!(detector.detect("He typed a.b into the box."), "alarm");
        assert_eq!(detector.detect("He typed axb into the box."), NEUTRAL);
    }
}
