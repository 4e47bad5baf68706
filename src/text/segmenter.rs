use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::emotion::{EmotionDetector, NEUTRAL};
use super::speaker::{DetectionStrategy, SpeakerDetector};
use crate::config::{DEFAULT_MAX_WORDS, SAFE_CHAR_LIMIT};
use crate::voice::{CharacterRegistry, Gender};

/// A bounded unit of text destined for one synthesis call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    /// Creation order, unique within a job.
    pub id: usize,
    /// Position in the final audio.
    pub order: usize,
    pub text: String,
    /// Character name or narrator label.
    pub speaker: String,
    pub gender: Gender,
    /// Name of the assigned voice profile, set during voice planning.
    #[serde(default)]
    pub voice: Option<String>,
    #[serde(default = "default_speed")]
    pub speed: f32,
    /// Emotion tag from the registry's rules, `"neutral"` when none match.
    #[serde(default = "default_emotion")]
    pub emotion: String,
    pub strategy: DetectionStrategy,
    pub confidence: f32,
}

fn default_speed() -> f32 {
    1.0
}

fn default_emotion() -> String {
    NEUTRAL.to_string()
}

/// Splits filtered text into speaker-attributed segments.
#[derive(Debug, Clone, Copy)]
pub struct Segmenter {
    max_chars: usize,
    max_words: usize,
}

impl Default for Segmenter {
    fn default() -> Self {
        Self::new(SAFE_CHAR_LIMIT, DEFAULT_MAX_WORDS)
    }
}

impl Segmenter {
    pub fn new(max_chars: usize, max_words: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
            max_words: max_words.max(1),
        }
    }

    /// Partition `text` into ordered segments no longer than `max_chars`.
    ///
    /// Paragraphs are packed together until a new speaker opens a paragraph
    /// or a limit would be exceeded. A paragraph that alone exceeds the limit
    /// is re-split at sentence ends, then at whitespace. Only a single token
    /// longer than the limit is emitted oversized.
    pub fn segment(&self, text: &str, registry: &CharacterRegistry) -> Vec<Segment> {
        let detector = SpeakerDetector::new(registry);
        let emotions = EmotionDetector::new(registry);
        let chunks = self.pack_paragraphs(text, &detector);

        let mut texts = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if char_len(&chunk) <= self.max_chars {
                texts.push(chunk);
            } else {
                log::debug!(
                    "Chunk of {} chars exceeds {}, splitting by sentence",
                    char_len(&chunk),
                    self.max_chars
                );
                texts.extend(self.split_oversized(&chunk));
            }
        }

        let segments: Vec<Segment> = texts
            .into_iter()
            .enumerate()
            .map(|(id, text)| {
                let detection = detector.detect(&text);
                let emotion = emotions.detect(&text).to_string();
                Segment {
                    id,
                    order: id,
                    text,
                    speaker: detection.speaker,
                    gender: detection.gender,
                    voice: None,
                    speed: default_speed(),
                    emotion,
                    strategy: detection.strategy,
                    confidence: detection.confidence,
                }
            })
            .collect();

        log::info!("Created {} speaker-based segments", segments.len());
        segments
    }

    fn pack_paragraphs(&self, text: &str, detector: &SpeakerDetector<'_>) -> Vec<String> {
        let mut chunks = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_chars = 0;
        let mut current_words = 0;
        let mut current_speaker: Option<&str> = None;

        for para in paragraphs(text) {
            let para_chars = char_len(para);
            let para_words = para.split_whitespace().count();
            let mut should_split = false;

            if let Some(character) = detector.paragraph_speaker(para) {
                if !current.is_empty() && current_speaker != Some(character.name.as_str()) {
                    should_split = true;
                }
                current_speaker = Some(character.name.as_str());
            }

            let joined_chars = if current.is_empty() {
                para_chars
            } else {
                current_chars + PARAGRAPH_SEPARATOR.len() + para_chars
            };
            if !current.is_empty()
                && (joined_chars > self.max_chars || current_words + para_words > self.max_words)
            {
                should_split = true;
            }

            if should_split {
                chunks.push(current.join(PARAGRAPH_SEPARATOR));
                current = vec![para];
                current_chars = para_chars;
                current_words = para_words;
            } else {
                current.push(para);
                current_chars = joined_chars;
                current_words += para_words;
            }
        }

        if !current.is_empty() {
            chunks.push(current.join(PARAGRAPH_SEPARATOR));
        }
        chunks
    }

    /// Greedy first-fit pack of sentences into pieces of at most `max_chars`.
    fn split_oversized(&self, chunk: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current: Vec<&str> = Vec::new();
        let mut current_chars = 0;

        for sentence in sentences(chunk) {
            let sentence_chars = char_len(sentence);

            if sentence_chars > self.max_chars {
                if !current.is_empty() {
                    pieces.push(current.join(" "));
                    current.clear();
                    current_chars = 0;
                }
                pieces.extend(self.split_words(sentence));
                continue;
            }

            if !current.is_empty() && current_chars + 1 + sentence_chars > self.max_chars {
                pieces.push(current.join(" "));
                current.clear();
                current_chars = 0;
            }
            current_chars += if current.is_empty() { sentence_chars } else { sentence_chars + 1 };
            current.push(sentence);
        }

        if !current.is_empty() {
            pieces.push(current.join(" "));
        }
        pieces
    }

    fn split_words(&self, sentence: &str) -> Vec<String> {
        let mut pieces = Vec::new();
        let mut current = String::new();
        let mut current_chars = 0;

        for word in sentence.split_whitespace() {
            let word_chars = char_len(word);
            if word_chars > self.max_chars {
                log::warn!(
                    "Token of {word_chars} chars exceeds the {} char limit; emitting it oversized",
                    self.max_chars
                );
            }
            if !current.is_empty() && current_chars + 1 + word_chars > self.max_chars {
                pieces.push(std::mem::take(&mut current));
                current_chars = 0;
            }
            if !current.is_empty() {
                current.push(' ');
                current_chars += 1;
            }
            current.push_str(word);
            current_chars += word_chars;
        }

        if !current.is_empty() {
            pieces.push(current);
        }
        pieces
    }
}

const PARAGRAPH_SEPARATOR: &str = "\n\n";

static BLANK_LINE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n[ \t]*\n").expect("valid regex"));

/// Speaker label → segment count, in order of first appearance.
pub fn voice_summary(segments: &[Segment]) -> Vec<(String, usize)> {
    let mut summary: Vec<(String, usize)> = Vec::new();
    for segment in segments {
        match summary.iter_mut().find(|(speaker, _)| *speaker == segment.speaker) {
            Some((_, count)) => *count += 1,
            None => summary.push((segment.speaker.clone(), 1)),
        }
    }
    summary
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Non-empty, trimmed paragraphs separated by blank lines.
fn paragraphs(text: &str) -> impl Iterator<Item = &str> {
    BLANK_LINE.split(text).map(str::trim).filter(|p| !p.is_empty())
}

/// Sentences ending in `.`, `!` or `?` (plus closing quotes) followed by
/// whitespace. Trailing text without a terminator is its own sentence.
fn sentences(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();

    while let Some((idx, ch)) = chars.next() {
        if !matches!(ch, '.' | '!' | '?') {
            continue;
        }
        let mut end = idx + ch.len_utf8();
        while let Some(&(next_idx, next)) = chars.peek() {
            if matches!(next, '"' | '\'' | ')' | '\u{201d}' | '\u{2019}' | '.' | '!' | '?') {
                end = next_idx + next.len_utf8();
                chars.next();
            } else {
                break;
            }
        }
        let at_boundary = chars.peek().map_or(true, |&(_, next)| next.is_whitespace());
        if at_boundary {
            let sentence = text[start..end].trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
            start = end;
        }
    }

    let rest = text[start..].trim();
    if !rest.is_empty() {
        out.push(rest);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{paragraphs, sentences, voice_summary, Segmenter};
    use crate::text::DetectionStrategy;
    use crate::voice::{Character, CharacterRegistry, EmotionRule, Gender};

    fn normalize(text: &str) -> String {
        text.split_whitespace().collect::<Vec<_>>().join(" ")
    }

    fn registry() -> CharacterRegistry {
        CharacterRegistry::new()
            .with(Character::new("Sadie Wen", Gender::Female))
            .with(Character::new("Julius Gong", Gender::Male))
    }

    fn numbered_sentence(i: usize) -> String {
        // 79 characters including the period
        format!("Sentence {i:02} {}.", "x".repeat(66))
    }

    const STORY: &str = "Sadie walked into the classroom, feeling nervous. The desks were arranged in neat rows.\n\nThe professor had not arrived yet.\n\n\nJulius smirked from his seat. \"Ready to lose?\" said Julius.\n\nShe ignored him and took her seat by the window.";

    #[test]
    fn splits_paragraphs_on_blank_lines() {
        let paras: Vec<_> = paragraphs("One.\n\nTwo\nlines.\n \n\n\nThree.").collect();
        assert_eq!(paras, vec!["One.", "Two\nlines.", "Three."]);
    }

    #[test]
    fn splits_sentences_after_terminators() {
        assert_eq!(
            sentences("Hi there. \"Go!\" she said? Yes... 3.5 percent"),
            vec!["Hi there.", "\"Go!\"", "she said?", "Yes...", "3.5 percent"]
        );
    }

    #[test]
    fn new_speaker_starts_a_new_segment() {
        let segments = Segmenter::new(800, 250).segment(STORY, &registry());
        assert_eq!(segments.len(), 2);
        assert!(segments[0].text.starts_with("Sadie walked"));
        assert!(segments[0].text.ends_with("not arrived yet."));
        assert!(segments[1].text.starts_with("Julius smirked"));
        assert_eq!(segments[0].speaker, "Sadie Wen");
        assert_eq!(segments[1].speaker, "Julius Gong");
        assert_eq!(segments[1].strategy, DetectionStrategy::DialogueAttribution);
    }

    #[test]
    fn ids_and_order_are_sequential() {
        let segments = Segmenter::new(60, 250).segment(STORY, &registry());
        for (i, segment) in segments.iter().enumerate() {
            assert_eq!(segment.id, i);
            assert_eq!(segment.order, i);
        }
    }

    #[test]
    fn every_segment_respects_the_character_limit() {
        for max in [40, 60, 100, 200, 800] {
            let segments = Segmenter::new(max, 250).segment(STORY, &registry());
            assert!(segments.iter().all(|s| s.text.chars().count() <= max), "max {max}");
            assert!(segments.iter().all(|s| !s.text.is_empty()));
        }
    }

    #[test]
    fn joining_segments_reproduces_the_text() {
        for max in [40, 100, 800] {
            let segments = Segmenter::new(max, 250).segment(STORY, &registry());
            let joined = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
            assert_eq!(normalize(&joined), normalize(STORY));
        }
    }

    #[test]
    fn segmentation_is_deterministic() {
        let segmenter = Segmenter::new(100, 50);
        assert_eq!(segmenter.segment(STORY, &registry()), segmenter.segment(STORY, &registry()));
    }

    #[test]
    fn word_limit_forces_a_split() {
        let text = "one two three\n\nfour five six\n\nseven eight nine";
        let segments = Segmenter::new(800, 5).segment(text, &CharacterRegistry::new());
        let texts: Vec<_> = segments.iter().map(|s| s.text.as_str()).collect();
        assert_eq!(texts, vec!["one two three", "four five six", "seven eight nine"]);
    }

    #[test]
    fn long_unbroken_paragraph_splits_in_two_at_the_middle_sentence() {
        let text = (0..20).map(numbered_sentence).collect::<Vec<_>>().join(" ");
        assert_eq!(text.chars().count(), 1599);

        let segments = Segmenter::new(800, 250).segment(&text, &CharacterRegistry::new());
        assert_eq!(segments.len(), 2);
        assert!(segments.iter().all(|s| s.text.chars().count() <= 800));
        assert!(segments[0].text.ends_with(&numbered_sentence(9)));
        assert!(segments[1].text.starts_with("Sentence 10"));
    }

    #[test]
    fn oversized_sentence_falls_back_to_word_boundaries() {
        let sentence = format!("{}.", vec!["word"; 60].join(" "));
        let segments = Segmenter::new(50, 250).segment(&sentence, &CharacterRegistry::new());
        assert!(segments.len() > 1);
        assert!(segments.iter().all(|s| s.text.chars().count() <= 50));
        let joined = segments.iter().map(|s| s.text.as_str()).collect::<Vec<_>>().join(" ");
        assert_eq!(joined, sentence);
    }

    #[test]
    fn single_giant_token_is_emitted_oversized() {
        let token = "a".repeat(120);
        let segments = Segmenter::new(50, 250).segment(&token, &CharacterRegistry::new());
        assert_eq!(segments.len(), 1);
        assert_eq!(segments[0].text, token);
    }

    #[test]
    fn segments_are_tagged_with_emotions() {
        let registry = registry().with_emotion(EmotionRule::new("smug", ["smirked"]));
        let segments = Segmenter::new(800, 250).segment(STORY, &registry);
        assert_eq!(segments[0].emotion, "neutral");
        assert_eq!(segments[1].emotion, "smug");
    }

    #[test]
    fn empty_input_yields_no_segments() {
        assert!(Segmenter::default().segment("  \n\n ", &registry()).is_empty());
    }

    #[test]
    fn summary_counts_speakers_in_first_seen_order() {
        let segments = Segmenter::new(60, 250).segment(STORY, &registry());
        let summary = voice_summary(&segments);
        assert_eq!(summary.iter().map(|(_, n)| n).sum::<usize>(), segments.len());
        assert_eq!(summary[0].0, segments[0].speaker);
    }
}
