//! Text preparation: content filtering, speaker and emotion detection, segmentation.

pub mod emotion;
pub mod filter;
pub mod segmenter;
pub mod speaker;

pub use emotion::{EmotionDetector, NEUTRAL};
pub use filter::{ContentFilter, FilterOutcome};
pub use segmenter::{voice_summary, Segment, Segmenter};
pub use speaker::{Detection, DetectionStrategy, SpeakerDetector, FEMALE_NARRATOR, MALE_NARRATOR};
