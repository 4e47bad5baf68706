//! Character registry and voice assignment.

pub mod assigner;
pub mod profile;
pub mod registry;

pub use assigner::{normalize_label, VoiceAssigner, VoicePlan};
pub use profile::VoiceProfile;
pub use registry::{Character, CharacterRegistry, EmotionRule, Gender, TextFilterRule};
