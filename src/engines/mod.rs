//! Speech synthesis engines.
//!
//! # Available Engines
//!
//! - [`CommandEngine`] - any voice-cloning TTS program driven over its command line
//!   (text on stdin, WAV written to a path argument)

pub mod command;

pub use command::{CommandEngine, CommandModelParams};
