//! Job progress tracking and resumable synthesis.

pub mod checkpoint;
pub mod executor;
pub mod state;

pub use checkpoint::{Checkpoint, SegmentRegistry};
pub use executor::{
    chunk_path, EngineSession, ProgressObserver, ResumableExecutor, RunSummary, SegmentOutcome,
    SegmentProgress,
};
pub use state::{JobState, Stage};
