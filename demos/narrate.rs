use std::path::PathBuf;
use std::time::Instant;

use narrate_rs::{
    audio::WavMerger,
    engines::CommandEngine,
    job::SegmentProgress,
    pipeline::Narrator,
    voice::CharacterRegistry,
    Document, NarrationConfig,
};

// Usage: narrate <book.txt> [config.json] [characters.json]
// The TTS program is taken from $NARRATE_TTS (default: xtts-cli).
fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let input = PathBuf::from(args.next().ok_or("usage: narrate <book.txt> [config.json] [characters.json]")?);
    let config = match args.next() {
        Some(path) => NarrationConfig::from_file(&PathBuf::from(path))?,
        None => NarrationConfig::default(),
    };
    let registry = match args.next() {
        Some(path) => CharacterRegistry::from_file(&PathBuf::from(path))?,
        None => CharacterRegistry::new(),
    };

    let program = std::env::var("NARRATE_TTS").unwrap_or_else(|_| "xtts-cli".to_string());
    let engine = CommandEngine::new(program);
    let merger = WavMerger::new(config.crossfade_ms);

    let mut narrator = Narrator::new(config, registry, engine, merger).with_observer(|p: &SegmentProgress| {
        println!("[{}/{}] segment {}: {:?}", p.done, p.total, p.id, p.outcome);
    });

    let document = Document::from_text_file(&input)?;
    let start = Instant::now();
    let report = narrator.narrate(&document)?;
    println!(
        "Job {} finished at {:?} in {:.2?}: {} synthesized, {} skipped, {} failed",
        report.job_id,
        report.stage,
        start.elapsed(),
        report.synthesized,
        report.skipped,
        report.failed_ids.len()
    );
    for (speaker, count) in &report.voices {
        println!("  {speaker}: {count} segments");
    }
    println!("{}", report.status_line());
    Ok(())
}
