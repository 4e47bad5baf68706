//! Audio helpers: reference-clip probing and the WAV merge collaborator.

use std::path::{Path, PathBuf};

use crate::{NarrateError, Result, SynthesisResult};

/// Merges per-segment audio into the final narration.
///
/// `ordered` is already sorted by segment order; implementations must not
/// reorder it.
pub trait AudioMerger {
    fn merge(&self, ordered: &[PathBuf], output_path: &Path) -> Result<PathBuf>;
}

/// Concatenates WAV files with a short linear crossfade.
#[derive(Debug, Clone)]
pub struct WavMerger {
    crossfade_ms: u32,
}

impl WavMerger {
    pub fn new(crossfade_ms: u32) -> Self {
        Self { crossfade_ms }
    }
}

impl AudioMerger for WavMerger {
    fn merge(&self, ordered: &[PathBuf], output_path: &Path) -> Result<PathBuf> {
        let first = ordered
            .first()
            .ok_or_else(|| NarrateError::AudioMerge("no audio files to merge".to_string()))?;

        let mut combined = read_wav(first)?;
        let crossfade_frames = (combined.sample_rate as u64 * self.crossfade_ms as u64 / 1000) as usize;
        let crossfade_samples = crossfade_frames * usize::from(combined.channels);

        for (i, path) in ordered.iter().enumerate().skip(1) {
            let next = read_wav(path)?;
            if next.sample_rate != combined.sample_rate || next.channels != combined.channels {
                return Err(NarrateError::AudioMerge(format!(
                    "{} is {} Hz/{} ch, expected {} Hz/{} ch",
                    path.display(),
                    next.sample_rate,
                    next.channels,
                    combined.sample_rate,
                    combined.channels
                )));
            }
            if i % 10 == 0 {
                log::debug!("Merging chunk {i}/{}", ordered.len());
            }
            append_with_crossfade(&mut combined.samples, &next.samples, crossfade_samples);
        }

        if let Some(parent) = output_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        combined.write_wav(output_path)?;
        log::info!(
            "Merged {} chunks into {} ({:.1}s)",
            ordered.len(),
            output_path.display(),
            combined.duration_secs()
        );
        Ok(output_path.to_path_buf())
    }
}

/// Read any PCM or float WAV into f32 samples in [-1, 1].
pub fn read_wav(path: &Path) -> Result<SynthesisResult> {
    let mut reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<Vec<_>, _>>()?
        }
    };
    Ok(SynthesisResult {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Duration of a WAV file in seconds, read from its header.
pub fn wav_duration_secs(path: &Path) -> Result<f64> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    // duration() counts frames, not interleaved samples
    Ok(reader.duration() as f64 / spec.sample_rate as f64)
}

fn append_with_crossfade(dst: &mut Vec<f32>, src: &[f32], crossfade_samples: usize) {
    let overlap = crossfade_samples.min(dst.len()).min(src.len());
    if overlap == 0 {
        dst.extend_from_slice(src);
        return;
    }

    let dst_start = dst.len() - overlap;
    for i in 0..overlap {
        let t = (i + 1) as f32 / (overlap as f32 + 1.0);
        let left = dst[dst_start + i] * (1.0 - t);
        let right = src[i] * t;
        dst[dst_start + i] = left + right;
    }

    dst.extend_from_slice(&src[overlap..]);
}
