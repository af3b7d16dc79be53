//! WAV handling for recorded notes. All functions block; async callers go
//! through `spawn_blocking`.

use std::fs;
use std::path::{Path, PathBuf};

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use log::{debug, warn};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("wav error on {}: {source}", .path.display())]
    Wav {
        path: PathBuf,
        #[source]
        source: hound::Error,
    },
}

impl AudioError {
    fn wav(path: &Path) -> impl FnOnce(hound::Error) -> AudioError + '_ {
        move |source| AudioError::Wav {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Layout of raw little-endian signed 16-bit capture data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PcmFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

impl Default for PcmFormat {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            channels: 1,
        }
    }
}

impl PcmFormat {
    fn spec(&self) -> WavSpec {
        WavSpec {
            channels: self.channels,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: SampleFormat::Int,
        }
    }
}

/// Wraps raw PCM in a WAV container. Returns the duration in milliseconds.
pub fn pcm_to_wav(pcm: &Path, wav: &Path, format: PcmFormat) -> Result<u64, AudioError> {
    let data = fs::read(pcm).map_err(|source| AudioError::Io {
        path: pcm.to_path_buf(),
        source,
    })?;
    if data.len() % 2 != 0 {
        warn!("[audio] {} has a trailing odd byte, dropping it", pcm.display());
    }

    let mut writer = WavWriter::create(wav, format.spec()).map_err(AudioError::wav(wav))?;
    for pair in data.chunks_exact(2) {
        writer
            .write_sample(i16::from_le_bytes([pair[0], pair[1]]))
            .map_err(AudioError::wav(wav))?;
    }
    writer.finalize().map_err(AudioError::wav(wav))?;

    let frames = (data.len() / 2) as u64 / u64::from(format.channels.max(1));
    Ok(frames_to_ms(frames, format.sample_rate))
}

pub fn wav_duration_ms(path: &Path) -> Result<u64, AudioError> {
    let reader = WavReader::open(path).map_err(AudioError::wav(path))?;
    Ok(frames_to_ms(u64::from(reader.duration()), reader.spec().sample_rate))
}

/// Copies `[start_ms, start_ms + duration_ms)` of `source` into `output`,
/// clamped to the source length. Returns the duration actually written.
pub fn extract_window(
    source: &Path,
    output: &Path,
    start_ms: u64,
    duration_ms: u64,
) -> Result<u64, AudioError> {
    let mut reader = WavReader::open(source).map_err(AudioError::wav(source))?;
    let spec = reader.spec();
    let total_frames = u64::from(reader.duration());

    let start_frame = ms_to_frames(start_ms, spec.sample_rate).min(total_frames);
    let end_frame = ms_to_frames(start_ms.saturating_add(duration_ms), spec.sample_rate)
        .min(total_frames);
    let frames = end_frame.saturating_sub(start_frame);

    // start_frame <= duration(), which fits in u32
    reader
        .seek(start_frame as u32)
        .map_err(|source_err| AudioError::Io {
            path: source.to_path_buf(),
            source: source_err,
        })?;

    let count = (frames * u64::from(spec.channels)) as usize;
    let mut writer = WavWriter::create(output, spec).map_err(AudioError::wav(output))?;
    match spec.sample_format {
        SampleFormat::Int => {
            for sample in reader.samples::<i32>().take(count) {
                let sample = sample.map_err(AudioError::wav(source))?;
                writer.write_sample(sample).map_err(AudioError::wav(output))?;
            }
        }
        SampleFormat::Float => {
            for sample in reader.samples::<f32>().take(count) {
                let sample = sample.map_err(AudioError::wav(source))?;
                writer.write_sample(sample).map_err(AudioError::wav(output))?;
            }
        }
    }
    writer.finalize().map_err(AudioError::wav(output))?;

    let written_ms = frames_to_ms(frames, spec.sample_rate);
    debug!(
        "[audio] extracted {}ms from {} at {start_ms}ms into {}",
        written_ms,
        source.display(),
        output.display()
    );
    Ok(written_ms)
}

fn ms_to_frames(ms: u64, sample_rate: u32) -> u64 {
    ms.saturating_mul(u64::from(sample_rate)) / 1000
}

fn frames_to_ms(frames: u64, sample_rate: u32) -> u64 {
    if sample_rate == 0 {
        return 0;
    }
    frames.saturating_mul(1000) / u64::from(sample_rate)
}
