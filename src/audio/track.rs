use std::path::Path;

use hound::WavReader;
use tracing::{debug, info};

use crate::error::{Result, SynclipError};

/// A decoded audio track: mono PCM samples plus the sample rate.
///
/// Loaded once at the start of a run and never mutated afterwards. Stereo
/// sources are downmixed by channel averaging.
#[derive(Debug, Clone)]
pub struct AudioTrack {
    samples: Vec<i16>,
    sample_rate: u32,
}

impl AudioTrack {
    pub fn new(samples: Vec<i16>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    /// Decode a WAV file into a mono track.
    pub fn from_wav(path: &Path) -> Result<Self> {
        let reader = WavReader::open(path)
            .map_err(|e| SynclipError::Decode(format!("Failed to open WAV file: {e}")))?;

        let spec = reader.spec();
        let sample_rate = spec.sample_rate;
        let channels = spec.channels.max(1) as usize;

        info!(
            "Decoding audio: {} Hz, {} channels, {} bits",
            sample_rate, spec.channels, spec.bits_per_sample
        );

        let interleaved: Vec<i16> = match spec.sample_format {
            hound::SampleFormat::Int => reader
                .into_samples::<i16>()
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SynclipError::Decode(format!("Bad sample data: {e}")))?,
            hound::SampleFormat::Float => reader
                .into_samples::<f32>()
                .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * i16::MAX as f32) as i16))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| SynclipError::Decode(format!("Bad sample data: {e}")))?,
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            downmix(&interleaved, channels)
        };

        debug!("Decoded {} mono samples", samples.len());

        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }

    /// Samples covering `[start_ms, end_ms)`, clamped to the track.
    pub fn slice_ms(&self, start_ms: u64, end_ms: u64) -> &[i16] {
        let start = self.ms_to_sample(start_ms).min(self.samples.len());
        let end = self.ms_to_sample(end_ms).min(self.samples.len());
        &self.samples[start..end.max(start)]
    }

    fn ms_to_sample(&self, ms: u64) -> usize {
        (ms * self.sample_rate as u64 / 1000) as usize
    }
}

fn downmix(interleaved: &[i16], channels: usize) -> Vec<i16> {
    interleaved
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
