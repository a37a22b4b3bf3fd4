//! Audio chunk types and utilities

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Full-scale magnitude of a signed 16-bit sample
const PCM16_SCALE: f32 = 32768.0;

/// Sample rates the pipeline runs at end to end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum SampleRate {
    /// 8kHz - Telephony
    #[default]
    Hz8000,
    /// 16kHz - Wideband speech
    Hz16000,
    /// 24kHz - High quality synthesis
    Hz24000,
}

impl SampleRate {
    /// Get sample rate as u32
    pub fn as_u32(&self) -> u32 {
        match self {
            SampleRate::Hz8000 => 8000,
            SampleRate::Hz16000 => 16000,
            SampleRate::Hz24000 => 24000,
        }
    }

    /// Parse a configured rate in Hz
    pub fn from_hz(hz: u32) -> Option<Self> {
        match hz {
            8000 => Some(SampleRate::Hz8000),
            16000 => Some(SampleRate::Hz16000),
            24000 => Some(SampleRate::Hz24000),
            _ => None,
        }
    }

    /// Number of mono samples covering `ms` milliseconds
    pub fn samples_for_ms(&self, ms: u64) -> usize {
        (self.as_u32() as u64 * ms / 1000) as usize
    }
}

/// One chunk of mono audio
///
/// Samples are stored as f32 normalized to [-1.0, 1.0]. The `utterance`
/// tag is set by the segmenter on audio that falls inside a detected
/// speech segment.
#[derive(Clone)]
pub struct AudioChunk {
    samples: Arc<[f32]>,
    sample_rate: SampleRate,
    energy_db: f32,
    utterance: bool,
}

impl std::fmt::Debug for AudioChunk {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioChunk")
            .field("samples_len", &self.samples.len())
            .field("sample_rate", &self.sample_rate)
            .field("duration", &self.duration())
            .field("energy_db", &self.energy_db)
            .field("utterance", &self.utterance)
            .finish()
    }
}

impl PartialEq for AudioChunk {
    fn eq(&self, other: &Self) -> bool {
        self.sample_rate == other.sample_rate
            && self.utterance == other.utterance
            && self.samples[..] == other.samples[..]
    }
}

impl AudioChunk {
    /// Create a chunk from f32 samples
    pub fn new(samples: Vec<f32>, sample_rate: SampleRate) -> Self {
        let energy_db = Self::calculate_energy_db(&samples);
        Self {
            samples: samples.into(),
            sample_rate,
            energy_db,
            utterance: false,
        }
    }

    /// A chunk of digital silence
    pub fn silence(sample_rate: SampleRate, duration: Duration) -> Self {
        let len = sample_rate.samples_for_ms(duration.as_millis() as u64);
        Self::new(vec![0.0; len], sample_rate)
    }

    /// Convert from PCM16 bytes (little-endian)
    pub fn from_pcm16(bytes: &[u8], sample_rate: SampleRate) -> Self {
        let samples: Vec<i16> = bytes
            .chunks_exact(2)
            .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Self::from_i16(&samples, sample_rate)
    }

    /// Build from signed 16-bit samples
    pub fn from_i16(samples: &[i16], sample_rate: SampleRate) -> Self {
        Self::new(
            samples.iter().map(|&s| s as f32 / PCM16_SCALE).collect(),
            sample_rate,
        )
    }

    /// Signed 16-bit samples; exact inverse of [`AudioChunk::from_i16`]
    pub fn to_i16(&self) -> Vec<i16> {
        self.samples
            .iter()
            .map(|&s| (s * PCM16_SCALE).round().clamp(i16::MIN as f32, i16::MAX as f32) as i16)
            .collect()
    }

    /// Convert to PCM16 bytes (little-endian)
    pub fn to_pcm16(&self) -> Vec<u8> {
        self.to_i16().into_iter().flat_map(i16::to_le_bytes).collect()
    }

    /// Copy of this chunk carrying the utterance tag
    pub fn tagged(&self, utterance: bool) -> Self {
        Self {
            utterance,
            ..self.clone()
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> SampleRate {
        self.sample_rate
    }

    /// RMS energy in dBFS (-96 for silence)
    pub fn energy_db(&self) -> f32 {
        self.energy_db
    }

    /// Whether the segmenter placed this chunk inside an utterance
    pub fn is_utterance(&self) -> bool {
        self.utterance
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate.as_u32() as f64)
    }

    /// Split into chunks of at most `samples_per_chunk` samples
    pub fn split(&self, samples_per_chunk: usize) -> Vec<AudioChunk> {
        if samples_per_chunk == 0 || self.samples.len() <= samples_per_chunk {
            return vec![self.clone()];
        }
        self.samples
            .chunks(samples_per_chunk)
            .map(|piece| AudioChunk::new(piece.to_vec(), self.sample_rate).tagged(self.utterance))
            .collect()
    }

    /// Join chunks of the same rate into one contiguous chunk
    ///
    /// Returns `None` for an empty input.
    pub fn concat<'a>(chunks: impl IntoIterator<Item = &'a AudioChunk>) -> Option<AudioChunk> {
        let mut iter = chunks.into_iter().peekable();
        let first = iter.peek()?;
        let sample_rate = first.sample_rate;
        let utterance = first.utterance;
        let samples: Vec<f32> = iter.flat_map(|c| c.samples.iter().copied()).collect();
        Some(AudioChunk::new(samples, sample_rate).tagged(utterance))
    }

    /// Calculate RMS energy in decibels
    fn calculate_energy_db(samples: &[f32]) -> f32 {
        if samples.is_empty() {
            return -96.0;
        }

        let sum_squares: f32 = samples.iter().map(|s| s * s).sum();
        let rms = (sum_squares / samples.len() as f32).sqrt();

        if rms > 0.0 {
            (20.0 * rms.log10()).max(-96.0)
        } else {
            -96.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_parse() {
        assert_eq!(SampleRate::from_hz(8000), Some(SampleRate::Hz8000));
        assert_eq!(SampleRate::from_hz(44100), None);
        assert_eq!(SampleRate::Hz8000.samples_for_ms(20), 160);
        assert_eq!(SampleRate::Hz16000.samples_for_ms(20), 320);
    }

    #[test]
    fn test_pcm16_conversion() {
        let chunk = AudioChunk::from_i16(&[0, 16384, -16384, 32767], SampleRate::Hz8000);
        let bytes = chunk.to_pcm16();
        assert_eq!(bytes.len(), 8);

        let back = AudioChunk::from_pcm16(&bytes, SampleRate::Hz8000);
        assert_eq!(back.to_i16(), vec![0, 16384, -16384, 32767]);
    }

    #[test]
    fn test_pcm16_round_trip_is_lossless() {
        let original: Vec<i16> = vec![i16::MIN, -12345, -1, 1, 999, 12345, i16::MAX];
        let mut samples = original.clone();
        for _ in 0..3 {
            samples = AudioChunk::from_i16(&samples, SampleRate::Hz8000).to_i16();
        }
        assert_eq!(samples, original);

        let hot = AudioChunk::new(vec![1.5, -1.5], SampleRate::Hz8000);
        assert_eq!(hot.to_i16(), vec![i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_energy() {
        let silence = AudioChunk::silence(SampleRate::Hz8000, Duration::from_millis(20));
        assert_eq!(silence.energy_db(), -96.0);
        assert_eq!(silence.len(), 160);

        let loud = AudioChunk::new(vec![0.5; 160], SampleRate::Hz8000);
        assert!((loud.energy_db() - (-6.02)).abs() < 0.1);
    }

    #[test]
    fn test_split_and_concat() {
        let chunk = AudioChunk::new(vec![0.1; 400], SampleRate::Hz8000).tagged(true);
        let parts = chunk.split(160);
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[2].len(), 80);
        assert!(parts.iter().all(|p| p.is_utterance()));

        let joined = AudioChunk::concat(&parts).unwrap();
        assert_eq!(joined, chunk);
        assert_eq!(joined.duration(), Duration::from_millis(50));

        assert!(AudioChunk::concat(std::iter::empty()).is_none());
    }
}
