//! Rechunking of inbound audio to the pipeline chunk size

use parley_core::{AudioChunk, SampleRate};

/// Collects decoded samples and releases fixed-size chunks
#[derive(Debug)]
pub struct Rechunker {
    sample_rate: SampleRate,
    samples_per_chunk: usize,
    pending: Vec<i16>,
}

impl Rechunker {
    pub fn new(sample_rate: SampleRate, chunk_ms: u64) -> Self {
        let samples_per_chunk = sample_rate.samples_for_ms(chunk_ms).max(1);
        Self {
            sample_rate,
            samples_per_chunk,
            pending: Vec::with_capacity(samples_per_chunk * 2),
        }
    }

    /// Append samples; returns every chunk that is now complete
    pub fn push(&mut self, samples: &[i16]) -> Vec<AudioChunk> {
        self.pending.extend_from_slice(samples);

        let complete = self.pending.len() / self.samples_per_chunk;
        if complete == 0 {
            return Vec::new();
        }

        let take = complete * self.samples_per_chunk;
        let chunks = self.pending[..take]
            .chunks_exact(self.samples_per_chunk)
            .map(|c| AudioChunk::from_i16(c, self.sample_rate))
            .collect();
        self.pending.drain(..take);
        chunks
    }

    /// Release whatever is left as a short chunk
    pub fn flush(&mut self) -> Option<AudioChunk> {
        if self.pending.is_empty() {
            return None;
        }
        let chunk = AudioChunk::from_i16(&self.pending, self.sample_rate);
        self.pending.clear();
        Some(chunk)
    }

    pub fn pending_samples(&self) -> usize {
        self.pending.len()
    }
}
