use std::collections::VecDeque;

use crate::error::TranscriptionError;

/// Names one of the two independently consumed views of the ingest buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cursor {
    Asr,
    Vad,
}

/// Per-session audio store.
///
/// Every appended sample lands in three places: the ASR cursor queue, the VAD
/// cursor queue and the full-session retention buffer. The cursors are drained
/// at their own cadence; the retention buffer only grows and is what the
/// finalization pass re-transcribes.
#[derive(Debug)]
pub struct AudioIngestBuffer {
    sample_rate: u32,
    asr: VecDeque<f32>,
    vad: VecDeque<f32>,
    retained: Vec<f32>,
}

impl AudioIngestBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            asr: VecDeque::new(),
            vad: VecDeque::new(),
            retained: Vec::new(),
        }
    }

    /// Appends little-endian 16-bit PCM bytes. A trailing odd byte is dropped.
    ///
    /// Returns the number of samples appended (zero for empty or single-byte input).
    pub fn append(&mut self, bytes: &[u8]) -> usize {
        let samples = pcm16le_to_f32(bytes);
        self.append_samples(&samples);
        samples.len()
    }

    /// Appends already-normalized samples.
    pub fn append_samples(&mut self, samples: &[f32]) {
        if samples.is_empty() {
            return;
        }
        self.asr.extend(samples.iter().copied());
        self.vad.extend(samples.iter().copied());
        self.retained.extend_from_slice(samples);
    }

    pub fn len(&self, cursor: Cursor) -> usize {
        self.queue(cursor).len()
    }

    pub fn is_empty(&self, cursor: Cursor) -> bool {
        self.queue(cursor).is_empty()
    }

    /// Audio queued on `cursor` and not yet consumed by its cadence.
    pub fn queued_ms(&self, cursor: Cursor) -> u64 {
        self.len(cursor) as u64 * 1000 / self.sample_rate as u64
    }

    /// Removes and returns the first `n` samples of `cursor`.
    pub fn drain(&mut self, cursor: Cursor, n: usize) -> Result<Vec<f32>, TranscriptionError> {
        let queue = self.queue_mut(cursor);
        if queue.len() < n {
            return Err(TranscriptionError::BufferUnderrun {
                requested: n,
                available: queue.len(),
            });
        }
        Ok(queue.drain(..n).collect())
    }

    /// Removes and returns everything still queued on `cursor`.
    pub fn drain_all(&mut self, cursor: Cursor) -> Vec<f32> {
        self.queue_mut(cursor).drain(..).collect()
    }

    /// The whole recording so far.
    pub fn retained(&self) -> &[f32] {
        &self.retained
    }

    pub fn retained_duration_ms(&self) -> u64 {
        self.retained.len() as u64 * 1000 / self.sample_rate as u64
    }

    fn queue(&self, cursor: Cursor) -> &VecDeque<f32> {
        match cursor {
            Cursor::Asr => &self.asr,
            Cursor::Vad => &self.vad,
        }
    }

    fn queue_mut(&mut self, cursor: Cursor) -> &mut VecDeque<f32> {
        match cursor {
            Cursor::Asr => &mut self.asr,
            Cursor::Vad => &mut self.vad,
        }
    }
}

/// Slices `samples` between two millisecond marks, clamped to its length.
pub fn slice_ms(samples: &[f32], sample_rate: u32, start_ms: u64, end_ms: u64) -> &[f32] {
    let to_index = |ms: u64| ((ms * sample_rate as u64 / 1000) as usize).min(samples.len());
    let start = to_index(start_ms);
    let end = to_index(end_ms).max(start);
    &samples[start..end]
}

/// Converts little-endian signed 16-bit PCM to f32 in [-1.0, 1.0).
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

/// Converts f32 samples back to little-endian signed 16-bit PCM, clamping out-of-range values.
pub fn f32_to_pcm16le(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        let v = (s.clamp(-1.0, 1.0) * 32767.0).round() as i16;
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
