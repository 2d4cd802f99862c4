//! Sliding buffer between capture and decode.
//!
//! Accumulates captured [`AudioChunk`]s and meters them out to decode passes:
//!
//! ```text
//!   push ──▶ [ c0 | c1 | c2 | ... ]──▶ drain ──▶ decode pass
//!              ▲                │
//!              │                └── last 0.5 s retained for continuity
//!              └── oldest chunks trimmed once > 5.0 s buffered
//! ```
//!
//! The retention ceiling is lossy: when decode latency falls behind
//! sustained capture, old audio is dropped instead of growing the buffer
//! without bound.

use std::collections::VecDeque;

use crate::buffering::chunk::AudioChunk;

/// Minimum buffered duration before a decode pass is worthwhile.
pub const FLUSH_THRESHOLD_SECS: f64 = 1.5;

/// Tail of consumed audio carried into the next pass so words split across
/// pass boundaries are not lost.
pub const RETAIN_TAIL_SECS: f64 = 0.5;

/// Hard ceiling on buffered audio. Samples older than this are dropped even
/// if they were never decoded.
pub const MAX_RETAINED_SECS: f64 = 5.0;

/// Bounded accumulation buffer for captured PCM, with decode-continuity tail.
#[derive(Debug)]
pub struct AudioSlidingBuffer {
    chunks: VecDeque<AudioChunk>,
    buffered_samples: usize,
    sample_rate: u32,
}

impl AudioSlidingBuffer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            chunks: VecDeque::new(),
            buffered_samples: 0,
            sample_rate,
        }
    }

    /// Append a captured chunk, then enforce the retention ceiling.
    ///
    /// Returns the number of samples dropped by trimming (0 in the common
    /// case), for the session diagnostics counters.
    pub fn push(&mut self, chunk: AudioChunk) -> usize {
        if chunk.is_empty() {
            return 0;
        }
        self.buffered_samples += chunk.samples.len();
        self.chunks.push_back(chunk);
        self.trim()
    }

    /// Drop oldest whole chunks until the buffered duration fits under
    /// [`MAX_RETAINED_SECS`]. A single oversized chunk is front-truncated so
    /// the ceiling holds regardless of chunk sizing.
    ///
    /// Returns the number of samples dropped.
    pub fn trim(&mut self) -> usize {
        let cap = self.secs_to_samples(MAX_RETAINED_SECS);
        let mut dropped = 0usize;

        while self.buffered_samples > cap && self.chunks.len() > 1 {
            if let Some(oldest) = self.chunks.pop_front() {
                self.buffered_samples -= oldest.samples.len();
                dropped += oldest.samples.len();
            }
        }

        if self.buffered_samples > cap {
            if let Some(only) = self.chunks.front_mut() {
                let excess = only.samples.len() - cap;
                only.samples.drain(..excess);
                self.buffered_samples -= excess;
                dropped += excess;
            }
        }

        dropped
    }

    /// True once enough audio has accrued for a decode pass.
    pub fn should_flush(&self) -> bool {
        self.buffered_samples >= self.secs_to_samples(FLUSH_THRESHOLD_SECS)
    }

    /// Take everything buffered for a decode pass.
    ///
    /// The last [`RETAIN_TAIL_SECS`] of the returned audio stays behind as
    /// the sole buffered chunk, so the next pass re-hears the boundary.
    pub fn drain(&mut self) -> Vec<f32> {
        let combined = self.combined();
        let tail_len = self.secs_to_samples(RETAIN_TAIL_SECS).min(combined.len());

        self.chunks.clear();
        self.buffered_samples = 0;
        if tail_len > 0 {
            let tail = combined[combined.len() - tail_len..].to_vec();
            self.buffered_samples = tail.len();
            self.chunks
                .push_back(AudioChunk::new(tail, self.sample_rate));
        }

        combined
    }

    /// Take everything buffered, including any continuity tail, leaving the
    /// buffer empty. Used for the final pass when capture stops.
    pub fn take_remainder(&mut self) -> Vec<f32> {
        let combined = self.combined();
        self.chunks.clear();
        self.buffered_samples = 0;
        combined
    }

    /// Discard all buffered audio. Called at session start.
    pub fn reset(&mut self) {
        self.chunks.clear();
        self.buffered_samples = 0;
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffered_samples
    }

    pub fn buffered_secs(&self) -> f64 {
        self.buffered_samples as f64 / self.sample_rate as f64
    }

    pub fn is_empty(&self) -> bool {
        self.buffered_samples == 0
    }

    fn combined(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.buffered_samples);
        for chunk in &self.chunks {
            out.extend_from_slice(&chunk.samples);
        }
        out
    }

    fn secs_to_samples(&self, secs: f64) -> usize {
        (secs * self.sample_rate as f64).round() as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffering::PIPELINE_SAMPLE_RATE;

    const RATE: u32 = PIPELINE_SAMPLE_RATE;

    fn chunk_of_secs(secs: f64, value: f32) -> AudioChunk {
        let n = (secs * RATE as f64) as usize;
        AudioChunk::new(vec![value; n], RATE)
    }

    #[test]
    fn flush_threshold_at_one_and_a_half_seconds() {
        let mut buf = AudioSlidingBuffer::new(RATE);
        buf.push(chunk_of_secs(1.0, 0.1));
        assert!(!buf.should_flush());
        buf.push(chunk_of_secs(0.5, 0.1));
        assert!(buf.should_flush());
    }

    #[test]
    fn drain_retains_half_second_tail() {
        let mut buf = AudioSlidingBuffer::new(RATE);
        buf.push(chunk_of_secs(2.0, 0.25));

        let drained = buf.drain();
        assert_eq!(drained.len(), (2.0 * RATE as f64) as usize);
        assert_eq!(buf.buffered_samples(), (0.5 * RATE as f64) as usize);

        // The retained tail is the end of the drained audio, verbatim.
        let next = buf.take_remainder();
        assert_eq!(&drained[drained.len() - next.len()..], next.as_slice());
    }

    #[test]
    fn retention_ceiling_holds_while_decode_stalls() {
        let mut buf = AudioSlidingBuffer::new(RATE);
        // 10 s fed in 0.25 s chunks with no drain in between.
        for _ in 0..40 {
            buf.push(chunk_of_secs(0.25, 0.5));
            assert!(buf.buffered_secs() <= MAX_RETAINED_SECS + 1e-9);
        }
        assert!((buf.buffered_secs() - MAX_RETAINED_SECS).abs() < 0.3);
    }

    #[test]
    fn oversized_single_chunk_is_front_truncated() {
        let mut buf = AudioSlidingBuffer::new(RATE);
        let dropped = buf.push(chunk_of_secs(8.0, 0.5));
        assert!(dropped > 0);
        assert!(buf.buffered_secs() <= MAX_RETAINED_SECS + 1e-9);
    }

    #[test]
    fn take_remainder_empties_buffer() {
        let mut buf = AudioSlidingBuffer::new(RATE);
        buf.push(chunk_of_secs(0.8, 0.3));
        let all = buf.take_remainder();
        assert_eq!(all.len(), (0.8 * RATE as f64) as usize);
        assert!(buf.is_empty());
        assert!(buf.take_remainder().is_empty());
    }

    #[test]
    fn reset_discards_everything() {
        let mut buf = AudioSlidingBuffer::new(RATE);
        buf.push(chunk_of_secs(3.0, 0.2));
        buf.reset();
        assert!(buf.is_empty());
        assert!(!buf.should_flush());
    }
}
