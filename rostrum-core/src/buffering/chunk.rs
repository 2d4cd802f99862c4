//! Typed audio chunk passed from the capture boundary into the pipeline.

/// A contiguous block of mono PCM in [-1.0, 1.0] at a known sample rate.
///
/// The sliding buffer owns pushed chunks until they are consumed by a decode
/// pass or trimmed away.
#[derive(Debug, Clone)]
pub struct AudioChunk {
    pub samples: Vec<f32>,
    /// Hz; 16 000 everywhere past the capture shim.
    pub sample_rate: u32,
}

impl AudioChunk {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
