//! Voice activity detection.
//!
//! Stream-mode sessions decode continuously, so the isolate asks a
//! `VoiceActivityDetector` whether a drained window is worth handing to the
//! backend at all. The same RMS math drives the session's activity meter.
//!
//! `EnergyVad` is the default; a neural detector can be swapped in behind
//! the trait without touching the isolate.

pub mod energy;

pub use energy::EnergyVad;

/// Whether a span of audio contains speech or silence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VadDecision {
    /// Energy above threshold (or within the hangover window).
    Speech,
    /// Below threshold with the hangover exhausted.
    Silence,
}

impl VadDecision {
    pub fn is_speech(self) -> bool {
        self == VadDecision::Speech
    }
}

/// Trait for all VAD implementations.
///
/// Implementors may be stateful (hangover counters, hidden states). Samples
/// are mono f32 at whatever rate the detector was configured for; resampling
/// is the caller's responsibility.
pub trait VoiceActivityDetector: Send + 'static {
    /// Classify one span of samples.
    fn classify(&mut self, samples: &[f32]) -> VadDecision;

    /// Drop internal state between sessions.
    fn reset(&mut self);
}

/// Root-mean-square amplitude of a sample slice. Empty input is 0.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rms_of_square_wave_matches_amplitude() {
        let samples: Vec<f32> = (0..256)
            .map(|i| if i % 2 == 0 { 0.5 } else { -0.5 })
            .collect();
        assert!((rms(&samples) - 0.5).abs() < 1e-5);
    }

    #[test]
    fn rms_of_empty_slice_is_zero() {
        assert_eq!(rms(&[]), 0.0);
    }
}
