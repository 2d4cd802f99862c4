//! Energy-based VAD: RMS threshold plus a hangover counter.
//!
//! 1. Compute RMS of the span.
//! 2. RMS at or above `threshold` → `Speech`, hangover counter refilled.
//! 3. Below threshold with hangover remaining → `Speech`, counter decremented
//!    (keeps syllable endings from being clipped).
//! 4. Otherwise → `Silence`.

use super::{rms, VadDecision, VoiceActivityDetector};

/// Simple energy detector. Tuned for close-mic lecture capture.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    /// RMS amplitude above which a span counts as speech.
    /// Typical range 0.01 to 0.05 for a quiet room.
    threshold: f32,
    /// Silent spans still reported as speech after real speech ends.
    hangover_spans: u32,
    hangover_counter: u32,
}

impl EnergyVad {
    pub fn new(threshold: f32, hangover_spans: u32) -> Self {
        Self {
            threshold,
            hangover_spans,
            hangover_counter: 0,
        }
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        // Hangover sized for the 1.5 s flush cadence.
        Self::new(0.015, 2)
    }
}

impl VoiceActivityDetector for EnergyVad {
    fn classify(&mut self, samples: &[f32]) -> VadDecision {
        if rms(samples) >= self.threshold {
            self.hangover_counter = self.hangover_spans;
            VadDecision::Speech
        } else if self.hangover_counter > 0 {
            self.hangover_counter -= 1;
            VadDecision::Speech
        } else {
            VadDecision::Silence
        }
    }

    fn reset(&mut self) {
        self.hangover_counter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(level: f32) -> Vec<f32> {
        vec![level; 320]
    }

    #[test]
    fn quiet_span_is_silence() {
        let mut vad = EnergyVad::new(0.03, 0);
        assert_eq!(vad.classify(&span(0.001)), VadDecision::Silence);
    }

    #[test]
    fn loud_span_is_speech() {
        let mut vad = EnergyVad::new(0.03, 0);
        assert_eq!(vad.classify(&span(0.4)), VadDecision::Speech);
    }

    #[test]
    fn hangover_extends_speech_then_expires() {
        let mut vad = EnergyVad::new(0.03, 2);
        assert_eq!(vad.classify(&span(0.4)), VadDecision::Speech);
        assert_eq!(vad.classify(&span(0.0)), VadDecision::Speech);
        assert_eq!(vad.classify(&span(0.0)), VadDecision::Speech);
        assert_eq!(vad.classify(&span(0.0)), VadDecision::Silence);
    }

    #[test]
    fn reset_forgets_recent_speech() {
        let mut vad = EnergyVad::new(0.03, 5);
        vad.classify(&span(0.4));
        vad.reset();
        assert_eq!(vad.classify(&span(0.0)), VadDecision::Silence);
    }
}
