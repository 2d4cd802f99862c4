//! Decode backend abstraction.
//!
//! The `DecodeBackend` trait decouples the isolate from any specific
//! recognizer (stub echo, whisper.cpp bindings, a remote decoder, etc.).
//! The isolate owns exactly one backend instance on its own thread, so
//! implementations never need internal locking.
//!
//! `&mut self` on `decode` expresses that decoders are stateful: KV caches,
//! language-model context, running token budgets.

use crate::error::{Result, RostrumError};
use crate::ipc::events::TranscriptSegment;
use crate::isolate::messages::StreamOptions;
use tracing::debug;

/// Contract for speech recognizers hosted inside the isolate.
pub trait DecodeBackend: Send + 'static {
    /// Prime the recognizer with raw model weights. Called once per
    /// isolate lifetime, before any decode.
    ///
    /// # Errors
    /// Returns an error if the weights are rejected.
    fn load(&mut self, model: &str, weights: &[u8]) -> Result<()>;

    /// Decode one span of mono f32 audio into transcript segments.
    ///
    /// Segment timestamps are relative to the start of `samples`; the
    /// isolate rebases them onto the session clock.
    ///
    /// # Errors
    /// Returns an error if called before `load` or if the pass fails.
    fn decode(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        options: &StreamOptions,
    ) -> Result<Vec<TranscriptSegment>>;

    /// Drop accumulated decoder state between sessions.
    fn reset(&mut self);
}

/// Echo-style placeholder recognizer.
///
/// Emits one deterministic segment per decode pass describing the audio it
/// was handed, so the full capture → decode → question pipeline can be
/// exercised without model weights that actually understand speech.
pub struct StubBackend {
    loaded_model: Option<String>,
    pass_count: u32,
}

impl StubBackend {
    pub fn new() -> Self {
        Self {
            loaded_model: None,
            pass_count: 0,
        }
    }
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl DecodeBackend for StubBackend {
    fn load(&mut self, model: &str, weights: &[u8]) -> Result<()> {
        if weights.is_empty() {
            return Err(RostrumError::AssetUnavailable {
                name: model.to_string(),
                reason: "empty model payload".into(),
            });
        }
        debug!(model, bytes = weights.len(), "stub backend loaded");
        self.loaded_model = Some(model.to_string());
        Ok(())
    }

    fn decode(
        &mut self,
        samples: &[f32],
        sample_rate: u32,
        _options: &StreamOptions,
    ) -> Result<Vec<TranscriptSegment>> {
        if self.loaded_model.is_none() {
            return Err(RostrumError::IsolateFault(
                "decode requested before load".into(),
            ));
        }
        // Anything shorter than 10 ms is treated as no speech.
        if samples.len() < sample_rate as usize / 100 {
            return Ok(Vec::new());
        }

        self.pass_count += 1;
        let duration = samples.len() as f32 / sample_rate as f32;
        Ok(vec![TranscriptSegment::new(
            format!(
                "stub pass {} covering {} samples at {} hertz",
                self.pass_count,
                samples.len(),
                sample_rate
            ),
            0.0,
            duration,
        )])
    }

    fn reset(&mut self) {
        debug!("stub backend reset");
        self.pass_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_before_load_is_an_error() {
        let mut backend = StubBackend::new();
        let err = backend
            .decode(&[0.0; 1600], 16_000, &StreamOptions::default())
            .unwrap_err();
        assert!(matches!(err, RostrumError::IsolateFault(_)));
    }

    #[test]
    fn loaded_stub_emits_one_segment_per_pass() {
        let mut backend = StubBackend::new();
        backend.load("tiny.en", &[0u8; 16]).unwrap();

        let first = backend
            .decode(&[0.1; 16_000], 16_000, &StreamOptions::default())
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].text.contains("pass 1"));
        assert!((first[0].to - 1.0).abs() < 1e-6);

        let second = backend
            .decode(&[0.1; 8_000], 16_000, &StreamOptions::default())
            .unwrap();
        assert!(second[0].text.contains("pass 2"));
    }

    #[test]
    fn near_empty_audio_yields_no_segments() {
        let mut backend = StubBackend::new();
        backend.load("tiny.en", &[0u8; 16]).unwrap();
        let segments = backend
            .decode(&[0.0; 8], 16_000, &StreamOptions::default())
            .unwrap();
        assert!(segments.is_empty());
    }

    #[test]
    fn empty_weights_are_rejected() {
        let mut backend = StubBackend::new();
        let err = backend.load("tiny.en", &[]).unwrap_err();
        assert!(matches!(err, RostrumError::AssetUnavailable { .. }));
    }
}
