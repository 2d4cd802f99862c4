//! Sample-rate conversion on the session thread.
//!
//! Devices capture at their native rate (48 kHz is typical); the decode
//! pipeline runs at [`crate::buffering::PIPELINE_SAMPLE_RATE`]. The
//! converter bridges the two with a rubato `FastFixedIn` session, feeding
//! it fixed-size input blocks and carrying any remainder to the next call.
//!
//! When the rates already match no rubato session exists and `process`
//! returns the input unchanged.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::error;

use crate::error::{Result, RostrumError};

/// Converts mono f32 audio between two fixed sample rates.
pub struct RateConverter {
    /// `None` when capture and target rates match.
    resampler: Option<FastFixedIn<f32>>,
    /// Input held back until a full block is available.
    pending: Vec<f32>,
    /// Input frames rubato consumes per call.
    block: usize,
    /// Scratch output, `[1][output_frames_max]`.
    scratch: Vec<Vec<f32>>,
}

impl RateConverter {
    /// Create a converter from `capture_rate` to `target_rate`, feeding
    /// rubato `block` input frames at a time.
    ///
    /// # Errors
    /// `CaptureFault` when rubato rejects the configuration.
    pub fn new(capture_rate: u32, target_rate: u32, block: usize) -> Result<Self> {
        if capture_rate == target_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                block,
                scratch: Vec::new(),
            });
        }

        let ratio = target_rate as f64 / capture_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            block,
            1, // mono
        )
        .map_err(|e| RostrumError::CaptureFault(format!("resampler init: {e}")))?;

        let max_out = resampler.output_frames_max();
        let scratch = vec![vec![0f32; max_out]; 1];

        tracing::info!(capture_rate, target_rate, block, "resampling enabled");

        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            block,
            scratch,
        })
    }

    /// Feed captured samples, returning whatever converted audio is ready.
    ///
    /// Output may be empty while input accumulates toward a full block.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut converted = Vec::new();
        while self.pending.len() >= self.block {
            let input = &self.pending[..self.block];
            match resampler.process_into_buffer(&[input], &mut self.scratch, None) {
                Ok((_consumed, produced)) => {
                    converted.extend_from_slice(&self.scratch[0][..produced]);
                }
                Err(e) => error!("resampler process error: {e}"),
            }
            self.pending.drain(..self.block);
        }
        converted
    }

    /// `true` when no conversion happens.
    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}
