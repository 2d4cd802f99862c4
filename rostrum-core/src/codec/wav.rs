//! PCM-16 mono WAV encoding and decoding.
//!
//! The encoder is written out byte-by-byte rather than through a writer
//! library: its output is a contract — a 44-byte RIFF header followed by
//! exactly 2·N bytes of little-endian PCM-16, with float samples clipped to
//! [-1, 1] and quantized half-away-from-zero (negative samples scaled by
//! 0x8000, positive by 0x7FFF so both rails are reachable).
//!
//! Decoding goes through `hound`, which also handles foreign WAVs (stereo,
//! float, 24-bit) fed in by hosts.

use std::io::Cursor;

use crate::error::{Result, RostrumError};

/// Size of the RIFF/fmt/data header emitted by [`encode_wav_pcm16`].
pub const WAV_HEADER_LEN: usize = 44;

/// Encode mono f32 samples as a self-contained PCM-16 WAV buffer.
///
/// Pure and deterministic; the output length is always `44 + 2 * samples.len()`.
pub fn encode_wav_pcm16(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    let data_len = samples.len() * 2;
    let mut out = Vec::with_capacity(WAV_HEADER_LEN + data_len);

    // RIFF chunk descriptor
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&((36 + data_len) as u32).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    // fmt sub-chunk: PCM, mono, 16-bit
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&(sample_rate * 2).to_le_bytes());
    out.extend_from_slice(&2u16.to_le_bytes());
    out.extend_from_slice(&16u16.to_le_bytes());

    // data sub-chunk
    out.extend_from_slice(b"data");
    out.extend_from_slice(&(data_len as u32).to_le_bytes());

    for &sample in samples {
        let clipped = sample.clamp(-1.0, 1.0);
        let quantized = if clipped < 0.0 {
            (clipped * 0x8000 as f32).round()
        } else {
            (clipped * 0x7FFF as f32).round()
        } as i16;
        out.extend_from_slice(&quantized.to_le_bytes());
    }

    out
}

/// Parse a WAV buffer into mono f32 samples plus its sample rate.
///
/// Multi-channel input is mixed down by averaging; integer formats are
/// rescaled to [-1, 1].
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))
        .map_err(|e| RostrumError::Other(anyhow::anyhow!("wav parse: {e}")))?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(|e| RostrumError::Other(anyhow::anyhow!("wav samples: {e}")))?,
        hound::SampleFormat::Int => {
            let max = ((1_i64 << (spec.bits_per_sample.max(2) - 1)) - 1) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / max))
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(|e| RostrumError::Other(anyhow::anyhow!("wav samples: {e}")))?
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let mut mono = Vec::with_capacity(interleaved.len() / channels);
    for frame in interleaved.chunks(channels) {
        let sum = frame.iter().copied().sum::<f32>();
        mono.push(sum / channels as f32);
    }
    Ok((mono, spec.sample_rate))
}
