//! Audio container codecs.
//!
//! Only WAV lives here: the pipeline packages decode-pass audio as PCM-16
//! mono WAV, and parses the same container back out of decode requests.

pub mod wav;

pub use wav::{decode_wav_bytes, encode_wav_pcm16};
