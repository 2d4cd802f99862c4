//! Audio buffering: the lock-free capture ring and the sliding decode buffer.
//!
//! The ring is a `ringbuf::HeapRb<f32>` whose wait-free `push_slice` is safe
//! to call from the real-time audio callback. The sliding buffer sits on the
//! other side of the ring and decides when enough audio has accrued for a
//! decode pass.

pub mod chunk;
pub mod sliding;

use ringbuf::{traits::Split, HeapRb};

pub use ringbuf::traits::{Consumer, Producer};

/// Type alias for the producer half — held by the audio callback thread.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Type alias for the consumer half — held by the session thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// Sample rate of everything downstream of the capture shim (Hz).
pub const PIPELINE_SAMPLE_RATE: u32 = 16_000;

/// Buffer capacity: 2^22 = 4 194 304 f32 samples ≈ 87.4 s at 48 kHz.
/// Protects long lectures from callback drops while a decode pass runs.
pub const RING_CAPACITY: usize = 1 << 22;

/// Create a matched producer/consumer pair backed by a heap-allocated ring buffer.
///
/// # Panics
/// Never panics — `HeapRb` construction cannot fail for reasonable capacities.
pub fn create_audio_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}
