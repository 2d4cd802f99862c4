//! # rostrum-core
//!
//! Live lecture capture → incremental transcription → audience quiz questions.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → AudioCapture → SPSC RingBuffer → Session(spawn_blocking)
//!                                                    │
//!                                         resample 16 kHz + VAD gate
//!                                                    │
//!                                        TranscriptionEngine (isolate)
//!                                                    │
//!                                    TranscriptAccumulator → WindowCutter
//!                                                    │
//!                                  ChunkQueue → question service (HTTP)
//!                                                    │
//!                                    RevealBuffer → one reveal at stop
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens in the session
//! thread; transcript, status, activity, and reveal events fan out over
//! broadcast channels.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod assets;
pub mod audio;
pub mod buffering;
pub mod codec;
pub mod engine;
pub mod error;
pub mod generate;
pub mod ipc;
pub mod isolate;
pub mod transcribe;
pub mod transcript;
pub mod vad;

// Convenience re-exports for downstream crates
pub use assets::{AssetStore, ModelCache, DEFAULT_MODEL};
pub use engine::{AudioFeed, CaptureMode, EngineConfig, RostrumEngine};
pub use error::RostrumError;
pub use generate::{GenerationClient, GenerationSettings, HttpGenerationClient};
pub use ipc::events::{
    AudioActivityEvent, ModelProgressEvent, QuestionsRevealedEvent, QuizQuestion, SessionStatus,
    SessionStatusEvent, TranscriptEvent, TranscriptSegment,
};
pub use isolate::{BackendFactory, StreamOptions};
