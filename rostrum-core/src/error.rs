use thiserror::Error;

/// All errors produced by rostrum-core.
#[derive(Debug, Error)]
pub enum RostrumError {
    /// Model asset could not be fetched or found. Fatal to starting a
    /// session; nothing partial is cached.
    #[error("model asset '{name}' unavailable: {reason}")]
    AssetUnavailable { name: String, reason: String },

    /// The execution isolate reported a decode/stream error, or its mailbox
    /// went away. Recoverable: the engine drops back to Uninitialized and a
    /// later call may re-initialize.
    #[error("isolate fault: {0}")]
    IsolateFault(String),

    /// The question-generation service errored or timed out for one window.
    /// Local to that job; the queue keeps going.
    #[error("generation failed: {0}")]
    GenerationFailure(String),

    /// Microphone/device unavailable. Fatal to starting capture.
    #[error("capture fault: {0}")]
    CaptureFault(String),

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session is not running")]
    NotRunning,

    #[error("asset store error: {0}")]
    Storage(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RostrumError>;
