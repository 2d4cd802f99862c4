//! `RostrumEngine` — top-level lifecycle controller.
//!
//! ## Lifecycle
//!
//! ```text
//! RostrumEngine::new()
//!     └─► warm_up()            → model cached, status = Preparing → Idle
//!         └─► start()          → audio open, session spawned, status = Capturing
//!             └─► stop()       → running=false; the session drains, submits the
//!                                remainder window, waits for generation, then
//!                                reveals (status = Draining → Stopped)
//!                 └─► stop_and_collect() → blocks for the revealed questions
//! ```
//!
//! Misuse is an error, never a panic: a second `start()` fails with
//! `AlreadyRunning`, `stop()` without a session fails with `NotRunning`.
//!
//! ## Threading
//!
//! `cpal::Stream` is `!Send` on Windows/macOS (COM / CoreAudio thread
//! affinity). `AudioCapture` is therefore created *inside* the
//! `spawn_blocking` closure so it never crosses a thread boundary. A sync
//! oneshot channel propagates any open-device errors back to the `start()`
//! caller. `start_with_feed` skips the device entirely and takes samples from
//! the caller, which is how file replay and tests drive the engine.

pub mod session;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    mpsc, Arc,
};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::info;

use crate::{
    assets::{ModelCache, DEFAULT_MODEL},
    audio::AudioCapture,
    buffering::{create_audio_ring, AudioProducer, Producer},
    error::{Result, RostrumError},
    generate::{GenerationClient, GenerationSettings},
    ipc::events::{
        AudioActivityEvent, ModelProgressEvent, QuestionsRevealedEvent, QuizQuestion,
        SessionStatus, SessionStatusEvent, TranscriptEvent,
    },
    isolate::{BackendFactory, StreamOptions},
    transcript::window::DEFAULT_WINDOW_WORDS,
};

/// Broadcast channel capacity: 256 events buffered for slow consumers.
const BROADCAST_CAP: usize = 256;

/// How decoded audio reaches the isolate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CaptureMode {
    /// Feed the isolate continuously; it decodes on its own cadence.
    Stream,
    /// Window audio host-side and decode each window as a one-shot pass.
    File,
}

/// Configuration for `RostrumEngine`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Whisper model name, resolved through the asset cache.
    pub model: String,
    /// Decode path. Default: `Stream`.
    pub mode: CaptureMode,
    /// Words per question-generation window. Default: 100.
    pub window_words: usize,
    /// Decode options forwarded to the isolate stream.
    pub stream: StreamOptions,
    /// Question-generation tuning (model name, question count, spec).
    pub generation: GenerationSettings,
    /// VAD RMS threshold. Default: 0.015.
    pub vad_threshold: f32,
    /// VAD hangover in spans. Default: 2.
    pub vad_hangover_spans: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            mode: CaptureMode::Stream,
            window_words: DEFAULT_WINDOW_WORDS,
            stream: StreamOptions::default(),
            generation: GenerationSettings::default(),
            vad_threshold: 0.015,
            vad_hangover_spans: 2,
        }
    }
}

/// Feeds samples into a session started with [`RostrumEngine::start_with_feed`].
///
/// Dropping the feed does not stop the session; call `stop()` on the engine.
pub struct AudioFeed {
    producer: AudioProducer,
    running: Arc<AtomicBool>,
}

impl AudioFeed {
    /// Push mono samples at the rate declared to `start_with_feed`.
    /// Returns how many samples were accepted (0 once the session stopped).
    pub fn push(&mut self, samples: &[f32]) -> usize {
        if !self.running.load(Ordering::Relaxed) {
            return 0;
        }
        self.producer.push_slice(samples)
    }

    pub fn is_active(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}

/// The top-level engine handle.
///
/// `RostrumEngine` is `Send + Sync` — all fields use interior mutability.
/// Wrap in `Arc<RostrumEngine>` to share between the host's control surface
/// and its event-forwarding threads.
pub struct RostrumEngine {
    config: EngineConfig,
    cache: Arc<ModelCache>,
    factory: BackendFactory,
    generation: Arc<dyn GenerationClient>,
    /// `true` while capture + session are active.
    running: Arc<AtomicBool>,
    /// Canonical status; every write is mirrored onto the status channel.
    status: Arc<Mutex<SessionStatus>>,
    transcript_tx: broadcast::Sender<TranscriptEvent>,
    status_tx: broadcast::Sender<SessionStatusEvent>,
    progress_tx: broadcast::Sender<ModelProgressEvent>,
    activity_tx: broadcast::Sender<AudioActivityEvent>,
    questions_tx: broadcast::Sender<QuestionsRevealedEvent>,
    /// Monotonically increasing transcript sequence counter.
    seq: Arc<AtomicU64>,
    /// Shared session diagnostics counters.
    diagnostics: Arc<session::SessionDiagnostics>,
    /// Receiver for the question set of the most recently started session.
    completed: Mutex<Option<mpsc::Receiver<Vec<QuizQuestion>>>>,
}

impl RostrumEngine {
    /// Create a new engine. Does not start capturing — call `warm_up()` then
    /// `start()`.
    pub fn new(
        config: EngineConfig,
        cache: Arc<ModelCache>,
        factory: BackendFactory,
        generation: Arc<dyn GenerationClient>,
    ) -> Self {
        let (transcript_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (status_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (progress_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        let (questions_tx, _) = broadcast::channel(BROADCAST_CAP);

        Self {
            config,
            cache,
            factory,
            generation,
            running: Arc::new(AtomicBool::new(false)),
            status: Arc::new(Mutex::new(SessionStatus::Idle)),
            transcript_tx,
            status_tx,
            progress_tx,
            activity_tx,
            questions_tx,
            seq: Arc::new(AtomicU64::new(0)),
            diagnostics: Arc::new(session::SessionDiagnostics::default()),
            completed: Mutex::new(None),
        }
    }

    /// Fetch the configured model into the on-disk cache, reporting download
    /// progress over the progress channel. Blocks until cached.
    ///
    /// Call once at application startup so `start()` does not stall on a
    /// download mid-lecture. Safe to skip: the session acquires the model
    /// itself either way.
    pub fn warm_up(&self) -> Result<()> {
        self.set_status(SessionStatus::Preparing, None);
        info!(model = %self.config.model, "warming up model cache");

        let model = self.config.model.clone();
        let progress_tx = self.progress_tx.clone();
        let outcome = self.cache.acquire(&self.config.model, &mut |loaded, total| {
            let _ = progress_tx.send(ModelProgressEvent {
                model: model.clone(),
                loaded,
                total,
            });
        });

        match outcome {
            Ok(_) => {
                self.set_status(SessionStatus::Idle, None);
                info!(model = %self.config.model, "model cached");
                Ok(())
            }
            Err(e) => {
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
        }
    }

    /// Start audio capture and the session.
    ///
    /// Blocks until the audio device is confirmed open (or fails), then
    /// returns. The session continues running on a background blocking thread.
    ///
    /// # Errors
    /// - `RostrumError::AlreadyRunning` if already started.
    /// - `RostrumError::CaptureFault` on device errors.
    pub fn start(&self) -> Result<()> {
        self.start_with_device(None)
    }

    /// Start the engine using a preferred input device name.
    ///
    /// With no preference the capture layer picks a device itself, steering
    /// away from playback-monitor endpoints.
    pub fn start_with_device(&self, preferred_input_device: Option<String>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RostrumError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let (producer, consumer) = create_audio_ring();
        let (done_tx, done_rx) = mpsc::channel();
        *self.completed.lock() = Some(done_rx);

        // Owned handles for the session thread.
        let config = self.config.clone();
        let cache = Arc::clone(&self.cache);
        let factory = self.factory.clone();
        let generation = Arc::clone(&self.generation);
        let running = Arc::clone(&self.running);
        let transcript_tx = self.transcript_tx.clone();
        let status_tx = self.status_tx.clone();
        let progress_tx = self.progress_tx.clone();
        let activity_tx = self.activity_tx.clone();
        let questions_tx = self.questions_tx.clone();
        let status = Arc::clone(&self.status);
        let seq = Arc::clone(&self.seq);
        let diagnostics = Arc::clone(&self.diagnostics);

        // Open confirmation back to start(); success carries the device's
        // native capture rate.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // ── Device open (cpal::Stream is !Send; it lives and dies on this thread) ──
            let capture = match AudioCapture::open_with_preference(
                producer,
                Arc::clone(&running),
                preferred_input_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;

            // ── Run session ───────────────────────────────────────────────────────────
            session::run(session::SessionContext {
                config,
                cache,
                factory,
                generation,
                consumer,
                running,
                transcript_tx,
                status_tx,
                progress_tx,
                activity_tx,
                questions_tx,
                status,
                seq,
                capture_sample_rate,
                diagnostics,
                done_tx,
            });

            // The capture stream is released on the thread that created it.
            drop(capture);
        });

        // Hold start() until the device open has a verdict.
        match open_rx.recv() {
            Ok(Ok(rate)) => {
                info!(capture_rate = rate, "engine started — capturing");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                self.set_status(SessionStatus::Error, Some(e.to_string()));
                Err(e)
            }
            Err(_) => {
                // Sender dropped without a verdict: the session thread died
                // during open.
                self.running.store(false, Ordering::SeqCst);
                self.set_status(SessionStatus::Error, Some("session failed to start".into()));
                Err(RostrumError::Other(anyhow::anyhow!(
                    "session task died unexpectedly"
                )))
            }
        }
    }

    /// Start a session fed by the caller instead of a capture device.
    ///
    /// `sample_rate` declares the rate of the samples that will be pushed
    /// through the returned [`AudioFeed`]; the session resamples to its own
    /// pipeline rate as usual. Used for file replay and by tests.
    pub fn start_with_feed(&self, sample_rate: u32) -> Result<AudioFeed> {
        if self.running.load(Ordering::SeqCst) {
            return Err(RostrumError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let (producer, consumer) = create_audio_ring();
        let (done_tx, done_rx) = mpsc::channel();
        *self.completed.lock() = Some(done_rx);

        let ctx = session::SessionContext {
            config: self.config.clone(),
            cache: Arc::clone(&self.cache),
            factory: self.factory.clone(),
            generation: Arc::clone(&self.generation),
            consumer,
            running: Arc::clone(&self.running),
            transcript_tx: self.transcript_tx.clone(),
            status_tx: self.status_tx.clone(),
            progress_tx: self.progress_tx.clone(),
            activity_tx: self.activity_tx.clone(),
            questions_tx: self.questions_tx.clone(),
            status: Arc::clone(&self.status),
            seq: Arc::clone(&self.seq),
            capture_sample_rate: sample_rate,
            diagnostics: Arc::clone(&self.diagnostics),
            done_tx,
        };

        std::thread::Builder::new()
            .name("rostrum-session".into())
            .spawn(move || session::run(ctx))
            .map_err(|e| RostrumError::Other(anyhow::anyhow!("session thread spawn: {e}")))?;

        info!(sample_rate, "engine started — caller-fed session");
        Ok(AudioFeed {
            producer,
            running: Arc::clone(&self.running),
        })
    }

    /// Request the session to stop.
    ///
    /// Returns as soon as the flag is flipped. The session thread then drains
    /// buffered audio, submits the remainder window, waits for in-flight
    /// generation jobs, reveals the questions, and walks the status through
    /// `Draining` to `Stopped` itself. Use `stop_and_collect` to block for
    /// the revealed set.
    ///
    /// # Errors
    /// - `RostrumError::NotRunning` if not currently running.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(RostrumError::NotRunning);
        }

        self.running.store(false, Ordering::SeqCst);
        info!("engine stop requested");
        Ok(())
    }

    /// Stop and block until the session has flushed and revealed, returning
    /// the full question set.
    pub fn stop_and_collect(&self, timeout: Duration) -> Result<Vec<QuizQuestion>> {
        self.stop()?;

        let receiver = self
            .completed
            .lock()
            .take()
            .ok_or_else(|| RostrumError::Other(anyhow::anyhow!("no active session to collect")))?;

        receiver.recv_timeout(timeout).map_err(|_| {
            RostrumError::Other(anyhow::anyhow!(
                "session did not flush within {timeout:?}"
            ))
        })
    }

    /// Current session status (snapshot).
    pub fn status(&self) -> SessionStatus {
        *self.status.lock()
    }

    /// Subscribe to live transcript events.
    pub fn subscribe_transcripts(&self) -> broadcast::Receiver<TranscriptEvent> {
        self.transcript_tx.subscribe()
    }

    /// Subscribe to live status change events.
    pub fn subscribe_status(&self) -> broadcast::Receiver<SessionStatusEvent> {
        self.status_tx.subscribe()
    }

    /// Subscribe to model download progress events.
    pub fn subscribe_progress(&self) -> broadcast::Receiver<ModelProgressEvent> {
        self.progress_tx.subscribe()
    }

    /// Subscribe to live voice activity events (RMS + speech classification).
    pub fn subscribe_activity(&self) -> broadcast::Receiver<AudioActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Subscribe to the end-of-session question reveal.
    pub fn subscribe_questions(&self) -> broadcast::Receiver<QuestionsRevealedEvent> {
        self.questions_tx.subscribe()
    }

    /// Snapshot of session counters for observability.
    pub fn diagnostics_snapshot(&self) -> session::DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }

    // ── Internal helpers ─────────────────────────────────────────────────────

    fn set_status(&self, new_status: SessionStatus, detail: Option<String>) {
        *self.status.lock() = new_status;
        let _ = self.status_tx.send(SessionStatusEvent {
            status: new_status,
            detail,
        });
    }
}
