//! Blocking session loop.
//!
//! ## Stages (per iteration)
//!
//! ```text
//! 1. Drain capture ring → raw f32 chunk at the capture rate
//! 2. Resample to the 16 kHz pipeline rate
//! 3. RMS + energy gate → AudioActivityEvent (level meter feed)
//! 4. Hand audio to the decoder:
//!      stream mode — feed the isolate, poll for finished segments
//!      file mode   — sliding buffer; on flush, one decode pass per window
//! 5. Ingest fresh segments (exact-duplicate drop) → TranscriptEvent
//! 6. Cut every full word window → submit to the generation queue
//! ```
//!
//! On stop the loop runs the final decode (stream tail or file remainder),
//! cuts the remainder window, blocks until the generation queue drains, then
//! reveals the question set in one batch.
//!
//! The whole loop runs on a blocking thread so the async executor only ever
//! sees broadcast events.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{mpsc, Arc, OnceLock};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use crate::{
    assets::ModelCache,
    audio::resample::RateConverter,
    buffering::{
        chunk::AudioChunk, sliding::AudioSlidingBuffer, AudioConsumer, Consumer,
        PIPELINE_SAMPLE_RATE,
    },
    engine::{CaptureMode, EngineConfig},
    error::{Result, RostrumError},
    generate::{queue::ChunkQueue, reveal::RevealBuffer, GenerationClient},
    ipc::events::{
        AudioActivityEvent, ModelProgressEvent, QuestionsRevealedEvent, QuizQuestion,
        SessionStatus, SessionStatusEvent, TranscriptEvent, TranscriptSegment,
    },
    isolate::BackendFactory,
    transcribe::TranscriptionEngine,
    transcript::{window::WindowCutter, TranscriptAccumulator},
    vad::{rms, EnergyVad, VoiceActivityDetector},
};

pub struct SessionDiagnostics {
    pub samples_in: AtomicUsize,
    pub samples_resampled: AtomicUsize,
    pub vad_spans: AtomicUsize,
    pub vad_speech: AtomicUsize,
    pub decode_passes: AtomicUsize,
    pub decode_errors: AtomicUsize,
    pub segments_ingested: AtomicUsize,
    pub segments_duplicate: AtomicUsize,
    pub windows_cut: AtomicUsize,
    pub recoveries: AtomicUsize,
}

impl Default for SessionDiagnostics {
    fn default() -> Self {
        Self {
            samples_in: AtomicUsize::new(0),
            samples_resampled: AtomicUsize::new(0),
            vad_spans: AtomicUsize::new(0),
            vad_speech: AtomicUsize::new(0),
            decode_passes: AtomicUsize::new(0),
            decode_errors: AtomicUsize::new(0),
            segments_ingested: AtomicUsize::new(0),
            segments_duplicate: AtomicUsize::new(0),
            windows_cut: AtomicUsize::new(0),
            recoveries: AtomicUsize::new(0),
        }
    }
}

impl SessionDiagnostics {
    pub fn reset(&self) {
        self.samples_in.store(0, Ordering::Relaxed);
        self.samples_resampled.store(0, Ordering::Relaxed);
        self.vad_spans.store(0, Ordering::Relaxed);
        self.vad_speech.store(0, Ordering::Relaxed);
        self.decode_passes.store(0, Ordering::Relaxed);
        self.decode_errors.store(0, Ordering::Relaxed);
        self.segments_ingested.store(0, Ordering::Relaxed);
        self.segments_duplicate.store(0, Ordering::Relaxed);
        self.windows_cut.store(0, Ordering::Relaxed);
        self.recoveries.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            samples_in: self.samples_in.load(Ordering::Relaxed),
            samples_resampled: self.samples_resampled.load(Ordering::Relaxed),
            vad_spans: self.vad_spans.load(Ordering::Relaxed),
            vad_speech: self.vad_speech.load(Ordering::Relaxed),
            decode_passes: self.decode_passes.load(Ordering::Relaxed),
            decode_errors: self.decode_errors.load(Ordering::Relaxed),
            segments_ingested: self.segments_ingested.load(Ordering::Relaxed),
            segments_duplicate: self.segments_duplicate.load(Ordering::Relaxed),
            windows_cut: self.windows_cut.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub samples_in: usize,
    pub samples_resampled: usize,
    pub vad_spans: usize,
    pub vad_speech: usize,
    pub decode_passes: usize,
    pub decode_errors: usize,
    pub segments_ingested: usize,
    pub segments_duplicate: usize,
    pub windows_cut: usize,
    pub recoveries: usize,
}

/// Everything the session needs, passed as one struct so the spawning
/// closure stays tidy.
pub struct SessionContext {
    pub config: EngineConfig,
    pub cache: Arc<ModelCache>,
    pub factory: BackendFactory,
    pub generation: Arc<dyn GenerationClient>,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub transcript_tx: broadcast::Sender<TranscriptEvent>,
    pub status_tx: broadcast::Sender<SessionStatusEvent>,
    pub progress_tx: broadcast::Sender<ModelProgressEvent>,
    pub activity_tx: broadcast::Sender<AudioActivityEvent>,
    pub questions_tx: broadcast::Sender<QuestionsRevealedEvent>,
    pub status: Arc<Mutex<SessionStatus>>,
    pub seq: Arc<AtomicU64>,
    pub capture_sample_rate: u32,
    pub diagnostics: Arc<SessionDiagnostics>,
    /// Delivers the revealed question set exactly once, when the session ends.
    pub done_tx: mpsc::Sender<Vec<QuizQuestion>>,
}

/// Chunk size drained from the ring buffer per iteration.
/// 20 ms at 48 kHz = 960 samples, a reasonable activity-meter stride for
/// every common capture rate.
const DRAIN_CHUNK: usize = 960;

/// Minimum sleep when the ring is empty (avoids busy-wait burning a core).
const DEFAULT_SLEEP_EMPTY_MS: u64 = 5;

/// Isolate restarts allowed before the session gives up on the decoder.
const MAX_RECOVERIES: usize = 2;

/// Run the blocking session until `ctx.running` becomes false, then drain
/// and reveal. Always sends exactly one value on `ctx.done_tx`.
pub fn run(mut ctx: SessionContext) {
    info!(
        mode = ?ctx.config.mode,
        model = %ctx.config.model,
        capture_rate = ctx.capture_sample_rate,
        "session started"
    );

    // ── Decoder: spawn isolate, acquire model ────────────────────────────
    let mut engine = match TranscriptionEngine::new(Arc::clone(&ctx.cache), ctx.factory.clone()) {
        Ok(engine) => engine,
        Err(e) => return bail(&ctx, format!("isolate spawn failed: {e}")),
    };

    set_status(&ctx, SessionStatus::Preparing, None);
    let model = ctx.config.model.clone();
    let progress_tx = ctx.progress_tx.clone();
    if let Err(e) = engine.load(&model, &mut |loaded, total| {
        let _ = progress_tx.send(ModelProgressEvent {
            model: model.clone(),
            loaded,
            total,
        });
    }) {
        return bail(&ctx, format!("model load failed: {e}"));
    }

    // ── Generation queue ─────────────────────────────────────────────────
    let results = Arc::new(RevealBuffer::new());
    let queue = match ChunkQueue::start(
        Arc::clone(&ctx.generation),
        ctx.config.generation.clone(),
        Arc::clone(&results),
    ) {
        Ok(queue) => queue,
        Err(e) => return bail(&ctx, format!("generation queue failed to start: {e}")),
    };

    // ── Capture-side state ───────────────────────────────────────────────
    let mut resampler = match RateConverter::new(
        ctx.capture_sample_rate,
        PIPELINE_SAMPLE_RATE,
        DRAIN_CHUNK,
    ) {
        Ok(resampler) => resampler,
        Err(e) => return bail(&ctx, format!("resampler init failed: {e}")),
    };
    let mut vad = EnergyVad::new(ctx.config.vad_threshold, ctx.config.vad_hangover_spans);
    let mut accumulator = TranscriptAccumulator::new();
    let mut cutter = WindowCutter::new(ctx.config.window_words);

    // File-mode state: windowing buffer, speech flag for the current window,
    // and a sample clock for rebasing segment timestamps onto session time.
    let mut sliding = AudioSlidingBuffer::new(PIPELINE_SAMPLE_RATE);
    let mut window_had_speech = false;
    let mut file_clock_samples: u64 = 0;

    let mut raw = vec![0f32; DRAIN_CHUNK];
    let mut activity_seq = 0u64;
    let mut recoveries = 0usize;
    // Set when the decoder is gone for good; the session still drains and
    // reveals whatever was transcribed before the fault.
    let mut degraded: Option<String> = None;

    if ctx.config.mode == CaptureMode::Stream {
        if let Err(e) = engine.start_stream(ctx.config.stream.clone()) {
            return bail(&ctx, format!("stream start failed: {e}"));
        }
    }

    set_status(&ctx, SessionStatus::Capturing, None);

    'session: loop {
        // ── 1. Check running flag ─────────────────────────────────────────
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 2. Drain capture ring ─────────────────────────────────────────
        let n = ctx.consumer.pop_slice(&mut raw);
        if n == 0 {
            // Stream decodes finish on the isolate's own clock; keep pulling
            // their segments while the ring is quiet.
            if ctx.config.mode == CaptureMode::Stream {
                match engine.poll() {
                    Ok(segments) => {
                        publish_segments(&ctx, &mut accumulator, &mut cutter, &queue, segments)
                    }
                    Err(e) => {
                        ctx.diagnostics.decode_errors.fetch_add(1, Ordering::Relaxed);
                        if !recover_engine(&ctx, &mut engine, &mut recoveries, &e) {
                            degraded = Some(e.to_string());
                            break 'session;
                        }
                    }
                }
            }
            std::thread::sleep(Duration::from_millis(empty_sleep_ms()));
            continue;
        }
        ctx.diagnostics.samples_in.fetch_add(n, Ordering::Relaxed);

        // ── 3. Resample to the pipeline rate ──────────────────────────────
        let resampled = resampler.process(&raw[..n]);
        if resampled.is_empty() {
            // Partial block still accumulating inside the converter.
            continue;
        }
        ctx.diagnostics
            .samples_resampled
            .fetch_add(resampled.len(), Ordering::Relaxed);

        // ── 4. Level meter ────────────────────────────────────────────────
        let level = rms(&resampled);
        let is_speech = vad.classify(&resampled).is_speech();
        ctx.diagnostics.vad_spans.fetch_add(1, Ordering::Relaxed);
        if is_speech {
            ctx.diagnostics.vad_speech.fetch_add(1, Ordering::Relaxed);
        }
        let _ = ctx.activity_tx.send(AudioActivityEvent {
            seq: activity_seq,
            rms: level,
            is_speech,
        });
        activity_seq = activity_seq.saturating_add(1);
        if activity_seq % 50 == 0 {
            debug!(
                rms = format_args!("{:.4}", level),
                is_speech,
                words = accumulator.word_count(),
                "audio level check"
            );
        }

        // ── 5. Hand audio to the decoder ──────────────────────────────────
        match ctx.config.mode {
            CaptureMode::Stream => {
                let outcome = match engine.feed(resampled) {
                    Ok(()) => engine.poll(),
                    Err(e) => Err(e),
                };
                match outcome {
                    Ok(segments) => {
                        publish_segments(&ctx, &mut accumulator, &mut cutter, &queue, segments)
                    }
                    Err(e) => {
                        ctx.diagnostics.decode_errors.fetch_add(1, Ordering::Relaxed);
                        if !recover_engine(&ctx, &mut engine, &mut recoveries, &e) {
                            degraded = Some(e.to_string());
                            break 'session;
                        }
                    }
                }
            }

            CaptureMode::File => {
                if is_speech {
                    window_had_speech = true;
                }
                let dropped = sliding.push(AudioChunk::new(resampled, PIPELINE_SAMPLE_RATE));
                if dropped > 0 {
                    warn!(dropped, "sliding buffer over cap, oldest audio dropped");
                    file_clock_samples += dropped as u64;
                }

                while sliding.should_flush() {
                    let combined = sliding.drain();
                    let retained = sliding.buffered_samples();
                    let offset = file_clock_samples as f32 / PIPELINE_SAMPLE_RATE as f32;
                    file_clock_samples += (combined.len() - retained) as u64;

                    if !window_had_speech {
                        debug!(samples = combined.len(), "silent window skipped");
                        continue;
                    }
                    window_had_speech = false;

                    ctx.diagnostics.decode_passes.fetch_add(1, Ordering::Relaxed);
                    match engine.decode(&combined, PIPELINE_SAMPLE_RATE) {
                        Ok(mut segments) => {
                            for segment in &mut segments {
                                segment.from += offset;
                                segment.to += offset;
                            }
                            publish_segments(&ctx, &mut accumulator, &mut cutter, &queue, segments)
                        }
                        Err(e) => {
                            ctx.diagnostics.decode_errors.fetch_add(1, Ordering::Relaxed);
                            if !recover_engine(&ctx, &mut engine, &mut recoveries, &e) {
                                degraded = Some(e.to_string());
                                break 'session;
                            }
                        }
                    }
                }
            }
        }
    }

    // ── Wind-down: final decode, remainder window, queue drain, reveal ───
    set_status(&ctx, SessionStatus::Draining, None);

    if degraded.is_none() {
        match ctx.config.mode {
            CaptureMode::Stream => match engine.stop_stream() {
                Ok(tail) => publish_segments(&ctx, &mut accumulator, &mut cutter, &queue, tail),
                Err(e) => warn!(error = %e, "stream stop failed"),
            },
            CaptureMode::File => {
                // The remainder bypasses the energy gate: the last words of
                // a session must reach the decoder even when they trail off
                // quietly.
                let remainder = sliding.take_remainder();
                if !remainder.is_empty() {
                    let offset = file_clock_samples as f32 / PIPELINE_SAMPLE_RATE as f32;
                    ctx.diagnostics.decode_passes.fetch_add(1, Ordering::Relaxed);
                    match engine.decode(&remainder, PIPELINE_SAMPLE_RATE) {
                        Ok(mut segments) => {
                            for segment in &mut segments {
                                segment.from += offset;
                                segment.to += offset;
                            }
                            publish_segments(&ctx, &mut accumulator, &mut cutter, &queue, segments)
                        }
                        Err(e) => {
                            ctx.diagnostics.decode_errors.fetch_add(1, Ordering::Relaxed);
                            warn!(error = %e, "final decode failed");
                        }
                    }
                }
            }
        }
    }

    let remainder_window = cutter.cut_remainder(&accumulator.current_text());
    if let Some(ref window) = remainder_window {
        ctx.diagnostics.windows_cut.fetch_add(1, Ordering::Relaxed);
        debug!(
            window = window.index,
            words = window.word_count(),
            "remainder window cut"
        );
    }
    queue.flush(remainder_window);

    let questions = results.reveal();
    let _ = ctx.questions_tx.send(QuestionsRevealedEvent {
        questions: questions.clone(),
        windows_submitted: cutter.windows_cut(),
    });

    match degraded {
        Some(detail) => set_status(&ctx, SessionStatus::Error, Some(detail)),
        None => set_status(&ctx, SessionStatus::Stopped, None),
    }

    engine.close();
    let stats = queue.stats();
    drop(queue);

    let snap = ctx.diagnostics.snapshot();
    info!(
        samples_in = snap.samples_in,
        samples_resampled = snap.samples_resampled,
        vad_spans = snap.vad_spans,
        vad_speech = snap.vad_speech,
        decode_passes = snap.decode_passes,
        decode_errors = snap.decode_errors,
        segments_ingested = snap.segments_ingested,
        segments_duplicate = snap.segments_duplicate,
        windows_cut = snap.windows_cut,
        recoveries = snap.recoveries,
        jobs_succeeded = stats.jobs_succeeded,
        jobs_failed = stats.jobs_failed,
        questions = questions.len(),
        "session finished"
    );

    ctx.running.store(false, Ordering::SeqCst);
    let _ = ctx.done_tx.send(questions);
}

fn empty_sleep_ms() -> u64 {
    static EMPTY_SLEEP_MS: OnceLock<u64> = OnceLock::new();
    *EMPTY_SLEEP_MS.get_or_init(|| {
        std::env::var("ROSTRUM_SESSION_EMPTY_SLEEP_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v.clamp(1, 20))
            .unwrap_or(DEFAULT_SLEEP_EMPTY_MS)
    })
}

fn set_status(ctx: &SessionContext, status: SessionStatus, detail: Option<String>) {
    *ctx.status.lock() = status;
    let _ = ctx.status_tx.send(SessionStatusEvent { status, detail });
}

/// Abort before capture ever ran: flag the error, release the engine handle.
fn bail(ctx: &SessionContext, detail: String) {
    error!(detail = %detail, "session aborted");
    set_status(ctx, SessionStatus::Error, Some(detail));
    ctx.running.store(false, Ordering::SeqCst);
    let _ = ctx.done_tx.send(Vec::new());
}

/// Ingest decoded segments, broadcast the fresh ones, and submit every full
/// word window that the new text completes.
fn publish_segments(
    ctx: &SessionContext,
    accumulator: &mut TranscriptAccumulator,
    cutter: &mut WindowCutter,
    queue: &ChunkQueue,
    segments: Vec<TranscriptSegment>,
) {
    let mut fresh = Vec::new();
    for segment in segments {
        if accumulator.ingest(segment.clone()) {
            ctx.diagnostics
                .segments_ingested
                .fetch_add(1, Ordering::Relaxed);
            fresh.push(segment);
        } else {
            ctx.diagnostics
                .segments_duplicate
                .fetch_add(1, Ordering::Relaxed);
        }
    }
    if fresh.is_empty() {
        return;
    }

    let seq = ctx.seq.fetch_add(1, Ordering::Relaxed);
    let _ = ctx.transcript_tx.send(TranscriptEvent {
        seq,
        segments: fresh,
        word_count: accumulator.word_count(),
    });

    for window in cutter.cut(&accumulator.current_text()) {
        ctx.diagnostics.windows_cut.fetch_add(1, Ordering::Relaxed);
        debug!(
            window = window.index,
            words = window.word_count(),
            "window cut"
        );
        if !queue.submit(window) {
            warn!("window rejected by generation queue");
        }
    }
}

/// Bring a faulted decoder back: fresh isolate, reload, re-enter the stream.
/// Returns false once the recovery budget is spent or a restart itself fails.
fn recover_engine(
    ctx: &SessionContext,
    engine: &mut TranscriptionEngine,
    recoveries: &mut usize,
    cause: &RostrumError,
) -> bool {
    if *recoveries >= MAX_RECOVERIES {
        error!(error = %cause, "decoder failed and the recovery budget is spent");
        return false;
    }
    *recoveries += 1;
    ctx.diagnostics.recoveries.fetch_add(1, Ordering::Relaxed);
    warn!(attempt = *recoveries, error = %cause, "decoder fault, restarting isolate");

    match restart_decoder(ctx, engine) {
        Ok(()) => {
            info!("decoder recovered");
            true
        }
        Err(e) => {
            error!(error = %e, "decoder recovery failed");
            false
        }
    }
}

fn restart_decoder(ctx: &SessionContext, engine: &mut TranscriptionEngine) -> Result<()> {
    engine.restart()?;
    // The model is already cached, so the reload reports no real progress.
    engine.load(&ctx.config.model, &mut |_, _| {})?;
    if ctx.config.mode == CaptureMode::Stream {
        engine.start_stream(ctx.config.stream.clone())?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::thread;
    use std::time::Instant;

    use tokio::sync::broadcast::error::TryRecvError;

    use crate::assets::{AssetStore, HttpFetcher};
    use crate::buffering::{create_audio_ring, AudioProducer, Producer};
    use crate::generate::{GenerationRequest, RawOption, RawQuestion};
    use crate::isolate::StreamOptions;
    use crate::transcribe::backend::DecodeBackend;

    /// Each decode pass pops the next scripted text as a single segment
    /// spanning the audio it was given. An exhausted script decodes to
    /// nothing, like real silence.
    struct ScriptedBackend {
        script: VecDeque<String>,
    }

    impl ScriptedBackend {
        fn new(script: &[&str]) -> Self {
            Self {
                script: script.iter().map(|s| s.to_string()).collect(),
            }
        }
    }

    impl DecodeBackend for ScriptedBackend {
        fn load(&mut self, _model: &str, _weights: &[u8]) -> crate::error::Result<()> {
            Ok(())
        }

        fn decode(
            &mut self,
            samples: &[f32],
            sample_rate: u32,
            _options: &StreamOptions,
        ) -> crate::error::Result<Vec<TranscriptSegment>> {
            let secs = samples.len() as f32 / sample_rate as f32;
            Ok(match self.script.pop_front() {
                Some(text) => vec![TranscriptSegment::new(text, 0.0, secs)],
                None => Vec::new(),
            })
        }

        fn reset(&mut self) {}
    }

    struct FailingBackend;

    impl DecodeBackend for FailingBackend {
        fn load(&mut self, _model: &str, _weights: &[u8]) -> crate::error::Result<()> {
            Ok(())
        }

        fn decode(
            &mut self,
            _samples: &[f32],
            _sample_rate: u32,
            _options: &StreamOptions,
        ) -> crate::error::Result<Vec<TranscriptSegment>> {
            Err(RostrumError::IsolateFault("scripted decode failure".into()))
        }

        fn reset(&mut self) {}
    }

    /// One question per job, numbered in call order so completion order is
    /// observable. Optionally fails every job.
    struct CountingClient {
        calls: Arc<AtomicUsize>,
        fail: bool,
    }

    impl GenerationClient for CountingClient {
        fn submit(&self, request: &GenerationRequest) -> crate::error::Result<Vec<RawQuestion>> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RostrumError::GenerationFailure("scripted failure".into()));
            }
            let first_word = request
                .transcript
                .split_whitespace()
                .next()
                .unwrap_or("")
                .to_string();
            Ok(vec![RawQuestion {
                question_text: format!("q{n} about {first_word}"),
                options: vec![
                    RawOption {
                        text: Some("right".into()),
                        correct: true,
                    },
                    RawOption {
                        text: Some("wrong".into()),
                        correct: false,
                    },
                ],
            }])
        }
    }

    struct SessionUnderTest {
        _dir: tempfile::TempDir,
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        transcript_rx: broadcast::Receiver<TranscriptEvent>,
        questions_rx: broadcast::Receiver<QuestionsRevealedEvent>,
        status: Arc<Mutex<SessionStatus>>,
        diagnostics: Arc<SessionDiagnostics>,
        done_rx: mpsc::Receiver<Vec<QuizQuestion>>,
        client_calls: Arc<AtomicUsize>,
        worker: thread::JoinHandle<()>,
    }

    fn test_config(mode: CaptureMode, window_words: usize) -> EngineConfig {
        EngineConfig {
            model: "tiny.en".into(),
            mode,
            window_words,
            ..EngineConfig::default()
        }
    }

    fn start_session(
        config: EngineConfig,
        backends: Vec<Box<dyn DecodeBackend>>,
        failing_client: bool,
    ) -> SessionUnderTest {
        let (producer, consumer) = create_audio_ring();
        let (transcript_tx, transcript_rx) = broadcast::channel(64);
        let (status_tx, _status_rx) = broadcast::channel(16);
        let (progress_tx, _progress_rx) = broadcast::channel(16);
        let (activity_tx, _activity_rx) = broadcast::channel(256);
        let (questions_tx, questions_rx) = broadcast::channel(4);
        let (done_tx, done_rx) = mpsc::channel();

        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path().join("assets.db")).unwrap();
        store.put("tiny.en", &[7u8; 32]).unwrap();
        let cache = Arc::new(ModelCache::with_fetcher(store, Arc::new(HttpFetcher::new())));

        let slots = Mutex::new(VecDeque::from(backends));
        let factory: BackendFactory =
            Arc::new(move || slots.lock().pop_front().expect("backend factory exhausted"));

        let client_calls = Arc::new(AtomicUsize::new(0));
        let generation: Arc<dyn GenerationClient> = Arc::new(CountingClient {
            calls: Arc::clone(&client_calls),
            fail: failing_client,
        });

        let running = Arc::new(AtomicBool::new(true));
        let status = Arc::new(Mutex::new(SessionStatus::Idle));
        let diagnostics = Arc::new(SessionDiagnostics::default());

        let ctx = SessionContext {
            config,
            cache,
            factory,
            generation,
            consumer,
            running: Arc::clone(&running),
            transcript_tx,
            status_tx,
            progress_tx,
            activity_tx,
            questions_tx,
            status: Arc::clone(&status),
            seq: Arc::new(AtomicU64::new(0)),
            capture_sample_rate: PIPELINE_SAMPLE_RATE,
            diagnostics: Arc::clone(&diagnostics),
            done_tx,
        };

        let worker = thread::spawn(move || run(ctx));

        SessionUnderTest {
            _dir: dir,
            producer,
            running,
            transcript_rx,
            questions_rx,
            status,
            diagnostics,
            done_rx,
            client_calls,
            worker,
        }
    }

    fn recv_with_timeout<T: Clone>(rx: &mut broadcast::Receiver<T>, timeout: Duration) -> T {
        let start = Instant::now();
        loop {
            match rx.try_recv() {
                Ok(event) => return event,
                Err(TryRecvError::Empty) => {
                    if start.elapsed() >= timeout {
                        panic!("timed out waiting for event");
                    }
                    thread::sleep(Duration::from_millis(5));
                }
                Err(TryRecvError::Lagged(_)) => continue,
                Err(TryRecvError::Closed) => panic!("event channel closed unexpectedly"),
            }
        }
    }

    /// 1.6 s of audio: enough to cross the 1.5 s flush threshold once.
    fn loud_audio() -> Vec<f32> {
        vec![0.3; (PIPELINE_SAMPLE_RATE as usize * 16) / 10]
    }

    #[test]
    fn file_mode_decodes_windows_and_reveals_questions() {
        let mut session = start_session(
            test_config(CaptureMode::File, 4),
            vec![Box::new(ScriptedBackend::new(&[
                "alpha beta gamma delta epsilon",
            ]))],
            false,
        );
        session.producer.push_slice(&loud_audio());

        let event = recv_with_timeout(&mut session.transcript_rx, Duration::from_secs(5));
        assert_eq!(event.word_count, 5);
        assert_eq!(event.segments[0].text, "alpha beta gamma delta epsilon");

        session.running.store(false, Ordering::SeqCst);
        session.worker.join().expect("session thread panicked");

        // One full window cut live, the 1-word remainder cut at flush.
        let revealed = recv_with_timeout(&mut session.questions_rx, Duration::from_secs(1));
        assert_eq!(revealed.windows_submitted, 2);
        assert_eq!(revealed.questions.len(), 2);
        assert!(revealed.questions[0].question.starts_with("q0"));
        assert!(revealed.questions[1].question.starts_with("q1"));

        let collected = session
            .done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("done channel");
        assert_eq!(collected, revealed.questions);
        assert_eq!(*session.status.lock(), SessionStatus::Stopped);
        assert_eq!(session.client_calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn stream_mode_delivers_segments_and_the_stop_tail() {
        let mut session = start_session(
            test_config(CaptureMode::Stream, 3),
            vec![Box::new(ScriptedBackend::new(&["one two three", "four"]))],
            false,
        );
        session.producer.push_slice(&loud_audio());

        let live = recv_with_timeout(&mut session.transcript_rx, Duration::from_secs(5));
        assert_eq!(live.segments[0].text, "one two three");

        session.running.store(false, Ordering::SeqCst);
        session.worker.join().expect("session thread panicked");

        let tail = recv_with_timeout(&mut session.transcript_rx, Duration::from_secs(1));
        assert_eq!(tail.segments[0].text, "four");
        assert_eq!(tail.word_count, 4);

        let revealed = recv_with_timeout(&mut session.questions_rx, Duration::from_secs(1));
        assert_eq!(revealed.windows_submitted, 2);
        assert_eq!(revealed.questions.len(), 2);
    }

    #[test]
    fn silent_capture_reveals_no_questions() {
        let mut session = start_session(
            test_config(CaptureMode::File, 4),
            vec![Box::new(ScriptedBackend::new(&[]))],
            false,
        );
        session
            .producer
            .push_slice(&vec![0.0f32; (PIPELINE_SAMPLE_RATE as usize * 16) / 10]);

        thread::sleep(Duration::from_millis(200));
        session.running.store(false, Ordering::SeqCst);
        session.worker.join().expect("session thread panicked");

        let revealed = recv_with_timeout(&mut session.questions_rx, Duration::from_secs(1));
        assert!(revealed.questions.is_empty());
        assert_eq!(revealed.windows_submitted, 0);
        assert_eq!(session.client_calls.load(Ordering::SeqCst), 0);
        assert!(session
            .done_rx
            .recv_timeout(Duration::from_secs(1))
            .expect("done channel")
            .is_empty());

        // The silent live window never decoded; only the unconditional
        // remainder pass ran.
        assert_eq!(session.diagnostics.snapshot().decode_passes, 1);
    }

    #[test]
    fn generation_failures_reveal_an_empty_set() {
        let mut session = start_session(
            test_config(CaptureMode::File, 2),
            vec![Box::new(ScriptedBackend::new(&["alpha beta gamma"]))],
            true,
        );
        session.producer.push_slice(&loud_audio());

        let event = recv_with_timeout(&mut session.transcript_rx, Duration::from_secs(5));
        assert_eq!(event.word_count, 3);

        session.running.store(false, Ordering::SeqCst);
        session.worker.join().expect("session thread panicked");

        let revealed = recv_with_timeout(&mut session.questions_rx, Duration::from_secs(1));
        assert!(revealed.questions.is_empty());
        assert_eq!(revealed.windows_submitted, 2);
        assert_eq!(session.client_calls.load(Ordering::SeqCst), 2);
        assert_eq!(*session.status.lock(), SessionStatus::Stopped);
    }

    #[test]
    fn decoder_fault_restarts_the_isolate_and_continues() {
        let mut session = start_session(
            test_config(CaptureMode::File, 4),
            vec![
                Box::new(FailingBackend),
                Box::new(ScriptedBackend::new(&["alpha beta"])),
            ],
            false,
        );
        session.producer.push_slice(&loud_audio());

        // Wait until the failed pass has been recovered from.
        let deadline = Instant::now() + Duration::from_secs(5);
        while session.diagnostics.snapshot().recoveries == 0 {
            assert!(Instant::now() < deadline, "recovery never happened");
            thread::sleep(Duration::from_millis(5));
        }

        session.running.store(false, Ordering::SeqCst);
        session.worker.join().expect("session thread panicked");

        // The remainder pass runs on the fresh isolate and its words still
        // make it into the reveal.
        let event = recv_with_timeout(&mut session.transcript_rx, Duration::from_secs(1));
        assert_eq!(event.segments[0].text, "alpha beta");

        let revealed = recv_with_timeout(&mut session.questions_rx, Duration::from_secs(1));
        assert_eq!(revealed.windows_submitted, 1);
        assert_eq!(revealed.questions.len(), 1);
        assert_eq!(*session.status.lock(), SessionStatus::Stopped);
        assert_eq!(session.diagnostics.snapshot().recoveries, 1);
    }

    #[test]
    fn unknown_model_aborts_the_session() {
        let mut config = test_config(CaptureMode::File, 4);
        config.model = "colossal".into();
        let session = start_session(config, vec![Box::new(ScriptedBackend::new(&[]))], false);

        let collected = session
            .done_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("done channel");
        assert!(collected.is_empty());
        session.worker.join().expect("session thread panicked");

        assert_eq!(*session.status.lock(), SessionStatus::Error);
        assert!(!session.running.load(Ordering::SeqCst));
        assert_eq!(session.client_calls.load(Ordering::SeqCst), 0);
    }
}
