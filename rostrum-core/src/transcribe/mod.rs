//! Transcription controller.
//!
//! `TranscriptionEngine` drives the isolate through a small state machine:
//!
//! ```text
//!   Uninitialized ──load──▶ Loading ──ready──▶ Ready ◀──────────┐
//!         ▲                    │                 │ decode        │ ready
//!         │       error        │ error           ▼               │
//!         └────────────────────┴──────────── Decoding ───────────┘
//!                                                 │ close
//!                                               Closed (terminal)
//! ```
//!
//! Any isolate error during Loading or Decoding drops the controller back to
//! Uninitialized; the operation that failed returns the mapped error and the
//! caller may simply load again. Stream mode is Ready plus a streaming flag:
//! the isolate ingests and decodes internally while the controller polls for
//! segments.

pub mod backend;

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::assets::ModelCache;
use crate::codec::encode_wav_pcm16;
use crate::error::{Result, RostrumError};
use crate::ipc::events::TranscriptSegment;
use crate::isolate::{
    self, BackendFactory, IsolateEvent, IsolateFaultCode, IsolateHandle, IsolateRequest,
    StreamOptions, StreamState,
};

/// Max quiet time while a load is in progress. Downloads emit progress
/// events continuously, so this bounds responsiveness, not total duration.
const LOAD_QUIET_TIMEOUT: Duration = Duration::from_secs(120);

/// Max quiet time for a decode pass or a stream stop.
const DECODE_QUIET_TIMEOUT: Duration = Duration::from_secs(30);

/// How long a healthcheck waits for its pong.
const HEALTHCHECK_TIMEOUT: Duration = Duration::from_secs(2);

/// Controller lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Uninitialized,
    Loading,
    Ready,
    Decoding,
    Closed,
}

pub struct TranscriptionEngine {
    cache: Arc<ModelCache>,
    factory: BackendFactory,
    isolate: IsolateHandle,
    state: EngineState,
    model: Option<String>,
    streaming: bool,
    /// Segments that arrived while waiting for an unrelated reply; served
    /// by the next `poll`.
    pending: VecDeque<TranscriptSegment>,
}

impl TranscriptionEngine {
    pub fn new(cache: Arc<ModelCache>, factory: BackendFactory) -> Result<Self> {
        let isolate = isolate::spawn(Arc::clone(&cache), &factory)?;
        Ok(Self {
            cache,
            factory,
            isolate,
            state: EngineState::Uninitialized,
            model: None,
            streaming: false,
            pending: VecDeque::new(),
        })
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    pub fn model(&self) -> Option<&str> {
        self.model.as_deref()
    }

    /// Acquire and prime a model, forwarding download progress.
    ///
    /// # Errors
    /// `AssetUnavailable` when the model cannot be fetched; `IsolateFault`
    /// for everything else. Either way the controller is back in
    /// `Uninitialized` and the call may be retried.
    pub fn load(&mut self, model: &str, on_progress: &mut dyn FnMut(u64, u64)) -> Result<()> {
        self.ensure_open()?;
        self.state = EngineState::Loading;

        if let Err(e) = self.isolate.send(IsolateRequest::Load {
            model: model.to_string(),
        }) {
            self.state = EngineState::Uninitialized;
            return Err(e);
        }

        loop {
            match self.isolate.event_timeout(LOAD_QUIET_TIMEOUT) {
                Some(IsolateEvent::Progress { loaded, total, .. }) => on_progress(loaded, total),
                Some(IsolateEvent::Ready { model: ready_model }) => {
                    info!(model = %ready_model, "transcription engine ready");
                    self.model = Some(ready_model);
                    self.state = EngineState::Ready;
                    return Ok(());
                }
                Some(IsolateEvent::Error { code, message }) => {
                    self.state = EngineState::Uninitialized;
                    return Err(map_fault(code, model, message));
                }
                Some(other) => debug!(?other, "ignoring stray event during load"),
                None => {
                    self.state = EngineState::Uninitialized;
                    return Err(RostrumError::IsolateFault(
                        "isolate unresponsive during load".into(),
                    ));
                }
            }
        }
    }

    /// File-mode pass: encode one buffer as WAV, decode it, return the
    /// segments in emission order.
    pub fn decode(&mut self, samples: &[f32], sample_rate: u32) -> Result<Vec<TranscriptSegment>> {
        self.ensure_open()?;
        if self.state != EngineState::Ready {
            return Err(RostrumError::IsolateFault(format!(
                "decode requested in state {:?}",
                self.state
            )));
        }
        self.state = EngineState::Decoding;

        let wav = encode_wav_pcm16(samples, sample_rate);
        if let Err(e) = self.isolate.send(IsolateRequest::Decode { wav }) {
            self.state = EngineState::Uninitialized;
            return Err(e);
        }

        let mut segments = Vec::new();
        loop {
            match self.isolate.event_timeout(DECODE_QUIET_TIMEOUT) {
                Some(IsolateEvent::Segment(segment)) => segments.push(segment),
                Some(IsolateEvent::Ready { .. }) => {
                    self.state = EngineState::Ready;
                    return Ok(segments);
                }
                Some(IsolateEvent::Error { code, message }) => {
                    self.state = EngineState::Uninitialized;
                    let model = self.model.clone().unwrap_or_default();
                    return Err(map_fault(code, &model, message));
                }
                Some(other) => debug!(?other, "ignoring stray event during decode"),
                None => {
                    self.state = EngineState::Uninitialized;
                    return Err(RostrumError::IsolateFault(
                        "isolate unresponsive during decode".into(),
                    ));
                }
            }
        }
    }

    /// Begin stream-mode ingestion with the loaded model.
    pub fn start_stream(&mut self, options: StreamOptions) -> Result<()> {
        self.ensure_open()?;
        if self.state != EngineState::Ready {
            return Err(RostrumError::IsolateFault(format!(
                "startStream requested in state {:?}",
                self.state
            )));
        }
        let Some(model) = self.model.clone() else {
            return Err(RostrumError::IsolateFault("no model loaded".into()));
        };

        self.isolate
            .send(IsolateRequest::StartStream { model, options })?;

        loop {
            match self.isolate.event_timeout(DECODE_QUIET_TIMEOUT) {
                Some(IsolateEvent::StreamStatus {
                    state: StreamState::Started,
                }) => {
                    self.streaming = true;
                    return Ok(());
                }
                Some(IsolateEvent::Segment(segment)) => self.pending.push_back(segment),
                Some(IsolateEvent::Error { code, message }) => {
                    self.state = EngineState::Uninitialized;
                    let model = self.model.clone().unwrap_or_default();
                    return Err(map_fault(code, &model, message));
                }
                Some(other) => debug!(?other, "ignoring stray event during stream start"),
                None => {
                    self.state = EngineState::Uninitialized;
                    return Err(RostrumError::IsolateFault(
                        "isolate unresponsive during stream start".into(),
                    ));
                }
            }
        }
    }

    /// Hand captured samples to the stream. Non-blocking; decoded segments
    /// come back via [`poll`](Self::poll).
    pub fn feed(&mut self, samples: Vec<f32>) -> Result<()> {
        self.ensure_open()?;
        if !self.streaming {
            // Tolerated: the isolate starts a default stream, which covers
            // feeds racing a restart.
            warn!("feed without an active stream; isolate will auto-start");
            self.streaming = true;
        }
        self.isolate.send(IsolateRequest::FeedStreamChunk { samples })
    }

    /// Collect segments decoded since the last poll.
    ///
    /// # Errors
    /// A decode fault reported by the isolate surfaces here once; the
    /// controller is then `Uninitialized` and must be loaded again.
    pub fn poll(&mut self) -> Result<Vec<TranscriptSegment>> {
        self.ensure_open()?;
        let mut segments: Vec<TranscriptSegment> = self.pending.drain(..).collect();
        let mut fault: Option<RostrumError> = None;

        while let Some(event) = self.isolate.try_event() {
            match event {
                IsolateEvent::Segment(segment) => segments.push(segment),
                IsolateEvent::Error { code, message } => {
                    let model = self.model.clone().unwrap_or_default();
                    fault.get_or_insert(map_fault(code, &model, message));
                }
                IsolateEvent::StreamStatus {
                    state: StreamState::Stopped,
                } => {
                    warn!("stream stopped unexpectedly");
                    self.streaming = false;
                }
                other => debug!(?other, "ignoring stray event during poll"),
            }
        }

        if let Some(fault) = fault {
            self.state = EngineState::Uninitialized;
            self.streaming = false;
            return Err(fault);
        }
        Ok(segments)
    }

    /// End stream-mode ingestion. Returns the final segments decoded from
    /// the retained tail.
    pub fn stop_stream(&mut self) -> Result<Vec<TranscriptSegment>> {
        self.ensure_open()?;
        self.isolate.send(IsolateRequest::StopStream)?;

        let mut segments: Vec<TranscriptSegment> = self.pending.drain(..).collect();
        loop {
            match self.isolate.event_timeout(DECODE_QUIET_TIMEOUT) {
                Some(IsolateEvent::Segment(segment)) => segments.push(segment),
                Some(IsolateEvent::StreamStatus {
                    state: StreamState::Stopped,
                }) => {
                    self.streaming = false;
                    return Ok(segments);
                }
                Some(IsolateEvent::Error { code, message }) => {
                    self.streaming = false;
                    self.state = EngineState::Uninitialized;
                    let model = self.model.clone().unwrap_or_default();
                    return Err(map_fault(code, &model, message));
                }
                Some(other) => debug!(?other, "ignoring stray event during stream stop"),
                None => {
                    self.streaming = false;
                    self.state = EngineState::Uninitialized;
                    return Err(RostrumError::IsolateFault(
                        "isolate unresponsive during stream stop".into(),
                    ));
                }
            }
        }
    }

    /// Probe isolate liveness.
    pub fn healthcheck(&mut self) -> bool {
        if self.state == EngineState::Closed || self.isolate.send(IsolateRequest::Healthcheck).is_err()
        {
            return false;
        }
        loop {
            match self.isolate.event_timeout(HEALTHCHECK_TIMEOUT) {
                Some(IsolateEvent::Pong) => return true,
                Some(IsolateEvent::Segment(segment)) => self.pending.push_back(segment),
                Some(_) => {}
                None => return false,
            }
        }
    }

    /// Tear down the isolate and start a fresh one. The controller returns
    /// to `Uninitialized`; callers re-issue `load` (and `startStream` if
    /// they were streaming) against the new isolate.
    pub fn restart(&mut self) -> Result<()> {
        warn!("restarting execution isolate");
        self.isolate.shutdown();
        self.isolate = isolate::spawn(Arc::clone(&self.cache), &self.factory)?;
        self.state = EngineState::Uninitialized;
        self.streaming = false;
        self.pending.clear();
        Ok(())
    }

    /// Terminal shutdown. Every later operation fails with `NotRunning`.
    pub fn close(&mut self) {
        if self.state != EngineState::Closed {
            self.isolate.shutdown();
            self.state = EngineState::Closed;
            self.streaming = false;
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.state == EngineState::Closed {
            return Err(RostrumError::NotRunning);
        }
        Ok(())
    }
}

impl Drop for TranscriptionEngine {
    fn drop(&mut self) {
        self.close();
    }
}

fn map_fault(code: IsolateFaultCode, model: &str, message: String) -> RostrumError {
    match code {
        IsolateFaultCode::Asset => RostrumError::AssetUnavailable {
            name: model.to_string(),
            reason: message,
        },
        _ => RostrumError::IsolateFault(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assets::{AssetStore, HttpFetcher};
    use crate::buffering::PIPELINE_SAMPLE_RATE;
    use crate::transcribe::backend::StubBackend;
    use std::time::Instant;

    fn cached_cache() -> (tempfile::TempDir, Arc<ModelCache>) {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::new(dir.path().join("assets.db")).unwrap();
        store.put("tiny.en", &[5u8; 24]).unwrap();
        store.put("base.en", &[6u8; 24]).unwrap();
        (
            dir,
            Arc::new(ModelCache::with_fetcher(store, Arc::new(HttpFetcher::new()))),
        )
    }

    fn stub_factory() -> BackendFactory {
        Arc::new(|| Box::new(StubBackend::new()))
    }

    fn engine() -> (tempfile::TempDir, TranscriptionEngine) {
        let (dir, cache) = cached_cache();
        (dir, TranscriptionEngine::new(cache, stub_factory()).unwrap())
    }

    #[test]
    fn load_reaches_ready_and_reports_progress() {
        let (_dir, mut engine) = engine();
        assert_eq!(engine.state(), EngineState::Uninitialized);

        let mut reports = Vec::new();
        engine
            .load("tiny.en", &mut |loaded, total| reports.push((loaded, total)))
            .unwrap();

        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.model(), Some("tiny.en"));
        assert_eq!(reports, vec![(24, 24)]);
    }

    #[test]
    fn failed_load_returns_to_uninitialized_and_is_retryable() {
        let (_dir, mut engine) = engine();

        let err = engine.load("not-a-model", &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, RostrumError::AssetUnavailable { .. }));
        assert_eq!(engine.state(), EngineState::Uninitialized);

        engine.load("tiny.en", &mut |_, _| {}).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
    }

    #[test]
    fn decode_outside_ready_is_rejected_without_state_change() {
        let (_dir, mut engine) = engine();
        let err = engine.decode(&[0.1; 1600], PIPELINE_SAMPLE_RATE).unwrap_err();
        assert!(matches!(err, RostrumError::IsolateFault(_)));
        assert_eq!(engine.state(), EngineState::Uninitialized);
    }

    #[test]
    fn decode_round_trip_returns_to_ready() {
        let (_dir, mut engine) = engine();
        engine.load("tiny.en", &mut |_, _| {}).unwrap();

        let segments = engine
            .decode(&vec![0.2; 16_000], PIPELINE_SAMPLE_RATE)
            .unwrap();
        assert_eq!(segments.len(), 1);
        assert!(segments[0].text.contains("pass 1"));
        assert_eq!(engine.state(), EngineState::Ready);

        // The engine is immediately usable for the next pass.
        let again = engine
            .decode(&vec![0.2; 8_000], PIPELINE_SAMPLE_RATE)
            .unwrap();
        assert!(again[0].text.contains("pass 2"));
    }

    #[test]
    fn stream_lifecycle_delivers_segments_through_poll() {
        let (_dir, mut engine) = engine();
        engine.load("tiny.en", &mut |_, _| {}).unwrap();
        engine.start_stream(StreamOptions::default()).unwrap();
        assert!(engine.is_streaming());

        let loud = vec![0.5f32; (1.6 * PIPELINE_SAMPLE_RATE as f32) as usize];
        engine.feed(loud).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        let mut collected = Vec::new();
        while collected.is_empty() && Instant::now() < deadline {
            collected.extend(engine.poll().unwrap());
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(!collected.is_empty(), "no segments decoded from the stream");

        let tail = engine.stop_stream().unwrap();
        assert!(!engine.is_streaming());
        // The retained half-second tail decodes on stop.
        assert_eq!(tail.len(), 1);
    }

    #[test]
    fn restart_demands_a_fresh_load() {
        let (_dir, mut engine) = engine();
        engine.load("tiny.en", &mut |_, _| {}).unwrap();
        engine.restart().unwrap();

        assert_eq!(engine.state(), EngineState::Uninitialized);
        assert!(engine
            .decode(&[0.1; 1600], PIPELINE_SAMPLE_RATE)
            .is_err());

        engine.load("base.en", &mut |_, _| {}).unwrap();
        assert_eq!(engine.model(), Some("base.en"));
        assert!(engine.healthcheck());
    }

    #[test]
    fn close_is_terminal() {
        let (_dir, mut engine) = engine();
        engine.close();
        assert_eq!(engine.state(), EngineState::Closed);
        let err = engine.load("tiny.en", &mut |_, _| {}).unwrap_err();
        assert!(matches!(err, RostrumError::NotRunning));
        assert!(!engine.healthcheck());
    }
}
