//! Isolate worker thread.
//!
//! Owns the decode backend and all stream-mode state. Requests arrive over a
//! crossbeam channel in issue order; events flow back the same way. The
//! thread exits when the request sender is dropped or when the controller
//! stops listening.
//!
//! Stream mode keeps its own sliding buffer and VAD here rather than in the
//! controller: flush cadence and silence gating are ingestion decisions, and
//! the controller only ever sees finished segments.

use std::sync::Arc;

use crossbeam_channel::{Receiver, Sender};
use tracing::{debug, info, warn};

use crate::assets::{ModelCache, DEFAULT_MODEL};
use crate::buffering::sliding::AudioSlidingBuffer;
use crate::buffering::PIPELINE_SAMPLE_RATE;
use crate::codec::decode_wav_bytes;
use crate::error::{Result, RostrumError};
use crate::isolate::messages::{
    IsolateEvent, IsolateFaultCode, IsolateRequest, StreamOptions, StreamState,
};
use crate::transcribe::backend::DecodeBackend;
use crate::vad::{EnergyVad, VadDecision, VoiceActivityDetector};

/// Stream-mode session state, present between `startStream` and `stopStream`.
struct StreamSession {
    options: StreamOptions,
    buffer: AudioSlidingBuffer,
    vad: EnergyVad,
    /// Samples that have scrolled past the front of the buffer; divides by
    /// the pipeline rate to give the session-clock offset of the next drain.
    consumed_samples: u64,
}

impl StreamSession {
    fn new(options: StreamOptions) -> Self {
        Self {
            options,
            buffer: AudioSlidingBuffer::new(PIPELINE_SAMPLE_RATE),
            vad: EnergyVad::default(),
            consumed_samples: 0,
        }
    }

    fn clock_secs(&self) -> f32 {
        self.consumed_samples as f32 / PIPELINE_SAMPLE_RATE as f32
    }
}

struct Worker {
    cache: Arc<ModelCache>,
    events: Sender<IsolateEvent>,
    backend: Box<dyn DecodeBackend>,
    loaded_model: Option<String>,
    stream: Option<StreamSession>,
}

pub(super) fn run(
    requests: Receiver<IsolateRequest>,
    events: Sender<IsolateEvent>,
    cache: Arc<ModelCache>,
    backend: Box<dyn DecodeBackend>,
) {
    let mut worker = Worker {
        cache,
        events,
        backend,
        loaded_model: None,
        stream: None,
    };

    while let Ok(request) = requests.recv() {
        if !worker.handle(request) {
            break;
        }
    }
    debug!("isolate worker exiting");
}

impl Worker {
    /// Dispatch one request. Returns false once the controller is gone.
    fn handle(&mut self, request: IsolateRequest) -> bool {
        match request {
            IsolateRequest::Load { model } => self.on_load(&model),
            IsolateRequest::Decode { wav } => self.on_decode(&wav),
            IsolateRequest::StartStream { model, options } => self.on_start_stream(model, options),
            IsolateRequest::FeedStreamChunk { samples } => self.on_feed(samples),
            IsolateRequest::StopStream => self.on_stop_stream(),
            IsolateRequest::Healthcheck => self.emit(IsolateEvent::Pong),
        }
    }

    fn emit(&self, event: IsolateEvent) -> bool {
        self.events.send(event).is_ok()
    }

    fn emit_fault(&self, code: IsolateFaultCode, err: &RostrumError) -> bool {
        warn!(?code, "isolate fault: {err}");
        self.emit(IsolateEvent::Error {
            code,
            message: err.to_string(),
        })
    }

    // -- load ---------------------------------------------------------------

    fn on_load(&mut self, model: &str) -> bool {
        match self.ensure_loaded(model) {
            Ok(()) => self.emit(IsolateEvent::Ready {
                model: model.to_string(),
            }),
            Err(e) => {
                self.loaded_model = None;
                let code = match e {
                    RostrumError::AssetUnavailable { .. } => IsolateFaultCode::Asset,
                    _ => IsolateFaultCode::Internal,
                };
                self.emit_fault(code, &e)
            }
        }
    }

    /// Acquire model bytes (cache or network) and prime the backend,
    /// forwarding download progress as it happens.
    fn ensure_loaded(&mut self, model: &str) -> Result<()> {
        if self.loaded_model.as_deref() == Some(model) {
            return Ok(());
        }

        let progress_tx = self.events.clone();
        let progress_model = model.to_string();
        let bytes = self.cache.acquire(model, &mut |loaded, total| {
            let _ = progress_tx.send(IsolateEvent::Progress {
                model: progress_model.clone(),
                loaded,
                total,
            });
        })?;

        self.backend.load(model, &bytes)?;
        self.loaded_model = Some(model.to_string());
        info!(model, "isolate backend primed");
        Ok(())
    }

    // -- file-mode decode ---------------------------------------------------

    fn on_decode(&mut self, wav: &[u8]) -> bool {
        let Some(model) = self.loaded_model.clone() else {
            return self.emit_fault(
                IsolateFaultCode::Decode,
                &RostrumError::IsolateFault("decode requested before load".into()),
            );
        };

        let options = self
            .stream
            .as_ref()
            .map(|s| s.options.clone())
            .unwrap_or_default();

        let outcome = decode_wav_bytes(wav)
            .and_then(|(samples, rate)| self.backend.decode(&samples, rate, &options));

        match outcome {
            Ok(segments) => {
                for segment in segments {
                    if !self.emit(IsolateEvent::Segment(segment)) {
                        return false;
                    }
                }
                self.emit(IsolateEvent::Ready { model })
            }
            Err(e) => self.emit_fault(IsolateFaultCode::Decode, &e),
        }
    }

    // -- stream mode --------------------------------------------------------

    fn on_start_stream(&mut self, model: String, options: StreamOptions) -> bool {
        if self.stream.take().is_some() {
            warn!("startStream while a stream was active; previous buffer discarded");
        }
        if let Err(e) = self.ensure_loaded(&model) {
            self.loaded_model = None;
            return self.emit_fault(IsolateFaultCode::Stream, &e);
        }

        self.backend.reset();
        self.stream = Some(StreamSession::new(options));
        self.emit(IsolateEvent::StreamStatus {
            state: StreamState::Started,
        })
    }

    fn on_feed(&mut self, samples: Vec<f32>) -> bool {
        // Feeds can race a controller restart and arrive before startStream.
        // Starting a default session keeps the audio instead of crashing.
        if self.stream.is_none() {
            let model = self
                .loaded_model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string());
            debug!(model, "feed before start; starting default stream");
            if !self.on_start_stream(model, StreamOptions::default()) {
                return false;
            }
            if self.stream.is_none() {
                // Auto-start failed; the error event is already out.
                return true;
            }
        }

        let Some(session) = self.stream.as_mut() else {
            return true;
        };
        let chunk =
            crate::buffering::chunk::AudioChunk::new(samples, PIPELINE_SAMPLE_RATE);
        let dropped = session.buffer.push(chunk);
        session.consumed_samples += dropped as u64;
        if dropped > 0 {
            debug!(dropped, "stream buffer trimmed while decode lagged");
        }

        while self.stream.as_ref().is_some_and(|s| s.buffer.should_flush()) {
            if !self.flush_stream_window() {
                return false;
            }
        }
        true
    }

    /// Drain one flush window, gate it through the VAD, decode if it holds
    /// speech, and advance the session clock either way.
    fn flush_stream_window(&mut self) -> bool {
        let Some(session) = self.stream.as_mut() else {
            return true;
        };

        let offset = session.clock_secs();
        let combined = session.buffer.drain();
        let retained = session.buffer.buffered_samples();
        session.consumed_samples += (combined.len() - retained) as u64;

        if session.vad.classify(&combined) == VadDecision::Silence {
            debug!(samples = combined.len(), "flush window skipped as silence");
            return true;
        }

        let options = session.options.clone();
        self.decode_stream_samples(&combined, offset, &options)
    }

    fn decode_stream_samples(
        &mut self,
        samples: &[f32],
        offset_secs: f32,
        options: &StreamOptions,
    ) -> bool {
        match self
            .backend
            .decode(samples, PIPELINE_SAMPLE_RATE, options)
        {
            Ok(segments) => {
                for mut segment in segments {
                    segment.from += offset_secs;
                    segment.to += offset_secs;
                    if !self.emit(IsolateEvent::Segment(segment)) {
                        return false;
                    }
                }
                true
            }
            Err(e) => self.emit_fault(IsolateFaultCode::Decode, &e),
        }
    }

    fn on_stop_stream(&mut self) -> bool {
        if let Some(mut session) = self.stream.take() {
            let offset = session.clock_secs();
            let remainder = session.buffer.take_remainder();
            // The tail bypasses the VAD gate: the last words of a session
            // must reach the decoder even when they trail off quietly.
            if !remainder.is_empty() {
                let options = session.options.clone();
                if !self.decode_stream_samples(&remainder, offset, &options) {
                    return false;
                }
            }
            self.backend.reset();
        }
        self.emit(IsolateEvent::StreamStatus {
            state: StreamState::Stopped,
        })
    }
}
