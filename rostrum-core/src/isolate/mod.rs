//! Execution isolate for the decode backend.
//!
//! Recognizer crashes must not take the session down, so the backend runs on
//! its own named thread behind typed request/event channels:
//!
//! ```text
//!   controller ── IsolateRequest ──▶ [rostrum-isolate thread]
//!              ◀── IsolateEvent  ──      backend + stream state
//! ```
//!
//! A panic inside the backend unwinds only the worker thread; the controller
//! notices the dead channel, respawns a fresh isolate, and re-issues `load`.
//! Request order is preserved end to end, which the tests lean on: a
//! `healthcheck`/`pong` pair fences all previously sent work.

pub mod messages;
mod worker;

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::warn;

use crate::assets::ModelCache;
use crate::error::{Result, RostrumError};
use crate::transcribe::backend::DecodeBackend;
pub use messages::{IsolateEvent, IsolateFaultCode, IsolateRequest, StreamOptions, StreamState};

/// Builds a fresh backend for each isolate incarnation.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn DecodeBackend> + Send + Sync>;

/// Controller-side handle to a running isolate.
pub struct IsolateHandle {
    requests: Option<Sender<IsolateRequest>>,
    events: Receiver<IsolateEvent>,
    thread: Option<JoinHandle<()>>,
}

/// Start a new isolate thread hosting a backend built by `factory`.
pub fn spawn(cache: Arc<ModelCache>, factory: &BackendFactory) -> Result<IsolateHandle> {
    let (request_tx, request_rx) = unbounded::<IsolateRequest>();
    let (event_tx, event_rx) = unbounded::<IsolateEvent>();
    let backend = factory();

    let thread = thread::Builder::new()
        .name("rostrum-isolate".to_string())
        .spawn(move || worker::run(request_rx, event_tx, cache, backend))?;

    Ok(IsolateHandle {
        requests: Some(request_tx),
        events: event_rx,
        thread: Some(thread),
    })
}

impl IsolateHandle {
    /// Queue a request for the worker.
    ///
    /// # Errors
    /// `IsolateFault` if the worker thread is gone.
    pub fn send(&self, request: IsolateRequest) -> Result<()> {
        let Some(requests) = &self.requests else {
            return Err(RostrumError::IsolateFault("isolate is shut down".into()));
        };
        requests
            .send(request)
            .map_err(|_| RostrumError::IsolateFault("isolate thread is gone".into()))
    }

    /// Next pending event, if any.
    pub fn try_event(&self) -> Option<IsolateEvent> {
        self.events.try_recv().ok()
    }

    /// Wait up to `timeout` for the next event.
    pub fn event_timeout(&self, timeout: Duration) -> Option<IsolateEvent> {
        self.events.recv_timeout(timeout).ok()
    }

    /// False once the worker thread has exited (cleanly or by panic).
    pub fn is_alive(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Close the request channel and join the worker.
    pub fn shutdown(&mut self) {
        self.requests = None;
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("isolate worker panicked before shutdown");
            }
        }
    }
}

impl Drop for IsolateHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
