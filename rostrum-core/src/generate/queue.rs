//! FIFO job queue for question generation.
//!
//! One worker thread, at most one job in flight, completions recorded in
//! submission order. `flush` marks the session end: it may enqueue one final
//! remainder window, rejects everything submitted after it, and parks on a
//! condvar until the last job has drained. No polling loops anywhere; the
//! worker signals drain directly.

use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::error::Result;
use crate::generate::reveal::{CompletedWindow, RevealBuffer};
use crate::generate::{into_quiz_questions, GenerationClient, GenerationSettings};
use crate::transcript::window::TextWindow;

#[derive(Default)]
struct QueueState {
    pending: VecDeque<TextWindow>,
    in_flight: bool,
    flushing: bool,
    shutdown: bool,
    windows_accepted: usize,
    jobs_succeeded: usize,
    jobs_failed: usize,
}

impl QueueState {
    fn drained(&self) -> bool {
        self.pending.is_empty() && !self.in_flight
    }
}

struct Shared {
    state: Mutex<QueueState>,
    /// Signaled when pending grows or shutdown is requested.
    work_ready: Condvar,
    /// Signaled when the queue transitions to drained.
    drained: Condvar,
}

/// Counter snapshot for diagnostics and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStats {
    pub windows_accepted: usize,
    pub jobs_succeeded: usize,
    pub jobs_failed: usize,
    pub pending: usize,
}

/// Serialized generation pipeline for one session.
pub struct ChunkQueue {
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
}

impl ChunkQueue {
    /// Spin up the worker. Completed jobs land in `results`; failed jobs are
    /// logged and contribute nothing.
    pub fn start(
        client: Arc<dyn GenerationClient>,
        settings: GenerationSettings,
        results: Arc<RevealBuffer>,
    ) -> Result<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(QueueState::default()),
            work_ready: Condvar::new(),
            drained: Condvar::new(),
        });

        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name("rostrum-generate".to_string())
            .spawn(move || run_worker(worker_shared, client, settings, results))?;

        Ok(Self {
            shared,
            worker: Some(worker),
        })
    }

    /// Enqueue a window for generation. Returns false (and drops the window)
    /// once a flush has begun or the queue is shutting down.
    pub fn submit(&self, window: TextWindow) -> bool {
        let mut state = self.shared.state.lock();
        if state.flushing || state.shutdown {
            debug!(window = window.index, "window rejected after flush");
            return false;
        }
        state.pending.push_back(window);
        state.windows_accepted += 1;
        self.shared.work_ready.notify_one();
        true
    }

    /// End-of-session barrier: optionally enqueue the remainder window,
    /// refuse all later submissions, and block until every accepted job has
    /// completed or failed.
    pub fn flush(&self, remainder: Option<TextWindow>) {
        let mut state = self.shared.state.lock();
        state.flushing = true;
        if let Some(window) = remainder {
            state.pending.push_back(window);
            state.windows_accepted += 1;
            self.shared.work_ready.notify_one();
        }
        while !state.drained() {
            self.shared.drained.wait(&mut state);
        }
        info!(
            accepted = state.windows_accepted,
            failed = state.jobs_failed,
            "generation queue drained"
        );
    }

    pub fn stats(&self) -> QueueStats {
        let state = self.shared.state.lock();
        QueueStats {
            windows_accepted: state.windows_accepted,
            jobs_succeeded: state.jobs_succeeded,
            jobs_failed: state.jobs_failed,
            pending: state.pending.len(),
        }
    }
}

impl Drop for ChunkQueue {
    fn drop(&mut self) {
        {
            let mut state = self.shared.state.lock();
            state.shutdown = true;
            self.shared.work_ready.notify_all();
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!("generation worker panicked");
            }
        }
    }
}

fn run_worker(
    shared: Arc<Shared>,
    client: Arc<dyn GenerationClient>,
    settings: GenerationSettings,
    results: Arc<RevealBuffer>,
) {
    loop {
        let window = {
            let mut state = shared.state.lock();
            loop {
                if let Some(window) = state.pending.pop_front() {
                    state.in_flight = true;
                    break window;
                }
                if state.shutdown {
                    return;
                }
                shared.work_ready.wait(&mut state);
            }
        };

        let request = settings.request_for(window.text.clone());
        let outcome = client.submit(&request).map(into_quiz_questions);

        // The completion must be visible in `results` before the drained
        // signal fires, so push first, then clear in_flight.
        let succeeded = match outcome {
            Ok(questions) => {
                debug!(
                    window = window.index,
                    questions = questions.len(),
                    "generation job completed"
                );
                results.push(CompletedWindow {
                    window_index: window.index,
                    questions,
                });
                true
            }
            Err(e) => {
                warn!(window = window.index, "generation job failed: {e}");
                false
            }
        };

        let mut state = shared.state.lock();
        state.in_flight = false;
        if succeeded {
            state.jobs_succeeded += 1;
        } else {
            state.jobs_failed += 1;
        }
        if state.drained() {
            shared.drained.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RostrumError;
    use crate::generate::{GenerationRequest, RawOption, RawQuestion};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Per-call latencies, scripted failures, one question per job echoing
    /// the transcript it was asked about.
    struct ScriptedClient {
        latencies_ms: Vec<u64>,
        calls: AtomicUsize,
    }

    impl ScriptedClient {
        fn new(latencies_ms: Vec<u64>) -> Self {
            Self {
                latencies_ms,
                calls: AtomicUsize::new(0),
            }
        }
    }

    impl GenerationClient for ScriptedClient {
        fn submit(&self, request: &GenerationRequest) -> Result<Vec<RawQuestion>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(ms) = self.latencies_ms.get(call) {
                thread::sleep(Duration::from_millis(*ms));
            }
            if request.transcript.contains("poison") {
                return Err(RostrumError::GenerationFailure("scripted failure".into()));
            }
            Ok(vec![RawQuestion {
                question_text: format!("about {}", request.transcript),
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

    fn window(index: usize, text: &str) -> TextWindow {
        let start = index * 100;
        TextWindow {
            index,
            text: text.to_string(),
            words: start..start + text.split_whitespace().count(),
        }
    }

    fn queue_with(
        latencies_ms: Vec<u64>,
    ) -> (ChunkQueue, Arc<RevealBuffer>) {
        let results = Arc::new(RevealBuffer::new());
        let queue = ChunkQueue::start(
            Arc::new(ScriptedClient::new(latencies_ms)),
            GenerationSettings::default(),
            Arc::clone(&results),
        )
        .unwrap();
        (queue, results)
    }

    #[test]
    fn completions_stay_in_submission_order_despite_latency() {
        // First job is the slowest; order must still be 0, 1, 2.
        let (queue, results) = queue_with(vec![120, 20, 0]);
        for i in 0..3 {
            assert!(queue.submit(window(i, &format!("window {i}"))));
        }
        queue.flush(None);

        let ordered: Vec<usize> = {
            let revealed = results.reveal();
            assert_eq!(revealed.len(), 3);
            revealed
                .iter()
                .map(|q| {
                    q.question
                        .rsplit(' ')
                        .next()
                        .unwrap()
                        .parse::<usize>()
                        .unwrap()
                })
                .collect()
        };
        assert_eq!(ordered, vec![0, 1, 2]);
    }

    #[test]
    fn flush_returns_only_after_every_job_landed() {
        let (queue, results) = queue_with(vec![60, 60]);
        assert!(queue.submit(window(0, "first")));
        assert!(queue.submit(window(1, "second")));

        queue.flush(None);
        // Nothing revealed yet, but both completions are staged.
        assert!(results.visible().is_empty());
        assert_eq!(results.hidden_len(), 2);
        assert_eq!(queue.stats().pending, 0);
    }

    #[test]
    fn submissions_after_flush_are_rejected() {
        let (queue, results) = queue_with(vec![0, 0]);
        assert!(queue.submit(window(0, "kept")));
        queue.flush(Some(window(1, "tail")));

        assert!(!queue.submit(window(2, "late")));
        assert_eq!(results.hidden_len(), 2);
        assert_eq!(queue.stats().windows_accepted, 2);
    }

    #[test]
    fn failed_jobs_degrade_to_zero_questions() {
        let (queue, results) = queue_with(vec![0, 0, 0]);
        assert!(queue.submit(window(0, "fine")));
        assert!(queue.submit(window(1, "poison window")));
        assert!(queue.submit(window(2, "also fine")));
        queue.flush(None);

        let stats = queue.stats();
        assert_eq!(stats.jobs_succeeded, 2);
        assert_eq!(stats.jobs_failed, 1);

        let revealed = results.reveal();
        assert_eq!(revealed.len(), 2);
        assert!(revealed.iter().all(|q| !q.question.contains("poison")));
    }

    #[test]
    fn flush_of_an_idle_queue_returns_immediately() {
        let (queue, results) = queue_with(vec![]);
        queue.flush(None);
        assert_eq!(results.hidden_len(), 0);
    }
}
