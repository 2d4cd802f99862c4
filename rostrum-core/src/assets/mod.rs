//! Model asset acquisition and caching.
//!
//! Named acoustic-model blobs are fetched over HTTP at most once per device
//! and kept in a SQLite blob store. Concurrent requests for the same name are
//! single-flight: the second caller blocks on the per-name gate, then finds
//! the cache hit. Progress is reported as monotonically increasing
//! `(loaded, total)` byte counts; a cache hit reports instant completion.
//!
//! Nothing partial is ever cached — a failed or truncated download leaves the
//! store untouched and surfaces `AssetUnavailable`.

pub mod store;

use std::collections::HashMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::error::{Result, RostrumError};
pub use store::AssetStore;

/// Model registry: asset name → download URL.
/// These are the whisper.cpp GGML conversions published on Hugging Face.
const MODEL_SOURCES: &[(&str, &str)] = &[
    (
        "tiny",
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-tiny.bin",
    ),
    (
        "tiny.en",
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-tiny.en.bin",
    ),
    (
        "base",
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.bin",
    ),
    (
        "base.en",
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-base.en.bin",
    ),
    (
        "small",
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.bin",
    ),
    (
        "small.en",
        "https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-small.en.bin",
    ),
];

/// Model used when a session does not name one.
pub const DEFAULT_MODEL: &str = "tiny.en";

/// How long to wait for the remote host to accept the connection.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// Read granularity for streamed downloads.
const DOWNLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Resolve a registered model name to its download URL.
pub fn resolve_model_url(name: &str) -> Option<&'static str> {
    MODEL_SOURCES
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, url)| *url)
}

/// Names of all registered models.
pub fn registered_models() -> Vec<&'static str> {
    MODEL_SOURCES.iter().map(|(n, _)| *n).collect()
}

/// Network side of [`ModelCache`], swappable for tests.
pub trait AssetFetcher: Send + Sync {
    /// Fetch the full payload for `name` from `url`, reporting byte progress.
    fn fetch(
        &self,
        name: &str,
        url: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>>;
}

/// Streaming HTTP fetcher. No overall deadline: model blobs run to tens of
/// megabytes and slow links are legitimate, so only the connect phase is
/// bounded.
pub struct HttpFetcher {
    client: reqwest::blocking::Client,
}

impl HttpFetcher {
    pub fn new() -> Self {
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None::<Duration>)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for HttpFetcher {
    fn default() -> Self {
        Self::new()
    }
}

impl AssetFetcher for HttpFetcher {
    fn fetch(
        &self,
        name: &str,
        url: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>> {
        let unavailable = |reason: String| RostrumError::AssetUnavailable {
            name: name.to_string(),
            reason,
        };

        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| unavailable(e.to_string()))?;

        if !response.status().is_success() {
            return Err(unavailable(format!("HTTP {}", response.status())));
        }

        let total = response.content_length().unwrap_or(0);
        let mut payload = Vec::with_capacity(total as usize);
        let mut buf = [0u8; DOWNLOAD_CHUNK_BYTES];
        progress(0, total);

        loop {
            let n = response
                .read(&mut buf)
                .map_err(|e| unavailable(e.to_string()))?;
            if n == 0 {
                break;
            }
            payload.extend_from_slice(&buf[..n]);
            progress(payload.len() as u64, total);
        }

        if total > 0 && (payload.len() as u64) < total {
            return Err(unavailable(format!(
                "truncated download: {} of {total} bytes",
                payload.len()
            )));
        }

        Ok(payload)
    }
}

/// Device-wide model cache: persistent blob store + single-flight downloads.
///
/// The cache is shared across sessions; everything else in the pipeline is
/// session-scoped.
pub struct ModelCache {
    store: AssetStore,
    fetcher: Arc<dyn AssetFetcher>,
    gates: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ModelCache {
    /// Open (or create) the cache at `db_path` with the HTTP fetcher.
    pub fn open(db_path: PathBuf) -> Result<Self> {
        Ok(Self::with_fetcher(
            AssetStore::new(db_path)?,
            Arc::new(HttpFetcher::new()),
        ))
    }

    /// Open the cache at the platform default location.
    pub fn open_default() -> Result<Self> {
        Self::open(AssetStore::default_db_path())
    }

    pub fn with_fetcher(store: AssetStore, fetcher: Arc<dyn AssetFetcher>) -> Self {
        Self {
            store,
            fetcher,
            gates: Mutex::new(HashMap::new()),
        }
    }

    /// Acquire the payload for a named model.
    ///
    /// Cache hit: returns immediately, reporting `(len, len)` once.
    /// Miss: downloads with streaming progress, persists, then returns.
    /// Concurrent callers for the same name serialize on a per-name gate, so
    /// exactly one download happens and the rest observe the cached result.
    pub fn acquire(
        &self,
        name: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<Vec<u8>> {
        let Some(url) = resolve_model_url(name) else {
            return Err(RostrumError::AssetUnavailable {
                name: name.to_string(),
                reason: "not a registered model".into(),
            });
        };

        let gate = {
            let mut gates = self.gates.lock();
            Arc::clone(gates.entry(name.to_string()).or_default())
        };
        let _inflight = gate.lock();

        match self.store.get(name) {
            Ok(Some(payload)) => {
                debug!(name, bytes = payload.len(), "model cache hit");
                let len = payload.len() as u64;
                progress(len, len);
                return Ok(payload);
            }
            Ok(None) => {}
            Err(e) => warn!(name, "asset store read failed, re-downloading: {e}"),
        }

        info!(name, url, "downloading model asset");
        let payload = self.fetcher.fetch(name, url, progress)?;

        if let Err(e) = self.store.put(name, &payload) {
            // The session can still run on the in-memory copy; the next
            // process start pays the download again.
            warn!(name, "failed to persist model asset: {e}");
        } else {
            info!(name, bytes = payload.len(), "model asset cached");
        }

        Ok(payload)
    }

    /// True when a valid payload for `name` is already cached.
    pub fn is_cached(&self, name: &str) -> bool {
        matches!(self.store.get(name), Ok(Some(_)))
    }

    pub fn store(&self) -> &AssetStore {
        &self.store
    }
}
