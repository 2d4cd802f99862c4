//! Transcript accumulation.
//!
//! Segments arrive from the isolate in ingestion order, which is the order
//! the session keeps: overlapping flush windows can legitimately decode
//! out of chronological order, and re-sorting by timestamp would make the
//! joined text disagree with what windows were already cut from. Ingestion
//! order is the contract, timestamps are advisory.

pub mod window;

use std::collections::HashSet;

use crate::ipc::events::TranscriptSegment;

/// Append-only transcript with exact-text deduplication.
///
/// Overlapping decode windows frequently re-emit an identical sentence; a
/// byte-for-byte repeat is noise, while a near-repeat ("hello there" vs
/// "hello, there") is kept and left to the question generator to cope with.
#[derive(Debug, Default)]
pub struct TranscriptAccumulator {
    segments: Vec<TranscriptSegment>,
    seen: HashSet<String>,
    word_count: usize,
}

impl TranscriptAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a segment unless its exact text was already ingested.
    /// Returns true when the transcript grew.
    pub fn ingest(&mut self, segment: TranscriptSegment) -> bool {
        let text = segment.text.trim();
        if text.is_empty() || self.seen.contains(text) {
            return false;
        }
        self.seen.insert(text.to_string());
        self.word_count += text.split_whitespace().count();
        self.segments.push(segment);
        true
    }

    /// All segment texts joined with single spaces, in ingestion order.
    pub fn current_text(&self) -> String {
        self.segments
            .iter()
            .map(|s| s.text.trim())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Whitespace-delimited word count of [`current_text`](Self::current_text).
    pub fn word_count(&self) -> usize {
        self.word_count
    }

    pub fn segments(&self) -> &[TranscriptSegment] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Drop everything. Ingesting the same segments afterwards rebuilds
    /// exactly the same transcript.
    pub fn reset(&mut self) {
        self.segments.clear();
        self.seen.clear();
        self.word_count = 0;
    }
}
