//! Event types emitted on the engine broadcast bus.
//!
//! ## Subscriptions
//!
//! | Event | Subscription |
//! |-------|--------------|
//! | `TranscriptEvent` | `RostrumEngine::subscribe_transcripts` |
//! | `SessionStatusEvent` | `RostrumEngine::subscribe_status` |
//! | `ModelProgressEvent` | `RostrumEngine::subscribe_progress` |
//! | `AudioActivityEvent` | `RostrumEngine::subscribe_activity` |
//! | `QuestionsRevealedEvent` | `RostrumEngine::subscribe_questions` |
//!
//! All types serialize as camelCase JSON so hosts can forward them to web
//! frontends unchanged.

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Transcript events
// ---------------------------------------------------------------------------

/// Emitted when a decode pass adds new text to the session transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Segments newly accepted by the accumulator (duplicates are not re-emitted).
    pub segments: Vec<TranscriptSegment>,
    /// Word count of the full accumulated transcript after this event.
    pub word_count: usize,
}

/// A timestamped text fragment from one decode/stream event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    /// Recognised text.
    pub text: String,
    /// Segment start within its decode pass, in seconds.
    pub from: f32,
    /// Segment end within its decode pass, in seconds.
    pub to: f32,
}

impl TranscriptSegment {
    pub fn new(text: impl Into<String>, from: f32, to: f32) -> Self {
        Self {
            text: text.into(),
            from,
            to,
        }
    }
}

// ---------------------------------------------------------------------------
// Session status events
// ---------------------------------------------------------------------------

/// Emitted when the session lifecycle state changes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatusEvent {
    pub status: SessionStatus,
    /// Optional human-readable detail (e.g. error message).
    pub detail: Option<String>,
}

/// Current state of a Rostrum session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Engine created but `start()` not yet called.
    Idle,
    /// Acquiring and loading the acoustic model.
    Preparing,
    /// Actively capturing audio and transcribing.
    Capturing,
    /// Capture stopped; remainder window cut, generation queue draining.
    Draining,
    /// Session finished; results revealed.
    Stopped,
    /// Session failed to start or aborted.
    Error,
}

// ---------------------------------------------------------------------------
// Model progress events
// ---------------------------------------------------------------------------

/// Download progress for a model asset. `loaded` and `total` are byte counts;
/// a cache hit reports a single event with `loaded == total`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelProgressEvent {
    pub model: String,
    pub loaded: u64,
    pub total: u64,
}

// ---------------------------------------------------------------------------
// Audio activity events
// ---------------------------------------------------------------------------

/// Level-meter feed, emitted once per drained capture chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AudioActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the chunk in [0.0, 1.0].
    pub rms: f32,
    /// Energy-gate decision for the current chunk.
    pub is_speech: bool,
}

// ---------------------------------------------------------------------------
// Reveal events
// ---------------------------------------------------------------------------

/// Emitted exactly once per session, after capture stop and queue drain:
/// the hidden results become visible in one atomic batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuestionsRevealedEvent {
    /// The newly revealed questions, in window submission order.
    pub questions: Vec<QuizQuestion>,
    /// How many text windows were submitted for generation this session.
    pub windows_submitted: usize,
}

/// A generated multiple-choice question, options already normalized to four.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    /// Exactly four options; padding slots are empty strings.
    pub options: Vec<String>,
    pub correct_option_index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transcript_event_serializes_with_camel_case_fields() {
        let event = TranscriptEvent {
            seq: 7,
            segments: vec![TranscriptSegment::new("hello class", 0.0, 1.2)],
            word_count: 2,
        };

        let json = serde_json::to_value(&event).expect("serialize transcript event");
        assert_eq!(json["seq"], 7);
        assert_eq!(json["wordCount"], 2);
        assert_eq!(json["segments"][0]["text"], "hello class");
        let from = json["segments"][0]["from"].as_f64().expect("from is a number");
        assert!(from.abs() < 1e-6);

        let round_trip: TranscriptEvent =
            serde_json::from_value(json).expect("deserialize transcript event");
        assert_eq!(round_trip.segments.len(), 1);
        assert_eq!(round_trip.segments[0].text, "hello class");
    }

    #[test]
    fn session_status_serializes_lowercase() {
        let event = SessionStatusEvent {
            status: SessionStatus::Draining,
            detail: None,
        };

        let json = serde_json::to_value(&event).expect("serialize status event");
        assert_eq!(json["status"], "draining");

        let round_trip: SessionStatusEvent =
            serde_json::from_value(json).expect("deserialize status event");
        assert_eq!(round_trip.status, SessionStatus::Draining);
    }

    #[test]
    fn session_status_rejects_non_lowercase_values() {
        let invalid = r#""Draining""#;
        let err = serde_json::from_str::<SessionStatus>(invalid);
        assert!(err.is_err(), "expected invalid casing to fail");
    }

    #[test]
    fn reveal_event_round_trips_questions() {
        let event = QuestionsRevealedEvent {
            questions: vec![QuizQuestion {
                question: "What is covered by the lecture?".into(),
                options: vec!["A".into(), "B".into(), "".into(), "".into()],
                correct_option_index: 1,
            }],
            windows_submitted: 3,
        };

        let json = serde_json::to_value(&event).expect("serialize reveal event");
        assert_eq!(json["windowsSubmitted"], 3);
        assert_eq!(json["questions"][0]["correctOptionIndex"], 1);
        assert_eq!(json["questions"][0]["options"][2], "");

        let round_trip: QuestionsRevealedEvent =
            serde_json::from_value(json).expect("deserialize reveal event");
        assert_eq!(round_trip.questions.len(), 1);
        assert_eq!(round_trip.questions[0].correct_option_index, 1);
    }

    #[test]
    fn model_progress_event_uses_byte_counts() {
        let event = ModelProgressEvent {
            model: "tiny.en".into(),
            loaded: 512,
            total: 2048,
        };
        let json = serde_json::to_value(&event).expect("serialize progress event");
        assert_eq!(json["model"], "tiny.en");
        assert_eq!(json["loaded"], 512);
        assert_eq!(json["total"], 2048);
    }
}
