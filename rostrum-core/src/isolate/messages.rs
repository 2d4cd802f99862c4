//! Typed message protocol between the controller and the execution isolate.
//!
//! Both directions serialize as internally-tagged JSON (`"kind"` field,
//! camelCase payloads) so the protocol stays stable if the isolate is ever
//! moved out of process. In-process transport sends the enums directly.

use serde::{Deserialize, Serialize};

use crate::ipc::events::TranscriptSegment;

// ---------------------------------------------------------------------------
// Controller → isolate
// ---------------------------------------------------------------------------

/// Requests the controller may issue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IsolateRequest {
    /// Acquire the named model (downloading if necessary) and prime the
    /// decode backend.
    Load { model: String },

    /// Decode one complete WAV payload and reply with the recognized
    /// segments followed by `ready`.
    #[serde(rename_all = "camelCase")]
    Decode { wav: Vec<u8> },

    /// Begin stream-mode ingestion for the named model.
    #[serde(rename_all = "camelCase")]
    StartStream {
        model: String,
        options: StreamOptions,
    },

    /// Append captured mono samples at the pipeline rate to the stream.
    #[serde(rename_all = "camelCase")]
    FeedStreamChunk { samples: Vec<f32> },

    /// End stream-mode ingestion, decoding whatever remains buffered.
    StopStream,

    /// Liveness probe; the isolate answers with `pong`.
    Healthcheck,
}

/// Decode parameters for stream-mode sessions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamOptions {
    /// BCP-47-ish language hint handed to the backend.
    pub language: String,
    /// Drop bracketed non-speech annotations like `[BLANK_AUDIO]`.
    pub suppress_non_speech: bool,
    /// Decode budget per pass.
    pub max_tokens: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            language: "en".to_string(),
            suppress_non_speech: true,
            max_tokens: 16,
        }
    }
}

// ---------------------------------------------------------------------------
// Isolate → controller
// ---------------------------------------------------------------------------

/// Events the isolate emits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum IsolateEvent {
    /// Model is loaded and the isolate will accept decode work. Also marks
    /// the end of each file-mode decode pass.
    Ready { model: String },

    /// Byte-level model download progress. `total` is 0 when the remote
    /// does not announce a length.
    Progress {
        model: String,
        loaded: u64,
        total: u64,
    },

    /// One recognized span of speech.
    Segment(TranscriptSegment),

    /// Stream-mode lifecycle transitions.
    #[serde(rename_all = "camelCase")]
    StreamStatus { state: StreamState },

    /// A request failed. `code` is coarse; `message` is for logs only.
    Error {
        code: IsolateFaultCode,
        message: String,
    },

    /// Healthcheck reply.
    Pong,
}

/// Stream lifecycle states reported via `streamStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    Started,
    Stopped,
}

/// Coarse failure classification carried by `error` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IsolateFaultCode {
    /// Model bytes could not be acquired or were rejected by the backend.
    Asset,
    /// A decode pass failed.
    Decode,
    /// Stream-mode bookkeeping failed.
    Stream,
    /// Anything else.
    Internal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn requests_tag_with_camel_case_kinds() {
        let load = serde_json::to_value(IsolateRequest::Load {
            model: "tiny.en".into(),
        })
        .unwrap();
        assert_eq!(load["kind"], "load");
        assert_eq!(load["model"], "tiny.en");

        let start = serde_json::to_value(IsolateRequest::StartStream {
            model: "base".into(),
            options: StreamOptions::default(),
        })
        .unwrap();
        assert_eq!(start["kind"], "startStream");
        assert_eq!(start["options"]["suppressNonSpeech"], true);
        assert_eq!(start["options"]["maxTokens"], 16);

        let feed = serde_json::to_value(IsolateRequest::FeedStreamChunk {
            samples: vec![0.0, 0.5],
        })
        .unwrap();
        assert_eq!(feed["kind"], "feedStreamChunk");

        assert_eq!(
            serde_json::to_value(IsolateRequest::StopStream).unwrap()["kind"],
            "stopStream"
        );
        assert_eq!(
            serde_json::to_value(IsolateRequest::Healthcheck).unwrap()["kind"],
            "healthcheck"
        );
    }

    #[test]
    fn events_round_trip() {
        let event = IsolateEvent::Segment(TranscriptSegment::new("hello there", 0.0, 1.2));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["kind"], "segment");
        assert_eq!(value["text"], "hello there");

        let back: IsolateEvent = serde_json::from_value(value).unwrap();
        match back {
            IsolateEvent::Segment(seg) => assert_eq!(seg.text, "hello there"),
            other => panic!("wrong variant: {other:?}"),
        }
    }

    #[test]
    fn stream_status_serializes_lowercase() {
        let value = serde_json::to_value(IsolateEvent::StreamStatus {
            state: StreamState::Started,
        })
        .unwrap();
        assert_eq!(value, json!({"kind": "streamStatus", "state": "started"}));
    }

    #[test]
    fn error_codes_are_lowercase_and_strict() {
        let value = serde_json::to_value(IsolateEvent::Error {
            code: IsolateFaultCode::Asset,
            message: "HTTP 404".into(),
        })
        .unwrap();
        assert_eq!(value["code"], "asset");

        let upper: std::result::Result<IsolateFaultCode, _> =
            serde_json::from_value(json!("Asset"));
        assert!(upper.is_err(), "mixed-case codes must be rejected");
    }

    #[test]
    fn progress_event_carries_byte_counts() {
        let value = serde_json::to_value(IsolateEvent::Progress {
            model: "tiny.en".into(),
            loaded: 512,
            total: 2048,
        })
        .unwrap();
        assert_eq!(value["kind"], "progress");
        assert_eq!(value["loaded"], 512);
        assert_eq!(value["total"], 2048);
    }
}
