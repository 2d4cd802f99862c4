//! Question generation: remote LLM jobs over transcript windows.
//!
//! Each 100-word window becomes one HTTP job against the quiz service. The
//! service is slow (seconds per job) and occasionally flaky, so jobs run on
//! a dedicated queue ([`queue::ChunkQueue`]), failures degrade to zero
//! questions, and nothing is shown to the consumer until the session-end
//! reveal ([`reveal::RevealBuffer`]).

pub mod normalize;
pub mod queue;
pub mod reveal;

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RostrumError};
use crate::ipc::events::QuizQuestion;

/// Per-request deadline. A job that blows it is a failed job, never a wedge.
const GENERATION_TIMEOUT: Duration = Duration::from_secs(60);

/// One generation job as sent to the service.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Window text, whitespace-delimited words joined with single spaces.
    pub transcript: String,
    /// Optional service-side prompt shaping, forwarded verbatim as JSON.
    pub question_spec: Option<serde_json::Value>,
    /// Service-side LLM identifier.
    pub model: String,
    pub question_count: u32,
}

/// Generation parameters fixed for the length of a session.
#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub question_spec: Option<serde_json::Value>,
    pub model: String,
    pub question_count: u32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        Self {
            question_spec: None,
            model: "gemma3".to_string(),
            question_count: 2,
        }
    }
}

impl GenerationSettings {
    fn request_for(&self, transcript: String) -> GenerationRequest {
        GenerationRequest {
            transcript,
            question_spec: self.question_spec.clone(),
            model: self.model.clone(),
            question_count: self.question_count,
        }
    }
}

/// Service-shape question, before option normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawQuestion {
    #[serde(default)]
    pub question_text: String,
    #[serde(default)]
    pub options: Vec<RawOption>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawOption {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub correct: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    questions: Vec<RawQuestion>,
}

/// Transport seam for question generation, swappable for tests.
pub trait GenerationClient: Send + Sync {
    /// Run one job to completion within a bounded time.
    ///
    /// # Errors
    /// `GenerationFailure` on transport errors, bad status, unparseable
    /// bodies, or timeout.
    fn submit(&self, request: &GenerationRequest) -> Result<Vec<RawQuestion>>;
}

/// Blocking HTTP client for the quiz service's generate endpoint.
pub struct HttpGenerationClient {
    client: reqwest::blocking::Client,
    endpoint: String,
}

impl HttpGenerationClient {
    /// `base_url` is the service root; `room_code` scopes the generated
    /// questions to one live room.
    pub fn new(base_url: &str, room_code: &str) -> Self {
        let client = reqwest::blocking::Client::builder()
            .timeout(GENERATION_TIMEOUT)
            .build()
            .unwrap_or_default();
        let endpoint = format!(
            "{}/livequizzes/rooms/{}/generate-questions",
            base_url.trim_end_matches('/'),
            room_code
        );
        Self { client, endpoint }
    }
}

impl GenerationClient for HttpGenerationClient {
    fn submit(&self, request: &GenerationRequest) -> Result<Vec<RawQuestion>> {
        let failed = |reason: String| RostrumError::GenerationFailure(reason);

        let mut form = reqwest::blocking::multipart::Form::new()
            .text("transcript", request.transcript.clone())
            .text("model", request.model.clone())
            .text("questionCount", request.question_count.to_string());
        if let Some(spec) = &request.question_spec {
            form = form.text("questionSpec", spec.to_string());
        }

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .map_err(|e| failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(failed(format!("HTTP {}", response.status())));
        }

        let body: GenerateResponse = response
            .json()
            .map_err(|e| failed(format!("bad response body: {e}")))?;
        debug!(
            questions = body.questions.len(),
            words = request.transcript.split_whitespace().count(),
            "generation job returned"
        );
        Ok(body.questions)
    }
}

/// Map service questions into presentation shape: drop blank questions,
/// default missing option text to empty, resolve the correct index
/// (first `correct` flag, or 0 when the service marks none), then
/// normalize every option list to exactly four entries.
pub fn into_quiz_questions(raw: Vec<RawQuestion>) -> Vec<QuizQuestion> {
    raw.into_iter()
        .filter_map(|question| {
            let text = question.question_text.trim().to_string();
            if text.is_empty() {
                return None;
            }
            let options: Vec<String> = question
                .options
                .iter()
                .map(|o| o.text.clone().unwrap_or_default())
                .collect();
            let correct = question
                .options
                .iter()
                .position(|o| o.correct)
                .unwrap_or(0);
            let (options, correct_option_index) = normalize::shape_options(options, correct);
            Some(QuizQuestion {
                question: text,
                options,
                correct_option_index,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn response_shape_parses_service_json() {
        let body: GenerateResponse = serde_json::from_value(json!({
            "questions": [
                {
                    "questionText": "What is RMS?",
                    "options": [
                        {"text": "Root mean square", "correct": true},
                        {"text": "A codec"},
                    ]
                },
                {"questionText": "", "options": []}
            ]
        }))
        .unwrap();
        assert_eq!(body.questions.len(), 2);
        assert_eq!(body.questions[0].question_text, "What is RMS?");
        assert!(body.questions[0].options[0].correct);
        assert!(!body.questions[0].options[1].correct);
    }

    #[test]
    fn blank_questions_are_dropped() {
        let raw = vec![
            RawQuestion {
                question_text: "   ".into(),
                options: vec![],
            },
            RawQuestion {
                question_text: "Keep me".into(),
                options: vec![RawOption {
                    text: Some("yes".into()),
                    correct: true,
                }],
            },
        ];
        let quiz = into_quiz_questions(raw);
        assert_eq!(quiz.len(), 1);
        assert_eq!(quiz[0].question, "Keep me");
    }

    #[test]
    fn missing_option_text_defaults_to_empty() {
        let raw = vec![RawQuestion {
            question_text: "Q".into(),
            options: vec![
                RawOption {
                    text: None,
                    correct: false,
                },
                RawOption {
                    text: Some("b".into()),
                    correct: true,
                },
            ],
        }];
        let quiz = into_quiz_questions(raw);
        assert_eq!(quiz[0].options, vec!["", "b", "", ""]);
        assert_eq!(quiz[0].correct_option_index, 1);
    }

    #[test]
    fn unmarked_correct_falls_back_to_first_option() {
        let raw = vec![RawQuestion {
            question_text: "Q".into(),
            options: vec![
                RawOption {
                    text: Some("a".into()),
                    correct: false,
                },
                RawOption {
                    text: Some("b".into()),
                    correct: false,
                },
            ],
        }];
        let quiz = into_quiz_questions(raw);
        assert_eq!(quiz[0].correct_option_index, 0);
        assert_eq!(quiz[0].options[0], "a");
    }

    #[test]
    fn endpoint_is_scoped_to_the_room() {
        let client = HttpGenerationClient::new("http://quiz.example/api/", "ROOM42");
        assert_eq!(
            client.endpoint,
            "http://quiz.example/api/livequizzes/rooms/ROOM42/generate-questions"
        );
    }
}
