// Wire types for the OpenAI-compatible chat-completions API, plus the events
// the client forwards to its caller while streaming.

use boardroom_core::model::MessageRole;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shown when a non-2xx reply carries no `error.message`.
pub const FALLBACK_ERROR_MESSAGE: &str = "Failed to get AI response";

/// Sentinel data payload that terminates a streamed completion.
pub const STREAM_DONE: &str = "[DONE]";

// ---------------------------------------------------------------------------
// Messages and results
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: MessageRole::Assistant,
            content: content.into(),
        }
    }
}

/// Token accounting as reported by the provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

/// The final result of one chat call, streamed or not.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    pub usage: Option<Usage>,
    pub model: String,
}

/// Progress events emitted while a streamed completion is in flight.
#[derive(Debug, Clone, PartialEq)]
pub enum LlmEvent {
    /// One incremental text fragment.
    Token { text: String },
    /// The stream finished; `full_text` is every fragment concatenated.
    Complete { full_text: String },
    /// The call failed mid-stream.
    Error { message: String },
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub model: &'a str,
    pub messages: &'a [ChatMessage],
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub presence_penalty: Option<f32>,
}

impl<'a> ChatRequest<'a> {
    /// Body for a single-shot request. Sampling penalties are pinned to the
    /// provider's neutral values.
    pub fn complete(model: &'a str, messages: &'a [ChatMessage], temperature: f32, max_tokens: u32) -> Self {
        Self {
            model,
            messages,
            temperature,
            max_tokens,
            stream: false,
            top_p: Some(1.0),
            frequency_penalty: Some(0.0),
            presence_penalty: Some(0.0),
        }
    }

    pub fn streaming(model: &'a str, messages: &'a [ChatMessage], temperature: f32, max_tokens: u32) -> Self {
        Self {
            model,
            messages,
            temperature,
            max_tokens,
            stream: true,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatResponse {
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
    pub usage: Option<Usage>,
    pub model: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseChoice {
    pub message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseMessage {
    pub content: Option<String>,
}

impl ChatResponse {
    /// Text of the first choice, if any.
    pub fn into_content(self) -> Option<String> {
        self.choices.into_iter().next()?.message.content
    }
}

// ---------------------------------------------------------------------------
// JSON parsing helpers
// ---------------------------------------------------------------------------

/// Extract `choices[0].delta.content` from a streamed frame.
///
/// Expected shape: `{ "choices": [ { "delta": { "content": "..." } } ] }`
pub(crate) fn parse_delta_content(data: &str) -> Option<String> {
    let v: Value = serde_json::from_str(data).ok()?;
    v.get("choices")?
        .get(0)?
        .get("delta")?
        .get("content")?
        .as_str()
        .map(|s| s.to_string())
}

/// Extract `error.message` from a provider error body.
///
/// Expected shape: `{ "error": { "message": "...", "type": "..." } }`
pub(crate) fn parse_error_message(body: &str) -> Option<String> {
    let v: Value = serde_json::from_str(body).ok()?;
    v.get("error")?
        .get("message")?
        .as_str()
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}
