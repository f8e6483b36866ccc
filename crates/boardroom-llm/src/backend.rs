// The seam between orchestration code and whatever answers chat requests.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::mpsc;

use crate::protocol::{ChatMessage, Completion, LlmEvent};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("AI service is not configured: set OPENAI_API_KEY or config/credentials.toml")]
    NotConfigured,

    #[error("AI service returned {status}: {message}")]
    Upstream { status: u16, message: String },

    #[error("network error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("AI service returned an empty response")]
    EmptyResponse,
}

/// Anything that can answer a chat-completion request on behalf of a persona.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Whether calls can succeed at all (an API key is present).
    fn is_configured(&self) -> bool;

    /// Model identifier recorded alongside persisted replies.
    fn model(&self) -> &str;

    /// Run one completion. The persona's chat system prompt is prepended to
    /// `messages`; unknown tags get the generic prompt.
    ///
    /// With `tokens` set the reply is streamed: each fragment is sent as
    /// [`LlmEvent::Token`] followed by one [`LlmEvent::Complete`]. The returned
    /// [`Completion`] carries the full text either way.
    async fn chat(
        &self,
        messages: &[ChatMessage],
        persona: &str,
        tokens: Option<mpsc::Sender<LlmEvent>>,
    ) -> Result<Completion, LlmError>;
}
