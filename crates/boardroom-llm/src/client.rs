// OpenAI-compatible chat-completions client using reqwest and
// reqwest-eventsource.
//
// Single-shot requests decode the JSON reply directly. Streamed requests parse
// the Server-Sent Events into `LlmEvent` values that are forwarded over an
// mpsc channel while the full text is accumulated for the caller.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{Event, RequestBuilderExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use boardroom_core::config::{Config, LlmConfig};
use boardroom_core::persona::chat_system_prompt;

use crate::backend::{ChatBackend, LlmError};
use crate::protocol::{
    parse_delta_content, parse_error_message, ChatMessage, ChatRequest, ChatResponse,
    Completion, LlmEvent, FALLBACK_ERROR_MESSAGE, STREAM_DONE,
};

// ---------------------------------------------------------------------------
// OpenAiClient
// ---------------------------------------------------------------------------

/// Low-level client for one `/chat/completions` endpoint.
pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
}

impl OpenAiClient {
    pub fn new(api_key: String, llm: &LlmConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: llm.base_url.clone(),
            model: llm.model.clone(),
            temperature: llm.temperature,
            max_tokens: llm.max_tokens,
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// Send `messages` as-is and wait for the whole reply.
    pub async fn complete(&self, messages: &[ChatMessage]) -> Result<Completion, LlmError> {
        let body = ChatRequest::complete(&self.model, messages, self.temperature, self.max_tokens);

        let response = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(upstream_error(status, response).await);
        }

        let parsed: ChatResponse = response.json().await?;
        let usage = parsed.usage;
        let model = parsed.model.clone().unwrap_or_else(|| self.model.clone());
        let content = parsed.into_content().ok_or(LlmError::EmptyResponse)?;

        debug!(
            model = %model,
            total_tokens = usage.map(|u| u.total_tokens),
            "completion received"
        );

        Ok(Completion {
            content,
            usage,
            model,
        })
    }

    /// Send `messages` with `stream: true` and forward each text fragment over
    /// `tx` as it arrives.
    ///
    /// Returns when the `[DONE]` sentinel arrives, the connection ends, an
    /// error occurs, or the receiver is dropped. In the last case the text
    /// received so far is returned.
    pub async fn stream(
        &self,
        messages: &[ChatMessage],
        tx: mpsc::Sender<LlmEvent>,
    ) -> Result<Completion, LlmError> {
        let body = ChatRequest::streaming(&self.model, messages, self.temperature, self.max_tokens);

        let request = self
            .http
            .post(self.endpoint())
            .bearer_auth(&self.api_key)
            .json(&body);

        let mut es = request
            .eventsource()
            .map_err(|e| LlmError::Stream(format!("failed to create event source: {e}")))?;

        let mut full_text = String::new();

        while let Some(event) = es.next().await {
            match event {
                Ok(Event::Open) => {
                    debug!("SSE connection opened");
                }
                Ok(Event::Message(msg)) => {
                    if msg.data.trim() == STREAM_DONE {
                        debug!("[DONE] received, streaming complete");
                        es.close();
                        return Ok(self.finish_stream(full_text, &tx).await);
                    }
                    let Some(text) = parse_delta_content(&msg.data) else {
                        // Role-only frames and anything that is not valid JSON.
                        continue;
                    };
                    if text.is_empty() {
                        continue;
                    }
                    full_text.push_str(&text);
                    if tx.send(LlmEvent::Token { text }).await.is_err() {
                        debug!("token receiver dropped, closing stream");
                        es.close();
                        return Ok(self.completion(full_text));
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => {
                    es.close();
                    return self.end_without_done(full_text, &tx).await;
                }
                Err(err) => {
                    warn!(?err, "SSE stream error");
                    es.close();
                    let error = into_llm_error(err).await;
                    let _ = tx
                        .send(LlmEvent::Error {
                            message: error.to_string(),
                        })
                        .await;
                    return Err(error);
                }
            }
        }

        self.end_without_done(full_text, &tx).await
    }

    /// The connection closed before `[DONE]`: keep whatever arrived.
    async fn end_without_done(
        &self,
        full_text: String,
        tx: &mpsc::Sender<LlmEvent>,
    ) -> Result<Completion, LlmError> {
        if full_text.is_empty() {
            let error = LlmError::Stream("stream ended without any content".to_string());
            let _ = tx
                .send(LlmEvent::Error {
                    message: error.to_string(),
                })
                .await;
            return Err(error);
        }
        warn!("stream ended without [DONE]; keeping partial text");
        Ok(self.finish_stream(full_text, tx).await)
    }

    async fn finish_stream(&self, full_text: String, tx: &mpsc::Sender<LlmEvent>) -> Completion {
        let _ = tx
            .send(LlmEvent::Complete {
                full_text: full_text.clone(),
            })
            .await;
        self.completion(full_text)
    }

    fn completion(&self, content: String) -> Completion {
        Completion {
            content,
            usage: None,
            model: self.model.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// LlmClient wrapper
// ---------------------------------------------------------------------------

/// High-level wrapper that is either an active API client or disabled.
pub enum LlmClient {
    /// An API key is configured.
    Active(OpenAiClient),
    /// No API key; every call fails with [`LlmError::NotConfigured`].
    Disabled,
}

impl LlmClient {
    /// Build an `LlmClient` from the application config.
    ///
    /// Returns `Active` if a non-empty API key is present (credentials file or
    /// `OPENAI_API_KEY`), otherwise returns `Disabled`.
    pub fn from_config(config: &Config) -> Self {
        match config.credentials.api_key() {
            Some(key) => LlmClient::Active(OpenAiClient::new(key.to_string(), &config.llm)),
            None => LlmClient::Disabled,
        }
    }
}

#[async_trait]
impl ChatBackend for LlmClient {
    fn is_configured(&self) -> bool {
        matches!(self, LlmClient::Active(_))
    }

    fn model(&self) -> &str {
        match self {
            LlmClient::Active(client) => client.model(),
            LlmClient::Disabled => "",
        }
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        persona: &str,
        tokens: Option<mpsc::Sender<LlmEvent>>,
    ) -> Result<Completion, LlmError> {
        let client = match self {
            LlmClient::Active(client) => client,
            LlmClient::Disabled => {
                warn!("chat requested but no API key is configured");
                return Err(LlmError::NotConfigured);
            }
        };

        let mut with_system = Vec::with_capacity(messages.len() + 1);
        with_system.push(ChatMessage::system(chat_system_prompt(persona)));
        with_system.extend_from_slice(messages);

        info!(
            persona,
            messages = with_system.len(),
            streaming = tokens.is_some(),
            "sending chat completion"
        );

        match tokens {
            Some(tx) => client.stream(&with_system, tx).await,
            None => client.complete(&with_system).await,
        }
    }
}

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Build an `Upstream` error from a non-2xx reply, preferring the provider's
/// own `error.message`.
async fn upstream_error(status: reqwest::StatusCode, response: reqwest::Response) -> LlmError {
    let body = response.text().await.unwrap_or_default();
    let message = parse_error_message(&body).unwrap_or_else(|| FALLBACK_ERROR_MESSAGE.to_string());
    LlmError::Upstream {
        status: status.as_u16(),
        message,
    }
}

async fn into_llm_error(err: reqwest_eventsource::Error) -> LlmError {
    match err {
        reqwest_eventsource::Error::InvalidStatusCode(status, response) => {
            upstream_error(status, response).await
        }
        reqwest_eventsource::Error::InvalidContentType(_, response) => {
            // Some proxies answer errors with 200 + JSON.
            let status = response.status();
            if status.is_success() {
                let body = response.text().await.unwrap_or_default();
                match parse_error_message(&body) {
                    Some(message) => LlmError::Upstream {
                        status: status.as_u16(),
                        message,
                    },
                    None => LlmError::Stream("unexpected content type in streamed reply".into()),
                }
            } else {
                upstream_error(status, response).await
            }
        }
        reqwest_eventsource::Error::Transport(e) => LlmError::Transport(e),
        other => LlmError::Stream(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
