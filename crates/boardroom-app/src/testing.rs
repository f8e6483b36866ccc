// Scripted `ChatBackend` for unit tests.

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::mpsc;

use boardroom_llm::{ChatBackend, ChatMessage, Completion, LlmError, LlmEvent};

/// One call as the backend saw it.
#[derive(Debug, Clone)]
pub(crate) struct RecordedCall {
    pub messages: Vec<ChatMessage>,
    pub persona: String,
    pub streamed: bool,
}

/// Answers calls from a fixed queue of replies and records every call.
pub(crate) struct ScriptedBackend {
    configured: bool,
    replies: Mutex<VecDeque<Result<String, LlmError>>>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedBackend {
    pub fn new(replies: Vec<Result<String, LlmError>>) -> Self {
        Self {
            configured: true,
            replies: Mutex::new(replies.into()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Shorthand for a script of successful replies.
    pub fn ok(replies: &[&str]) -> Self {
        Self::new(replies.iter().map(|r| Ok(r.to_string())).collect())
    }

    pub fn unconfigured() -> Self {
        Self {
            configured: false,
            ..Self::new(Vec::new())
        }
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    fn is_configured(&self) -> bool {
        self.configured
    }

    fn model(&self) -> &str {
        "scripted-model"
    }

    async fn chat(
        &self,
        messages: &[ChatMessage],
        persona: &str,
        tokens: Option<mpsc::Sender<LlmEvent>>,
    ) -> Result<Completion, LlmError> {
        self.calls.lock().unwrap().push(RecordedCall {
            messages: messages.to_vec(),
            persona: persona.to_string(),
            streamed: tokens.is_some(),
        });
        if !self.configured {
            return Err(LlmError::NotConfigured);
        }
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(LlmError::Stream("script exhausted".into())));
        let content = reply?;
        if let Some(tx) = tokens {
            for word in content.split_inclusive(' ') {
                let _ = tx.send(LlmEvent::Token { text: word.to_string() }).await;
            }
            let _ = tx
                .send(LlmEvent::Complete {
                    full_text: content.clone(),
                })
                .await;
        }
        Ok(Completion {
            content,
            usage: None,
            model: "scripted-model".to_string(),
        })
    }
}
