// Interactive chat with one persona at a time.
//
// A send persists the user message before the completion is requested and
// the assistant reply after it arrives. The two writes are not tied together:
// if the completion fails the user message stays in the conversation.

use std::sync::Arc;

use serde_json::json;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use boardroom_core::db::Database;
use boardroom_core::model::{
    now, Conversation, ConversationStatus, ConversationUpdate, Message, MessageRole, NewMessage,
};
use boardroom_core::persona::Persona;
use boardroom_llm::{ChatBackend, ChatMessage, LlmError, LlmEvent};

use crate::prompt;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message is empty")]
    EmptyMessage,

    #[error("unknown agent {0:?}; expected one of CFO, CTO, CMO, COO, CHRO")]
    UnknownPersona(String),

    #[error("conversation {0} not found")]
    ConversationNotFound(String),

    #[error("no conversation is open")]
    NoConversation,

    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("storage error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// A failed send. Carries the original input so the caller can offer it
/// for resubmission.
#[derive(Debug, Error)]
#[error("{source}")]
pub struct SendError {
    pub input: String,
    pub source: ChatError,
}

// ---------------------------------------------------------------------------
// Title generation
// ---------------------------------------------------------------------------

/// Ask the model for a short conversation title. Falls back to the first
/// 50 characters of `first_message` when the call fails or returns nothing.
pub async fn generate_title(backend: &dyn ChatBackend, first_message: &str) -> String {
    let fallback = || prompt::truncate_chars(first_message.trim(), prompt::TITLE_MAX_CHARS);
    match backend
        .chat(
            &prompt::conversation_title(first_message),
            Persona::default().as_str(),
            None,
        )
        .await
    {
        Ok(completion) => {
            let title = prompt::clean_title(&completion.content);
            if title.is_empty() {
                fallback()
            } else {
                title
            }
        }
        Err(e) => {
            warn!(error = %e, "title generation failed; using message prefix");
            fallback()
        }
    }
}

// ---------------------------------------------------------------------------
// ChatSession
// ---------------------------------------------------------------------------

/// One user's chat state: the open conversation and the persona answering.
pub struct ChatSession {
    db: Arc<Database>,
    backend: Arc<dyn ChatBackend>,
    user_id: String,
    persona: Persona,
    conversation: Option<Conversation>,
}

impl ChatSession {
    pub fn new(db: Arc<Database>, backend: Arc<dyn ChatBackend>, user_id: String) -> Self {
        Self {
            db,
            backend,
            user_id,
            persona: Persona::default(),
            conversation: None,
        }
    }

    pub fn persona(&self) -> Persona {
        self.persona
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn conversation(&self) -> Option<&Conversation> {
        self.conversation.as_ref()
    }

    /// Change who answers the next message. The open conversation is kept.
    pub fn switch_persona(&mut self, tag: &str) -> Result<Persona, ChatError> {
        let persona =
            Persona::from_tag(tag).ok_or_else(|| ChatError::UnknownPersona(tag.trim().to_string()))?;
        info!(from = %self.persona, to = %persona, "persona switched");
        self.persona = persona;
        Ok(persona)
    }

    /// Make `id` the open conversation and return its messages.
    pub fn open_conversation(&mut self, id: &str) -> Result<Vec<Message>, ChatError> {
        let conversation = self
            .db
            .get_conversation(id)?
            .filter(|c| c.user_id == self.user_id)
            .ok_or_else(|| ChatError::ConversationNotFound(id.to_string()))?;
        let messages = self.db.list_messages(&conversation.id)?;
        debug!(conversation_id = %conversation.id, messages = messages.len(), "conversation opened");
        self.conversation = Some(conversation);
        Ok(messages)
    }

    /// Forget the open conversation; the next send starts a new one.
    pub fn start_new(&mut self) {
        self.conversation = None;
    }

    /// Mark the open conversation ended and close it.
    pub fn end_conversation(&mut self) -> Result<Conversation, ChatError> {
        let current = self.conversation.take().ok_or(ChatError::NoConversation)?;
        let ended = self.db.update_conversation(
            &current.id,
            &ConversationUpdate {
                status: Some(ConversationStatus::Ended),
                ended_at: Some(now()),
                ..Default::default()
            },
        );
        match ended {
            Ok(conversation) => {
                info!(conversation_id = %conversation.id, "conversation ended");
                Ok(conversation)
            }
            Err(e) => {
                self.conversation = Some(current);
                Err(e.into())
            }
        }
    }

    /// The user's most recently updated conversations.
    pub fn recent_conversations(&self, limit: usize) -> Result<Vec<Conversation>, ChatError> {
        Ok(self.db.list_conversations(&self.user_id, limit)?)
    }

    /// Send `content` to the active persona and persist both sides.
    ///
    /// With `tokens` set the reply is streamed over it as it arrives. On
    /// failure the input is handed back inside [`SendError`].
    pub async fn send(
        &mut self,
        content: &str,
        tokens: Option<mpsc::Sender<LlmEvent>>,
    ) -> Result<Message, SendError> {
        self.send_inner(content, tokens)
            .await
            .map_err(|source| SendError {
                input: content.to_string(),
                source,
            })
    }

    async fn send_inner(
        &mut self,
        content: &str,
        tokens: Option<mpsc::Sender<LlmEvent>>,
    ) -> Result<Message, ChatError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if !self.backend.is_configured() {
            return Err(LlmError::NotConfigured.into());
        }

        let active_id = self
            .conversation
            .as_ref()
            .filter(|c| c.status == ConversationStatus::Active)
            .map(|c| c.id.clone());
        let conversation_id = match active_id {
            Some(id) => id,
            None => {
                let title = generate_title(self.backend.as_ref(), content).await;
                let conversation = self.db.create_conversation(&self.user_id, &title)?;
                info!(conversation_id = %conversation.id, title = %conversation.title, "conversation created");
                let id = conversation.id.clone();
                self.conversation = Some(conversation);
                id
            }
        };

        self.db
            .create_message(&NewMessage::new(&conversation_id, MessageRole::User, content))?;

        let history: Vec<ChatMessage> = self
            .db
            .list_messages(&conversation_id)?
            .into_iter()
            .map(|m| ChatMessage {
                role: m.role,
                content: m.content,
            })
            .collect();

        let persona = self.persona;
        let completion = self
            .backend
            .chat(&history, persona.as_str(), tokens)
            .await?;

        let agent_id = self.db.get_agent_by_type(persona.as_str())?.map(|a| a.id);
        let reply = self.db.create_message(&NewMessage {
            conversation_id: conversation_id.clone(),
            agent_id,
            role: MessageRole::Assistant,
            content: completion.content.clone(),
            metadata: Some(json!({
                "model": completion.model,
                "usage": completion.usage,
                "persona": persona.as_str(),
            })),
            confidence_score: None,
        })?;

        let bumped = self
            .db
            .update_conversation(&conversation_id, &ConversationUpdate::default())?;
        self.conversation = Some(bumped);

        debug!(conversation_id = %conversation_id, chars = reply.content.len(), "reply stored");
        Ok(reply)
    }
}
