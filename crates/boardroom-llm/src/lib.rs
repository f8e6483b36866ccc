// OpenAI-compatible chat client and the `ChatBackend` seam the app builds on.

pub mod backend;
pub mod client;
pub mod protocol;

pub use backend::{ChatBackend, LlmError};
pub use client::{LlmClient, OpenAiClient};
pub use protocol::{ChatMessage, Completion, LlmEvent, Usage};
