//! The seams between the orchestration core and its collaborators.
//!
//! Platform adapters implement [`Outbound`], LLM transports implement
//! [`LlmClient`], and the command subsystem implements
//! [`CommandDispatcher`]. The core never sees a wire protocol, an HTTP
//! client, or a command table.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use banter_core::ChatEvent;

use crate::error::Result;

/// One message handed to the LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MsgRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MsgRole {
    System,
    User,
    Assistant,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: MsgRole::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: MsgRole::User,
            content: content.into(),
        }
    }
}

/// Platform delivery. Must be safe to call concurrently across sessions.
#[async_trait]
pub trait Outbound: Send + Sync {
    /// Deliver `text` to `group_id`, optionally quoting `reply_to`
    /// (a platform message id) via the native reply mechanism.
    async fn send_text(&self, group_id: &str, text: &str, reply_to: Option<&str>) -> Result<()>;
}

/// LLM transport. The core performs no retries; failures surface as a
/// skipped turn.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn chat(&self, messages: &[ChatMessage]) -> Result<String>;
}

/// Slash-command handling, entirely outside the conversational pipeline.
#[async_trait]
pub trait CommandDispatcher: Send + Sync {
    async fn handle(&self, event: &ChatEvent);
}
