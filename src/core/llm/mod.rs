pub mod openai;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::sync::Arc;

pub use openai::{OpenAiBackend, OpenAiBackendConfig};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelInfo {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Conversation state owned by exactly one job. Jobs never share a session,
/// so concurrent jobs cannot see each other's turns.
#[derive(Debug, Clone)]
pub struct ChatSession {
    label: String,
    messages: Vec<ChatMessage>,
}

impl ChatSession {
    pub fn new(label: impl Into<String>, system_prompt: Option<&str>) -> Self {
        let messages = system_prompt
            .filter(|p| !p.trim().is_empty())
            .map(|p| vec![ChatMessage::system(p)])
            .unwrap_or_default();
        Self {
            label: label.into(),
            messages,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }
}

/// Boundary around the conversational engine: submit text and wait for the
/// full answer.
#[async_trait]
pub trait ConversationBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn list_models(&self) -> Result<Vec<ModelInfo>>;

    /// Appends `text` as a user turn, blocks until the complete reply is
    /// available and records it in the session.
    async fn submit(&self, session: &mut ChatSession, text: &str) -> Result<String>;
}

pub type SharedBackend = Arc<dyn ConversationBackend>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_starts_with_system_prompt_when_given() {
        let session = ChatSession::new("job-1", Some("Be brief."));
        assert_eq!(session.label(), "job-1");
        assert_eq!(session.messages(), &[ChatMessage::system("Be brief.")]);
    }

    #[test]
    fn blank_system_prompt_is_ignored() {
        assert!(ChatSession::new("job-1", Some("  ")).messages().is_empty());
        assert!(ChatSession::new("job-1", None).messages().is_empty());
    }
}
