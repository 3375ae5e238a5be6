use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{ChatMessage, ChatSession, ConversationBackend, ModelInfo};

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    messages: Vec<OpenAiMessage<'a>>,
}

#[derive(Serialize)]
struct OpenAiMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    choices: Vec<OpenAiChoice>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiMessageOwned,
}

#[derive(Deserialize)]
struct OpenAiMessageOwned {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiModelList {
    data: Vec<OpenAiModel>,
}

#[derive(Deserialize)]
struct OpenAiModel {
    id: String,
}

#[derive(Debug, Clone)]
pub struct OpenAiBackendConfig {
    /// Base URL up to and including the version segment, e.g. `https://api.openai.com/v1`.
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub request_timeout: Duration,
}

/// Any server speaking the OpenAI chat-completions protocol.
pub struct OpenAiBackend {
    config: OpenAiBackendConfig,
    client: Client,
}

impl OpenAiBackend {
    pub fn new(config: OpenAiBackendConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .context("failed to build backend HTTP client")?;
        Ok(Self { config, client })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn complete(&self, messages: &[ChatMessage]) -> Result<String> {
        let req = OpenAiRequest {
            model: &self.config.model,
            messages: messages
                .iter()
                .map(|m| OpenAiMessage {
                    role: &m.role,
                    content: &m.content,
                })
                .collect(),
        };
        let res = self
            .client
            .post(self.endpoint("chat/completions"))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .json(&req)
            .send()
            .await
            .context("backend request failed")?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "backend returned {}: {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: OpenAiResponse = res
            .json()
            .await
            .context("backend returned an unreadable completion")?;
        parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("backend returned no completion choices"))
    }
}

#[async_trait]
impl ConversationBackend for OpenAiBackend {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        let res = self
            .client
            .get(self.endpoint("models"))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .send()
            .await
            .context("backend model listing failed")?;
        if !res.status().is_success() {
            let status = res.status();
            return Err(anyhow!(
                "backend returned {} for model listing: {}",
                status,
                res.text().await.unwrap_or_default()
            ));
        }
        let parsed: OpenAiModelList = res
            .json()
            .await
            .context("backend returned an unreadable model list")?;
        Ok(parsed
            .data
            .into_iter()
            .map(|m| ModelInfo {
                name: m.id.clone(),
                id: m.id,
            })
            .collect())
    }

    async fn submit(&self, session: &mut ChatSession, text: &str) -> Result<String> {
        session.push(ChatMessage::user(text));
        debug!(
            "Session {} sending {} message(s) to {}",
            session.label(),
            session.messages().len(),
            self.config.model
        );
        let reply = self.complete(session.messages()).await?;
        session.push(ChatMessage::assistant(reply.clone()));
        Ok(reply)
    }
}
