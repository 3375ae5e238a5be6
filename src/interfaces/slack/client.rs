use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use std::time::Duration;

/// Outbound side of the chat platform.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn post_message(&self, channel: &str, text: &str) -> Result<()>;
}

#[derive(serde::Deserialize)]
struct PostMessageResponse {
    ok: bool,
    error: Option<String>,
}

pub struct SlackClient {
    client: Client,
    api_base: String,
    bot_token: String,
}

impl SlackClient {
    pub fn new(api_base: &str, bot_token: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .context("Failed to build Slack HTTP client")?;
        Ok(Self {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            bot_token: bot_token.to_string(),
        })
    }
}

#[async_trait]
impl PlatformClient for SlackClient {
    async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        let url = format!("{}/chat.postMessage", self.api_base);
        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.bot_token)
            .json(&serde_json::json!({ "channel": channel, "text": text }))
            .send()
            .await
            .context("Failed to reach Slack")?;

        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("Slack API error: HTTP {}", status));
        }

        // Slack answers 200 for most failures and reports them in the body.
        let body: PostMessageResponse = res
            .json()
            .await
            .context("Slack returned an unreadable response")?;
        if !body.ok {
            return Err(anyhow!(
                "Slack API error: {}",
                body.error.unwrap_or_else(|| "unknown".to_string())
            ));
        }
        Ok(())
    }
}
