mod client;

pub use client::{PlatformClient, SlackClient};

use axum::http::HeaderMap;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::core::jobs::{JobDispatcher, JobId, JobOrigin, JobStatusView, ResultReader};

pub const NO_VALID_COMMAND: &str = "No valid command found. Try `echo: <text>`.";

const ECHO_PREFIX: &str = "echo:";
const SIGNATURE_MAX_AGE_SECS: u64 = 300;
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// What the bridge does with messages that are not commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlackChatMode {
    /// Reply with a fixed hint; no job is created.
    Disabled,
    /// Dispatch a job and post its outcome once it settles or the wait runs out.
    Dispatch,
}

impl SlackChatMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SlackChatMode::Disabled => "disabled",
            SlackChatMode::Dispatch => "dispatch",
        }
    }
}

impl FromStr for SlackChatMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "disabled" => Ok(SlackChatMode::Disabled),
            "dispatch" => Ok(SlackChatMode::Dispatch),
            other => Err(format!(
                "unknown chat mode `{}`, expected `disabled` or `dispatch`",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SlackSettings {
    pub bot_token: String,
    pub signing_secret: Option<String>,
    pub chat_mode: SlackChatMode,
    pub reply_wait: Duration,
    pub api_base: String,
}

#[derive(serde::Deserialize, Debug)]
struct SlackEventPayload {
    challenge: Option<String>,
    event: Option<SlackEventDetails>,
}

#[derive(serde::Deserialize, Debug)]
struct SlackEventDetails {
    #[serde(rename = "type")]
    inner_type: Option<String>,
    subtype: Option<String>,
    text: Option<String>,
    channel: Option<String>,
    bot_id: Option<String>,
}

impl SlackEventDetails {
    fn from_bot(&self) -> bool {
        self.subtype.as_deref() == Some("bot_message") || self.bot_id.is_some()
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum Command<'a> {
    Echo(&'a str),
    Chat(&'a str),
}

/// `echo:` (any case) selects the echo command; the reply is the trimmed remainder.
pub fn classify_text(text: &str) -> Command<'_> {
    let text = text.trim_start();
    match text.get(..ECHO_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(ECHO_PREFIX) => {
            Command::Echo(text[ECHO_PREFIX.len()..].trim())
        }
        _ => Command::Chat(text.trim()),
    }
}

/// Verify Slack request signature using the signing secret.
pub fn verify_slack_signature(headers: &HeaderMap, body: &[u8], signing_secret: &str) -> bool {
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    verify_slack_signature_at(headers, body, signing_secret, now)
}

fn verify_slack_signature_at(
    headers: &HeaderMap,
    body: &[u8],
    signing_secret: &str,
    now: u64,
) -> bool {
    use hmac::Mac;
    use sha2::Sha256;
    type HmacSha256 = hmac::Hmac<Sha256>;

    let timestamp = match headers
        .get("x-slack-request-timestamp")
        .and_then(|v| v.to_str().ok())
    {
        Some(ts) => ts,
        None => return false,
    };

    // Reject requests older than 5 minutes to prevent replay attacks
    match timestamp.parse::<u64>() {
        Ok(ts) if now.abs_diff(ts) <= SIGNATURE_MAX_AGE_SECS => {}
        _ => return false,
    }

    let sig = match headers
        .get("x-slack-signature")
        .and_then(|v| v.to_str().ok())
    {
        Some(s) => s,
        None => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(signing_secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(format!("v0:{}:", timestamp).as_bytes());
    mac.update(body);
    let expected = format!("v0={}", hex::encode(mac.finalize().into_bytes()));

    // Constant-time comparison
    if sig.len() != expected.len() {
        return false;
    }
    sig.as_bytes()
        .iter()
        .zip(expected.as_bytes().iter())
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Successful webhook answers.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookAck {
    Challenge(String),
    Ok,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("Invalid signature")]
    InvalidSignature,
    #[error("Invalid JSON")]
    InvalidPayload,
}

/// Maps inbound Slack events onto the echo command or the job pipeline and
/// posts replies back to the originating channel.
#[derive(Clone)]
pub struct WebhookBridge {
    platform: Arc<dyn PlatformClient>,
    dispatcher: JobDispatcher,
    reader: ResultReader,
    signing_secret: Option<String>,
    chat_mode: SlackChatMode,
    reply_wait: Duration,
    poll_interval: Duration,
}

impl WebhookBridge {
    pub fn new(
        settings: &SlackSettings,
        platform: Arc<dyn PlatformClient>,
        dispatcher: JobDispatcher,
        reader: ResultReader,
    ) -> Self {
        if settings.signing_secret.is_none() {
            warn!(
                "No SLACK_SIGNING_SECRET set. Slack webhook requests will NOT be verified."
            );
        }
        Self {
            platform,
            dispatcher,
            reader,
            signing_secret: settings.signing_secret.clone(),
            chat_mode: settings.chat_mode,
            reply_wait: settings.reply_wait,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    #[cfg(test)]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub async fn handle(&self, headers: &HeaderMap, body: &[u8]) -> Result<WebhookAck, WebhookError> {
        if let Some(secret) = &self.signing_secret {
            if !verify_slack_signature(headers, body, secret) {
                warn!("Rejected Slack request with an invalid signature");
                return Err(WebhookError::InvalidSignature);
            }
        }

        let payload: SlackEventPayload =
            serde_json::from_slice(body).map_err(|_| WebhookError::InvalidPayload)?;

        if let Some(challenge) = payload.challenge {
            return Ok(WebhookAck::Challenge(challenge));
        }

        let Some(event) = payload.event else {
            return Ok(WebhookAck::Ok);
        };

        if event.from_bot() {
            debug!("Ignoring bot message");
            return Ok(WebhookAck::Ok);
        }

        let (text, channel) = match (event.text.as_deref(), event.channel.as_deref()) {
            (Some(text), Some(channel)) if !text.trim().is_empty() => (text, channel),
            _ => return Ok(WebhookAck::Ok),
        };

        info!(
            "Slack {} in {}: {}",
            event.inner_type.as_deref().unwrap_or("event"),
            channel,
            text
        );

        match classify_text(text) {
            Command::Echo(rest) => {
                if rest.is_empty() {
                    debug!("Empty echo command in {}, nothing to post", channel);
                } else {
                    self.post(channel, rest).await;
                }
            }
            Command::Chat(query) => self.chat(channel, query).await,
        }

        Ok(WebhookAck::Ok)
    }

    async fn chat(&self, channel: &str, query: &str) {
        match self.chat_mode {
            SlackChatMode::Disabled => self.post(channel, NO_VALID_COMMAND).await,
            SlackChatMode::Dispatch => {
                let origin = JobOrigin::Slack {
                    channel: channel.to_string(),
                };
                match self.dispatcher.submit(query, origin).await {
                    Ok(ticket) => self.spawn_waiter(channel.to_string(), ticket.job_id),
                    Err(e) => self.post(channel, &e.to_string()).await,
                }
            }
        }
    }

    /// The webhook has to answer right away, so the outcome is posted later.
    fn spawn_waiter(&self, channel: String, job_id: JobId) {
        let bridge = self.clone();
        tokio::spawn(async move {
            let reply = match bridge
                .reader
                .wait_for(&job_id, bridge.reply_wait, bridge.poll_interval)
                .await
            {
                Ok(view) => reply_for(&job_id, view),
                Err(e) => {
                    error!("Could not read result for job {}: {:#}", job_id, e);
                    format!("Could not read the result of job {}.", job_id)
                }
            };
            bridge.post(&channel, &reply).await;
        });
    }

    async fn post(&self, channel: &str, text: &str) {
        if let Err(e) = self.platform.post_message(channel, text).await {
            error!("Failed to send Slack reply to {}: {:#}", channel, e);
        }
    }
}

fn reply_for(job_id: &JobId, view: JobStatusView) -> String {
    match view {
        JobStatusView::Completed { response } => response,
        JobStatusView::Failed { error } => format!("Sorry, that request failed: {}", error),
        JobStatusView::Stopped { reason } => format!("Job {} was stopped ({}).", job_id, reason),
        JobStatusView::Processing { .. } => format!(
            "Still working on it. Poll /result/{} for the answer.",
            job_id
        ),
    }
}
