//! In-process doubles shared by unit tests.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use crate::core::llm::{ChatSession, ConversationBackend, ModelInfo};
use crate::core::store::ResultStore;
use crate::interfaces::slack::PlatformClient;

enum Script {
    Echo,
    Fail(String),
    Panic(String),
}

pub struct ScriptedBackend {
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl ScriptedBackend {
    /// Replies `reply to: <text>`.
    pub fn echoing() -> Self {
        Self {
            script: Script::Echo,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            script: Script::Fail(message.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn panicking(message: &str) -> Self {
        Self {
            script: Script::Panic(message.to_string()),
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConversationBackend for ScriptedBackend {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn list_models(&self) -> Result<Vec<ModelInfo>> {
        Ok(vec![ModelInfo {
            id: "scripted-1".to_string(),
            name: "Scripted".to_string(),
        }])
    }

    async fn submit(&self, _session: &mut ChatSession, text: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match &self.script {
            Script::Echo => Ok(format!("reply to: {}", text)),
            Script::Fail(message) => Err(anyhow!("{}", message)),
            Script::Panic(message) => panic!("{}", message),
        }
    }
}

/// Store whose reads find nothing and whose writes always fail.
pub struct BrokenStore;

#[async_trait]
impl ResultStore for BrokenStore {
    fn describe(&self) -> String {
        "broken".to_string()
    }

    async fn ping(&self) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn get(&self, _key: &str) -> Result<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Option<Duration>) -> Result<()> {
        Err(anyhow!("connection refused"))
    }

    async fn set_if_absent(
        &self,
        _key: &str,
        _value: &str,
        _ttl: Option<Duration>,
    ) -> Result<bool> {
        Err(anyhow!("connection refused"))
    }

    async fn delete(&self, _key: &str) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

/// Records every post instead of talking to Slack.
#[derive(Default)]
pub struct RecordingPlatform {
    posts: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingPlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            posts: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn posts(&self) -> Vec<(String, String)> {
        self.posts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl PlatformClient for RecordingPlatform {
    async fn post_message(&self, channel: &str, text: &str) -> Result<()> {
        self.posts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((channel.to_string(), text.to_string()));
        if self.fail {
            return Err(anyhow!("channel_not_found"));
        }
        Ok(())
    }
}
