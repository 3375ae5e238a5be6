use std::str::FromStr;
use std::time::Duration;
use tracing::info;

use crate::core::jobs::ExecutorConfig;
use crate::core::llm::OpenAiBackendConfig;
use crate::core::store::RedisStoreConfig;
use crate::interfaces::slack::{SlackChatMode, SlackSettings};

pub const DEFAULT_API_HOST: &str = "127.0.0.1";
pub const DEFAULT_API_PORT: u16 = 8000;
pub const DEFAULT_STORE_PORT: u16 = 11835;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),
    #[error("invalid value {value:?} for {var}: {reason}")]
    Invalid {
        var: &'static str,
        value: String,
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreSettings {
    Memory,
    Redis(RedisStoreConfig),
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub api_host: String,
    pub api_port: u16,
    pub store: StoreSettings,
    pub result_ttl: Option<Duration>,
    pub backend: OpenAiBackendConfig,
    pub executor: ExecutorConfig,
    pub worker_concurrency: usize,
    pub queue_capacity: usize,
    pub slack: Option<SlackSettings>,
}

/// Reads variables through `lookup` so tests never touch the process environment.
struct Vars<F> {
    lookup: F,
}

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn optional(&self, var: &'static str) -> Option<String> {
        (self.lookup)(var)
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn required(&self, var: &'static str) -> Result<String, ConfigError> {
        self.optional(var).ok_or(ConfigError::Missing(var))
    }

    fn parsed<T>(&self, var: &'static str, default: T) -> Result<T, ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        match self.optional(var) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
                var,
                value: raw.clone(),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn at_least_one(&self, var: &'static str, default: usize) -> Result<usize, ConfigError> {
        let value = self.parsed(var, default)?;
        if value == 0 {
            return Err(ConfigError::Invalid {
                var,
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        Ok(value)
    }
}

impl RelayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    #[cfg(test)]
    pub fn from_map(
        vars: &std::collections::HashMap<String, String>,
    ) -> Result<Self, ConfigError> {
        Self::from_lookup(|key| vars.get(key).cloned())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars { lookup };

        let store = match vars
            .optional("RESULT_STORE_BACKEND")
            .unwrap_or_else(|| "redis".to_string())
            .to_lowercase()
            .as_str()
        {
            "memory" => StoreSettings::Memory,
            "redis" => StoreSettings::Redis(RedisStoreConfig {
                host: vars.required("RESULT_STORE_HOST")?,
                port: vars.parsed("RESULT_STORE_PORT", DEFAULT_STORE_PORT)?,
                username: vars.optional("RESULT_STORE_USERNAME"),
                password: Some(vars.required("RESULT_STORE_PASSWORD")?),
                retry_attempts: vars.parsed("STORE_RETRY_ATTEMPTS", 3u32)?,
            }),
            other => {
                return Err(ConfigError::Invalid {
                    var: "RESULT_STORE_BACKEND",
                    value: other.to_string(),
                    reason: "expected `redis` or `memory`".to_string(),
                });
            }
        };

        let result_ttl = match vars.optional("RESULT_TTL_SECS") {
            Some(_) => Some(Duration::from_secs(vars.parsed("RESULT_TTL_SECS", 0u64)?)),
            None => None,
        }
        .filter(|ttl| !ttl.is_zero());

        let backend_timeout = Duration::from_secs(vars.parsed("BACKEND_TIMEOUT_SECS", 120u64)?);
        let backend = OpenAiBackendConfig {
            base_url: vars
                .optional("BACKEND_BASE_URL")
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            api_key: vars.required("BACKEND_API_KEY")?,
            model: vars
                .optional("BACKEND_MODEL")
                .unwrap_or_else(|| "gpt-4o-mini".to_string()),
            // The executor enforces the job timeout; the HTTP client only
            // guards against a connection that never answers.
            request_timeout: backend_timeout + Duration::from_secs(5),
        };
        let executor = ExecutorConfig {
            backend_timeout,
            system_prompt: vars.optional("BACKEND_SYSTEM_PROMPT"),
        };

        let slack = match vars.optional("SLACK_BOT_TOKEN") {
            Some(bot_token) => Some(SlackSettings {
                bot_token,
                signing_secret: vars.optional("SLACK_SIGNING_SECRET"),
                chat_mode: vars.parsed("SLACK_CHAT_MODE", SlackChatMode::Disabled)?,
                reply_wait: Duration::from_secs(vars.parsed("SLACK_REPLY_WAIT_SECS", 60u64)?),
                api_base: vars
                    .optional("SLACK_API_BASE")
                    .unwrap_or_else(|| "https://slack.com/api".to_string()),
            }),
            None => None,
        };

        Ok(Self {
            api_host: vars
                .optional("API_HOST")
                .unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            api_port: vars.parsed("API_PORT", DEFAULT_API_PORT)?,
            store,
            result_ttl,
            backend,
            executor,
            worker_concurrency: vars.at_least_one("WORKER_CONCURRENCY", 2)?,
            queue_capacity: vars.at_least_one("QUEUE_CAPACITY", 64)?,
            slack,
        })
    }

    pub fn log_summary(&self) {
        let store = match &self.store {
            StoreSettings::Memory => "memory".to_string(),
            StoreSettings::Redis(cfg) => cfg.redacted_url(),
        };
        info!(
            "Config: api={}:{}, store={}, model={}, workers={}, queue={}, slack={}",
            self.api_host,
            self.api_port,
            store,
            self.backend.model,
            self.worker_concurrency,
            self.queue_capacity,
            self.slack
                .as_ref()
                .map(|s| s.chat_mode.as_str())
                .unwrap_or("off")
        );
    }
}
