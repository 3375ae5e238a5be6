use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::{ConnectionLike, ConnectionManager};
use redis::{AsyncCommands, ExistenceCheck, RedisError, SetExpiry, SetOptions};
use std::future::Future;
use std::time::Duration;
use tracing::{info, warn};

use super::ResultStore;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedisStoreConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub retry_attempts: u32,
}

impl RedisStoreConfig {
    pub fn url(&self) -> String {
        let auth = match (&self.username, &self.password) {
            (Some(user), Some(pass)) => format!(
                "{}:{}@",
                urlencoding::encode(user),
                urlencoding::encode(pass)
            ),
            (None, Some(pass)) => format!(":{}@", urlencoding::encode(pass)),
            (Some(user), None) => format!("{}@", urlencoding::encode(user)),
            (None, None) => String::new(),
        };
        format!("redis://{}{}:{}/", auth, self.host, self.port)
    }

    /// Same as `url` with the credentials left out, safe for logs.
    pub fn redacted_url(&self) -> String {
        format!("redis://{}:{}/", self.host, self.port)
    }
}

pub struct RedisResultStore {
    manager: ConnectionManager,
    label: String,
    retry_attempts: u32,
}

impl RedisResultStore {
    pub async fn connect(config: &RedisStoreConfig) -> Result<Self> {
        let label = config.redacted_url();
        let client = redis::Client::open(config.url())
            .with_context(|| format!("failed to open result store client for {}", label))?;
        let manager = client
            .get_connection_manager()
            .await
            .with_context(|| format!("failed to connect to result store at {}", label))?;
        info!("Connected to result store at {}", label);
        Ok(Self {
            manager,
            label,
            retry_attempts: config.retry_attempts.max(1),
        })
    }

    async fn with_retry<T, F, Fut>(&self, op: &str, mut attempt_fn: F) -> Result<T>
    where
        F: FnMut(ConnectionManager) -> Fut,
        Fut: Future<Output = redis::RedisResult<T>>,
    {
        let mut attempt = 1;
        loop {
            match attempt_fn(self.manager.clone()).await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retry_attempts && is_transient(&e) => {
                    let backoff = retry_backoff(attempt);
                    warn!(
                        "Result store {} failed (attempt {}/{}): {}. Retrying in {:?}",
                        op, attempt, self.retry_attempts, e, backoff
                    );
                    tokio::time::sleep(backoff).await;
                    attempt += 1;
                }
                Err(e) => {
                    return Err(anyhow::Error::new(e))
                        .with_context(|| format!("result store {} failed on {}", op, self.label));
                }
            }
        }
    }
}

fn is_transient(e: &RedisError) -> bool {
    e.is_io_error() || e.is_timeout() || e.is_connection_dropped() || e.is_connection_refusal()
}

fn retry_backoff(attempt: u32) -> Duration {
    Duration::from_millis(100 * 2u64.pow(attempt.saturating_sub(1).min(6)))
}

fn expiry_options(ttl: Option<Duration>) -> SetOptions {
    let opts = SetOptions::default();
    match ttl {
        Some(ttl) => opts.with_expiration(SetExpiry::EX(ttl.as_secs().max(1))),
        None => opts,
    }
}

#[async_trait]
impl ResultStore for RedisResultStore {
    fn describe(&self) -> String {
        self.label.clone()
    }

    async fn ping(&self) -> Result<()> {
        self.with_retry("ping", |mut conn| async move {
            conn.req_packed_command(&redis::cmd("PING"))
                .await
                .map(|_| ())
        })
        .await
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.with_retry("get", |mut conn| async move {
            conn.get::<_, Option<String>>(key).await
        })
        .await
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        self.with_retry("set", |mut conn| async move {
            conn.set_options::<_, _, ()>(key, value, expiry_options(ttl))
                .await
        })
        .await
    }

    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool> {
        let reply: Option<String> = self
            .with_retry("set_if_absent", |mut conn| async move {
                let opts = expiry_options(ttl).conditional_set(ExistenceCheck::NX);
                conn.set_options::<_, _, Option<String>>(key, value, opts)
                    .await
            })
            .await?;
        Ok(reply.is_some())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_retry("delete", |mut conn| async move {
            conn.del::<_, ()>(key).await
        })
        .await
    }
}
