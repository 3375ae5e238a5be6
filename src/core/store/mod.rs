mod memory;
mod redis_store;

pub use memory::MemoryResultStore;
pub use redis_store::{RedisResultStore, RedisStoreConfig};

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::core::jobs::{JobId, JobState, ResultRecord};

/// Well-known key of the process-wide stop flag.
pub const STOP_FLAG_KEY: &str = "stop_flag";

/// Networked string map shared by every process of the relay.
#[async_trait]
pub trait ResultStore: Send + Sync {
    /// Human readable label for logs ("redis://host:port", "memory").
    fn describe(&self) -> String;

    async fn ping(&self) -> Result<()>;

    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Writes only when the key does not exist yet. Returns whether it wrote.
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<bool>;

    async fn delete(&self, key: &str) -> Result<()>;
}

pub type SharedStore = Arc<dyn ResultStore>;

fn state_key(job_id: &JobId) -> String {
    format!("job_state:{job_id}")
}

/// Job-level view over the raw store: result records and durable state.
#[derive(Clone)]
pub struct JobRecords {
    store: SharedStore,
    ttl: Option<Duration>,
}

impl JobRecords {
    pub fn new(store: SharedStore, ttl: Option<Duration>) -> Self {
        Self { store, ttl }
    }

    pub async fn result(&self, job_id: &JobId) -> Result<Option<ResultRecord>> {
        let raw = self.store.get(&job_id.to_string()).await?;
        Ok(raw.as_deref().map(ResultRecord::decode))
    }

    /// Persists the terminal record. A second write for the same job is a
    /// no-op and reported as `false`.
    pub async fn write_result(&self, job_id: &JobId, record: &ResultRecord) -> Result<bool> {
        let written = self
            .store
            .set_if_absent(&job_id.to_string(), &record.encode(), self.ttl)
            .await?;
        if !written {
            warn!("Result for job {} already present, keeping the first write", job_id);
        }
        Ok(written)
    }

    pub async fn state(&self, job_id: &JobId) -> Result<Option<JobState>> {
        let raw = self.store.get(&state_key(job_id)).await?;
        Ok(raw.as_deref().and_then(JobState::from_status))
    }

    pub async fn set_state(&self, job_id: &JobId, state: JobState) -> Result<()> {
        self.store
            .set(&state_key(job_id), state.as_str(), self.ttl)
            .await
    }

    /// Drops the durable state of a job that never reached the queue.
    pub async fn clear_state(&self, job_id: &JobId) -> Result<()> {
        self.store.delete(&state_key(job_id)).await
    }
}

/// Handle on the global stop flag. The literal `true` activates it.
#[derive(Clone)]
pub struct StopFlag {
    store: SharedStore,
}

impl StopFlag {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub fn is_affirmative(raw: &str) -> bool {
        raw.trim().eq_ignore_ascii_case("true")
    }

    pub async fn is_set(&self) -> Result<bool> {
        let raw = self.store.get(STOP_FLAG_KEY).await?;
        Ok(raw.as_deref().is_some_and(Self::is_affirmative))
    }

    pub async fn set(&self, active: bool) -> Result<()> {
        let value = if active { "true" } else { "false" };
        self.store.set(STOP_FLAG_KEY, value, None).await
    }
}
