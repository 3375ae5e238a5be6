use chrono::Utc;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ActiveJobs, Job, JobId, JobOrigin, JobState};
use crate::core::store::{JobRecords, StopFlag};

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Query cannot be empty")]
    EmptyText,
    #[error("Dispatch is paused: the stop flag is set")]
    Stopped,
    #[error("Job queue is full, try again later")]
    QueueFull,
    #[error("Job queue is closed")]
    Closed,
    #[error("Result store unavailable: {0:#}")]
    Store(anyhow::Error),
}

/// Immediate answer to a chat submission.
#[derive(Debug, Clone, Serialize)]
pub struct JobTicket {
    pub job_id: JobId,
    pub status: &'static str,
}

/// Accepts work and hands it to the worker pool without waiting for it.
#[derive(Clone)]
pub struct JobDispatcher {
    queue: mpsc::Sender<Job>,
    active: ActiveJobs,
    records: JobRecords,
    stop_flag: StopFlag,
}

/// Trims and validates user text. Shared by every ingress.
pub fn validate_text(text: &str) -> Result<&str, DispatchError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(DispatchError::EmptyText);
    }
    Ok(trimmed)
}

impl JobDispatcher {
    pub fn new(
        queue: mpsc::Sender<Job>,
        active: ActiveJobs,
        records: JobRecords,
        stop_flag: StopFlag,
    ) -> Self {
        Self {
            queue,
            active,
            records,
            stop_flag,
        }
    }

    pub fn active(&self) -> &ActiveJobs {
        &self.active
    }

    pub fn stop_flag(&self) -> &StopFlag {
        &self.stop_flag
    }

    pub async fn submit(&self, text: &str, origin: JobOrigin) -> Result<JobTicket, DispatchError> {
        let text = validate_text(text)?;

        if self.stop_flag.is_set().await.map_err(DispatchError::Store)? {
            info!("Rejecting new job while the stop flag is set");
            return Err(DispatchError::Stopped);
        }

        let job = Job {
            id: JobId::generate(),
            text: text.to_string(),
            origin,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
        };
        let job_id = job.id;
        self.active.insert(&job);

        if let Err(e) = self.records.set_state(&job_id, JobState::Queued).await {
            warn!("Could not persist queued state for job {}: {:#}", job_id, e);
        }

        match self.queue.try_send(job) {
            Ok(()) => {
                debug!("Job {} queued", job_id);
                Ok(JobTicket {
                    job_id,
                    status: "processing",
                })
            }
            Err(TrySendError::Full(job)) => {
                warn!("Job queue full, rejected job {}", job.id);
                self.forget(&job.id).await;
                Err(DispatchError::QueueFull)
            }
            Err(TrySendError::Closed(job)) => {
                self.forget(&job.id).await;
                Err(DispatchError::Closed)
            }
        }
    }

    /// Undoes the bookkeeping of a job the queue refused. The caller never
    /// sees its id, so nothing may be left behind for it.
    async fn forget(&self, job_id: &JobId) {
        self.active.remove(job_id);
        if let Err(e) = self.records.clear_state(job_id).await {
            warn!("Could not clear queued state for rejected job {}: {:#}", job_id, e);
        }
    }
}
