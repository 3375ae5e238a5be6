use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

use super::{Job, JobId, JobOrigin, JobState};

struct ActiveEntry {
    started_at: DateTime<Utc>,
    state: JobState,
    origin: JobOrigin,
    cancel: CancellationToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveJobSnapshot {
    pub job_id: JobId,
    pub state: JobState,
    pub origin: JobOrigin,
    pub started_at: DateTime<Utc>,
}

/// In-process liveness bookkeeping. Lost on restart; results never depend on it.
#[derive(Clone, Default)]
pub struct ActiveJobs {
    inner: Arc<Mutex<HashMap<JobId, ActiveEntry>>>,
}

impl ActiveJobs {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<JobId, ActiveEntry>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn insert(&self, job: &Job) {
        self.lock().insert(
            job.id,
            ActiveEntry {
                started_at: job.created_at,
                state: JobState::Queued,
                origin: job.origin.clone(),
                cancel: job.cancel.clone(),
            },
        );
    }

    pub fn mark_active(&self, job_id: &JobId) {
        if let Some(entry) = self.lock().get_mut(job_id) {
            entry.state = JobState::Active;
        }
    }

    pub fn remove(&self, job_id: &JobId) -> bool {
        self.lock().remove(job_id).is_some()
    }

    pub fn state(&self, job_id: &JobId) -> Option<JobState> {
        self.lock().get(job_id).map(|e| e.state)
    }

    #[cfg(test)]
    pub fn contains(&self, job_id: &JobId) -> bool {
        self.lock().contains_key(job_id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fires the job's cancellation token. Returns false for unknown jobs.
    pub fn cancel(&self, job_id: &JobId) -> bool {
        match self.lock().get(job_id) {
            Some(entry) => {
                entry.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn snapshot(&self) -> Vec<ActiveJobSnapshot> {
        let mut jobs: Vec<_> = self
            .lock()
            .iter()
            .map(|(id, e)| ActiveJobSnapshot {
                job_id: *id,
                state: e.state,
                origin: e.origin.clone(),
                started_at: e.started_at,
            })
            .collect();
        jobs.sort_by_key(|j| j.started_at);
        jobs
    }

    /// Removal happens when the guard drops, whichever way the job ends.
    pub fn guard(&self, job_id: JobId) -> ActiveJobGuard {
        ActiveJobGuard {
            jobs: self.clone(),
            job_id,
        }
    }
}

pub struct ActiveJobGuard {
    jobs: ActiveJobs,
    job_id: JobId,
}

impl Drop for ActiveJobGuard {
    fn drop(&mut self) {
        self.jobs.remove(&self.job_id);
    }
}
