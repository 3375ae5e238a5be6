pub mod active;
pub mod dispatcher;
pub mod executor;
pub mod reader;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use active::ActiveJobs;
pub use dispatcher::{DispatchError, JobDispatcher, JobTicket};
pub use executor::{ExecutorConfig, JobExecutor, WorkerPool};
pub use reader::ResultReader;

/// Prefix used by the flat legacy encoding of failed results.
pub const ERROR_PREFIX: &str = "Error: ";

/// Opaque, caller-unguessable job identifier (128 random bits).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct JobId(Uuid);

impl JobId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Accepts both the simple and the hyphenated textual forms.
    pub fn parse(raw: &str) -> Option<Self> {
        Uuid::try_parse(raw.trim()).ok().map(Self)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl Serialize for JobId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Active,
    Completed,
    Failed,
    Stopped,
}

impl JobState {
    pub fn as_str(self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
            JobState::Stopped => "stopped",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        match value {
            "queued" => Some(JobState::Queued),
            "active" => Some(JobState::Active),
            "completed" => Some(JobState::Completed),
            "failed" => Some(JobState::Failed),
            "stopped" => Some(JobState::Stopped),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Completed | JobState::Failed | JobState::Stopped
        )
    }
}

/// Where a job came from; used for logging and the active-job listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobOrigin {
    Http,
    Slack { channel: String },
}

/// A unit of work as it travels through the queue.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub text: String,
    pub origin: JobOrigin,
    pub created_at: DateTime<Utc>,
    pub cancel: CancellationToken,
}

/// Terminal outcome of a job, stored once under the job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ResultRecord {
    Completed { response: String },
    Failed { error: String },
    Stopped { reason: String },
}

impl ResultRecord {
    pub fn state(&self) -> JobState {
        match self {
            ResultRecord::Completed { .. } => JobState::Completed,
            ResultRecord::Failed { .. } => JobState::Failed,
            ResultRecord::Stopped { .. } => JobState::Stopped,
        }
    }

    pub fn encode(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| match self {
            ResultRecord::Completed { response } => response.clone(),
            ResultRecord::Failed { error } => format!("{ERROR_PREFIX}{error}"),
            ResultRecord::Stopped { reason } => format!("{ERROR_PREFIX}stopped: {reason}"),
        })
    }

    /// Decodes the tagged JSON form, falling back to the flat form where a
    /// value is either a raw response or an `Error: `-prefixed message.
    pub fn decode(raw: &str) -> Self {
        if let Ok(record) = serde_json::from_str::<ResultRecord>(raw) {
            return record;
        }
        match raw.strip_prefix(ERROR_PREFIX) {
            Some(error) => ResultRecord::Failed {
                error: error.to_string(),
            },
            None => ResultRecord::Completed {
                response: raw.to_string(),
            },
        }
    }
}

/// What a poller sees for a job id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatusView {
    Processing {
        #[serde(skip_serializing_if = "Option::is_none")]
        state: Option<JobState>,
    },
    Completed {
        response: String,
    },
    Failed {
        error: String,
    },
    Stopped {
        reason: String,
    },
}

impl JobStatusView {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatusView::Processing { .. })
    }
}

impl From<ResultRecord> for JobStatusView {
    fn from(record: ResultRecord) -> Self {
        match record {
            ResultRecord::Completed { response } => JobStatusView::Completed { response },
            ResultRecord::Failed { error } => JobStatusView::Failed { error },
            ResultRecord::Stopped { reason } => JobStatusView::Stopped { reason },
        }
    }
}
