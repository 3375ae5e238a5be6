use anyhow::Result;
use std::time::Duration;
use tokio::time::Instant;

use super::{ActiveJobs, JobId, JobStatusView};
use crate::core::store::JobRecords;

#[derive(Clone)]
pub struct ResultReader {
    records: JobRecords,
    active: ActiveJobs,
}

impl ResultReader {
    pub fn new(records: JobRecords, active: ActiveJobs) -> Self {
        Self { records, active }
    }

    /// Unknown ids read as processing: a result that has not been written
    /// yet and an id that never existed look the same from the store.
    pub async fn get_result(&self, job_id: &JobId) -> Result<JobStatusView> {
        if let Some(record) = self.records.result(job_id).await? {
            return Ok(record.into());
        }

        let state = match self.active.state(job_id) {
            Some(state) => Some(state),
            None => self
                .records
                .state(job_id)
                .await?
                .filter(|s| !s.is_terminal()),
        };
        Ok(JobStatusView::Processing { state })
    }

    /// Polls until the job reaches a terminal view or `max_wait` elapses,
    /// returning the last view seen.
    pub async fn wait_for(
        &self,
        job_id: &JobId,
        max_wait: Duration,
        interval: Duration,
    ) -> Result<JobStatusView> {
        let deadline = Instant::now() + max_wait;
        loop {
            let view = self.get_result(job_id).await?;
            if view.is_terminal() || Instant::now() >= deadline {
                return Ok(view);
            }
            tokio::time::sleep(interval.min(deadline.saturating_duration_since(Instant::now()))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::jobs::{Job, JobOrigin, JobState, ResultRecord};
    use crate::core::store::MemoryResultStore;
    use chrono::Utc;
    use std::sync::Arc;
    use tokio_util::sync::CancellationToken;

    fn reader() -> (ResultReader, JobRecords, ActiveJobs) {
        let records = JobRecords::new(Arc::new(MemoryResultStore::new()), None);
        let active = ActiveJobs::new();
        (
            ResultReader::new(records.clone(), active.clone()),
            records,
            active,
        )
    }

    #[tokio::test]
    async fn unknown_job_reads_as_processing() {
        let (reader, _, _) = reader();
        let view = reader.get_result(&JobId::generate()).await.unwrap();
        assert_eq!(view, JobStatusView::Processing { state: None });
    }

    #[tokio::test]
    async fn in_flight_job_reports_its_state() {
        let (reader, _, active) = reader();
        let job = Job {
            id: JobId::generate(),
            text: "hi".to_string(),
            origin: JobOrigin::Http,
            created_at: Utc::now(),
            cancel: CancellationToken::new(),
        };
        active.insert(&job);
        active.mark_active(&job.id);

        let view = reader.get_result(&job.id).await.unwrap();
        assert_eq!(
            view,
            JobStatusView::Processing {
                state: Some(JobState::Active)
            }
        );
    }

    #[tokio::test]
    async fn durable_state_is_used_after_restart() {
        let (reader, records, _) = reader();
        let id = JobId::generate();
        records.set_state(&id, JobState::Queued).await.unwrap();

        let view = reader.get_result(&id).await.unwrap();
        assert_eq!(
            view,
            JobStatusView::Processing {
                state: Some(JobState::Queued)
            }
        );
    }

    #[tokio::test]
    async fn completed_payload_is_stable_across_polls() {
        let (reader, records, _) = reader();
        let id = JobId::generate();
        records
            .write_result(
                &id,
                &ResultRecord::Completed {
                    response: "done".to_string(),
                },
            )
            .await
            .unwrap();

        let first = reader.get_result(&id).await.unwrap();
        for _ in 0..3 {
            assert_eq!(reader.get_result(&id).await.unwrap(), first);
        }
        assert_eq!(
            first,
            JobStatusView::Completed {
                response: "done".to_string()
            }
        );
    }

    #[tokio::test]
    async fn failure_and_stop_are_distinct_from_success() {
        let (reader, records, _) = reader();
        let failed = JobId::generate();
        let stopped = JobId::generate();
        records
            .write_result(
                &failed,
                &ResultRecord::Failed {
                    error: "boom".to_string(),
                },
            )
            .await
            .unwrap();
        records
            .write_result(
                &stopped,
                &ResultRecord::Stopped {
                    reason: "stop flag set".to_string(),
                },
            )
            .await
            .unwrap();

        assert_eq!(
            reader.get_result(&failed).await.unwrap(),
            JobStatusView::Failed {
                error: "boom".to_string()
            }
        );
        assert_eq!(
            reader.get_result(&stopped).await.unwrap(),
            JobStatusView::Stopped {
                reason: "stop flag set".to_string()
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn wait_for_gives_up_at_the_deadline() {
        let (reader, _, _) = reader();
        let started = Instant::now();
        let view = reader
            .wait_for(
                &JobId::generate(),
                Duration::from_secs(3),
                Duration::from_millis(500),
            )
            .await
            .unwrap();
        assert!(!view.is_terminal());
        assert!(started.elapsed() >= Duration::from_secs(3));
    }
}
