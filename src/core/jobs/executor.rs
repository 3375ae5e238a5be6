use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{ActiveJobs, Job, JobId, JobState, ResultRecord};
use crate::core::lifecycle::LifecycleComponent;
use crate::core::llm::{ChatSession, SharedBackend};
use crate::core::store::{JobRecords, StopFlag};

#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub backend_timeout: Duration,
    pub system_prompt: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(120),
            system_prompt: None,
        }
    }
}

/// Runs one job from start to its single terminal record.
pub struct JobExecutor {
    backend: SharedBackend,
    records: JobRecords,
    stop_flag: StopFlag,
    active: ActiveJobs,
    config: ExecutorConfig,
}

impl JobExecutor {
    pub fn new(
        backend: SharedBackend,
        records: JobRecords,
        stop_flag: StopFlag,
        active: ActiveJobs,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            backend,
            records,
            stop_flag,
            active,
            config,
        }
    }

    pub async fn run(&self, job: Job) -> ResultRecord {
        let _guard = self.active.guard(job.id);

        let stop_requested = match self.stop_flag.is_set().await {
            Ok(set) => set,
            Err(e) => {
                warn!("Could not read stop flag for job {}: {:#}", job.id, e);
                false
            }
        };
        if stop_requested {
            info!("Stop flag set, abandoning job {} before backend call", job.id);
            let record = ResultRecord::Stopped {
                reason: "stop flag set".to_string(),
            };
            self.finish(&job.id, &record).await;
            return record;
        }
        if job.cancel.is_cancelled() {
            info!("Job {} cancelled while queued", job.id);
            let record = ResultRecord::Stopped {
                reason: "cancelled".to_string(),
            };
            self.finish(&job.id, &record).await;
            return record;
        }

        self.active.mark_active(&job.id);
        if let Err(e) = self.records.set_state(&job.id, JobState::Active).await {
            warn!("Could not persist active state for job {}: {:#}", job.id, e);
        }
        info!("Job {} started on backend {}", job.id, self.backend.name());

        let record = self.call_backend(&job).await;
        self.finish(&job.id, &record).await;
        record
    }

    async fn call_backend(&self, job: &Job) -> ResultRecord {
        let mut session = ChatSession::new(job.id.to_string(), self.config.system_prompt.as_deref());
        let timeout = self.config.backend_timeout;

        tokio::select! {
            _ = job.cancel.cancelled() => {
                info!("Job {} cancelled during backend call", job.id);
                ResultRecord::Stopped { reason: "cancelled".to_string() }
            }
            outcome = tokio::time::timeout(timeout, self.backend.submit(&mut session, &job.text)) => {
                match outcome {
                    Ok(Ok(response)) => {
                        info!("Job {} completed ({} chars)", job.id, response.len());
                        ResultRecord::Completed { response }
                    }
                    Ok(Err(e)) => {
                        warn!("Job {} failed: {:#}", job.id, e);
                        ResultRecord::Failed { error: format!("{:#}", e) }
                    }
                    Err(_) => {
                        warn!("Job {} timed out after {:?}", job.id, timeout);
                        ResultRecord::Failed {
                            error: format!("backend timed out after {}s", timeout.as_secs()),
                        }
                    }
                }
            }
        }
    }

    /// Terminal record for a job whose task died before writing one.
    async fn record_lost(&self, job_id: &JobId, reason: String) {
        self.active.remove(job_id);
        let record = ResultRecord::Failed { error: reason };
        self.finish(job_id, &record).await;
    }

    async fn finish(&self, job_id: &JobId, record: &ResultRecord) {
        if let Err(e) = self.records.write_result(job_id, record).await {
            error!("Could not persist result for job {}: {:#}", job_id, e);
        }
        if let Err(e) = self.records.set_state(job_id, record.state()).await {
            warn!("Could not persist terminal state for job {}: {:#}", job_id, e);
        }
    }
}

/// Fixed set of workers draining the bounded job queue.
pub struct WorkerPool {
    executor: Arc<JobExecutor>,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    concurrency: usize,
    shutdown: CancellationToken,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn new(executor: Arc<JobExecutor>, queue: mpsc::Receiver<Job>, concurrency: usize) -> Self {
        Self {
            executor,
            queue: Arc::new(Mutex::new(queue)),
            concurrency: concurrency.max(1),
            shutdown: CancellationToken::new(),
            workers: Vec::new(),
        }
    }

    pub fn spawn_workers(&mut self) {
        for worker_id in 0..self.concurrency {
            let executor = Arc::clone(&self.executor);
            let queue = Arc::clone(&self.queue);
            let shutdown = self.shutdown.clone();
            self.workers.push(tokio::spawn(async move {
                worker_loop(worker_id, executor, queue, shutdown).await;
            }));
        }
        info!("Started {} job worker(s)", self.concurrency);
    }

    pub async fn stop(&mut self) {
        self.shutdown.cancel();
        if !self.executor.active.is_empty() {
            warn!(
                "{} job(s) still tracked at shutdown; queued ones will not run",
                self.executor.active.len()
            );
        }
        for handle in self.workers.drain(..) {
            if let Err(e) = handle.await {
                error!("Job worker ended abnormally: {}", e);
            }
        }
    }
}

async fn worker_loop(
    worker_id: usize,
    executor: Arc<JobExecutor>,
    queue: Arc<Mutex<mpsc::Receiver<Job>>>,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            _ = shutdown.cancelled() => None,
            job = async { queue.lock().await.recv().await } => job,
        };
        let Some(job) = next else {
            break;
        };
        let job_id = job.id;
        let task_executor = Arc::clone(&executor);
        // A panicking backend must not take the worker down with it.
        if let Err(e) = tokio::spawn(async move { task_executor.run(job).await }).await {
            error!("Worker {} lost job {}: {}", worker_id, job_id, e);
            executor
                .record_lost(&job_id, format!("job panicked: {}", e))
                .await;
        }
    }
    info!("Job worker {} stopped", worker_id);
}

#[async_trait]
impl LifecycleComponent for WorkerPool {
    async fn on_start(&mut self) -> Result<()> {
        self.spawn_workers();
        Ok(())
    }

    async fn on_shutdown(&mut self) -> Result<()> {
        info!("Job workers shutting down...");
        self.stop().await;
        Ok(())
    }
}
