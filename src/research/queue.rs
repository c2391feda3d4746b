//! Background job queue.
//!
//! Jobs go into a bounded tokio channel drained by a fixed pool of workers.
//! A failed attempt is retried (with a linear backoff) until the configured
//! attempt budget is spent.

use anyhow::{anyhow, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use super::jobs::{AnalysisJob, JobRunner};

const QUEUE_CAPACITY: usize = 1024;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

pub struct JobQueue {
    tx: mpsc::Sender<AnalysisJob>,
    runner: Arc<JobRunner>,
}

impl JobQueue {
    /// Spawn `workers` workers and return a handle for enqueueing.
    pub fn spawn(runner: Arc<JobRunner>, workers: usize, max_attempts: u32) -> Arc<Self> {
        let (tx, rx) = mpsc::channel::<AnalysisJob>(QUEUE_CAPACITY);
        let rx = Arc::new(Mutex::new(rx));
        let workers = workers.max(1);
        let max_attempts = max_attempts.max(1);

        for worker_id in 0..workers {
            let rx = rx.clone();
            let runner = runner.clone();
            tokio::spawn(async move {
                worker_loop(worker_id, rx, runner, max_attempts).await;
            });
        }

        info!("🧵 Research job queue started ({} workers, {} attempts)", workers, max_attempts);

        Arc::new(Self { tx, runner })
    }

    /// Record `job` as queued and hand it to the workers. Returns its id.
    pub async fn enqueue(&self, job: AnalysisJob) -> Result<String> {
        let job_id = job.job_id.clone();
        self.runner
            .store()
            .record_job_queued(&job_id, &job.symbol, job.job_type)?;
        self.tx
            .send(job)
            .await
            .map_err(|_| anyhow!("research job queue is closed"))?;
        debug!(job_id = %job_id, "job enqueued");
        Ok(job_id)
    }
}

async fn worker_loop(
    worker_id: usize,
    rx: Arc<Mutex<mpsc::Receiver<AnalysisJob>>>,
    runner: Arc<JobRunner>,
    max_attempts: u32,
) {
    loop {
        // Hold the lock only while waiting for the next job.
        let job = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(job) = job else {
            debug!(worker_id, "job queue closed, worker exiting");
            return;
        };

        for attempt in 0..max_attempts {
            match runner.execute_attempt(&job, attempt).await {
                Ok(_) => break,
                Err(e) if attempt + 1 < max_attempts => {
                    debug!(worker_id, job_id = %job.job_id, attempt, "retrying after error: {:#}", e);
                    tokio::time::sleep(RETRY_BACKOFF * (attempt + 1)).await;
                }
                Err(e) => {
                    warn!(
                        worker_id,
                        job_id = %job.job_id,
                        symbol = %job.symbol,
                        "job gave up after {} attempt(s): {:#}",
                        max_attempts,
                        e
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::research::jobs::tests::FakeAgent;
    use crate::research::models::{AnalysisSource, JobStatus, JobType, Verdict};
    use crate::research::store::ResearchStore;
    use tempfile::NamedTempFile;

    async fn wait_for_status(runner: &JobRunner, job_id: &str, want: JobStatus) -> bool {
        for _ in 0..200 {
            if let Some(job) = runner.store().get_job(job_id).unwrap() {
                if job.status == want {
                    return true;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn test_enqueued_job_completes() {
        let file = NamedTempFile::new().unwrap();
        let store = ResearchStore::new(file.path().to_str().unwrap()).unwrap();
        let runner = Arc::new(JobRunner::new(
            store,
            Arc::new(FakeAgent::new(AnalysisSource::Primo, Verdict::Buy, 0.9)),
            Arc::new(FakeAgent::new(AnalysisSource::Trading, Verdict::Buy, 0.9)),
            0.8,
        ));
        let queue = JobQueue::spawn(runner.clone(), 2, 1);

        let job = AnalysisJob::new("AAPL", JobType::Consensus, Some("2024-12-04"));
        let id = queue.enqueue(job).await.unwrap();
        assert!(wait_for_status(&runner, &id, JobStatus::Completed).await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_is_retried() {
        let file = NamedTempFile::new().unwrap();
        let store = ResearchStore::new(file.path().to_str().unwrap()).unwrap();
        let primo = Arc::new(FakeAgent::failing(AnalysisSource::Primo, "boom"));
        let runner = Arc::new(JobRunner::new(
            store,
            primo.clone(),
            Arc::new(FakeAgent::new(AnalysisSource::Trading, Verdict::Buy, 0.9)),
            0.8,
        ));
        let queue = JobQueue::spawn(runner.clone(), 1, 3);

        let id = queue
            .enqueue(AnalysisJob::new("AAPL", JobType::Primo, None))
            .await
            .unwrap();

        for _ in 0..200 {
            if primo.calls.lock().len() == 3 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(primo.calls.lock().len(), 3);
        assert!(wait_for_status(&runner, &id, JobStatus::Failed).await);
        let row = runner.store().get_job(&id).unwrap().unwrap();
        assert_eq!(row.retry_count, 2);
    }
}
