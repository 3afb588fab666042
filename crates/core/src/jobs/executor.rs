use super::traits::{JobHandler, JobQueue};
use crate::error::Result;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Configuration for a queue worker pool.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Concurrent jobs processed by this pool.
    pub concurrency: usize,
    pub poll_interval: Duration,
    /// Optional dispatch ceiling in jobs per second.
    pub rate_limit_per_second: Option<u32>,
    /// Seconds before an unacked job is reclaimed.
    pub visibility_timeout_seconds: u64,
}

impl WorkerConfig {
    pub fn named(queue: &str, concurrency: usize) -> Self {
        Self {
            worker_id: format!("{}-{}", queue, Uuid::new_v4().simple()),
            concurrency,
            poll_interval: Duration::from_millis(500),
            rate_limit_per_second: None,
            visibility_timeout_seconds: 600,
        }
    }

    pub fn with_rate_limit(mut self, jobs_per_second: u32) -> Self {
        self.rate_limit_per_second = Some(jobs_per_second);
        self
    }
}

/// Long-lived worker pool for one queue.
///
/// Pulls jobs, runs the handler under a concurrency semaphore, and settles
/// each job with ack or fail. An optional dispatch interval enforces the
/// per-second ceiling (the alerts queue runs at 20 jobs/s).
pub struct QueueWorker {
    queue: Arc<dyn JobQueue>,
    handler: Arc<dyn JobHandler>,
    config: WorkerConfig,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl QueueWorker {
    pub fn new(queue: Arc<dyn JobQueue>, handler: Arc<dyn JobHandler>, config: WorkerConfig) -> Self {
        Self {
            queue,
            handler,
            config,
            shutdown_tx: None,
        }
    }

    /// Start the worker loop (non-blocking).
    pub fn start(&mut self) {
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        self.shutdown_tx = Some(shutdown_tx);

        let queue = Arc::clone(&self.queue);
        let handler = Arc::clone(&self.handler);
        let config = self.config.clone();

        tokio::spawn(async move {
            Self::worker_loop(queue, handler, config, shutdown_rx).await;
        });

        info!(
            worker = %self.config.worker_id,
            concurrency = self.config.concurrency,
            "Queue worker started"
        );
    }

    /// Request a graceful stop.
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
            info!(worker = %self.config.worker_id, "Queue worker shutdown requested");
        }
    }

    async fn worker_loop(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        config: WorkerConfig,
        mut shutdown_rx: mpsc::Receiver<()>,
    ) {
        let semaphore = Arc::new(Semaphore::new(config.concurrency));

        let mut poll_interval = tokio::time::interval(config.poll_interval);
        poll_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        // Minimum gap between dispatches when a rate limit is configured
        let dispatch_gap = config
            .rate_limit_per_second
            .map(|per_second| Duration::from_millis(1000 / per_second.max(1) as u64));

        let mut stale_sweep = tokio::time::interval(Duration::from_secs(60));
        stale_sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown_rx.recv() => {
                    info!(worker = %config.worker_id, "Shutdown signal received");
                    break;
                }
                _ = stale_sweep.tick() => {
                    match queue.requeue_stale(config.visibility_timeout_seconds).await {
                        Ok(0) => {}
                        Ok(n) => warn!(worker = %config.worker_id, reclaimed = n, "Reclaimed stale jobs"),
                        Err(e) => error!(worker = %config.worker_id, error = %e, "Stale sweep failed"),
                    }
                }
                _ = poll_interval.tick() => {
                    // Drain as many jobs as concurrency and the rate limit allow
                    loop {
                        let Ok(permit) = Arc::clone(&semaphore).try_acquire_owned() else {
                            break;
                        };

                        match queue.dequeue(&config.worker_id).await {
                            Ok(Some(job)) => {
                                let queue = Arc::clone(&queue);
                                let handler = Arc::clone(&handler);
                                let worker_id = config.worker_id.clone();

                                tokio::spawn(async move {
                                    let _permit = permit;
                                    Self::process_job(queue, handler, worker_id, job).await;
                                });

                                if let Some(gap) = dispatch_gap {
                                    tokio::time::sleep(gap).await;
                                }
                            }
                            Ok(None) => {
                                drop(permit);
                                break;
                            }
                            Err(e) => {
                                drop(permit);
                                error!(worker = %config.worker_id, error = %e, "Dequeue failed");
                                break;
                            }
                        }
                    }
                }
            }
        }

        // Wait for in-flight jobs before returning
        let _ = semaphore.acquire_many(config.concurrency as u32).await;
        info!(worker = %config.worker_id, "Queue worker stopped");
    }

    async fn process_job(
        queue: Arc<dyn JobQueue>,
        handler: Arc<dyn JobHandler>,
        worker_id: String,
        mut job: super::types::QueuedJob,
    ) {
        debug!(worker = %worker_id, job_id = %job.id, "Processing job");

        let outcome: Result<()> = handler.handle(&job).await;

        match outcome {
            Ok(()) => {
                if let Err(e) = queue.ack(&job).await {
                    error!(worker = %worker_id, job_id = %job.id, error = %e, "Ack failed");
                }
            }
            Err(e) => {
                let message = e.to_string();
                if let Err(settle_err) = queue.fail(&mut job, &message).await {
                    error!(
                        worker = %worker_id,
                        job_id = %job.id,
                        error = %settle_err,
                        "Failed to settle job after handler error"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_named_config() {
        let config = WorkerConfig::named("alerts", 3).with_rate_limit(20);
        assert!(config.worker_id.starts_with("alerts-"));
        assert_eq!(config.concurrency, 3);
        assert_eq!(config.rate_limit_per_second, Some(20));
    }

    #[test]
    fn test_dispatch_gap_for_rate_limit() {
        let per_second: u32 = 20;
        let gap = Duration::from_millis(1000 / per_second as u64);
        assert_eq!(gap, Duration::from_millis(50));
    }
}
