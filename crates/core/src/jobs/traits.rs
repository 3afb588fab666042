use super::types::{EnqueueOptions, JobId, QueuedJob};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;

/// Counters maintained per queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub enqueued: u64,
    pub completed: u64,
    pub failed_attempts: u64,
    pub dead_lettered: u64,
    pub ready: u64,
    pub delayed: u64,
    pub processing: u64,
}

/// A named durable queue.
///
/// Consumers pull with [`JobQueue::dequeue`], then settle each job with
/// exactly one of [`JobQueue::ack`] or [`JobQueue::fail`]. Jobs neither
/// acked nor failed are reclaimed by [`JobQueue::requeue_stale`] once the
/// visibility timeout elapses.
#[async_trait]
pub trait JobQueue: Send + Sync {
    fn name(&self) -> &str;

    async fn enqueue(&self, payload: serde_json::Value, opts: EnqueueOptions) -> Result<JobId>;

    async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedJob>>;

    async fn ack(&self, job: &QueuedJob) -> Result<()>;

    /// Record a failed attempt: requeue with backoff while the attempt
    /// budget lasts, dead-letter afterwards.
    async fn fail(&self, job: &mut QueuedJob, error: &str) -> Result<()>;

    /// Reclaim jobs stuck in processing longer than `timeout_seconds`.
    async fn requeue_stale(&self, timeout_seconds: u64) -> Result<u32>;

    async fn stats(&self) -> Result<QueueStats>;
}

/// Processes jobs pulled from one queue.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Queue this handler consumes.
    fn queue(&self) -> &'static str;

    async fn handle(&self, job: &QueuedJob) -> Result<()>;
}
