use super::traits::{JobQueue, QueueStats};
use super::types::{EnqueueOptions, JobId, JobState, QueuedJob};
use crate::error::{Error, ErrorCode, Result};
use async_trait::async_trait;
use chrono::Utc;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Redis-backed durable queue.
///
/// Key layout per queue `q`:
/// - `queue:q:ready`: list of job ids ready to run
/// - `queue:q:delayed`: zset of job ids scored by visibility time
/// - `queue:q:processing`: zset of job ids scored by dequeue time
/// - `queue:q:dead`: list of dead-lettered job ids
/// - `queue:q:job:<id>`: job JSON, kept for 7 days
/// - `queue:q:stats`: hash of counters
pub struct RedisJobQueue {
    redis: ConnectionManager,
    queue_name: String,
    ready_key: String,
    delayed_key: String,
    processing_key: String,
    dead_key: String,
    job_data_prefix: String,
    stats_key: String,
}

const JOB_DATA_TTL_SECONDS: u64 = 86_400 * 7;

impl RedisJobQueue {
    pub fn new(redis: ConnectionManager, queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        Self {
            redis,
            ready_key: format!("queue:{}:ready", queue_name),
            delayed_key: format!("queue:{}:delayed", queue_name),
            processing_key: format!("queue:{}:processing", queue_name),
            dead_key: format!("queue:{}:dead", queue_name),
            job_data_prefix: format!("queue:{}:job:", queue_name),
            stats_key: format!("queue:{}:stats", queue_name),
            queue_name,
        }
    }

    fn job_key(&self, job_id: &JobId) -> String {
        format!("{}{}", self.job_data_prefix, job_id.as_str())
    }

    async fn store_job_data(&self, job: &QueuedJob) -> Result<()> {
        let mut conn = self.redis.clone();
        let job_json = serde_json::to_string(job)
            .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;

        conn.set_ex::<_, _, ()>(&self.job_key(&job.id), job_json, JOB_DATA_TTL_SECONDS)
            .await?;
        Ok(())
    }

    async fn load_job_data(&self, job_id: &JobId) -> Result<Option<QueuedJob>> {
        let mut conn = self.redis.clone();
        let job_json: Option<String> = conn.get(&self.job_key(job_id)).await?;

        match job_json {
            Some(json) => {
                let job: QueuedJob = serde_json::from_str(&json)
                    .map_err(|e| Error::new(ErrorCode::JobDeserializationError, e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    /// Move delayed jobs whose visibility time has arrived to the ready
    /// list.
    async fn promote_delayed_jobs(&self) -> Result<u32> {
        let mut conn = self.redis.clone();
        let now_timestamp = Utc::now().timestamp();

        let ready_ids: Vec<String> = conn
            .zrangebyscore_limit(&self.delayed_key, 0, now_timestamp, 0, 100)
            .await?;

        if ready_ids.is_empty() {
            return Ok(0);
        }

        let mut moved = 0;
        for job_id_str in ready_ids {
            let job_id = JobId::from_string(job_id_str);

            if let Some(mut job) = self.load_job_data(&job_id).await? {
                let _: u32 = conn.zrem(&self.delayed_key, job_id.as_str()).await?;

                job.state = JobState::Queued;
                job.scheduled_for = None;
                self.store_job_data(&job).await?;

                conn.lpush::<_, _, ()>(&self.ready_key, job_id.as_str()).await?;
                moved += 1;
            } else {
                // Job data expired; drop the orphaned reference
                let _: u32 = conn.zrem(&self.delayed_key, job_id.as_str()).await?;
            }
        }

        if moved > 0 {
            debug!(queue = %self.queue_name, moved = moved, "Promoted delayed jobs");
        }
        Ok(moved)
    }

    async fn incr_stat(&self, field: &str, by: i64) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.hincr::<_, _, _, ()>(&self.stats_key, field, by).await?;
        Ok(())
    }
}

#[async_trait]
impl JobQueue for RedisJobQueue {
    fn name(&self) -> &str {
        &self.queue_name
    }

    async fn enqueue(&self, payload: serde_json::Value, opts: EnqueueOptions) -> Result<JobId> {
        let job = QueuedJob::new(&self.queue_name, payload, opts);
        self.store_job_data(&job).await?;

        let mut conn = self.redis.clone();

        if let Some(scheduled_for) = job.scheduled_for {
            conn.zadd::<_, _, _, ()>(&self.delayed_key, job.id.as_str(), scheduled_for.timestamp())
                .await?;
            debug!(queue = %self.queue_name, job_id = %job.id, at = %scheduled_for, "Enqueued delayed job");
        } else {
            conn.lpush::<_, _, ()>(&self.ready_key, job.id.as_str()).await?;
            debug!(queue = %self.queue_name, job_id = %job.id, "Enqueued job");
        }

        self.incr_stat("enqueued", 1).await?;
        Ok(job.id)
    }

    async fn dequeue(&self, worker_id: &str) -> Result<Option<QueuedJob>> {
        self.promote_delayed_jobs().await?;

        let mut conn = self.redis.clone();
        let job_id_opt: Option<String> = conn.rpop(&self.ready_key, None).await?;

        let Some(job_id_str) = job_id_opt else {
            return Ok(None);
        };
        let job_id = JobId::from_string(job_id_str);

        let Some(mut job) = self.load_job_data(&job_id).await? else {
            warn!(queue = %self.queue_name, job_id = %job_id, "Dequeued id without job data");
            return Ok(None);
        };

        if !job.is_ready_to_run() {
            return Ok(None);
        }

        job.mark_processing();
        self.store_job_data(&job).await?;

        conn.zadd::<_, _, _, ()>(&self.processing_key, job_id.as_str(), Utc::now().timestamp())
            .await?;

        debug!(queue = %self.queue_name, job_id = %job.id, worker = worker_id, attempt = job.attempts, "Dequeued job");
        Ok(Some(job))
    }

    async fn ack(&self, job: &QueuedJob) -> Result<()> {
        let mut conn = self.redis.clone();

        let mut completed = job.clone();
        completed.mark_completed();
        self.store_job_data(&completed).await?;

        let _: u32 = conn.zrem(&self.processing_key, job.id.as_str()).await?;
        self.incr_stat("completed", 1).await?;

        debug!(queue = %self.queue_name, job_id = %job.id, "Job acked");
        Ok(())
    }

    async fn fail(&self, job: &mut QueuedJob, error: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let _: u32 = conn.zrem(&self.processing_key, job.id.as_str()).await?;

        job.mark_failed(error.to_string());
        self.store_job_data(job).await?;
        self.incr_stat("failed_attempts", 1).await?;

        match job.state {
            JobState::Retrying => {
                let scheduled_for = job
                    .scheduled_for
                    .map(|at| at.timestamp())
                    .unwrap_or_else(|| Utc::now().timestamp());
                conn.zadd::<_, _, _, ()>(&self.delayed_key, job.id.as_str(), scheduled_for)
                    .await?;
                debug!(
                    queue = %self.queue_name,
                    job_id = %job.id,
                    attempt = job.attempts,
                    error = error,
                    "Job failed, retry scheduled"
                );
            }
            JobState::DeadLettered => {
                conn.lpush::<_, _, ()>(&self.dead_key, job.id.as_str()).await?;
                self.incr_stat("dead_lettered", 1).await?;
                warn!(
                    queue = %self.queue_name,
                    job_id = %job.id,
                    attempts = job.attempts,
                    error = error,
                    "Job dead-lettered"
                );
            }
            _ => {}
        }

        Ok(())
    }

    async fn requeue_stale(&self, timeout_seconds: u64) -> Result<u32> {
        let mut conn = self.redis.clone();
        let cutoff = Utc::now().timestamp() - timeout_seconds as i64;

        let stale_ids: Vec<String> = conn
            .zrangebyscore_limit(&self.processing_key, 0, cutoff, 0, 100)
            .await?;

        let mut reclaimed = 0;
        for job_id_str in stale_ids {
            let job_id = JobId::from_string(job_id_str);
            let _: u32 = conn.zrem(&self.processing_key, job_id.as_str()).await?;

            if let Some(mut job) = self.load_job_data(&job_id).await? {
                warn!(queue = %self.queue_name, job_id = %job_id, "Reclaiming stale job");
                self.fail(&mut job, "visibility timeout exceeded").await?;
                reclaimed += 1;
            }
        }

        Ok(reclaimed)
    }

    async fn stats(&self) -> Result<QueueStats> {
        let mut conn = self.redis.clone();

        let counters: HashMap<String, i64> = conn.hgetall(&self.stats_key).await?;
        let ready: u64 = conn.llen(&self.ready_key).await?;
        let delayed: u64 = conn.zcard(&self.delayed_key).await?;
        let processing: u64 = conn.zcard(&self.processing_key).await?;

        let get = |field: &str| counters.get(field).copied().unwrap_or(0).max(0) as u64;

        Ok(QueueStats {
            enqueued: get("enqueued"),
            completed: get("completed"),
            failed_attempts: get("failed_attempts"),
            dead_lettered: get("dead_lettered"),
            ready,
            delayed,
            processing,
        })
    }
}

/// Standard queue names used by the pipeline.
pub mod queues {
    pub const EXTRACTION: &str = "extraction";
    pub const ANOMALY: &str = "anomaly";
    pub const AGGREGATION: &str = "aggregation";
    pub const ALERTS: &str = "alerts";
    pub const RETENTION: &str = "retention";
}
