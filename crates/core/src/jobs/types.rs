use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Backoff schedule applied to failed jobs: base 1 s, factor 2, capped at
/// 5 minutes.
pub const RETRY_BASE_SECONDS: u64 = 1;
pub const RETRY_CAP_SECONDS: u64 = 300;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;

/// Unique identifier for a job
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Current state of a job in the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting to be picked up by a worker
    Queued,
    /// Currently being processed
    Processing,
    /// Completed and acked
    Completed,
    /// Failed but scheduled for another attempt
    Retrying,
    /// Attempt budget exhausted, parked on the dead-letter list
    DeadLettered,
}

/// Options accepted at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Delay before the job becomes visible.
    pub delay: Option<Duration>,
    /// Override of the attempt budget.
    pub max_attempts: Option<u32>,
}

/// A job as stored in the queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedJob {
    pub id: JobId,
    pub queue: String,
    pub payload: serde_json::Value,
    pub state: JobState,
    pub attempts: u32,
    pub max_attempts: u32,
    pub created_at: DateTime<Utc>,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl QueuedJob {
    pub fn new(queue: impl Into<String>, payload: serde_json::Value, opts: EnqueueOptions) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            queue: queue.into(),
            payload,
            state: JobState::Queued,
            attempts: 0,
            max_attempts: opts.max_attempts.unwrap_or(DEFAULT_MAX_ATTEMPTS),
            created_at: now,
            scheduled_for: opts.delay.map(|d| now + d),
            started_at: None,
            completed_at: None,
            last_error: None,
        }
    }

    pub fn is_ready_to_run(&self) -> bool {
        match self.state {
            JobState::Queued | JobState::Retrying => self
                .scheduled_for
                .map(|at| Utc::now() >= at)
                .unwrap_or(true),
            _ => false,
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    pub fn mark_processing(&mut self) {
        self.state = JobState::Processing;
        self.started_at = Some(Utc::now());
        self.attempts += 1;
    }

    pub fn mark_completed(&mut self) {
        self.state = JobState::Completed;
        self.completed_at = Some(Utc::now());
    }

    /// Transition after a failed attempt: schedule a retry with backoff, or
    /// dead-letter when the attempt budget is spent.
    pub fn mark_failed(&mut self, error: String) {
        if self.can_retry() {
            self.state = JobState::Retrying;
            self.scheduled_for =
                Some(Utc::now() + Duration::seconds(retry_delay_seconds(self.attempts) as i64));
        } else {
            self.state = JobState::DeadLettered;
            self.completed_at = Some(Utc::now());
        }
        self.last_error = Some(error);
    }
}

/// Exponential backoff: `1s · 2^(attempt-1)`, capped at 5 minutes.
pub fn retry_delay_seconds(attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(32);
    RETRY_BASE_SECONDS
        .saturating_mul(2_u64.saturating_pow(exponent))
        .min(RETRY_CAP_SECONDS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_retry_delay_schedule() {
        assert_eq!(retry_delay_seconds(1), 1);
        assert_eq!(retry_delay_seconds(2), 2);
        assert_eq!(retry_delay_seconds(3), 4);
        assert_eq!(retry_delay_seconds(9), 256);
        assert_eq!(retry_delay_seconds(10), 300);
        assert_eq!(retry_delay_seconds(40), 300);
    }

    #[test]
    fn test_job_lifecycle() {
        let mut job = QueuedJob::new("anomaly", json!({"cost_record_id": "x"}), EnqueueOptions::default());
        assert_eq!(job.state, JobState::Queued);
        assert_eq!(job.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(job.is_ready_to_run());

        job.mark_processing();
        assert_eq!(job.state, JobState::Processing);
        assert_eq!(job.attempts, 1);
        assert!(!job.is_ready_to_run());

        job.mark_failed("connection refused".into());
        assert_eq!(job.state, JobState::Retrying);
        assert!(job.scheduled_for.is_some());

        job.attempts = job.max_attempts;
        job.mark_failed("still broken".into());
        assert_eq!(job.state, JobState::DeadLettered);
    }

    #[test]
    fn test_delayed_job_not_ready() {
        let job = QueuedJob::new(
            "alerts",
            json!({}),
            EnqueueOptions {
                delay: Some(Duration::minutes(5)),
                max_attempts: Some(3),
            },
        );
        assert!(!job.is_ready_to_run());
        assert_eq!(job.max_attempts, 3);
    }
}
