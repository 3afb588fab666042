use crate::outbox::OutboxRepository;
use crate::storage::ObjectStorage;
use chrono::{Duration as ChronoDuration, Utc};
use redis::aio::ConnectionManager;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::{error, info, warn};
use watchdog_auth::repository::{LoginAttemptRepository, ResetTokenRepository};
use watchdog_core::{
    audit::{AuditAction, AuditEntry, AuditLogger, AuditRepository},
    config::RetentionConfig,
    error::Result,
    schedule::CronSchedule,
    session::scan_keys,
    types::RequestContext,
};

/// Outcome of one cleanup task.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub task: &'static str,
    pub success: bool,
    pub deleted_count: u64,
    pub duration_ms: u64,
    pub error: Option<String>,
}

impl TaskReport {
    fn from_outcome(task: &'static str, started: Instant, outcome: Result<u64>) -> Self {
        let duration_ms = started.elapsed().as_millis() as u64;
        match outcome {
            Ok(deleted_count) => Self {
                task,
                success: true,
                deleted_count,
                duration_ms,
                error: None,
            },
            Err(e) => Self {
                task,
                success: false,
                deleted_count: 0,
                duration_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

/// Executes the five cleanup tasks.
pub struct RetentionRunner {
    redis: ConnectionManager,
    outbox: OutboxRepository,
    login_attempts: LoginAttemptRepository,
    reset_tokens: ResetTokenRepository,
    audit_repository: AuditRepository,
    storage: Arc<dyn ObjectStorage>,
    audit: AuditLogger,
    config: RetentionConfig,
}

impl RetentionRunner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        redis: ConnectionManager,
        outbox: OutboxRepository,
        login_attempts: LoginAttemptRepository,
        reset_tokens: ResetTokenRepository,
        audit_repository: AuditRepository,
        storage: Arc<dyn ObjectStorage>,
        audit: AuditLogger,
        config: RetentionConfig,
    ) -> Self {
        Self {
            redis,
            outbox,
            login_attempts,
            reset_tokens,
            audit_repository,
            storage,
            audit,
            config,
        }
    }

    /// Run all five tasks concurrently and report each outcome. Task
    /// failures are isolated; the run itself never errors.
    pub async fn run_all(&self) -> Vec<TaskReport> {
        let (blacklist, outbox, attempts, tokens, audit_logs) = tokio::join!(
            self.cleanup_blacklist_orphans(),
            self.cleanup_outbox(),
            self.cleanup_login_attempts(),
            self.cleanup_reset_tokens(),
            self.cleanup_audit_logs(),
        );

        let reports = vec![blacklist, outbox, attempts, tokens, audit_logs];

        for report in &reports {
            if report.success {
                info!(
                    task = report.task,
                    deleted = report.deleted_count,
                    duration_ms = report.duration_ms,
                    "Retention task complete"
                );
            } else {
                error!(
                    task = report.task,
                    error = ?report.error,
                    "Retention task failed"
                );
            }
        }

        let total_deleted: u64 = reports.iter().map(|r| r.deleted_count).sum();
        self.audit
            .log(
                AuditEntry::builder(AuditAction::RetentionCompleted, "retention")
                    .request_context(&RequestContext::system())
                    .metadata("total_deleted", serde_json::Value::from(total_deleted))
                    .metadata(
                        "reports",
                        serde_json::to_value(&reports).unwrap_or_default(),
                    )
                    .build(),
            )
            .await;

        reports
    }

    /// Blacklist GC: a `bl:jti:*` key with no TTL is an orphan (every
    /// legitimate write uses SETEX) and is deleted.
    async fn cleanup_blacklist_orphans(&self) -> TaskReport {
        let started = Instant::now();
        let outcome = async {
            let mut conn = self.redis.clone();
            let keys = scan_keys(&mut conn, "bl:jti:*").await?;

            let mut deleted: u64 = 0;
            for key in keys {
                let ttl: i64 = redis::cmd("TTL")
                    .arg(&key)
                    .query_async(&mut conn)
                    .await
                    .map_err(watchdog_core::Error::from)?;

                if ttl == -1 {
                    let removed: u64 = redis::cmd("DEL")
                        .arg(&key)
                        .query_async(&mut conn)
                        .await
                        .map_err(watchdog_core::Error::from)?;
                    deleted += removed;
                }
            }

            Ok(deleted)
        }
        .await;

        TaskReport::from_outcome("kv_blacklist_gc", started, outcome)
    }

    async fn cleanup_outbox(&self) -> TaskReport {
        let started = Instant::now();
        let cutoff = Utc::now() - ChronoDuration::days(self.config.outbox_days as i64);
        let outcome = self
            .outbox
            .delete_processed_before(cutoff, self.config.batch_size)
            .await;
        TaskReport::from_outcome("outbox", started, outcome)
    }

    async fn cleanup_login_attempts(&self) -> TaskReport {
        let started = Instant::now();
        let cutoff = Utc::now() - ChronoDuration::days(self.config.login_attempt_days as i64);
        let outcome = self
            .login_attempts
            .delete_older_than(cutoff, self.config.batch_size)
            .await;
        TaskReport::from_outcome("login_attempts", started, outcome)
    }

    async fn cleanup_reset_tokens(&self) -> TaskReport {
        let started = Instant::now();
        let cutoff = Utc::now() - ChronoDuration::days(self.config.password_reset_days as i64);
        let outcome = self
            .reset_tokens
            .delete_expired(cutoff, self.config.batch_size)
            .await;
        TaskReport::from_outcome("password_reset_tokens", started, outcome)
    }

    /// Audit logs: optionally serialize the doomed entries to the archive
    /// sink as newline-delimited JSON, then delete in batches.
    async fn cleanup_audit_logs(&self) -> TaskReport {
        let started = Instant::now();
        let cutoff = Utc::now() - ChronoDuration::days(self.config.audit_log_days as i64);

        let outcome = async {
            if self.config.archive_audit_logs {
                self.archive_audit_logs(cutoff).await?;
            }
            self.audit_repository
                .delete_older_than(cutoff, self.config.batch_size)
                .await
        }
        .await;

        TaskReport::from_outcome("audit_logs", started, outcome)
    }

    async fn archive_audit_logs(&self, cutoff: chrono::DateTime<Utc>) -> Result<()> {
        let mut after_id = None;
        let mut lines = String::new();
        let mut archived: u64 = 0;

        loop {
            let batch = self
                .audit_repository
                .fetch_older_than(cutoff, after_id, self.config.batch_size)
                .await?;

            if batch.is_empty() {
                break;
            }

            for entry in &batch {
                lines.push_str(&serde_json::to_string(entry)?);
                lines.push('\n');
            }

            archived += batch.len() as u64;
            after_id = batch.last().map(|entry| entry.id);

            if (batch.len() as u32) < self.config.batch_size {
                break;
            }
        }

        if archived == 0 {
            return Ok(());
        }

        let key = format!(
            "archives/audit/{}-{}.ndjson",
            cutoff.format("%Y%m%d"),
            Utc::now().timestamp()
        );
        self.storage
            .put(&key, lines.as_bytes(), "application/x-ndjson")
            .await?;

        info!(archived = archived, key = %key, "Audit logs archived");
        Ok(())
    }
}

/// In-process cron scheduler for retention.
///
/// Parses a five-field expression at construction; each fire runs the
/// cleanup tasks unless a previous run is still in flight, in which case
/// the fire is dropped.
pub struct RetentionScheduler {
    schedule: CronSchedule,
    runner: Arc<RetentionRunner>,
    in_flight: Arc<Mutex<()>>,
}

impl RetentionScheduler {
    pub fn new(schedule_expression: &str, runner: Arc<RetentionRunner>) -> Result<Self> {
        Ok(Self {
            schedule: CronSchedule::parse(schedule_expression)?,
            runner,
            in_flight: Arc::new(Mutex::new(())),
        })
    }

    /// Start the scheduler loop (non-blocking).
    pub fn start(&self) {
        let schedule = self.schedule.clone();
        let runner = Arc::clone(&self.runner);
        let in_flight = Arc::clone(&self.in_flight);

        tokio::spawn(async move {
            info!(schedule = %schedule.expression(), "Retention scheduler started");

            loop {
                let Some(next) = schedule.upcoming() else {
                    error!("Cron schedule yields no future fire time, stopping scheduler");
                    return;
                };

                let wait = (next - Utc::now())
                    .to_std()
                    .unwrap_or(std::time::Duration::from_secs(1));
                tokio::time::sleep(wait).await;

                // Drop the fire if the previous run is still going
                match in_flight.try_lock() {
                    Ok(_guard) => {
                        info!(fired_at = %next, "Retention run starting");
                        runner.run_all().await;
                    }
                    Err(_) => {
                        warn!("Previous retention run still in flight, dropping this fire");
                    }
                }
            }
        });
    }

    /// Run the tasks immediately, bypassing the schedule (admin trigger).
    pub async fn run_now(&self) -> Vec<TaskReport> {
        let _guard = self.in_flight.lock().await;
        self.runner.run_all().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_report_from_error() {
        let started = Instant::now();
        let report = TaskReport::from_outcome(
            "outbox",
            started,
            Err(watchdog_core::Error::internal("db down")),
        );
        assert!(!report.success);
        assert_eq!(report.deleted_count, 0);
        assert!(report.error.as_deref().unwrap_or("").contains("db down"));
    }

    #[test]
    fn test_task_report_from_success() {
        let report = TaskReport::from_outcome("login_attempts", Instant::now(), Ok(42));
        assert!(report.success);
        assert_eq!(report.deleted_count, 42);
        assert!(report.error.is_none());
    }
}
