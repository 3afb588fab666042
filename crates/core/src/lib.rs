pub mod audit;
pub mod config;
pub mod database;
pub mod error;
pub mod jobs;
pub mod rate_limit;
pub mod schedule;
pub mod security;
pub mod session;
pub mod types;
pub mod utils;

pub use audit::{AuditAction, AuditEntry, AuditLogger, AuditRepository};
pub use config::Config;
pub use database::{connect_redis, DatabasePool};
pub use error::{Error, ErrorCode, ErrorContext, Result};
pub use jobs::{JobHandler, JobQueue, QueuedJob, QueueWorker, RedisJobQueue};
pub use rate_limit::{RateIdentity, RateLimitDecision, RateLimitScope, RateLimiter};
pub use schedule::CronSchedule;
pub use session::{SessionConfig, SessionData, SessionInfo, SessionManager};
pub use types::*;

// Re-export commonly used types from dependencies
pub use chrono::{DateTime, Utc};
pub use uuid::Uuid;
