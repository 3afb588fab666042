//! Queue-backed background work.
//!
//! Named durable queues live in Redis; workers pull jobs, process them, and
//! explicitly ack. A job that fails is retried with exponential backoff
//! (base 1 s, factor 2, cap 5 min) up to its attempt budget, then moved to
//! the queue's dead-letter list. Jobs abandoned mid-flight are reclaimed
//! after the visibility timeout.

pub mod executor;
pub mod queue;
pub mod traits;
pub mod types;

pub use executor::{QueueWorker, WorkerConfig};
pub use queue::RedisJobQueue;
pub use traits::{JobHandler, JobQueue, QueueStats};
pub use types::{EnqueueOptions, JobId, JobState, QueuedJob};
