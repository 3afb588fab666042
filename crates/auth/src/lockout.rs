use redis::{aio::ConnectionManager, AsyncCommands};
use tracing::{info, warn};
use watchdog_core::{config::SecurityConfig, error::Result};

const LOCKOUT_BASE_MINUTES: u64 = 15;
const LOCKOUT_COUNT_WINDOW_SECONDS: u64 = 24 * 60 * 60;
/// Permanent locks carry a long TTL instead of none so abandoned accounts
/// do not leak keys forever; admin unlock clears them explicitly.
const PERMANENT_LOCK_TTL_SECONDS: u64 = 365 * 24 * 60 * 60;

/// Result of a lockout check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockoutStatus {
    Unlocked,
    /// Temporarily locked; retry after the given seconds.
    TemporarilyLocked { retry_after_seconds: u64 },
    /// Locked until an administrator intervenes.
    PermanentlyLocked,
}

/// Progressive account lockout over Redis counters.
///
/// Five failures inside the 15-minute window lock the account for
/// `15 × lockout_count` minutes (15, 30, 45). The third lockout within 24
/// hours becomes permanent. All updates are atomic increments with
/// expiry; there is no read-modify-write window.
pub struct LockoutService {
    redis: ConnectionManager,
    max_attempts: u32,
    window_seconds: u64,
    max_lockouts: u32,
}

impl LockoutService {
    pub fn new(redis: ConnectionManager, config: &SecurityConfig) -> Self {
        Self {
            redis,
            max_attempts: config.lockout_max_attempts,
            window_seconds: config.lockout_window_seconds,
            max_lockouts: config.lockout_max_lockouts,
        }
    }

    /// Current lockout state for an email.
    pub async fn check(&self, email: &str) -> Result<LockoutStatus> {
        let email = normalize(email);
        let mut conn = self.redis.clone();

        let kind: Option<String> = conn.get(locked_key(&email)).await?;
        match kind.as_deref() {
            Some("permanent") => Ok(LockoutStatus::PermanentlyLocked),
            Some(_) => {
                let ttl: i64 = conn.ttl(locked_key(&email)).await?;
                Ok(LockoutStatus::TemporarilyLocked {
                    retry_after_seconds: ttl.max(1) as u64,
                })
            }
            None => Ok(LockoutStatus::Unlocked),
        }
    }

    /// Record a failed attempt; may transition the account into a lock.
    /// Returns the state after the attempt.
    pub async fn record_failure(&self, email: &str) -> Result<LockoutStatus> {
        let email = normalize(email);
        let mut conn = self.redis.clone();

        let attempts_key = attempts_key(&email);
        // INCR + NX expiry as one pipeline so the window starts atomically
        // with the first failure
        let (attempts,): (u32,) = redis::pipe()
            .atomic()
            .incr(&attempts_key, 1)
            .cmd("EXPIRE")
            .arg(&attempts_key)
            .arg(self.window_seconds)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;

        if attempts < self.max_attempts {
            return Ok(LockoutStatus::Unlocked);
        }

        // Threshold reached: escalate
        let count_key = lockout_count_key(&email);
        let (lockout_count,): (u32,) = redis::pipe()
            .atomic()
            .incr(&count_key, 1)
            .cmd("EXPIRE")
            .arg(&count_key)
            .arg(LOCKOUT_COUNT_WINDOW_SECONDS)
            .arg("NX")
            .ignore()
            .query_async(&mut conn)
            .await?;

        let _: u32 = conn.del(&attempts_key).await?;

        if lockout_count >= self.max_lockouts {
            conn.set_ex::<_, _, ()>(locked_key(&email), "permanent", PERMANENT_LOCK_TTL_SECONDS)
                .await?;
            warn!(email = %watchdog_core::utils::mask_email(&email), "Account permanently locked");
            return Ok(LockoutStatus::PermanentlyLocked);
        }

        let duration_seconds = LOCKOUT_BASE_MINUTES * 60 * lockout_count as u64;
        conn.set_ex::<_, _, ()>(locked_key(&email), "temporary", duration_seconds)
            .await?;

        info!(
            email = %watchdog_core::utils::mask_email(&email),
            lockout_count = lockout_count,
            duration_seconds = duration_seconds,
            "Account temporarily locked"
        );

        Ok(LockoutStatus::TemporarilyLocked {
            retry_after_seconds: duration_seconds,
        })
    }

    /// Clear the failure counter after a successful login.
    pub async fn reset_attempts(&self, email: &str) -> Result<()> {
        let email = normalize(email);
        let mut conn = self.redis.clone();
        let _: u32 = conn.del(attempts_key(&email)).await?;
        Ok(())
    }

    /// Administrative unlock: clears lock, counters, and lockout history.
    pub async fn admin_unlock(&self, email: &str) -> Result<()> {
        let email = normalize(email);
        let mut conn = self.redis.clone();
        let _: u32 = conn.del(locked_key(&email)).await?;
        let _: u32 = conn.del(attempts_key(&email)).await?;
        let _: u32 = conn.del(lockout_count_key(&email)).await?;

        info!(email = %watchdog_core::utils::mask_email(&email), "Account unlocked by administrator");
        Ok(())
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_lowercase()
}

fn attempts_key(email: &str) -> String {
    format!("lockout:attempts:{}", email)
}

fn locked_key(email: &str) -> String {
    format!("lockout:locked:{}", email)
}

fn lockout_count_key(email: &str) -> String {
    format!("lockout:count:{}", email)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces_use_lowercased_email() {
        assert_eq!(attempts_key(&normalize("U@X.Y")), "lockout:attempts:u@x.y");
        assert_eq!(locked_key(&normalize("u@x.y ")), "lockout:locked:u@x.y");
        assert_eq!(lockout_count_key("u@x.y"), "lockout:count:u@x.y");
    }

    #[test]
    fn test_lock_durations_escalate() {
        for (count, minutes) in [(1u64, 15u64), (2, 30), (3, 45)] {
            assert_eq!(LOCKOUT_BASE_MINUTES * count, minutes);
        }
    }
}
