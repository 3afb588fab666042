use crate::{
    config::RateLimitConfig,
    error::{Error, Result},
};
use chrono::Utc;
use redis::aio::ConnectionManager;
use std::fmt;
use tracing::warn;
use uuid::Uuid;

/// Rate-limit scopes with their preset ceilings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateLimitScope {
    Default,
    Auth,
    Upload,
    Export,
    ApiKey,
}

impl RateLimitScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RateLimitScope::Default => "default",
            RateLimitScope::Auth => "auth",
            RateLimitScope::Upload => "upload",
            RateLimitScope::Export => "export",
            RateLimitScope::ApiKey => "api_key",
        }
    }

    fn max_requests(&self, config: &RateLimitConfig) -> u32 {
        match self {
            RateLimitScope::Default => config.default_max,
            RateLimitScope::Auth => config.auth_max,
            RateLimitScope::Upload => config.upload_max,
            RateLimitScope::Export => config.export_max,
            RateLimitScope::ApiKey => config.api_key_max,
        }
    }
}

/// The identity a window is keyed by.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateIdentity {
    /// First 16 characters of an API key.
    ApiKeyPrefix(String),
    User(Uuid),
    Ip(String),
    /// Combined email + IP window, used by the password-reset flow.
    EmailIp { email: String, ip: String },
}

impl fmt::Display for RateIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RateIdentity::ApiKeyPrefix(prefix) => write!(f, "api:{}", prefix),
            RateIdentity::User(id) => write!(f, "user:{}", id),
            RateIdentity::Ip(ip) => write!(f, "ip:{}", ip),
            RateIdentity::EmailIp { email, ip } => write!(f, "email_ip:{}:{}", email, ip),
        }
    }
}

/// Outcome of a rate-limit check, carrying everything needed for the
/// `X-RateLimit-*` response headers.
#[derive(Debug, Clone)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// Unix seconds at which the window resets.
    pub reset_at: i64,
    /// Populated on rejection for the `Retry-After` header.
    pub retry_after_seconds: Option<u64>,
}

/// Sliding-window rate limiter over Redis sorted sets.
///
/// Each window is `rl:<scope>:<identity>`: a ZSET of request timestamps in
/// milliseconds. A check prunes entries older than the window, appends the
/// current request, reads the cardinality, and refreshes the key expiry in
/// one atomic pipeline, so concurrent checks never undercount.
///
/// When Redis is unreachable the limiter fails closed in production
/// (callers surface 503 with `Retry-After: 60`) and open otherwise.
pub struct RateLimiter {
    redis: ConnectionManager,
    config: RateLimitConfig,
    fail_closed: bool,
}

impl RateLimiter {
    pub fn new(redis: ConnectionManager, config: RateLimitConfig, fail_closed: bool) -> Self {
        Self {
            redis,
            config,
            fail_closed,
        }
    }

    pub async fn check(
        &self,
        scope: RateLimitScope,
        identity: &RateIdentity,
    ) -> Result<RateLimitDecision> {
        let limit = scope.max_requests(&self.config);
        let window_seconds = self.config.window_seconds;

        match self.count_in_window(scope, identity, window_seconds).await {
            Ok(count) => {
                let now = Utc::now().timestamp();
                let reset_at = now + window_seconds as i64;

                if count > limit as u64 {
                    Ok(RateLimitDecision {
                        allowed: false,
                        limit,
                        remaining: 0,
                        reset_at,
                        retry_after_seconds: Some(window_seconds),
                    })
                } else {
                    Ok(RateLimitDecision {
                        allowed: true,
                        limit,
                        remaining: limit.saturating_sub(count as u32),
                        reset_at,
                        retry_after_seconds: None,
                    })
                }
            }
            Err(e) => {
                if self.fail_closed {
                    warn!(scope = scope.as_str(), "Rate limit store unreachable, failing closed");
                    Err(Error::dependency_unavailable(
                        "Rate limiting unavailable, request denied",
                    )
                    .with_retry_after(60))
                } else {
                    warn!(
                        scope = scope.as_str(),
                        error = %e,
                        "Rate limit store unreachable, failing open"
                    );
                    Ok(RateLimitDecision {
                        allowed: true,
                        limit,
                        remaining: limit,
                        reset_at: Utc::now().timestamp() + window_seconds as i64,
                        retry_after_seconds: None,
                    })
                }
            }
        }
    }

    async fn count_in_window(
        &self,
        scope: RateLimitScope,
        identity: &RateIdentity,
        window_seconds: u64,
    ) -> Result<u64> {
        let key = format!("rl:{}:{}", scope.as_str(), identity);
        let now_ms = Utc::now().timestamp_millis();
        let window_start = now_ms - (window_seconds as i64) * 1000;
        // Member must be unique per request even within one millisecond
        let member = format!("{}:{}", now_ms, Uuid::new_v4().simple());

        let mut conn = self.redis.clone();
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .zrembyscore(&key, 0, window_start)
            .ignore()
            .zadd(&key, member, now_ms)
            .ignore()
            .zcard(&key)
            .expire(&key, window_seconds as i64)
            .ignore()
            .query_async(&mut conn)
            .await?;

        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RateLimitConfig {
        RateLimitConfig {
            window_seconds: 60,
            default_max: 100,
            auth_max: 10,
            upload_max: 20,
            export_max: 10,
            api_key_max: 1000,
        }
    }

    #[test]
    fn test_scope_presets() {
        let config = config();
        assert_eq!(RateLimitScope::Default.max_requests(&config), 100);
        assert_eq!(RateLimitScope::Auth.max_requests(&config), 10);
        assert_eq!(RateLimitScope::Upload.max_requests(&config), 20);
        assert_eq!(RateLimitScope::Export.max_requests(&config), 10);
        assert_eq!(RateLimitScope::ApiKey.max_requests(&config), 1000);
    }

    #[test]
    fn test_identity_key_shapes() {
        assert_eq!(
            RateIdentity::ApiKeyPrefix("cwk_abcdef123456".into()).to_string(),
            "api:cwk_abcdef123456"
        );
        assert_eq!(RateIdentity::Ip("10.1.2.3".into()).to_string(), "ip:10.1.2.3");
        assert!(RateIdentity::User(Uuid::nil()).to_string().starts_with("user:"));
    }
}
