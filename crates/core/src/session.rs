use crate::{
    error::{Error, ErrorCode, Result},
    utils::parse_user_agent,
};
use chrono::{DateTime, Duration, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

/// Session data stored under `sess:<jti>`.
///
/// The key is the shared token id (`jti`) carried by both the access and
/// refresh token, so destroying the session invalidates the whole pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionData {
    pub jti: String,
    pub user_id: Uuid,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub browser: String,
    pub os: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// A session as presented in the session listing.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub jti: String,
    pub ip_address: Option<String>,
    pub browser: String,
    pub os: String,
    pub device_type: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub current: bool,
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Session lifetime; equals the refresh-token lifetime so a session
    /// outlives every token issued under it.
    pub session_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_ttl: Duration::days(7),
        }
    }
}

/// Redis-backed session registry with jti- and user-level blacklists.
pub struct SessionManager {
    redis: ConnectionManager,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(redis: ConnectionManager, config: SessionConfig) -> Self {
        Self { redis, config }
    }

    /// Create a session for a freshly issued token pair.
    pub async fn create_session(
        &self,
        jti: &str,
        user_id: Uuid,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Result<SessionData> {
        let now = Utc::now();
        let device = parse_user_agent(user_agent.as_deref().unwrap_or(""));

        let session = SessionData {
            jti: jti.to_string(),
            user_id,
            ip_address,
            user_agent,
            browser: device.browser,
            os: device.os,
            created_at: now,
            last_activity: now,
        };

        self.store_session(&session).await?;

        let mut conn = self.redis.clone();
        let user_key = user_sessions_key(user_id);
        let _: u32 = conn.sadd(&user_key, jti).await?;
        let _: bool = conn
            .expire(&user_key, self.config.session_ttl.num_seconds())
            .await?;

        info!(user_id = %user_id, jti = %jti, "Session created");
        Ok(session)
    }

    pub async fn get_session(&self, jti: &str) -> Result<Option<SessionData>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(session_key(jti)).await?;

        match raw {
            Some(data) => {
                let session: SessionData = serde_json::from_str(&data)
                    .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;
                Ok(Some(session))
            }
            None => Ok(None),
        }
    }

    /// Update `last_activity` without resetting the TTL window.
    pub async fn touch_session(&self, jti: &str) -> Result<()> {
        if let Some(mut session) = self.get_session(jti).await? {
            session.last_activity = Utc::now();
            let mut conn = self.redis.clone();
            let key = session_key(jti);
            let ttl: i64 = conn.ttl(&key).await?;
            let serialized = serde_json::to_string(&session)
                .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;
            if ttl > 0 {
                conn.set_ex::<_, _, ()>(&key, serialized, ttl as u64).await?;
            }
        }
        Ok(())
    }

    /// Destroy a single session and blacklist its jti for the remaining
    /// token lifetime.
    pub async fn terminate_session(&self, jti: &str) -> Result<()> {
        let mut conn = self.redis.clone();
        let key = session_key(jti);

        if let Some(session) = self.get_session(jti).await? {
            let _: u32 = conn
                .srem(user_sessions_key(session.user_id), jti)
                .await?;
        }

        let ttl: i64 = conn.ttl(&key).await?;
        let _: u32 = conn.del(&key).await?;
        self.blacklist_jti(jti, ttl.max(60) as u64).await?;

        debug!(jti = %jti, "Session terminated");
        Ok(())
    }

    /// Destroy every session for a user. Returns the number terminated.
    pub async fn terminate_user_sessions(&self, user_id: Uuid) -> Result<u32> {
        let mut conn = self.redis.clone();
        let user_key = user_sessions_key(user_id);
        let jtis: Vec<String> = conn.smembers(&user_key).await?;

        let mut terminated = 0;
        for jti in &jtis {
            self.terminate_session(jti).await?;
            terminated += 1;
        }

        let _: u32 = conn.del(&user_key).await?;

        info!(user_id = %user_id, terminated = terminated, "All user sessions terminated");
        Ok(terminated)
    }

    /// List sessions for a user, flagging the caller's own.
    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        current_jti: &str,
    ) -> Result<Vec<SessionInfo>> {
        let mut conn = self.redis.clone();
        let jtis: Vec<String> = conn.smembers(user_sessions_key(user_id)).await?;

        let mut sessions = Vec::new();
        for jti in jtis {
            if let Some(session) = self.get_session(&jti).await? {
                let device = parse_user_agent(session.user_agent.as_deref().unwrap_or(""));
                sessions.push(SessionInfo {
                    current: session.jti == current_jti,
                    jti: session.jti,
                    ip_address: session.ip_address,
                    browser: session.browser,
                    os: session.os,
                    device_type: device.device_type,
                    created_at: session.created_at,
                    last_activity: session.last_activity,
                });
            }
        }

        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    /// Blacklist a jti for `ttl_seconds`.
    pub async fn blacklist_jti(&self, jti: &str, ttl_seconds: u64) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(jti_blacklist_key(jti), "1", ttl_seconds)
            .await?;
        Ok(())
    }

    pub async fn is_jti_blacklisted(&self, jti: &str) -> Result<bool> {
        let mut conn = self.redis.clone();
        let exists: bool = conn.exists(jti_blacklist_key(jti)).await?;
        Ok(exists)
    }

    /// Invalidate every token issued to this user before now.
    pub async fn blacklist_user(&self, user_id: Uuid) -> Result<()> {
        let mut conn = self.redis.clone();
        conn.set_ex::<_, _, ()>(
            user_blacklist_key(user_id),
            Utc::now().timestamp(),
            self.config.session_ttl.num_seconds() as u64,
        )
        .await?;
        Ok(())
    }

    /// Full per-request token check: the session must exist, the jti must
    /// not be blacklisted, and the token must have been issued after any
    /// user-level invalidation.
    pub async fn is_token_valid(&self, jti: &str, user_id: Uuid, issued_at: i64) -> Result<bool> {
        if self.get_session(jti).await?.is_none() {
            return Ok(false);
        }

        if self.is_jti_blacklisted(jti).await? {
            return Ok(false);
        }

        let mut conn = self.redis.clone();
        let cutoff: Option<i64> = conn.get(user_blacklist_key(user_id)).await?;
        if let Some(cutoff) = cutoff {
            if issued_at < cutoff {
                return Ok(false);
            }
        }

        Ok(true)
    }

    /// Drop `user_sessions` set members whose session key no longer exists.
    pub async fn cleanup_orphaned_members(&self, user_id: Uuid) -> Result<u32> {
        let mut conn = self.redis.clone();
        let user_key = user_sessions_key(user_id);
        let jtis: Vec<String> = conn.smembers(&user_key).await?;

        let mut removed = 0;
        for jti in jtis {
            let exists: bool = conn.exists(session_key(&jti)).await?;
            if !exists {
                let _: u32 = conn.srem(&user_key, &jti).await?;
                removed += 1;
            }
        }

        Ok(removed)
    }

    async fn store_session(&self, session: &SessionData) -> Result<()> {
        let mut conn = self.redis.clone();
        let serialized = serde_json::to_string(session)
            .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;

        conn.set_ex::<_, _, ()>(
            session_key(&session.jti),
            serialized,
            self.config.session_ttl.num_seconds() as u64,
        )
        .await?;

        Ok(())
    }
}

fn session_key(jti: &str) -> String {
    format!("sess:{}", jti)
}

fn user_sessions_key(user_id: Uuid) -> String {
    format!("user_sessions:{}", user_id)
}

fn jti_blacklist_key(jti: &str) -> String {
    format!("bl:jti:{}", jti)
}

fn user_blacklist_key(user_id: Uuid) -> String {
    format!("bl:user:{}", user_id)
}

/// Non-blocking SCAN over keys matching a pattern.
///
/// Used by the retention task to garbage-collect orphaned blacklist keys;
/// KEYS is never issued against a production instance.
pub async fn scan_keys(conn: &mut ConnectionManager, pattern: &str) -> Result<Vec<String>> {
    let mut cursor: u64 = 0;
    let mut keys = Vec::new();

    loop {
        let (new_cursor, batch): (u64, Vec<String>) = redis::cmd("SCAN")
            .arg(cursor)
            .arg("MATCH")
            .arg(pattern)
            .arg("COUNT")
            .arg(100)
            .query_async(conn)
            .await?;

        keys.extend(batch);
        cursor = new_cursor;

        if cursor == 0 {
            break;
        }
    }

    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_namespaces() {
        let user_id = Uuid::nil();
        assert_eq!(session_key("abc"), "sess:abc");
        assert_eq!(jti_blacklist_key("abc"), "bl:jti:abc");
        assert!(user_sessions_key(user_id).starts_with("user_sessions:"));
        assert!(user_blacklist_key(user_id).starts_with("bl:user:"));
    }
}
