use chrono::{DateTime, Utc};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;
use watchdog_core::error::{Error, ErrorCode, Result};

/// State of one refresh-token family, stored under `fam:<fid>`.
///
/// Exactly one token is valid per family at any time. Every rotation moves
/// the previous token hash into the family's used set; presenting a hash
/// from that set is proof of replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenFamily {
    pub family_id: String,
    pub user_id: Uuid,
    pub current_token_hash: String,
    pub generation: u32,
    pub created_at: DateTime<Utc>,
}

/// Classification of a presented refresh token against its family.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RotationCheck {
    /// The one currently valid token; rotation may proceed.
    Current,
    /// A previously rotated token: replay, treat as theft.
    Reused,
    /// Family exists but the hash matches nothing we issued.
    Unknown,
    /// No such family (expired or already invalidated).
    MissingFamily,
}

/// Redis-backed refresh-token family registry.
pub struct TokenFamilyStore {
    redis: ConnectionManager,
    ttl_seconds: u64,
}

impl TokenFamilyStore {
    pub fn new(redis: ConnectionManager, ttl_seconds: u64) -> Self {
        Self { redis, ttl_seconds }
    }

    /// SHA-256 hex of a refresh token; raw tokens are never stored.
    pub fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }

    /// Generate a fresh family id. The caller embeds it in the refresh
    /// token, then registers the family with the issued token's hash.
    pub fn new_family_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Register a family owning `current_token_hash` under a pre-generated
    /// id (the id is minted before signing so the token can carry it).
    pub async fn create_family(
        &self,
        family_id: &str,
        user_id: Uuid,
        current_token_hash: &str,
    ) -> Result<()> {
        let family = TokenFamily {
            family_id: family_id.to_string(),
            user_id,
            current_token_hash: current_token_hash.to_string(),
            generation: 1,
            created_at: Utc::now(),
        };

        self.store_family(&family).await?;

        let mut conn = self.redis.clone();
        let user_key = user_families_key(user_id);
        let _: u32 = conn.sadd(&user_key, family_id).await?;
        let _: bool = conn.expire(&user_key, self.ttl_seconds as i64).await?;

        info!(user_id = %user_id, family_id = %family_id, "Token family created");
        Ok(())
    }

    pub async fn get_family(&self, family_id: &str) -> Result<Option<TokenFamily>> {
        let mut conn = self.redis.clone();
        let raw: Option<String> = conn.get(family_key(family_id)).await?;

        match raw {
            Some(data) => {
                let family: TokenFamily = serde_json::from_str(&data)
                    .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;
                Ok(Some(family))
            }
            None => Ok(None),
        }
    }

    /// Classify a presented token hash against the family state.
    pub async fn classify(&self, family_id: &str, token_hash: &str) -> Result<RotationCheck> {
        let Some(family) = self.get_family(family_id).await? else {
            return Ok(RotationCheck::MissingFamily);
        };

        if family.current_token_hash == token_hash {
            return Ok(RotationCheck::Current);
        }

        let mut conn = self.redis.clone();
        let reused: bool = conn
            .sismember(family_used_key(family_id), token_hash)
            .await?;

        if reused {
            warn!(family_id = %family_id, "Refresh token replay detected");
            Ok(RotationCheck::Reused)
        } else {
            Ok(RotationCheck::Unknown)
        }
    }

    /// Rotate the family onto a new token hash, retiring the old one into
    /// the used set.
    pub async fn rotate(&self, family_id: &str, new_token_hash: &str) -> Result<TokenFamily> {
        let Some(mut family) = self.get_family(family_id).await? else {
            return Err(Error::new(
                ErrorCode::TokenInvalid,
                "Token family no longer exists",
            ));
        };

        let old_hash = std::mem::replace(
            &mut family.current_token_hash,
            new_token_hash.to_string(),
        );
        family.generation += 1;

        let mut conn = self.redis.clone();
        let used_key = family_used_key(family_id);
        let _: u32 = conn.sadd(&used_key, &old_hash).await?;
        let _: bool = conn.expire(&used_key, self.ttl_seconds as i64).await?;

        self.store_family(&family).await?;
        Ok(family)
    }

    /// Destroy one family.
    pub async fn invalidate_family(&self, family_id: &str) -> Result<()> {
        let mut conn = self.redis.clone();

        if let Some(family) = self.get_family(family_id).await? {
            let _: u32 = conn
                .srem(user_families_key(family.user_id), family_id)
                .await?;
        }

        let _: u32 = conn.del(family_key(family_id)).await?;
        let _: u32 = conn.del(family_used_key(family_id)).await?;
        Ok(())
    }

    /// Destroy every family belonging to a user. Returns the count.
    pub async fn invalidate_user_families(&self, user_id: Uuid) -> Result<u32> {
        let mut conn = self.redis.clone();
        let user_key = user_families_key(user_id);
        let family_ids: Vec<String> = conn.smembers(&user_key).await?;

        let mut invalidated = 0;
        for family_id in &family_ids {
            let _: u32 = conn.del(family_key(family_id)).await?;
            let _: u32 = conn.del(family_used_key(family_id)).await?;
            invalidated += 1;
        }

        let _: u32 = conn.del(&user_key).await?;

        info!(user_id = %user_id, invalidated = invalidated, "Token families invalidated");
        Ok(invalidated)
    }

    async fn store_family(&self, family: &TokenFamily) -> Result<()> {
        let mut conn = self.redis.clone();
        let serialized = serde_json::to_string(family)
            .map_err(|e| Error::new(ErrorCode::SerializationError, e.to_string()))?;

        conn.set_ex::<_, _, ()>(family_key(&family.family_id), serialized, self.ttl_seconds)
            .await?;
        Ok(())
    }
}

fn family_key(family_id: &str) -> String {
    format!("fam:{}", family_id)
}

fn family_used_key(family_id: &str) -> String {
    format!("fam:{}:used", family_id)
}

fn user_families_key(user_id: Uuid) -> String {
    format!("user_families:{}", user_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hash_is_stable_sha256() {
        let a = TokenFamilyStore::hash_token("refresh-token-value");
        let b = TokenFamilyStore::hash_token("refresh-token-value");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert_ne!(a, TokenFamilyStore::hash_token("other-token"));
    }

    #[test]
    fn test_key_namespaces() {
        assert_eq!(family_key("f1"), "fam:f1");
        assert_eq!(family_used_key("f1"), "fam:f1:used");
        assert!(user_families_key(Uuid::nil()).starts_with("user_families:"));
    }
}
