use crate::dto::{ApiKeyCreateRequest, ApiKeyCreateResponse};
use crate::models::ApiKey;
use crate::repository::ApiKeyRepository;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::info;
use uuid::Uuid;
use validator::Validate;
use watchdog_core::{
    audit::{AuditAction, AuditEntry, AuditLogger},
    error::{Error, ErrorCode, Result},
    types::RequestContext,
};

/// Length of the persisted human-readable prefix.
const KEY_PREFIX_LEN: usize = 12;

/// API key issuance and validation.
///
/// Keys are 256-bit random values rendered as `cwk_<base64url>`. The full
/// key is returned exactly once at creation; storage holds only the
/// SHA-256 hash plus the first twelve characters for identification.
pub struct ApiKeyService {
    repository: ApiKeyRepository,
    audit: AuditLogger,
}

impl ApiKeyService {
    pub fn new(repository: ApiKeyRepository, audit: AuditLogger) -> Self {
        Self { repository, audit }
    }

    pub async fn create(
        &self,
        request: ApiKeyCreateRequest,
        performed_by: Uuid,
        ctx: &RequestContext,
    ) -> Result<ApiKeyCreateResponse> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let key = format!("cwk_{}", URL_SAFE_NO_PAD.encode(secret));
        let key_prefix: String = key.chars().take(KEY_PREFIX_LEN).collect();

        let record = ApiKey {
            id: Uuid::new_v4(),
            key_hash: Self::hash_key(&key),
            key_prefix: key_prefix.clone(),
            name: request.name.clone(),
            scopes: request.scopes,
            expires_at: request
                .expires_in_days
                .map(|days| Utc::now() + Duration::days(days as i64)),
            revoked_at: None,
            is_active: true,
            last_used_at: None,
            created_at: Utc::now(),
        };

        self.repository.insert(&record).await?;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::ApiKeyCreated, "api_key")
                    .entity_id(record.id)
                    .performed_by(performed_by)
                    .request_context(ctx)
                    .metadata("key_prefix", serde_json::Value::String(key_prefix.clone()))
                    .build(),
            )
            .await;

        info!(api_key_id = %record.id, key_prefix = %key_prefix, "API key created");

        Ok(ApiKeyCreateResponse {
            id: record.id,
            key,
            key_prefix,
            name: request.name,
        })
    }

    /// Validate a presented key by hash lookup. Returns the key record and
    /// stamps `last_used_at`.
    pub async fn validate(&self, presented: &str) -> Result<ApiKey> {
        if !presented.starts_with("cwk_") {
            return Err(Error::new(ErrorCode::AuthenticationFailed, "Invalid API key"));
        }

        let key = self
            .repository
            .find_by_hash(&Self::hash_key(presented))
            .await?
            .ok_or_else(|| Error::new(ErrorCode::AuthenticationFailed, "Invalid API key"))?;

        self.repository.touch_last_used(key.id).await?;
        Ok(key)
    }

    pub async fn revoke(&self, id: Uuid, performed_by: Uuid, ctx: &RequestContext) -> Result<()> {
        if !self.repository.revoke(id).await? {
            return Err(Error::not_found("API key"));
        }

        self.audit
            .log(
                AuditEntry::builder(AuditAction::ApiKeyRevoked, "api_key")
                    .entity_id(id)
                    .performed_by(performed_by)
                    .request_context(ctx)
                    .build(),
            )
            .await;

        Ok(())
    }

    fn hash_key(key: &str) -> String {
        hex::encode(Sha256::digest(key.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_shape() {
        let mut secret = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut secret);
        let key = format!("cwk_{}", URL_SAFE_NO_PAD.encode(secret));

        assert!(key.starts_with("cwk_"));
        // 32 bytes base64url without padding is 43 characters
        assert_eq!(key.len(), 4 + 43);

        let prefix: String = key.chars().take(KEY_PREFIX_LEN).collect();
        assert_eq!(prefix.len(), 12);
        assert!(prefix.starts_with("cwk_"));
    }

    #[test]
    fn test_hash_is_hex_sha256() {
        let hash = ApiKeyService::hash_key("cwk_test");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, ApiKeyService::hash_key("cwk_test"));
    }
}
