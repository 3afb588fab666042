use crate::dto::{PasswordResetConfirm, PasswordResetRequest};
use crate::families::TokenFamilyStore;
use crate::models::{PasswordResetToken, User};
use crate::repository::{ResetTokenRepository, UserRepository};
use chrono::{Duration, Utc};
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;
use watchdog_core::{
    audit::{AuditAction, AuditEntry, AuditLogger},
    error::{Error, ErrorCode, Result},
    rate_limit::{RateIdentity, RateLimitScope, RateLimiter},
    security::PasswordHasher,
    session::SessionManager,
    types::RequestContext,
    utils::mask_email,
};

const TOKEN_LIFETIME_HOURS: i64 = 1;

/// A reset token ready to be delivered to the user.
///
/// The raw token leaves this module only toward the mail template; the
/// database sees nothing but its hash.
#[derive(Debug)]
pub struct IssuedResetToken {
    pub user_id: Uuid,
    pub email: String,
    pub token: String,
}

/// Password-reset workflow: request (rate-limited, enumeration-safe) and
/// confirmation (single-use token, full session teardown).
pub struct PasswordResetService {
    users: UserRepository,
    tokens: ResetTokenRepository,
    hasher: PasswordHasher,
    sessions: Arc<SessionManager>,
    families: Arc<TokenFamilyStore>,
    rate_limiter: Arc<RateLimiter>,
    audit: AuditLogger,
}

impl PasswordResetService {
    pub fn new(
        users: UserRepository,
        tokens: ResetTokenRepository,
        hasher: PasswordHasher,
        sessions: Arc<SessionManager>,
        families: Arc<TokenFamilyStore>,
        rate_limiter: Arc<RateLimiter>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            users,
            tokens,
            hasher,
            sessions,
            families,
            rate_limiter,
            audit,
        }
    }

    /// Issue a reset token for the address, or `None` when the address is
    /// unknown. Callers must respond identically in both cases.
    pub async fn request_reset(
        &self,
        request: PasswordResetRequest,
        ctx: &RequestContext,
    ) -> Result<Option<IssuedResetToken>> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let email = request.email.trim().to_lowercase();

        let identity = RateIdentity::EmailIp {
            email: email.clone(),
            ip: ctx.ip_address.clone().unwrap_or_else(|| "unknown".to_string()),
        };
        let decision = self
            .rate_limiter
            .check(RateLimitScope::Auth, &identity)
            .await?;
        if !decision.allowed {
            return Err(Error::rate_limited(
                decision.retry_after_seconds.unwrap_or(60),
            ));
        }

        let Some(user) = self.users.find_by_email(&email).await?.filter(User::can_login)
        else {
            // Same outward behavior for unknown addresses
            info!(email = %mask_email(&email), "Password reset requested for unknown address");
            return Ok(None);
        };

        let mut token_bytes = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut token_bytes);
        let token = hex::encode(token_bytes);

        let record = PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: user.id,
            token_hash: Self::hash_token(&token),
            expires_at: Utc::now() + Duration::hours(TOKEN_LIFETIME_HOURS),
            used_at: None,
            created_at: Utc::now(),
        };
        self.tokens.insert(&record).await?;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::PasswordResetRequested, "user")
                    .entity_id(user.id)
                    .request_context(ctx)
                    .build(),
            )
            .await;

        Ok(Some(IssuedResetToken {
            user_id: user.id,
            email: user.email,
            token,
        }))
    }

    /// Consume a reset token and set the new password. Every session and
    /// token family of the user is destroyed on success.
    pub async fn confirm_reset(
        &self,
        request: PasswordResetConfirm,
        ctx: &RequestContext,
    ) -> Result<()> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let record = self
            .tokens
            .find_by_hash(&Self::hash_token(&request.token))
            .await?
            .ok_or_else(|| Error::new(ErrorCode::TokenInvalid, "Invalid or expired reset token"))?;

        if !record.is_usable(Utc::now()) {
            return Err(Error::new(
                ErrorCode::TokenInvalid,
                "Invalid or expired reset token",
            ));
        }

        // Single-use: the row update races at most one winner
        if !self.tokens.mark_used(record.id).await? {
            warn!(user_id = %record.user_id, "Reset token raced a concurrent use");
            return Err(Error::new(
                ErrorCode::TokenInvalid,
                "Invalid or expired reset token",
            ));
        }

        let password_hash = self.hasher.hash_password(&request.new_password)?;
        self.users
            .update_password_hash(record.user_id, &password_hash)
            .await?;

        self.sessions
            .terminate_user_sessions(record.user_id)
            .await?;
        self.families
            .invalidate_user_families(record.user_id)
            .await?;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::PasswordResetCompleted, "user")
                    .entity_id(record.user_id)
                    .performed_by(record.user_id)
                    .request_context(ctx)
                    .build(),
            )
            .await;

        info!(user_id = %record.user_id, "Password reset completed, all sessions terminated");
        Ok(())
    }

    fn hash_token(token: &str) -> String {
        hex::encode(Sha256::digest(token.as_bytes()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_hash_is_deterministic() {
        let a = PasswordResetService::hash_token("deadbeef");
        let b = PasswordResetService::hash_token("deadbeef");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
    }
}
