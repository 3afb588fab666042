use crate::dto::{LoginRequest, LoginResponse, RefreshRequest};
use crate::families::{RotationCheck, TokenFamilyStore};
use crate::lockout::{LockoutService, LockoutStatus};
use crate::models::{LoginAttempt, User};
use crate::repository::{LoginAttemptRepository, MfaRepository, UserRepository};
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;
use watchdog_core::{
    audit::{AuditAction, AuditEntry, AuditLogger},
    error::{Error, ErrorCode, Result},
    security::{AccessClaims, FieldEncryption, IssuedTokens, JwtService, PasswordHasher, TotpService},
    session::SessionManager,
    types::RequestContext,
    utils::mask_email,
};

/// Authentication core: login, token rotation with theft detection,
/// session management.
pub struct AuthService {
    pub(crate) users: UserRepository,
    pub(crate) attempts: LoginAttemptRepository,
    pub(crate) mfa: MfaRepository,
    pub(crate) jwt: JwtService,
    pub(crate) hasher: PasswordHasher,
    pub(crate) totp: TotpService,
    pub(crate) encryption: Arc<FieldEncryption>,
    pub(crate) sessions: Arc<SessionManager>,
    pub(crate) families: Arc<TokenFamilyStore>,
    pub(crate) lockout: Arc<LockoutService>,
    pub(crate) audit: AuditLogger,
    /// Hash verified against when the user does not exist, so the missing
    /// and wrong-password paths take the same time.
    dummy_hash: String,
}

impl AuthService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: UserRepository,
        attempts: LoginAttemptRepository,
        mfa: MfaRepository,
        jwt: JwtService,
        hasher: PasswordHasher,
        totp: TotpService,
        encryption: Arc<FieldEncryption>,
        sessions: Arc<SessionManager>,
        families: Arc<TokenFamilyStore>,
        lockout: Arc<LockoutService>,
        audit: AuditLogger,
    ) -> Result<Self> {
        let dummy_hash = hasher.hash_password(&Uuid::new_v4().to_string())?;

        Ok(Self {
            users,
            attempts,
            mfa,
            jwt,
            hasher,
            totp,
            encryption,
            sessions,
            families,
            lockout,
            audit,
            dummy_hash,
        })
    }

    /// Full login flow: lockout gate, credential verification with timing
    /// equalization, MFA, session-fixation prevention, token issuance.
    pub async fn login(&self, request: LoginRequest, ctx: &RequestContext) -> Result<LoginResponse> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let email = request.email.trim().to_lowercase();

        // 1. Lockout gate
        match self.lockout.check(&email).await? {
            LockoutStatus::Unlocked => {}
            LockoutStatus::TemporarilyLocked { retry_after_seconds } => {
                self.record_attempt(&email, ctx, false, Some("locked")).await;
                return Err(Error::locked(
                    "Account temporarily locked",
                    retry_after_seconds,
                ));
            }
            LockoutStatus::PermanentlyLocked => {
                self.record_attempt(&email, ctx, false, Some("permanently_locked"))
                    .await;
                return Err(Error::new(
                    ErrorCode::AccountLocked,
                    "Account locked, contact an administrator",
                ));
            }
        }

        // 2. User lookup with timing equalization
        let user = self.users.find_by_email(&email).await?;
        let Some(user) = user.filter(User::can_login) else {
            // Burn the same hashing cost as a real verification
            let _ = self.hasher.verify_password(&request.password, &self.dummy_hash);
            self.record_attempt(&email, ctx, false, Some("unknown_or_inactive"))
                .await;
            self.escalate_failure(&email, None, ctx).await?;
            return Err(Error::new(
                ErrorCode::InvalidCredentials,
                "Invalid email or password",
            ));
        };

        // 3. Password verification
        let password_hash = user.password_hash.as_deref().unwrap_or(&self.dummy_hash);
        if !self.hasher.verify_password(&request.password, password_hash)? {
            self.record_attempt(&email, ctx, false, Some("wrong_password"))
                .await;
            self.escalate_failure(&email, Some(user.id), ctx).await?;
            return Err(Error::new(
                ErrorCode::InvalidCredentials,
                "Invalid email or password",
            ));
        }

        // 4. MFA when enrolled
        if let Some(enrollment) = self.mfa.find_by_user(user.id).await? {
            let Some(code) = request.mfa_code.as_deref() else {
                return Err(Error::new(
                    ErrorCode::MfaRequired,
                    "Multi-factor code required",
                ));
            };

            if !self.verify_mfa_code(&user, &enrollment, code).await? {
                self.record_attempt(&email, ctx, false, Some("mfa_failure")).await;
                self.audit
                    .log_security_event(
                        AuditAction::MfaFailure,
                        Some(user.id),
                        ctx,
                        "MFA verification failed",
                    )
                    .await;
                self.escalate_failure(&email, Some(user.id), ctx).await?;
                return Err(Error::new(
                    ErrorCode::MfaVerificationFailed,
                    "Invalid email or password",
                ));
            }
        }

        // 5. Success: reset counters, destroy anything issued before this
        // login so a fixated session cannot survive it
        self.lockout.reset_attempts(&email).await?;
        self.sessions.terminate_user_sessions(user.id).await?;
        self.families.invalidate_user_families(user.id).await?;

        let tokens = self.issue_session(&user, ctx).await?;
        self.record_attempt(&email, ctx, true, None).await;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::LoginSuccess, "user")
                    .entity_id(user.id)
                    .performed_by(user.id)
                    .request_context(ctx)
                    .build(),
            )
            .await;

        info!(user_id = %user.id, email = %mask_email(&email), "Login succeeded");

        Ok(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer",
            expires_in: (tokens.access_expires_at - Utc::now()).num_seconds(),
        })
    }

    /// Rotate a refresh token, detecting replay of already-rotated tokens.
    pub async fn refresh(
        &self,
        request: RefreshRequest,
        ctx: &RequestContext,
    ) -> Result<LoginResponse> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let claims = self.jwt.verify_refresh_token(&request.refresh_token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| Error::new(ErrorCode::TokenInvalid, "Malformed subject claim"))?;
        let token_hash = TokenFamilyStore::hash_token(&request.refresh_token);

        let user = self
            .users
            .find_by_id(user_id)
            .await?
            .filter(User::can_login)
            .ok_or_else(|| Error::new(ErrorCode::TokenInvalid, "Invalid refresh token"))?;

        let Some(family_id) = claims.fid.clone() else {
            return self.migrate_legacy_refresh(&user, &claims.jti, ctx).await;
        };

        match self.families.classify(&family_id, &token_hash).await? {
            RotationCheck::Current => {
                let tokens = self
                    .rotate_within_family(&user, &family_id, &claims.jti, ctx)
                    .await?;

                self.audit
                    .log(
                        AuditEntry::builder(AuditAction::TokenRefreshed, "user")
                            .entity_id(user.id)
                            .performed_by(user.id)
                            .request_context(ctx)
                            .metadata("family_id", serde_json::Value::String(family_id))
                            .build(),
                    )
                    .await;

                Ok(LoginResponse {
                    access_token: tokens.access_token,
                    refresh_token: tokens.refresh_token,
                    token_type: "Bearer",
                    expires_in: (tokens.access_expires_at - Utc::now()).num_seconds(),
                })
            }
            RotationCheck::Reused => {
                self.handle_token_theft(&user, &family_id, ctx).await?;
                Err(Error::new(
                    ErrorCode::SecurityPolicyViolation,
                    "Invalid refresh token",
                )
                .as_security_event())
            }
            RotationCheck::Unknown | RotationCheck::MissingFamily => Err(Error::new(
                ErrorCode::TokenInvalid,
                "Invalid refresh token",
            )),
        }
    }

    /// Validate an access token for an authenticated request: signature,
    /// live session, jti blacklist, user-level blacklist.
    pub async fn validate_access(&self, access_token: &str) -> Result<AccessClaims> {
        let claims = self.jwt.verify_access_token(access_token)?;
        let user_id = Uuid::parse_str(&claims.sub)
            .map_err(|_| Error::new(ErrorCode::TokenInvalid, "Malformed subject claim"))?;

        if !self
            .sessions
            .is_token_valid(&claims.jti, user_id, claims.iat)
            .await?
        {
            return Err(Error::new(ErrorCode::TokenInvalid, "Session is no longer valid"));
        }

        self.sessions.touch_session(&claims.jti).await?;
        Ok(claims)
    }

    /// Terminate the caller's session.
    pub async fn logout(&self, claims: &AccessClaims, ctx: &RequestContext) -> Result<()> {
        self.sessions.terminate_session(&claims.jti).await?;

        if let Ok(user_id) = Uuid::parse_str(&claims.sub) {
            self.audit
                .log(
                    AuditEntry::builder(AuditAction::Logout, "user")
                        .entity_id(user_id)
                        .performed_by(user_id)
                        .request_context(ctx)
                        .build(),
                )
                .await;
        }

        Ok(())
    }

    /// List the user's sessions, marking the caller's own.
    pub async fn list_sessions(
        &self,
        user_id: Uuid,
        current_jti: &str,
    ) -> Result<Vec<watchdog_core::session::SessionInfo>> {
        self.sessions.list_sessions(user_id, current_jti).await
    }

    /// Terminate one session of the user's (e.g. from the session list).
    pub async fn terminate_session(
        &self,
        user_id: Uuid,
        jti: &str,
        ctx: &RequestContext,
    ) -> Result<()> {
        let Some(session) = self.sessions.get_session(jti).await? else {
            return Err(Error::not_found("Session"));
        };

        if session.user_id != user_id {
            return Err(Error::forbidden("Session belongs to another user"));
        }

        self.sessions.terminate_session(jti).await?;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::SessionTerminated, "session")
                    .entity_id(jti)
                    .performed_by(user_id)
                    .request_context(ctx)
                    .build(),
            )
            .await;

        Ok(())
    }

    // Internal helpers

    /// Issue a token pair under a brand-new family and register the
    /// session keyed by the shared jti.
    pub(crate) async fn issue_session(
        &self,
        user: &User,
        ctx: &RequestContext,
    ) -> Result<IssuedTokens> {
        let family_id = TokenFamilyStore::new_family_id();
        let tokens = self.jwt.issue_pair(user.id, user.role.as_str(), &family_id)?;

        let refresh_hash = TokenFamilyStore::hash_token(&tokens.refresh_token);
        self.families
            .create_family(&family_id, user.id, &refresh_hash)
            .await?;

        self.sessions
            .create_session(
                &tokens.jti,
                user.id,
                ctx.ip_address.clone(),
                ctx.user_agent.clone(),
            )
            .await?;

        Ok(tokens)
    }

    async fn rotate_within_family(
        &self,
        user: &User,
        family_id: &str,
        old_jti: &str,
        ctx: &RequestContext,
    ) -> Result<IssuedTokens> {
        let tokens = self.jwt.issue_pair(user.id, user.role.as_str(), family_id)?;
        let new_hash = TokenFamilyStore::hash_token(&tokens.refresh_token);

        self.families.rotate(family_id, &new_hash).await?;

        // The new pair carries a new shared jti; the old session dies with
        // the old one
        self.sessions.terminate_session(old_jti).await?;
        self.sessions
            .create_session(
                &tokens.jti,
                user.id,
                ctx.ip_address.clone(),
                ctx.user_agent.clone(),
            )
            .await?;

        Ok(tokens)
    }

    /// A refresh token issued before family tracking: honor it once by
    /// migrating it into a fresh family. The old session is consumed in
    /// the process, so presenting the same token again fails.
    async fn migrate_legacy_refresh(
        &self,
        user: &User,
        old_jti: &str,
        ctx: &RequestContext,
    ) -> Result<LoginResponse> {
        if self.sessions.get_session(old_jti).await?.is_none() {
            return Err(Error::new(ErrorCode::TokenInvalid, "Invalid refresh token"));
        }

        self.sessions.terminate_session(old_jti).await?;
        let tokens = self.issue_session(user, ctx).await?;

        info!(user_id = %user.id, "Legacy refresh token migrated to a token family");

        Ok(LoginResponse {
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
            token_type: "Bearer",
            expires_in: (tokens.access_expires_at - Utc::now()).num_seconds(),
        })
    }

    /// Replayed refresh token: assume the family is compromised and burn
    /// everything the user holds.
    async fn handle_token_theft(
        &self,
        user: &User,
        family_id: &str,
        ctx: &RequestContext,
    ) -> Result<()> {
        warn!(
            user_id = %user.id,
            family_id = %family_id,
            "Refresh token replay: invalidating all sessions and families"
        );

        self.families.invalidate_user_families(user.id).await?;
        self.sessions.terminate_user_sessions(user.id).await?;
        self.sessions.blacklist_user(user.id).await?;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::TokenTheftDetected, "user")
                    .entity_id(user.id)
                    .request_context(ctx)
                    .reason("Refresh token presented after rotation")
                    .metadata("theft_detected", serde_json::Value::Bool(true))
                    .metadata(
                        "family_id",
                        serde_json::Value::String(family_id.to_string()),
                    )
                    .build(),
            )
            .await;

        Ok(())
    }

    async fn escalate_failure(
        &self,
        email: &str,
        user_id: Option<Uuid>,
        ctx: &RequestContext,
    ) -> Result<()> {
        if let LockoutStatus::TemporarilyLocked { .. } | LockoutStatus::PermanentlyLocked =
            self.lockout.record_failure(email).await?
        {
            self.audit
                .log_security_event(
                    AuditAction::AccountLocked,
                    user_id,
                    ctx,
                    "Repeated authentication failures",
                )
                .await;
        }
        Ok(())
    }

    async fn record_attempt(
        &self,
        email: &str,
        ctx: &RequestContext,
        success: bool,
        reason: Option<&str>,
    ) {
        let attempt = LoginAttempt {
            id: Uuid::new_v4(),
            email: email.to_string(),
            ip_address: ctx.ip_address.clone(),
            success,
            attempted_at: Utc::now(),
            reason: reason.map(str::to_string),
        };

        if let Err(e) = self.attempts.record(&attempt).await {
            warn!(error = %e, "Failed to record login attempt");
        }
    }
}
