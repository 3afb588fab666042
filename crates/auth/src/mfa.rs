use crate::dto::{MfaDisableRequest, MfaEnrollRequest, MfaEnrollResponse};
use crate::models::{MfaEnrollment, User};
use crate::service::AuthService;
use chrono::Utc;
use tracing::info;
use uuid::Uuid;
use validator::Validate;
use watchdog_core::{
    audit::{AuditAction, AuditEntry},
    error::{Error, ErrorCode, Result},
    types::RequestContext,
};

const BACKUP_CODE_COUNT: usize = 10;

/// TOTP enrollment, verification and teardown.
impl AuthService {
    /// Enroll TOTP for a user. Requires password re-verification; returns
    /// the secret, provisioning URI and backup codes exactly once.
    pub async fn enroll_mfa(
        &self,
        user_id: Uuid,
        request: MfaEnrollRequest,
        ctx: &RequestContext,
    ) -> Result<MfaEnrollResponse> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let user = self.require_user(user_id).await?;
        self.require_password(&user, &request.password)?;

        let secret = self.totp.generate_secret();
        let secret_encrypted = self.encryption.encrypt_string(&secret)?;

        let backup_codes = self.totp.generate_backup_codes(BACKUP_CODE_COUNT);
        let backup_code_hashes = backup_codes
            .iter()
            .map(|code| self.totp.hash_backup_code(code))
            .collect();

        let enrollment = MfaEnrollment {
            user_id,
            method: "totp".to_string(),
            secret_encrypted,
            backup_code_hashes,
            enrolled_at: Utc::now(),
        };
        self.mfa.upsert(&enrollment).await?;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::MfaEnrolled, "user")
                    .entity_id(user_id)
                    .performed_by(user_id)
                    .request_context(ctx)
                    .build(),
            )
            .await;

        info!(user_id = %user_id, "MFA enrolled");

        Ok(MfaEnrollResponse {
            provisioning_uri: self.totp.provisioning_uri(&secret, &user.email),
            secret,
            backup_codes,
        })
    }

    /// Disable MFA. Requires password re-verification; administrators
    /// must keep MFA enabled.
    pub async fn disable_mfa(
        &self,
        user_id: Uuid,
        request: MfaDisableRequest,
        ctx: &RequestContext,
    ) -> Result<()> {
        request
            .validate()
            .map_err(|e| Error::validation(e.to_string()))?;

        let user = self.require_user(user_id).await?;

        if user.is_admin() {
            return Err(Error::forbidden(
                "Administrators cannot disable multi-factor authentication",
            ));
        }

        self.require_password(&user, &request.password)?;

        if !self.mfa.delete(user_id).await? {
            return Err(Error::not_found("MFA enrollment"));
        }

        self.audit
            .log(
                AuditEntry::builder(AuditAction::MfaDisabled, "user")
                    .entity_id(user_id)
                    .performed_by(user_id)
                    .request_context(ctx)
                    .build(),
            )
            .await;

        info!(user_id = %user_id, "MFA disabled");
        Ok(())
    }

    /// Verify a TOTP code, falling back to single-use backup codes.
    pub(crate) async fn verify_mfa_code(
        &self,
        user: &User,
        enrollment: &MfaEnrollment,
        code: &str,
    ) -> Result<bool> {
        let secret = self
            .encryption
            .decrypt_string(&enrollment.secret_encrypted)?;

        if self.totp.verify_code(&secret, code)? {
            return Ok(true);
        }

        // Backup code path: consumption is atomic, so a code verifies at
        // most once
        let code_hash = self.totp.hash_backup_code(code);
        if enrollment.backup_code_hashes.contains(&code_hash) {
            return self.mfa.consume_backup_code(user.id, &code_hash).await;
        }

        Ok(false)
    }

    pub(crate) async fn require_user(&self, user_id: Uuid) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .filter(|user| user.is_active)
            .ok_or_else(|| Error::not_found("User"))
    }

    pub(crate) fn require_password(&self, user: &User, password: &str) -> Result<()> {
        let hash = user
            .password_hash
            .as_deref()
            .ok_or_else(|| Error::new(ErrorCode::InvalidCredentials, "Invalid email or password"))?;

        if !self.hasher.verify_password(password, hash)? {
            return Err(Error::new(
                ErrorCode::InvalidCredentials,
                "Invalid email or password",
            ));
        }
        Ok(())
    }
}
