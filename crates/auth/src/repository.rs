use crate::models::{ApiKey, LoginAttempt, MfaEnrollment, PasswordResetToken, User};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use tracing::debug;
use uuid::Uuid;
use watchdog_core::{error::Result, types::UserRole, DatabasePool, Error};

/// User persistence. Email lookups are always against the lowercased
/// address.
#[derive(Clone)]
pub struct UserRepository {
    db: DatabasePool,
}

fn map_user(row: &PgRow) -> Result<User> {
    let role_str: String = row.try_get("role")?;
    let role = UserRole::from_str(&role_str)
        .map_err(|e| Error::internal(format!("Corrupt user role: {}", e)))?;

    Ok(User {
        id: row.try_get("id")?,
        email: row.try_get("email")?,
        password_hash: row.try_get("password_hash")?,
        role,
        allowed_location_ids: row.try_get("allowed_location_ids")?,
        allowed_cost_center_ids: row.try_get("allowed_cost_center_ids")?,
        is_active: row.try_get("is_active")?,
        deleted_at: row.try_get("deleted_at")?,
        notification_settings: row.try_get("notification_settings")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

const USER_COLUMNS: &str = "id, email, password_hash, role, allowed_location_ids, \
     allowed_cost_center_ids, is_active, deleted_at, notification_settings, \
     created_at, updated_at";

impl UserRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim().to_lowercase();
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE email = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(&email)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_user).transpose()
    }

    pub async fn update_password_hash(&self, id: Uuid, password_hash: &str) -> Result<()> {
        sqlx::query("UPDATE users SET password_hash = $1, updated_at = NOW() WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(self.db.get())
            .await?;
        Ok(())
    }
}

/// MFA enrollment persistence; unique per user.
#[derive(Clone)]
pub struct MfaRepository {
    db: DatabasePool,
}

impl MfaRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn find_by_user(&self, user_id: Uuid) -> Result<Option<MfaEnrollment>> {
        let row = sqlx::query(
            "SELECT user_id, method, secret_encrypted, backup_code_hashes, enrolled_at
             FROM mfa_enrollments WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.db.get())
        .await?;

        Ok(match row {
            Some(row) => Some(MfaEnrollment {
                user_id: row.try_get("user_id")?,
                method: row.try_get("method")?,
                secret_encrypted: row.try_get("secret_encrypted")?,
                backup_code_hashes: row.try_get("backup_code_hashes")?,
                enrolled_at: row.try_get("enrolled_at")?,
            }),
            None => None,
        })
    }

    pub async fn upsert(&self, enrollment: &MfaEnrollment) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO mfa_enrollments (user_id, method, secret_encrypted, backup_code_hashes, enrolled_at)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                method = EXCLUDED.method,
                secret_encrypted = EXCLUDED.secret_encrypted,
                backup_code_hashes = EXCLUDED.backup_code_hashes,
                enrolled_at = EXCLUDED.enrolled_at
            "#,
        )
        .bind(enrollment.user_id)
        .bind(&enrollment.method)
        .bind(&enrollment.secret_encrypted)
        .bind(&enrollment.backup_code_hashes)
        .bind(enrollment.enrolled_at)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    /// Remove one consumed backup code hash.
    pub async fn consume_backup_code(&self, user_id: Uuid, code_hash: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE mfa_enrollments
             SET backup_code_hashes = array_remove(backup_code_hashes, $2)
             WHERE user_id = $1 AND $2 = ANY(backup_code_hashes)",
        )
        .bind(user_id)
        .bind(code_hash)
        .execute(self.db.get())
        .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete(&self, user_id: Uuid) -> Result<bool> {
        let result = sqlx::query("DELETE FROM mfa_enrollments WHERE user_id = $1")
            .bind(user_id)
            .execute(self.db.get())
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// API key persistence; lookup is by SHA-256 hash of the presented key.
#[derive(Clone)]
pub struct ApiKeyRepository {
    db: DatabasePool,
}

fn map_api_key(row: &PgRow) -> Result<ApiKey> {
    Ok(ApiKey {
        id: row.try_get("id")?,
        key_hash: row.try_get("key_hash")?,
        key_prefix: row.try_get("key_prefix")?,
        name: row.try_get("name")?,
        scopes: row.try_get("scopes")?,
        expires_at: row.try_get("expires_at")?,
        revoked_at: row.try_get("revoked_at")?,
        is_active: row.try_get("is_active")?,
        last_used_at: row.try_get("last_used_at")?,
        created_at: row.try_get("created_at")?,
    })
}

impl ApiKeyRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, key: &ApiKey) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO api_keys (id, key_hash, key_prefix, name, scopes, expires_at,
                                  revoked_at, is_active, last_used_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(key.id)
        .bind(&key.key_hash)
        .bind(&key.key_prefix)
        .bind(&key.name)
        .bind(&key.scopes)
        .bind(key.expires_at)
        .bind(key.revoked_at)
        .bind(key.is_active)
        .bind(key.last_used_at)
        .bind(key.created_at)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    pub async fn find_by_hash(&self, key_hash: &str) -> Result<Option<ApiKey>> {
        let row = sqlx::query(
            "SELECT id, key_hash, key_prefix, name, scopes, expires_at, revoked_at,
                    is_active, last_used_at, created_at
             FROM api_keys
             WHERE key_hash = $1 AND is_active AND revoked_at IS NULL
               AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(key_hash)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_api_key).transpose()
    }

    pub async fn touch_last_used(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.db.get())
            .await?;
        Ok(())
    }

    pub async fn revoke(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE api_keys SET revoked_at = NOW(), is_active = false
             WHERE id = $1 AND revoked_at IS NULL",
        )
        .bind(id)
        .execute(self.db.get())
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// Password-reset token persistence.
#[derive(Clone)]
pub struct ResetTokenRepository {
    db: DatabasePool,
}

impl ResetTokenRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, token: &PasswordResetToken) -> Result<()> {
        sqlx::query(
            "INSERT INTO password_reset_tokens (id, user_id, token_hash, expires_at, used_at, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(token.id)
        .bind(token.user_id)
        .bind(&token.token_hash)
        .bind(token.expires_at)
        .bind(token.used_at)
        .bind(token.created_at)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    pub async fn find_by_hash(&self, token_hash: &str) -> Result<Option<PasswordResetToken>> {
        let row = sqlx::query(
            "SELECT id, user_id, token_hash, expires_at, used_at, created_at
             FROM password_reset_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(self.db.get())
        .await?;

        Ok(match row {
            Some(row) => Some(PasswordResetToken {
                id: row.try_get("id")?,
                user_id: row.try_get("user_id")?,
                token_hash: row.try_get("token_hash")?,
                expires_at: row.try_get("expires_at")?,
                used_at: row.try_get("used_at")?,
                created_at: row.try_get("created_at")?,
            }),
            None => None,
        })
    }

    /// Consume a token; succeeds only once.
    pub async fn mark_used(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE password_reset_tokens SET used_at = NOW() WHERE id = $1 AND used_at IS NULL",
        )
        .bind(id)
        .execute(self.db.get())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Retention: delete expired tokens, and used tokens past the cutoff.
    pub async fn delete_expired(&self, used_cutoff: DateTime<Utc>, batch_size: u32) -> Result<u64> {
        let mut total: u64 = 0;

        loop {
            let ids: Vec<Uuid> = sqlx::query_scalar(
                "SELECT id FROM password_reset_tokens
                 WHERE expires_at < NOW() OR (used_at IS NOT NULL AND created_at < $1)
                 ORDER BY id LIMIT $2",
            )
            .bind(used_cutoff)
            .bind(batch_size as i64)
            .fetch_all(self.db.get())
            .await?;

            if ids.is_empty() {
                break;
            }

            let deleted = sqlx::query("DELETE FROM password_reset_tokens WHERE id = ANY($1)")
                .bind(&ids)
                .execute(self.db.get())
                .await?
                .rows_affected();
            total += deleted;

            if (ids.len() as u32) < batch_size {
                break;
            }
        }

        Ok(total)
    }
}

/// Login attempt history, kept 90 days for lockout forensics.
#[derive(Clone)]
pub struct LoginAttemptRepository {
    db: DatabasePool,
}

impl LoginAttemptRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn record(&self, attempt: &LoginAttempt) -> Result<()> {
        sqlx::query(
            "INSERT INTO login_attempts (id, email, ip_address, success, attempted_at, reason)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(attempt.id)
        .bind(&attempt.email)
        .bind(&attempt.ip_address)
        .bind(attempt.success)
        .bind(attempt.attempted_at)
        .bind(&attempt.reason)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    /// Retention: batched cursor delete of attempts before the cutoff.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>, batch_size: u32) -> Result<u64> {
        let mut total: u64 = 0;

        loop {
            let ids: Vec<Uuid> = sqlx::query_scalar(
                "SELECT id FROM login_attempts WHERE attempted_at < $1 ORDER BY id LIMIT $2",
            )
            .bind(cutoff)
            .bind(batch_size as i64)
            .fetch_all(self.db.get())
            .await?;

            if ids.is_empty() {
                break;
            }

            let deleted = sqlx::query("DELETE FROM login_attempts WHERE id = ANY($1)")
                .bind(&ids)
                .execute(self.db.get())
                .await?
                .rows_affected();
            total += deleted;
            debug!(deleted = deleted, "Deleted login attempt batch");

            if (ids.len() as u32) < batch_size {
                break;
            }
        }

        Ok(total)
    }
}
