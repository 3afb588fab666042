use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use watchdog_core::types::UserRole;

/// A platform user.
///
/// `password_hash` is `None` for provisioned accounts that have never set
/// a password; such accounts cannot log in but still exercise the dummy
/// verification path so response timing stays uniform.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    #[serde(skip_serializing)]
    pub password_hash: Option<String>,
    pub role: UserRole,
    pub allowed_location_ids: Vec<Uuid>,
    pub allowed_cost_center_ids: Vec<Uuid>,
    pub is_active: bool,
    pub deleted_at: Option<DateTime<Utc>>,
    pub notification_settings: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn can_login(&self) -> bool {
        self.is_active && self.deleted_at.is_none() && self.password_hash.is_some()
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

/// TOTP enrollment for a user. One enrollment per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MfaEnrollment {
    pub user_id: Uuid,
    pub method: String,
    /// AES-256-GCM encrypted shared secret.
    #[serde(skip_serializing)]
    pub secret_encrypted: String,
    /// Peppered hashes of unused backup codes.
    #[serde(skip_serializing)]
    pub backup_code_hashes: Vec<String>,
    pub enrolled_at: DateTime<Utc>,
}

/// An API key. The key itself is shown exactly once at creation; only the
/// SHA-256 hash and the 12-character prefix are persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: Uuid,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub key_prefix: String,
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApiKey {
    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        self.is_active
            && self.revoked_at.is_none()
            && self.expires_at.map(|at| at > now).unwrap_or(true)
    }
}

/// A password-reset token, stored only as a hash.
#[derive(Debug, Clone)]
pub struct PasswordResetToken {
    pub id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    pub expires_at: DateTime<Utc>,
    pub used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl PasswordResetToken {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        self.used_at.is_none() && self.expires_at > now
    }
}

/// One login attempt, successful or not. Retained for 90 days.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginAttempt {
    pub id: Uuid,
    pub email: String,
    pub ip_address: Option<String>,
    pub success: bool,
    pub attempted_at: DateTime<Utc>,
    pub reason: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn base_user() -> User {
        User {
            id: Uuid::new_v4(),
            email: "analyst@example.com".into(),
            password_hash: Some("$argon2id$...".into()),
            role: UserRole::Analyst,
            allowed_location_ids: vec![],
            allowed_cost_center_ids: vec![],
            is_active: true,
            deleted_at: None,
            notification_settings: serde_json::json!({}),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_can_login_requires_active_and_hash() {
        let user = base_user();
        assert!(user.can_login());

        let mut inactive = base_user();
        inactive.is_active = false;
        assert!(!inactive.can_login());

        let mut no_hash = base_user();
        no_hash.password_hash = None;
        assert!(!no_hash.can_login());

        let mut deleted = base_user();
        deleted.deleted_at = Some(Utc::now());
        assert!(!deleted.can_login());
    }

    #[test]
    fn test_api_key_validity() {
        let now = Utc::now();
        let key = ApiKey {
            id: Uuid::new_v4(),
            key_hash: "hash".into(),
            key_prefix: "cwk_AbCdEf12".into(),
            name: "ingest".into(),
            scopes: vec!["upload".into()],
            expires_at: None,
            revoked_at: None,
            is_active: true,
            last_used_at: None,
            created_at: now,
        };
        assert!(key.is_valid(now));

        let mut expired = key.clone();
        expired.expires_at = Some(now - Duration::hours(1));
        assert!(!expired.is_valid(now));

        let mut revoked = key.clone();
        revoked.revoked_at = Some(now);
        assert!(!revoked.is_valid(now));
    }

    #[test]
    fn test_reset_token_usability() {
        let now = Utc::now();
        let token = PasswordResetToken {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            token_hash: "hash".into(),
            expires_at: now + Duration::hours(1),
            used_at: None,
            created_at: now,
        };
        assert!(token.is_usable(now));

        let mut used = token.clone();
        used.used_at = Some(now);
        assert!(!used.is_usable(now));

        let mut expired = token;
        expired.expires_at = now - Duration::minutes(1);
        assert!(!expired.is_usable(now));
    }

    #[test]
    fn test_password_hash_never_serialized() {
        let user = base_user();
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2id"));
        assert!(!json.contains("password_hash"));
    }
}
