use serde::{Deserialize, Serialize};
use validator::Validate;
use watchdog_core::session::SessionInfo;

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email)]
    pub email: String,
    #[validate(length(min = 1))]
    pub password: String,
    /// Six-digit TOTP code or a backup code, required once MFA is enrolled.
    pub mfa_code: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct RefreshRequest {
    #[validate(length(min = 1))]
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetRequest {
    #[validate(email)]
    pub email: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1))]
    pub token: String,
    #[validate(length(min = 12, message = "Password must be at least 12 characters"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MfaEnrollRequest {
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct MfaEnrollResponse {
    pub secret: String,
    pub provisioning_uri: String,
    /// Shown exactly once.
    pub backup_codes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MfaDisableRequest {
    #[validate(length(min = 1))]
    pub password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApiKeyCreateRequest {
    #[validate(length(min = 1, max = 120))]
    pub name: String,
    pub scopes: Vec<String>,
    pub expires_in_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyCreateResponse {
    pub id: uuid::Uuid,
    /// The full key, shown exactly once.
    pub key: String,
    pub key_prefix: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}
