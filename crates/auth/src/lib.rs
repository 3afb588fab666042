//! Authentication core: Argon2id credentials, rotating refresh-token
//! families with theft detection, Redis session registry, progressive
//! lockout, TOTP MFA, API keys, and the password-reset workflow.

pub mod api_keys;
pub mod dto;
pub mod families;
pub mod lockout;
pub mod mfa;
pub mod models;
pub mod repository;
pub mod service;
pub mod workflows;

pub use api_keys::ApiKeyService;
pub use dto::{LoginRequest, LoginResponse, RefreshRequest};
pub use families::{RotationCheck, TokenFamily, TokenFamilyStore};
pub use lockout::{LockoutService, LockoutStatus};
pub use models::{ApiKey, LoginAttempt, MfaEnrollment, PasswordResetToken, User};
pub use repository::{
    ApiKeyRepository, LoginAttemptRepository, MfaRepository, ResetTokenRepository, UserRepository,
};
pub use service::AuthService;
pub use workflows::PasswordResetService;

#[cfg(test)]
mod unit_tests;
