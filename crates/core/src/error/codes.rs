use serde::{Deserialize, Serialize};
use std::fmt;

/// Standardized error codes used across all crates.
///
/// Each code maps to an HTTP status, a category string, and retry semantics.
/// Workers use [`ErrorCode::is_retryable`] to decide between requeue-with-backoff
/// and dead-lettering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation
    ValidationFailed,
    InvalidInput,
    MissingRequiredField,
    InvalidFormat,
    ValueOutOfRange,

    // Authentication & authorization
    AuthenticationFailed,
    InvalidCredentials,
    TokenExpired,
    TokenInvalid,
    AccountLocked,
    MfaRequired,
    MfaVerificationFailed,
    CsrfValidationFailed,
    PermissionDenied,
    SecurityPolicyViolation,

    // Resources
    ResourceNotFound,
    ResourceAlreadyExists,
    DuplicateValue,

    // Rate limiting
    RateLimitExceeded,

    // Database
    DatabaseConnectionError,
    DatabaseQueryError,
    DatabaseTransactionError,
    DatabaseConstraintViolation,

    // KV store / cache
    CacheError,
    CacheUnavailable,

    // Serialization
    SerializationError,
    JobDeserializationError,

    // Network / external services
    NetworkError,
    NetworkTimeout,
    ExternalServiceError,
    WebhookRejected,
    ServiceUnavailable,

    // Extraction
    ExtractionFailed,
    UnsupportedDocument,

    // Storage
    StorageError,

    // Crypto
    EncryptionError,
    DecryptionError,

    // System
    ConfigurationError,
    InternalServerError,
    JobExecutionFailed,
}

impl ErrorCode {
    /// HTTP status code for the request path.
    pub fn http_status(&self) -> u16 {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange
            | ErrorCode::UnsupportedDocument => 400,

            ErrorCode::AuthenticationFailed
            | ErrorCode::InvalidCredentials
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid
            | ErrorCode::MfaRequired
            | ErrorCode::MfaVerificationFailed
            | ErrorCode::SecurityPolicyViolation => 401,

            ErrorCode::PermissionDenied => 403,
            ErrorCode::CsrfValidationFailed => 403,

            ErrorCode::ResourceNotFound => 404,

            ErrorCode::ResourceAlreadyExists
            | ErrorCode::DuplicateValue
            | ErrorCode::DatabaseConstraintViolation => 409,

            ErrorCode::AccountLocked => 423,

            ErrorCode::RateLimitExceeded => 429,

            ErrorCode::DatabaseConnectionError
            | ErrorCode::CacheUnavailable
            | ErrorCode::ServiceUnavailable => 503,

            _ => 500,
        }
    }

    /// Category string used for logging and error grouping.
    pub fn category(&self) -> &'static str {
        match self {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange => "validation",

            ErrorCode::AuthenticationFailed
            | ErrorCode::InvalidCredentials
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid
            | ErrorCode::AccountLocked
            | ErrorCode::MfaRequired
            | ErrorCode::MfaVerificationFailed
            | ErrorCode::CsrfValidationFailed
            | ErrorCode::PermissionDenied
            | ErrorCode::SecurityPolicyViolation => "security",

            ErrorCode::ResourceNotFound
            | ErrorCode::ResourceAlreadyExists
            | ErrorCode::DuplicateValue => "resource",

            ErrorCode::RateLimitExceeded => "rate_limit",

            ErrorCode::DatabaseConnectionError
            | ErrorCode::DatabaseQueryError
            | ErrorCode::DatabaseTransactionError
            | ErrorCode::DatabaseConstraintViolation => "database",

            ErrorCode::CacheError | ErrorCode::CacheUnavailable => "cache",

            ErrorCode::SerializationError | ErrorCode::JobDeserializationError => "serialization",

            ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::ExternalServiceError
            | ErrorCode::WebhookRejected
            | ErrorCode::ServiceUnavailable => "network",

            ErrorCode::ExtractionFailed | ErrorCode::UnsupportedDocument => "extraction",

            ErrorCode::StorageError => "storage",

            ErrorCode::EncryptionError | ErrorCode::DecryptionError => "crypto",

            ErrorCode::ConfigurationError
            | ErrorCode::InternalServerError
            | ErrorCode::JobExecutionFailed => "system",
        }
    }

    /// Whether a worker may retry the failed operation.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ErrorCode::DatabaseConnectionError
                | ErrorCode::DatabaseTransactionError
                | ErrorCode::CacheError
                | ErrorCode::CacheUnavailable
                | ErrorCode::NetworkError
                | ErrorCode::NetworkTimeout
                | ErrorCode::ExternalServiceError
                | ErrorCode::ServiceUnavailable
        )
    }

    /// Whether occurrences should be logged at `error` level.
    pub fn should_log_as_error(&self) -> bool {
        matches!(
            self,
            ErrorCode::InternalServerError
                | ErrorCode::ConfigurationError
                | ErrorCode::DatabaseConnectionError
                | ErrorCode::DatabaseTransactionError
                | ErrorCode::EncryptionError
                | ErrorCode::DecryptionError
                | ErrorCode::JobExecutionFailed
        )
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.category().to_uppercase())?;
        write!(f, "/{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(ErrorCode::ValidationFailed.http_status(), 400);
        assert_eq!(ErrorCode::InvalidCredentials.http_status(), 401);
        assert_eq!(ErrorCode::AccountLocked.http_status(), 423);
        assert_eq!(ErrorCode::RateLimitExceeded.http_status(), 429);
        assert_eq!(ErrorCode::CacheUnavailable.http_status(), 503);
        assert_eq!(ErrorCode::DuplicateValue.http_status(), 409);
    }

    #[test]
    fn test_retryable_codes() {
        assert!(ErrorCode::NetworkTimeout.is_retryable());
        assert!(ErrorCode::CacheUnavailable.is_retryable());
        assert!(!ErrorCode::ValidationFailed.is_retryable());
        assert!(!ErrorCode::WebhookRejected.is_retryable());
    }
}
