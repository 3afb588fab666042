use super::{ErrorCode, ErrorContext};
use serde::{Deserialize, Serialize};
use std::fmt;

pub type Result<T> = std::result::Result<T, Error>;

/// Severity levels for errors
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorCategory {
    System,
    Database,
    Cache,
    Network,
    Security,
    Validation,
    Resource,
    RateLimit,
    Storage,
    Extraction,
    Serialization,
    Crypto,
}

/// Main error type for the cost-watchdog system.
///
/// `retry_after_seconds` feeds the `Retry-After` header for 423/429/503
/// responses. `security_event` marks errors that must trigger downstream
/// defensive actions (token theft, lockout, repeated MFA failure) while the
/// client still receives a generic message.
#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Option<String>,
    pub context: ErrorContext,
    pub severity: ErrorSeverity,
    pub retry_after_seconds: Option<u64>,
    pub security_event: bool,
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
            context: ErrorContext::new(),
            severity: Self::default_severity_for_code(code),
            retry_after_seconds: None,
            security_event: false,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_context(mut self, context: ErrorContext) -> Self {
        self.context = context;
        self
    }

    pub fn with_severity(mut self, severity: ErrorSeverity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after_seconds = Some(seconds);
        self
    }

    /// Flag this error as a security event for downstream defensive handling.
    pub fn as_security_event(mut self) -> Self {
        self.security_event = true;
        self
    }

    pub fn add_trace(mut self, trace: impl Into<String>) -> Self {
        self.context = self.context.add_trace(trace.into());
        self
    }

    pub fn add_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.context.add_metadata(key.into(), value);
        self
    }

    pub fn http_status(&self) -> u16 {
        self.code.http_status()
    }

    pub fn category(&self) -> ErrorCategory {
        match self.code.category() {
            "database" => ErrorCategory::Database,
            "cache" => ErrorCategory::Cache,
            "network" => ErrorCategory::Network,
            "security" => ErrorCategory::Security,
            "validation" => ErrorCategory::Validation,
            "resource" => ErrorCategory::Resource,
            "rate_limit" => ErrorCategory::RateLimit,
            "storage" => ErrorCategory::Storage,
            "extraction" => ErrorCategory::Extraction,
            "serialization" => ErrorCategory::Serialization,
            "crypto" => ErrorCategory::Crypto,
            _ => ErrorCategory::System,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.code.is_retryable()
    }

    pub fn should_log_as_error(&self) -> bool {
        self.code.should_log_as_error()
            || matches!(self.severity, ErrorSeverity::High | ErrorSeverity::Critical)
    }

    /// Convert to JSON for API responses, sanitized per environment.
    ///
    /// Stack-trace-like context and details never leave the process in
    /// production; authentication failures always collapse to one generic
    /// message regardless of whether the user exists or the password was
    /// wrong.
    pub fn to_api_response(&self, environment: &str) -> serde_json::Value {
        let is_production = environment == "production";

        let message = if is_production {
            self.sanitized_message()
        } else {
            self.message.clone()
        };

        let mut body = serde_json::json!({
            "error": {
                "code": self.code,
                "message": message,
                "error_id": self.context.error_id,
                "request_id": self.context.request_id,
                "timestamp": self.context.timestamp
            }
        });

        if !is_production {
            if let Some(details) = &self.details {
                body["error"]["details"] = serde_json::Value::String(details.clone());
            }
        }

        if let Some(retry_after) = self.retry_after_seconds {
            body["error"]["retry_after"] = serde_json::Value::from(retry_after);
        }

        if self.security_event {
            body["error"]["security_event"] = serde_json::Value::Bool(true);
        }

        body
    }

    fn sanitized_message(&self) -> String {
        match self.code {
            ErrorCode::AuthenticationFailed
            | ErrorCode::InvalidCredentials
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid
            | ErrorCode::SecurityPolicyViolation
            | ErrorCode::MfaVerificationFailed => "Invalid email or password".to_string(),

            ErrorCode::AccountLocked => {
                "Account temporarily locked due to repeated failures".to_string()
            }

            ErrorCode::PermissionDenied => "Access denied".to_string(),
            ErrorCode::CsrfValidationFailed => "Request could not be verified".to_string(),

            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange => self.message.clone(),

            ErrorCode::ResourceNotFound => self.message.clone(),
            ErrorCode::ResourceAlreadyExists | ErrorCode::DuplicateValue => {
                "Duplicate value detected".to_string()
            }

            ErrorCode::RateLimitExceeded => {
                "Rate limit exceeded, please try again later".to_string()
            }

            ErrorCode::CacheUnavailable | ErrorCode::ServiceUnavailable => {
                "Service temporarily unavailable".to_string()
            }

            _ => "An internal error occurred. Please try again later".to_string(),
        }
    }

    fn default_severity_for_code(code: ErrorCode) -> ErrorSeverity {
        match code {
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingRequiredField
            | ErrorCode::InvalidFormat
            | ErrorCode::ValueOutOfRange
            | ErrorCode::ResourceNotFound => ErrorSeverity::Low,

            ErrorCode::DuplicateValue
            | ErrorCode::ResourceAlreadyExists
            | ErrorCode::AuthenticationFailed
            | ErrorCode::InvalidCredentials
            | ErrorCode::TokenExpired
            | ErrorCode::TokenInvalid
            | ErrorCode::MfaRequired
            | ErrorCode::PermissionDenied
            | ErrorCode::RateLimitExceeded
            | ErrorCode::UnsupportedDocument
            | ErrorCode::ExtractionFailed => ErrorSeverity::Medium,

            ErrorCode::AccountLocked
            | ErrorCode::MfaVerificationFailed
            | ErrorCode::CsrfValidationFailed
            | ErrorCode::SecurityPolicyViolation
            | ErrorCode::DatabaseConnectionError
            | ErrorCode::CacheUnavailable
            | ErrorCode::NetworkError
            | ErrorCode::NetworkTimeout
            | ErrorCode::ExternalServiceError
            | ErrorCode::WebhookRejected
            | ErrorCode::ServiceUnavailable
            | ErrorCode::StorageError => ErrorSeverity::High,

            ErrorCode::InternalServerError
            | ErrorCode::ConfigurationError
            | ErrorCode::DatabaseTransactionError
            | ErrorCode::EncryptionError
            | ErrorCode::DecryptionError => ErrorSeverity::Critical,

            _ => ErrorSeverity::Medium,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(details) = &self.details {
            write!(f, ": {}", details)?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {}

impl Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        #[derive(Serialize)]
        struct ErrorSer {
            code: ErrorCode,
            message: String,
            details: Option<String>,
            severity: ErrorSeverity,
        }

        ErrorSer {
            code: self.code,
            message: self.message.clone(),
            details: self.details.clone(),
            severity: self.severity,
        }
        .serialize(serializer)
    }
}

// Convenience constructors for common errors
impl Error {
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalServerError, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn not_found(entity: impl Into<String>) -> Self {
        let entity = entity.into();
        Self::new(ErrorCode::ResourceNotFound, format!("{} not found", entity))
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::AuthenticationFailed, message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DuplicateValue, message)
    }

    pub fn locked(message: impl Into<String>, retry_after_seconds: u64) -> Self {
        Self::new(ErrorCode::AccountLocked, message).with_retry_after(retry_after_seconds)
    }

    pub fn rate_limited(retry_after_seconds: u64) -> Self {
        Self::new(ErrorCode::RateLimitExceeded, "Rate limit exceeded")
            .with_retry_after(retry_after_seconds)
    }

    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn configuration(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ConfigurationError, message)
    }
}

// Implement From for common error types
impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        let code = match &err {
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() || db_err.is_foreign_key_violation() {
                    ErrorCode::DatabaseConstraintViolation
                } else {
                    ErrorCode::DatabaseQueryError
                }
            }
            sqlx::Error::RowNotFound => ErrorCode::ResourceNotFound,
            sqlx::Error::PoolTimedOut => ErrorCode::DatabaseConnectionError,
            sqlx::Error::Io(_) => ErrorCode::DatabaseConnectionError,
            _ => ErrorCode::DatabaseQueryError,
        };

        Self::new(code, err.to_string()).add_trace("sqlx::Error conversion")
    }
}

impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        let code = match err.kind() {
            redis::ErrorKind::IoError => ErrorCode::CacheUnavailable,
            redis::ErrorKind::AuthenticationFailed => ErrorCode::InvalidCredentials,
            redis::ErrorKind::TypeError | redis::ErrorKind::ExecAbortError => {
                ErrorCode::SerializationError
            }
            _ => ErrorCode::CacheError,
        };

        Self::new(code, err.to_string()).add_trace("redis::RedisError conversion")
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        let code = if err.is_data() || err.is_syntax() {
            ErrorCode::JobDeserializationError
        } else {
            ErrorCode::SerializationError
        };

        Self::new(code, err.to_string()).add_trace("serde_json::Error conversion")
    }
}

impl From<config::ConfigError> for Error {
    fn from(err: config::ConfigError) -> Self {
        Self::new(ErrorCode::ConfigurationError, err.to_string())
            .add_trace("config::ConfigError conversion")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitized_auth_message_is_generic() {
        let missing_user = Error::new(ErrorCode::InvalidCredentials, "no such user u@x.y");
        let bad_password = Error::new(ErrorCode::AuthenticationFailed, "password mismatch");

        let a = missing_user.to_api_response("production");
        let b = bad_password.to_api_response("production");
        assert_eq!(a["error"]["message"], b["error"]["message"]);
        assert_eq!(a["error"]["message"], "Invalid email or password");
    }

    #[test]
    fn test_security_event_flag_survives_response() {
        let err = Error::unauthorized("refresh token reuse").as_security_event();
        let body = err.to_api_response("production");
        assert_eq!(body["error"]["security_event"], true);
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn test_locked_error_carries_retry_after() {
        let err = Error::locked("Account locked", 900);
        assert_eq!(err.http_status(), 423);
        assert_eq!(err.retry_after_seconds, Some(900));
        let body = err.to_api_response("development");
        assert_eq!(body["error"]["retry_after"], 900);
    }

    #[test]
    fn test_details_suppressed_in_production() {
        let err = Error::internal("boom").with_details("stack frame at db.rs:42");
        let prod = err.to_api_response("production");
        assert!(prod["error"].get("details").is_none());
        let dev = err.to_api_response("development");
        assert_eq!(dev["error"]["details"], "stack frame at db.rs:42");
    }
}
