//! # Error Handling Framework
//!
//! Structured error management for the cost-watchdog services:
//!
//! - **Structured Error Types**: Categorized error codes for consistent handling
//! - **Rich Context**: Request context and error metadata for debugging
//! - **Severity Classification**: Error categorization for appropriate responses
//! - **Sanitized Responses**: Generic client messages in production
//!
//! Login failures and security events deliberately map to generic client
//! messages (`"Invalid email or password"`); the specific kind is carried in
//! the audit trail, never in the response body.

pub mod codes;
pub mod context;
pub mod framework;

pub use codes::ErrorCode;
pub use context::ErrorContext;
pub use framework::{Error, ErrorCategory, ErrorSeverity, Result};
