//! Audit trail for security- and data-relevant actions.
//!
//! Every entry captures the request identifiers (`request_id`, client IP,
//! user agent) alongside the entity touched and optional before/after
//! images. Security events (token theft, lockouts, repeated MFA failures)
//! are recorded with their specific kind even though the client only ever
//! sees a generic response.

pub mod entry;
pub mod logger;
pub mod repository;

pub use entry::{AuditAction, AuditEntry, AuditEntryBuilder};
pub use logger::AuditLogger;
pub use repository::AuditRepository;
