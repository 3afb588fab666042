use crate::types::RequestContext;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Audited actions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    // Authentication
    LoginSuccess,
    LoginFailure,
    Logout,
    TokenRefreshed,
    TokenTheftDetected,
    SessionTerminated,
    AccountLocked,
    AccountUnlocked,
    PasswordChanged,
    PasswordResetRequested,
    PasswordResetCompleted,
    MfaEnrolled,
    MfaVerified,
    MfaFailure,
    MfaDisabled,
    ApiKeyCreated,
    ApiKeyRevoked,

    // Pipeline
    DocumentUploaded,
    DocumentDuplicate,
    RecordCreated,
    RecordUpdated,
    RecordDeleted,
    AnomalyDetected,
    AlertDispatched,
    RetentionCompleted,

    // Extensions
    Custom(String),
}

impl AuditAction {
    pub fn as_str(&self) -> String {
        match self {
            AuditAction::Custom(name) => name.clone(),
            other => serde_json::to_value(other)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_else(|| format!("{:?}", other)),
        }
    }
}

/// One audit trail entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub entity_type: String,
    pub entity_id: Option<String>,
    pub action: AuditAction,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub changes: Option<serde_json::Value>,
    pub reason: Option<String>,
    pub metadata: HashMap<String, serde_json::Value>,
    pub performed_by: Option<Uuid>,
    pub performed_at: DateTime<Utc>,
    pub request_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub anonymized: bool,
}

impl AuditEntry {
    pub fn builder(action: AuditAction, entity_type: impl Into<String>) -> AuditEntryBuilder {
        AuditEntryBuilder::new(action, entity_type)
    }
}

/// Builder for audit entries.
pub struct AuditEntryBuilder {
    entry: AuditEntry,
}

impl AuditEntryBuilder {
    pub fn new(action: AuditAction, entity_type: impl Into<String>) -> Self {
        Self {
            entry: AuditEntry {
                id: Uuid::new_v4(),
                entity_type: entity_type.into(),
                entity_id: None,
                action,
                before: None,
                after: None,
                changes: None,
                reason: None,
                metadata: HashMap::new(),
                performed_by: None,
                performed_at: Utc::now(),
                request_id: Uuid::new_v4().to_string(),
                ip_address: None,
                user_agent: None,
                anonymized: false,
            },
        }
    }

    pub fn entity_id(mut self, id: impl ToString) -> Self {
        self.entry.entity_id = Some(id.to_string());
        self
    }

    pub fn performed_by(mut self, user_id: Uuid) -> Self {
        self.entry.performed_by = Some(user_id);
        self
    }

    pub fn request_context(mut self, ctx: &RequestContext) -> Self {
        self.entry.request_id = ctx.request_id.clone();
        self.entry.ip_address = ctx.ip_address.clone();
        self.entry.user_agent = ctx.user_agent.clone();
        self
    }

    pub fn before(mut self, value: serde_json::Value) -> Self {
        self.entry.before = Some(value);
        self
    }

    pub fn after(mut self, value: serde_json::Value) -> Self {
        self.entry.after = Some(value);
        self
    }

    pub fn changes(mut self, value: serde_json::Value) -> Self {
        self.entry.changes = Some(value);
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.entry.reason = Some(reason.into());
        self
    }

    pub fn metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.entry.metadata.insert(key.into(), value);
        self
    }

    pub fn build(self) -> AuditEntry {
        self.entry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_serialization() {
        assert_eq!(AuditAction::TokenTheftDetected.as_str(), "TOKEN_THEFT_DETECTED");
        assert_eq!(AuditAction::LoginFailure.as_str(), "LOGIN_FAILURE");
        assert_eq!(
            AuditAction::Custom("BUDGET_IMPORTED".into()).as_str(),
            "BUDGET_IMPORTED"
        );
    }

    #[test]
    fn test_builder_captures_request_context() {
        let ctx = RequestContext::new(
            Some("req-1".into()),
            Some("192.0.2.1".into()),
            Some("curl/8.0".into()),
        );

        let entry = AuditEntry::builder(AuditAction::LoginSuccess, "user")
            .entity_id("42")
            .request_context(&ctx)
            .metadata("theft_detected", serde_json::Value::Bool(false))
            .build();

        assert_eq!(entry.request_id, "req-1");
        assert_eq!(entry.ip_address.as_deref(), Some("192.0.2.1"));
        assert_eq!(entry.entity_id.as_deref(), Some("42"));
        assert!(!entry.anonymized);
    }
}
