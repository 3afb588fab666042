use super::entry::{AuditAction, AuditEntry};
use super::repository::AuditRepository;
use crate::types::RequestContext;
use tracing::{error, info};
use uuid::Uuid;

/// Writes audit entries, never failing the surrounding operation.
///
/// A lost audit entry is logged at error level with its full content so the
/// tracing pipeline still captures it; the business operation proceeds.
#[derive(Clone)]
pub struct AuditLogger {
    repository: AuditRepository,
}

impl AuditLogger {
    pub fn new(repository: AuditRepository) -> Self {
        Self { repository }
    }

    pub async fn log(&self, entry: AuditEntry) {
        let action = entry.action.as_str();

        match self.repository.insert(&entry).await {
            Ok(()) => {
                info!(
                    action = %action,
                    entity_type = %entry.entity_type,
                    entity_id = ?entry.entity_id,
                    request_id = %entry.request_id,
                    "Audit entry recorded"
                );
            }
            Err(e) => {
                // Redact before the entry content reaches the log stream
                let redacted = serde_json::to_value(&entry)
                    .map(|value| crate::utils::redact_json(&value))
                    .unwrap_or_default();
                error!(
                    action = %action,
                    entity_type = %entry.entity_type,
                    error = %e,
                    entry = %redacted,
                    "Failed to persist audit entry"
                );
            }
        }
    }

    /// Record a security event with its specific kind and a marker the
    /// incident tooling filters on.
    pub async fn log_security_event(
        &self,
        action: AuditAction,
        user_id: Option<Uuid>,
        ctx: &RequestContext,
        reason: impl Into<String>,
    ) {
        let mut builder = AuditEntry::builder(action, "user")
            .request_context(ctx)
            .reason(reason)
            .metadata("security_event", serde_json::Value::Bool(true));

        if let Some(user_id) = user_id {
            builder = builder.entity_id(user_id).performed_by(user_id);
        }

        self.log(builder.build()).await;
    }
}
