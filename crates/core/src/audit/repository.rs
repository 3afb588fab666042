use super::entry::{AuditAction, AuditEntry};
use crate::{database::DatabasePool, error::Result};
use chrono::{DateTime, Utc};
use sqlx::Row;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Persistence for the audit trail.
#[derive(Clone)]
pub struct AuditRepository {
    db: DatabasePool,
}

impl AuditRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, entry: &AuditEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_log (
                id, entity_type, entity_id, action, before, after, changes,
                reason, metadata, performed_by, performed_at, request_id,
                ip_address, user_agent, anonymized
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(entry.id)
        .bind(&entry.entity_type)
        .bind(&entry.entity_id)
        .bind(entry.action.as_str())
        .bind(&entry.before)
        .bind(&entry.after)
        .bind(&entry.changes)
        .bind(&entry.reason)
        .bind(serde_json::to_value(&entry.metadata)?)
        .bind(entry.performed_by)
        .bind(entry.performed_at)
        .bind(&entry.request_id)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.anonymized)
        .execute(self.db.get())
        .await?;

        Ok(())
    }

    /// Fetch one cursor page of entries older than `cutoff`, for archiving
    /// before deletion.
    pub async fn fetch_older_than(
        &self,
        cutoff: DateTime<Utc>,
        after_id: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<AuditEntry>> {
        let rows = sqlx::query(
            r#"
            SELECT id, entity_type, entity_id, action, before, after, changes,
                   reason, metadata, performed_by, performed_at, request_id,
                   ip_address, user_agent, anonymized
            FROM audit_log
            WHERE performed_at < $1 AND ($2::uuid IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#,
        )
        .bind(cutoff)
        .bind(after_id)
        .bind(limit as i64)
        .fetch_all(self.db.get())
        .await?;

        let mut entries = Vec::with_capacity(rows.len());
        for row in rows {
            let action_str: String = row.try_get("action")?;
            let metadata: serde_json::Value = row.try_get("metadata")?;
            let metadata: HashMap<String, serde_json::Value> =
                serde_json::from_value(metadata).unwrap_or_default();

            entries.push(AuditEntry {
                id: row.try_get("id")?,
                entity_type: row.try_get("entity_type")?,
                entity_id: row.try_get("entity_id")?,
                action: parse_action(&action_str),
                before: row.try_get("before")?,
                after: row.try_get("after")?,
                changes: row.try_get("changes")?,
                reason: row.try_get("reason")?,
                metadata,
                performed_by: row.try_get("performed_by")?,
                performed_at: row.try_get("performed_at")?,
                request_id: row.try_get("request_id")?,
                ip_address: row.try_get("ip_address")?,
                user_agent: row.try_get("user_agent")?,
                anonymized: row.try_get("anonymized")?,
            });
        }

        Ok(entries)
    }

    /// Delete entries older than `cutoff` in cursor batches.
    ///
    /// Selects ids first and deletes by id so each statement stays small;
    /// repeats until a batch comes back short.
    pub async fn delete_older_than(&self, cutoff: DateTime<Utc>, batch_size: u32) -> Result<u64> {
        let mut total_deleted: u64 = 0;

        loop {
            let ids: Vec<Uuid> = sqlx::query_scalar(
                "SELECT id FROM audit_log WHERE performed_at < $1 ORDER BY id LIMIT $2",
            )
            .bind(cutoff)
            .bind(batch_size as i64)
            .fetch_all(self.db.get())
            .await?;

            if ids.is_empty() {
                break;
            }

            let deleted = sqlx::query("DELETE FROM audit_log WHERE id = ANY($1)")
                .bind(&ids)
                .execute(self.db.get())
                .await?
                .rows_affected();

            total_deleted += deleted;
            debug!(deleted = deleted, "Deleted audit log batch");

            if (ids.len() as u32) < batch_size {
                break;
            }
        }

        Ok(total_deleted)
    }
}

fn parse_action(value: &str) -> AuditAction {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .unwrap_or_else(|_| AuditAction::Custom(value.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_round_trip_through_storage_string() {
        let action = AuditAction::TokenTheftDetected;
        assert_eq!(parse_action(&action.as_str()), action);
        assert_eq!(
            parse_action("SOMETHING_ELSE"),
            AuditAction::Custom("SOMETHING_ELSE".into())
        );
    }
}
