use super::model::{Anomaly, AnomalyDetails};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::str::FromStr;
use uuid::Uuid;
use watchdog_core::{
    error::Result,
    types::{AnomalySeverity, AnomalyStatus},
    DatabasePool, Error,
};

/// Anomaly persistence. The `(cost_record_id, kind)` unique key makes
/// detection idempotent: re-running a check updates the existing row
/// instead of inserting another.
#[derive(Clone)]
pub struct AnomalyRepository {
    db: DatabasePool,
}

fn map_anomaly(row: &PgRow) -> Result<Anomaly> {
    let severity_str: String = row.try_get("severity")?;
    let status_str: String = row.try_get("status")?;
    let details_value: serde_json::Value = row.try_get("details")?;
    let details: AnomalyDetails = serde_json::from_value(details_value.clone())
        .unwrap_or(AnomalyDetails::Opaque(details_value));

    Ok(Anomaly {
        id: row.try_get("id")?,
        cost_record_id: row.try_get("cost_record_id")?,
        kind: row.try_get("kind")?,
        severity: AnomalySeverity::from_str(&severity_str)
            .map_err(|e| Error::internal(format!("Corrupt severity: {}", e)))?,
        status: AnomalyStatus::from_str(&status_str)
            .map_err(|e| Error::internal(format!("Corrupt status: {}", e)))?,
        message: row.try_get("message")?,
        details,
        is_backfill: row.try_get("is_backfill")?,
        detected_at: row.try_get("detected_at")?,
        acknowledged_at: row.try_get("acknowledged_at")?,
    })
}

const ANOMALY_COLUMNS: &str = "id, cost_record_id, kind, severity, status, message, details, \
     is_backfill, detected_at, acknowledged_at";

impl AnomalyRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Upsert on `(cost_record_id, kind)` inside the caller's transaction.
    /// Returns the row id (existing or new). Triage state survives
    /// re-detection; severity, message and details are refreshed.
    pub async fn upsert_in_tx(&self, conn: &mut PgConnection, anomaly: &Anomaly) -> Result<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO anomalies (id, cost_record_id, kind, severity, status, message,
                                   details, is_backfill, detected_at, acknowledged_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (cost_record_id, kind) DO UPDATE SET
                severity = EXCLUDED.severity,
                message = EXCLUDED.message,
                details = EXCLUDED.details,
                is_backfill = EXCLUDED.is_backfill,
                detected_at = EXCLUDED.detected_at
            RETURNING id
            "#,
        )
        .bind(anomaly.id)
        .bind(anomaly.cost_record_id)
        .bind(&anomaly.kind)
        .bind(anomaly.severity.as_str())
        .bind(anomaly.status.as_str())
        .bind(&anomaly.message)
        .bind(serde_json::to_value(&anomaly.details)?)
        .bind(anomaly.is_backfill)
        .bind(anomaly.detected_at)
        .bind(anomaly.acknowledged_at)
        .fetch_one(conn)
        .await?;

        Ok(id)
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Anomaly>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM anomalies WHERE id = $1",
            ANOMALY_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_anomaly).transpose()
    }

    pub async fn list_for_record(&self, cost_record_id: Uuid) -> Result<Vec<Anomaly>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM anomalies WHERE cost_record_id = $1 ORDER BY kind",
            ANOMALY_COLUMNS
        ))
        .bind(cost_record_id)
        .fetch_all(self.db.get())
        .await?;

        rows.iter().map(map_anomaly).collect()
    }

    pub async fn set_status(
        &self,
        id: Uuid,
        status: AnomalyStatus,
        acknowledged_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        sqlx::query("UPDATE anomalies SET status = $2, acknowledged_at = $3 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(acknowledged_at)
            .execute(self.db.get())
            .await?;
        Ok(())
    }
}
