use super::model::Alert;
use sqlx::postgres::PgRow;
use sqlx::Row;
use std::str::FromStr;
use uuid::Uuid;
use watchdog_core::{
    error::Result,
    types::{AlertChannel, AlertStatus},
    DatabasePool, Error,
};

#[derive(Clone)]
pub struct AlertRepository {
    db: DatabasePool,
}

fn map_alert(row: &PgRow) -> Result<Alert> {
    let channel_str: String = row.try_get("channel")?;
    let status_str: String = row.try_get("status")?;

    Ok(Alert {
        id: row.try_get("id")?,
        anomaly_id: row.try_get("anomaly_id")?,
        channel: AlertChannel::from_str(&channel_str)
            .map_err(|e| Error::internal(format!("Corrupt channel: {}", e)))?,
        recipient: row.try_get("recipient")?,
        status: AlertStatus::from_str(&status_str)
            .map_err(|e| Error::internal(format!("Corrupt status: {}", e)))?,
        sent_at: row.try_get("sent_at")?,
        error_message: row.try_get("error_message")?,
        created_at: row.try_get("created_at")?,
    })
}

const ALERT_COLUMNS: &str =
    "id, anomaly_id, channel, recipient, status, sent_at, error_message, created_at";

impl AlertRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    pub async fn insert(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts (id, anomaly_id, channel, recipient, status, sent_at,
                                error_message, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(alert.id)
        .bind(alert.anomaly_id)
        .bind(alert.channel.as_str())
        .bind(&alert.recipient)
        .bind(alert.status.as_str())
        .bind(alert.sent_at)
        .bind(&alert.error_message)
        .bind(alert.created_at)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Alert>> {
        let row = sqlx::query(&format!("SELECT {} FROM alerts WHERE id = $1", ALERT_COLUMNS))
            .bind(id)
            .fetch_optional(self.db.get())
            .await?;

        row.as_ref().map(map_alert).transpose()
    }

    /// Alerts already sent today (UTC), for the daily cap.
    pub async fn count_sent_today(&self) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM alerts
             WHERE status = 'sent' AND sent_at >= date_trunc('day', NOW())",
        )
        .fetch_one(self.db.get())
        .await?;

        Ok(count.max(0) as u32)
    }

    pub async fn mark_sent(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE alerts SET status = 'sent', sent_at = NOW(), error_message = NULL
             WHERE id = $1",
        )
        .bind(id)
        .execute(self.db.get())
        .await?;
        Ok(())
    }

    pub async fn mark_failed(&self, id: Uuid, error_message: &str) -> Result<()> {
        sqlx::query("UPDATE alerts SET status = 'failed', error_message = $2 WHERE id = $1")
            .bind(id)
            .bind(error_message)
            .execute(self.db.get())
            .await?;
        Ok(())
    }

    /// Reset a failed alert to pending for a retry attempt.
    pub async fn mark_pending(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE alerts SET status = 'pending' WHERE id = $1")
            .bind(id)
            .execute(self.db.get())
            .await?;
        Ok(())
    }
}
