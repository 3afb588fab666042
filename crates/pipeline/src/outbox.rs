use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{Connection, PgConnection, Row};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;
use watchdog_core::{error::Result, types::AnomalySeverity, DatabasePool};

/// Advisory lock key serializing the outbox poller across instances.
pub const OUTBOX_DISPATCHER_LOCK: i64 = 0x636f_7374_0001;

/// Typed outbox payloads with a `kind` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TypedPayload {
    AnomalyDetectionRequested {
        cost_record_id: Uuid,
        is_backfill: bool,
    },
    AggregationRequested {
        cost_record_id: Uuid,
    },
    AnomalyDetected {
        anomaly_id: Uuid,
        cost_record_id: Uuid,
        anomaly_type: String,
        severity: AnomalySeverity,
    },
}

/// Outbox payload: a known typed variant, or an opaque map for event
/// kinds this build does not know yet.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum OutboxPayload {
    Typed(TypedPayload),
    Opaque(serde_json::Value),
}

impl OutboxPayload {
    pub fn event_type(&self) -> String {
        match self {
            OutboxPayload::Typed(TypedPayload::AnomalyDetectionRequested { .. }) => {
                "anomaly.detection.requested".to_string()
            }
            OutboxPayload::Typed(TypedPayload::AggregationRequested { .. }) => {
                "aggregation.requested".to_string()
            }
            OutboxPayload::Typed(TypedPayload::AnomalyDetected { .. }) => {
                "anomaly.detected".to_string()
            }
            OutboxPayload::Opaque(value) => value
                .get("kind")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown")
                .to_string(),
        }
    }
}

/// A transactionally produced event row.
///
/// Rows are inserted in the same transaction as the state change they
/// describe; the dispatcher marks them processed after a successful
/// downstream enqueue, giving at-least-once delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub aggregate_type: String,
    pub aggregate_id: String,
    pub event_type: String,
    pub payload: OutboxPayload,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl ToString,
        payload: OutboxPayload,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.to_string(),
            event_type: payload.event_type(),
            payload,
            created_at: Utc::now(),
            processed_at: None,
        }
    }
}

#[derive(Clone)]
pub struct OutboxRepository {
    db: DatabasePool,
}

fn map_event(row: &PgRow) -> Result<OutboxEvent> {
    let payload_value: serde_json::Value = row.try_get("payload")?;
    let payload: OutboxPayload = serde_json::from_value(payload_value.clone())
        .unwrap_or(OutboxPayload::Opaque(payload_value));

    Ok(OutboxEvent {
        id: row.try_get("id")?,
        aggregate_type: row.try_get("aggregate_type")?,
        aggregate_id: row.try_get("aggregate_id")?,
        event_type: row.try_get("event_type")?,
        payload,
        created_at: row.try_get("created_at")?,
        processed_at: row.try_get("processed_at")?,
    })
}

impl OutboxRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Insert within the caller's transaction: the event exists exactly
    /// when the state change commits.
    pub async fn insert_in_tx(&self, conn: &mut PgConnection, event: &OutboxEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO outbox_events (id, aggregate_type, aggregate_id, event_type,
                                       payload, created_at, processed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.aggregate_type)
        .bind(&event.aggregate_id)
        .bind(&event.event_type)
        .bind(serde_json::to_value(&event.payload)?)
        .bind(event.created_at)
        .bind(event.processed_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    /// Oldest unprocessed events, up to `limit`.
    pub async fn fetch_unprocessed(&self, limit: u32) -> Result<Vec<OutboxEvent>> {
        let rows = sqlx::query(
            "SELECT id, aggregate_type, aggregate_id, event_type, payload, created_at, processed_at
             FROM outbox_events
             WHERE processed_at IS NULL
             ORDER BY created_at
             LIMIT $1",
        )
        .bind(limit as i64)
        .fetch_all(self.db.get())
        .await?;

        rows.iter().map(map_event).collect()
    }

    pub async fn mark_processed(&self, id: Uuid) -> Result<()> {
        sqlx::query("UPDATE outbox_events SET processed_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(self.db.get())
            .await?;
        Ok(())
    }

    /// Retention: batched cursor delete of processed events older than
    /// the cutoff.
    pub async fn delete_processed_before(
        &self,
        cutoff: DateTime<Utc>,
        batch_size: u32,
    ) -> Result<u64> {
        let mut total: u64 = 0;

        loop {
            let ids: Vec<Uuid> = sqlx::query_scalar(
                "SELECT id FROM outbox_events
                 WHERE processed_at IS NOT NULL AND processed_at < $1
                 ORDER BY id LIMIT $2",
            )
            .bind(cutoff)
            .bind(batch_size as i64)
            .fetch_all(self.db.get())
            .await?;

            if ids.is_empty() {
                break;
            }

            let deleted = sqlx::query("DELETE FROM outbox_events WHERE id = ANY($1)")
                .bind(&ids)
                .execute(self.db.get())
                .await?
                .rows_affected();
            total += deleted;
            debug!(deleted = deleted, "Deleted outbox batch");

            if (ids.len() as u32) < batch_size {
                break;
            }
        }

        Ok(total)
    }
}

/// Routes a committed outbox event to its downstream effect (a queue job,
/// alert materialization). Implementations must be idempotent: delivery
/// is at-least-once.
#[async_trait]
pub trait OutboxRouter: Send + Sync {
    async fn route(&self, event: &OutboxEvent) -> Result<()>;
}

/// Single-instance outbox poller.
///
/// Holds a Postgres advisory lock for the lifetime of the polling loop so
/// at most one dispatcher enqueues at a time. Events whose routing fails
/// stay unprocessed and are retried on the next poll.
pub struct OutboxDispatcher {
    db: DatabasePool,
    repository: OutboxRepository,
    router: Arc<dyn OutboxRouter>,
    batch_size: u32,
    poll_interval: Duration,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl OutboxDispatcher {
    pub fn new(
        db: DatabasePool,
        repository: OutboxRepository,
        router: Arc<dyn OutboxRouter>,
    ) -> Self {
        Self {
            db,
            repository,
            router,
            batch_size: 100,
            poll_interval: Duration::from_secs(1),
            shutdown_tx: None,
        }
    }

    /// One poll: fetch, route, mark processed. Returns the number of
    /// events successfully dispatched. Public for tests and for callers
    /// that drive their own loop.
    pub async fn run_once(&self) -> Result<u32> {
        let events = self.repository.fetch_unprocessed(self.batch_size).await?;
        let mut dispatched = 0;

        for event in &events {
            match self.router.route(event).await {
                Ok(()) => {
                    self.repository.mark_processed(event.id).await?;
                    dispatched += 1;
                }
                Err(e) => {
                    warn!(
                        event_id = %event.id,
                        event_type = %event.event_type,
                        error = %e,
                        "Outbox routing failed, will retry"
                    );
                }
            }
        }

        if dispatched > 0 {
            debug!(dispatched = dispatched, "Outbox events dispatched");
        }
        Ok(dispatched)
    }

    /// Start the polling loop (non-blocking). The loop first competes for
    /// the advisory lock; an instance that loses keeps retrying so it can
    /// take over if the holder dies.
    pub fn start(&mut self) {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        let db = self.db.clone();
        let repository = self.repository.clone();
        let router = Arc::clone(&self.router);
        let batch_size = self.batch_size;
        let poll_interval = self.poll_interval;

        tokio::spawn(async move {
            loop {
                // The advisory lock is connection-scoped, so hold a
                // dedicated connection while polling
                let mut conn = match db.get().acquire().await {
                    Ok(conn) => conn,
                    Err(e) => {
                        error!(error = %e, "Outbox dispatcher could not acquire a connection");
                        tokio::time::sleep(Duration::from_secs(5)).await;
                        continue;
                    }
                };

                let locked: bool = match sqlx::query_scalar("SELECT pg_try_advisory_lock($1)")
                    .bind(OUTBOX_DISPATCHER_LOCK)
                    .fetch_one(&mut *conn)
                    .await
                {
                    Ok(locked) => locked,
                    Err(e) => {
                        error!(error = %e, "Advisory lock query failed");
                        false
                    }
                };

                if !locked {
                    drop(conn);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    if shutdown_rx.try_recv().is_ok() {
                        return;
                    }
                    continue;
                }

                info!("Outbox dispatcher acquired the poller lock");

                let dispatcher = OutboxDispatcher {
                    db: db.clone(),
                    repository: repository.clone(),
                    router: Arc::clone(&router),
                    batch_size,
                    poll_interval,
                    shutdown_tx: None,
                };

                let mut ticker = tokio::time::interval(poll_interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = shutdown_rx.recv() => {
                            let _ = sqlx::query("SELECT pg_advisory_unlock($1)")
                                .bind(OUTBOX_DISPATCHER_LOCK)
                                .execute(&mut *conn)
                                .await;
                            info!("Outbox dispatcher stopped");
                            return;
                        }
                        _ = ticker.tick() => {
                            // Keep the lock connection healthy; if it died the
                            // lock is gone and another instance may take over
                            if conn.ping().await.is_err() {
                                warn!("Outbox lock connection lost, re-competing for the lock");
                                break;
                            }
                            if let Err(e) = dispatcher.run_once().await {
                                error!(error = %e, "Outbox poll failed");
                            }
                        }
                    }
                }
            }
        });
    }

    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_typed_payload_round_trip() {
        let payload = OutboxPayload::Typed(TypedPayload::AnomalyDetected {
            anomaly_id: Uuid::nil(),
            cost_record_id: Uuid::nil(),
            anomaly_type: "yoy_deviation".into(),
            severity: AnomalySeverity::Critical,
        });

        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(json["kind"], "anomaly_detected");

        let back: OutboxPayload = serde_json::from_value(json).unwrap();
        assert_eq!(back, payload);
        assert_eq!(back.event_type(), "anomaly.detected");
    }

    #[test]
    fn test_unknown_payload_falls_back_to_opaque() {
        let json = serde_json::json!({ "kind": "budget.imported", "rows": 12 });
        let payload: OutboxPayload = serde_json::from_value(json).unwrap();
        assert!(matches!(payload, OutboxPayload::Opaque(_)));
        assert_eq!(payload.event_type(), "budget.imported");
    }

    #[test]
    fn test_event_type_derived_from_payload() {
        let event = OutboxEvent::new(
            "cost_record",
            Uuid::nil(),
            OutboxPayload::Typed(TypedPayload::AggregationRequested {
                cost_record_id: Uuid::nil(),
            }),
        );
        assert_eq!(event.event_type, "aggregation.requested");
        assert!(event.processed_at.is_none());
    }
}
