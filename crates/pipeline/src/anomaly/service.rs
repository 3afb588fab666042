use super::engine::{AnomalyEngine, BudgetContext, CheckResult, DetectionContext, DetectionSettings};
use super::model::Anomaly;
use super::repository::AnomalyRepository;
use crate::master_data::{LocationRepository, SupplierRepository};
use crate::outbox::{OutboxEvent, OutboxPayload, OutboxRepository, TypedPayload};
use crate::records::{CostRecord, CostRecordRepository};
use chrono::{Datelike, Utc};
use rust_decimal::Decimal;
use tracing::{debug, info};
use uuid::Uuid;
use watchdog_core::{error::Result, types::AnomalyStatus, DatabasePool, Error};

/// Months of lane history loaded into the detection context.
const HISTORY_MONTHS: u32 = 24;

/// Result of a detection run for one record.
#[derive(Debug)]
pub struct DetectionSummary {
    pub anomalies: Vec<Anomaly>,
    pub check_results: Vec<CheckResult>,
}

/// Orchestrates detection: builds the context, runs the engine, upserts
/// anomalies, and emits `anomaly.detected` outbox events for alertable
/// findings, all in one transaction.
pub struct AnomalyDetectionService {
    db: DatabasePool,
    records: CostRecordRepository,
    locations: LocationRepository,
    suppliers: SupplierRepository,
    anomalies: AnomalyRepository,
    outbox: OutboxRepository,
    engine: AnomalyEngine,
    settings: DetectionSettings,
}

impl AnomalyDetectionService {
    pub fn new(
        db: DatabasePool,
        records: CostRecordRepository,
        locations: LocationRepository,
        suppliers: SupplierRepository,
        anomalies: AnomalyRepository,
        outbox: OutboxRepository,
    ) -> Self {
        Self {
            db,
            records,
            locations,
            suppliers,
            anomalies,
            outbox,
            engine: AnomalyEngine::with_builtin_checks(),
            settings: DetectionSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: DetectionSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Detect anomalies for one committed cost record.
    ///
    /// Backfill runs still upsert anomalies but suppress outbox events,
    /// so historical passes never page anyone.
    pub async fn detect_for_record(
        &self,
        cost_record_id: Uuid,
        is_backfill: bool,
    ) -> Result<DetectionSummary> {
        let record = self
            .records
            .find_by_id(cost_record_id)
            .await?
            .ok_or_else(|| Error::not_found("Cost record"))?;

        let ctx = self.build_context(&record).await?;
        let output = self.engine.detect(&record, &ctx);

        debug!(
            cost_record_id = %cost_record_id,
            findings = output.findings.len(),
            "Detection complete"
        );

        let mut tx = self.db.get().begin().await?;
        let mut anomalies = Vec::with_capacity(output.findings.len());

        for finding in output.findings {
            let anomaly = Anomaly {
                id: Uuid::new_v4(),
                cost_record_id,
                kind: finding.kind.to_string(),
                severity: finding.severity,
                status: AnomalyStatus::New,
                message: finding.message,
                details: finding.details,
                is_backfill,
                detected_at: Utc::now(),
                acknowledged_at: None,
            };

            let stored_id = self.anomalies.upsert_in_tx(&mut *tx, &anomaly).await?;

            if !is_backfill && anomaly.severity.is_alertable() {
                let event = OutboxEvent::new(
                    "anomaly",
                    stored_id,
                    OutboxPayload::Typed(TypedPayload::AnomalyDetected {
                        anomaly_id: stored_id,
                        cost_record_id,
                        anomaly_type: anomaly.kind.clone(),
                        severity: anomaly.severity,
                    }),
                );
                self.outbox.insert_in_tx(&mut *tx, &event).await?;
            }

            anomalies.push(Anomaly {
                id: stored_id,
                ..anomaly
            });
        }

        tx.commit().await?;

        if !anomalies.is_empty() {
            info!(
                cost_record_id = %cost_record_id,
                anomalies = anomalies.len(),
                is_backfill = is_backfill,
                "Anomalies recorded"
            );
        }

        Ok(DetectionSummary {
            anomalies,
            check_results: output.check_results,
        })
    }

    async fn build_context(&self, record: &CostRecord) -> Result<DetectionContext> {
        let location = self
            .locations
            .find_by_id(record.location_id)
            .await?
            .ok_or_else(|| Error::not_found("Location"))?;
        let supplier = self
            .suppliers
            .find_by_id(record.supplier_id)
            .await?
            .ok_or_else(|| Error::not_found("Supplier"))?;

        let historical_records = self.records.history_for(record, HISTORY_MONTHS).await?;
        let budget = self.load_budget(record).await?;

        Ok(DetectionContext {
            location,
            supplier,
            historical_records,
            budget,
            settings: self.settings.clone(),
        })
    }

    /// Budget for the record's lane and year, when one is configured.
    async fn load_budget(&self, record: &CostRecord) -> Result<Option<BudgetContext>> {
        let year = record.period_start.year();

        let budget_amount: Option<Decimal> = sqlx::query_scalar(
            "SELECT amount FROM budgets
             WHERE location_id = $1 AND cost_type = $2 AND year = $3",
        )
        .bind(record.location_id)
        .bind(record.cost_type.as_str())
        .bind(year)
        .fetch_optional(self.db.get())
        .await?;

        let Some(budget_amount) = budget_amount else {
            return Ok(None);
        };

        let ytd_spend = self
            .records
            .ytd_sum(
                record.location_id,
                record.supplier_id,
                record.cost_type,
                year,
                record.period_start,
            )
            .await?;

        Ok(Some(BudgetContext {
            budget_amount,
            ytd_spend,
        }))
    }
}
