use crate::records::{CostRecord, CostRecordRepository};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::{QueryBuilder, Row};
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;
use watchdog_core::{
    database::{advisory_unlock, try_advisory_lock},
    error::Result,
    types::CostType,
    DatabasePool, Error,
};

/// Advisory lock serializing full rebuilds.
pub const REBUILD_LOCK: i64 = 0x636f_7374_0002;

/// Cursor page size for the rebuild scan and chunk size for the insert.
const SCAN_PAGE_SIZE: u32 = 1000;
const INSERT_CHUNK_SIZE: usize = 500;

/// One monthly pre-aggregate row.
///
/// Invariant: for its `(year, month, location, supplier, cost_type)`
/// tuple, `amount_sum` equals the sum over all cost records with those
/// dimensions whose `period_start` falls in the month.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonthlyAggregate {
    pub year: i32,
    pub month: u32,
    pub location_id: Uuid,
    pub supplier_id: Uuid,
    pub cost_type: CostType,
    pub amount_sum: Decimal,
    pub amount_net_sum: Decimal,
    pub quantity_sum: Decimal,
    pub record_count: i64,
    pub last_updated_at: DateTime<Utc>,
}

type AggregateKey = (i32, u32, Uuid, Uuid, CostType);

#[derive(Debug, Default, Clone)]
struct Accumulator {
    amount_sum: Decimal,
    amount_net_sum: Decimal,
    quantity_sum: Decimal,
    record_count: i64,
}

impl Accumulator {
    fn absorb(&mut self, record: &CostRecord) {
        self.amount_sum += record.amount_gross;
        self.amount_net_sum += record.amount_net;
        self.quantity_sum += record.quantity.unwrap_or(Decimal::ZERO);
        self.record_count += 1;
    }
}

/// Maintains the monthly pre-aggregates.
///
/// Incremental updates are row-level upserts needing no explicit lock;
/// full rebuilds are serialized under a named advisory lock and scan the
/// record table with cursor pagination only.
pub struct AggregationService {
    db: DatabasePool,
    records: CostRecordRepository,
}

impl AggregationService {
    pub fn new(db: DatabasePool, records: CostRecordRepository) -> Self {
        Self { db, records }
    }

    /// Fold one committed record into its monthly aggregate.
    pub async fn apply_incremental(&self, cost_record_id: Uuid) -> Result<()> {
        let record = self
            .records
            .find_by_id(cost_record_id)
            .await?
            .ok_or_else(|| Error::not_found("Cost record"))?;

        let (year, month) = record.month_key();

        sqlx::query(
            r#"
            INSERT INTO cost_record_monthly_agg (
                year, month, location_id, supplier_id, cost_type,
                amount_sum, amount_net_sum, quantity_sum, record_count, last_updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, 1, NOW())
            ON CONFLICT (year, month, location_id, supplier_id, cost_type) DO UPDATE SET
                amount_sum = cost_record_monthly_agg.amount_sum + EXCLUDED.amount_sum,
                amount_net_sum = cost_record_monthly_agg.amount_net_sum + EXCLUDED.amount_net_sum,
                quantity_sum = cost_record_monthly_agg.quantity_sum + EXCLUDED.quantity_sum,
                record_count = cost_record_monthly_agg.record_count + 1,
                last_updated_at = NOW()
            "#,
        )
        .bind(year)
        .bind(month as i32)
        .bind(record.location_id)
        .bind(record.supplier_id)
        .bind(record.cost_type.as_str())
        .bind(record.amount_gross)
        .bind(record.amount_net)
        .bind(record.quantity.unwrap_or(Decimal::ZERO))
        .execute(self.db.get())
        .await?;

        Ok(())
    }

    /// Read one aggregate row.
    pub async fn find_month(
        &self,
        year: i32,
        month: u32,
        location_id: Uuid,
        supplier_id: Uuid,
        cost_type: CostType,
    ) -> Result<Option<MonthlyAggregate>> {
        let row = sqlx::query(
            "SELECT year, month, location_id, supplier_id, cost_type, amount_sum,
                    amount_net_sum, quantity_sum, record_count, last_updated_at
             FROM cost_record_monthly_agg
             WHERE year = $1 AND month = $2 AND location_id = $3
               AND supplier_id = $4 AND cost_type = $5",
        )
        .bind(year)
        .bind(month as i32)
        .bind(location_id)
        .bind(supplier_id)
        .bind(cost_type.as_str())
        .fetch_optional(self.db.get())
        .await?;

        Ok(match row {
            Some(row) => {
                let cost_type_str: String = row.try_get("cost_type")?;
                Some(MonthlyAggregate {
                    year: row.try_get("year")?,
                    month: row.try_get::<i32, _>("month")? as u32,
                    location_id: row.try_get("location_id")?,
                    supplier_id: row.try_get("supplier_id")?,
                    cost_type: cost_type_str
                        .parse()
                        .map_err(|e| Error::internal(format!("Corrupt cost type: {}", e)))?,
                    amount_sum: row.try_get("amount_sum")?,
                    amount_net_sum: row.try_get("amount_net_sum")?,
                    quantity_sum: row.try_get("quantity_sum")?,
                    record_count: row.try_get("record_count")?,
                    last_updated_at: row.try_get("last_updated_at")?,
                })
            }
            None => None,
        })
    }

    /// Delete and recompute every aggregate row.
    ///
    /// The scan walks `id > cursor ORDER BY id LIMIT n`, linear in the
    /// table. Returns the number of aggregate rows written, or `None`
    /// when another rebuild already holds the lock.
    pub async fn rebuild_all(&self) -> Result<Option<u64>> {
        if !try_advisory_lock(self.db.get(), REBUILD_LOCK).await? {
            warn!("Aggregate rebuild already in progress elsewhere, skipping");
            return Ok(None);
        }

        let outcome = self.rebuild_locked().await;

        // Always release, even when the rebuild failed
        if let Err(e) = advisory_unlock(self.db.get(), REBUILD_LOCK).await {
            warn!(error = %e, "Failed to release rebuild lock");
        }

        outcome.map(Some)
    }

    async fn rebuild_locked(&self) -> Result<u64> {
        let started = std::time::Instant::now();

        sqlx::query("DELETE FROM cost_record_monthly_agg")
            .execute(self.db.get())
            .await?;

        let mut accumulators: HashMap<AggregateKey, Accumulator> = HashMap::new();
        let mut cursor: Option<Uuid> = None;
        let mut scanned: u64 = 0;

        loop {
            let page = self.records.scan_page(cursor, SCAN_PAGE_SIZE).await?;
            if page.is_empty() {
                break;
            }

            for record in &page {
                let (year, month) = record.month_key();
                let key = (
                    year,
                    month,
                    record.location_id,
                    record.supplier_id,
                    record.cost_type,
                );
                accumulators.entry(key).or_default().absorb(record);
            }

            scanned += page.len() as u64;
            cursor = page.last().map(|record| record.id);

            if (page.len() as u32) < SCAN_PAGE_SIZE {
                break;
            }
        }

        let rows: Vec<(AggregateKey, Accumulator)> = accumulators.into_iter().collect();
        let written = rows.len() as u64;

        for chunk in rows.chunks(INSERT_CHUNK_SIZE) {
            let mut builder = QueryBuilder::new(
                "INSERT INTO cost_record_monthly_agg (year, month, location_id, supplier_id, \
                 cost_type, amount_sum, amount_net_sum, quantity_sum, record_count, last_updated_at) ",
            );

            builder.push_values(chunk, |mut row, ((year, month, location, supplier, cost_type), acc)| {
                row.push_bind(*year)
                    .push_bind(*month as i32)
                    .push_bind(*location)
                    .push_bind(*supplier)
                    .push_bind(cost_type.as_str())
                    .push_bind(acc.amount_sum)
                    .push_bind(acc.amount_net_sum)
                    .push_bind(acc.quantity_sum)
                    .push_bind(acc.record_count)
                    .push_bind(Utc::now());
            });

            builder.build().execute(self.db.get()).await?;
        }

        info!(
            scanned = scanned,
            aggregates = written,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Aggregate rebuild complete"
        );

        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;
    use watchdog_core::types::{CostCategory, DataQuality};

    fn record(month: u32, amount: &str, quantity: Option<&str>) -> CostRecord {
        let period_start = NaiveDate::from_ymd_opt(2024, month, 1).unwrap();
        CostRecord {
            id: Uuid::new_v4(),
            document_id: None,
            location_id: Uuid::nil(),
            supplier_id: Uuid::nil(),
            cost_type: CostType::Water,
            cost_category: CostCategory::Utilities,
            period_start,
            period_end: period_start,
            invoice_date: None,
            amount_gross: Decimal::from_str(amount).unwrap(),
            amount_net: Decimal::from_str(amount).unwrap(),
            vat_amount: Decimal::ZERO,
            vat_rate: None,
            quantity: quantity.map(|q| Decimal::from_str(q).unwrap()),
            unit: None,
            price_per_unit: None,
            invoice_number: None,
            contract_number: None,
            confidence: 1.0,
            data_quality: DataQuality::Manual,
            is_verified: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_accumulator_sums_match_inputs() {
        let mut acc = Accumulator::default();
        acc.absorb(&record(1, "100.50", Some("10")));
        acc.absorb(&record(1, "49.50", None));

        assert_eq!(acc.amount_sum, Decimal::from_str("150.00").unwrap());
        assert_eq!(acc.quantity_sum, Decimal::from_str("10").unwrap());
        assert_eq!(acc.record_count, 2);
    }

    #[test]
    fn test_aggregate_key_separates_months() {
        let a = record(1, "10", None);
        let b = record(2, "10", None);
        assert_ne!(a.month_key(), b.month_key());
    }
}
