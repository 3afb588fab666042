use super::model::{parse_data_quality, CostRecord};
use chrono::{Months, NaiveDate};
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;
use watchdog_core::{
    error::Result,
    security::FieldEncryption,
    types::{CostCategory, CostType},
    DatabasePool, Error,
};

/// Cost record persistence.
///
/// Invoice and contract numbers are encrypted before they hit a column;
/// a deterministic SHA-256 of the invoice number is stored separately so
/// the `(location, supplier, cost_type, period_start, invoice_number)`
/// uniqueness constraint can be enforced over ciphertext. Reads tolerate
/// historical plaintext values and writes always re-encrypt.
#[derive(Clone)]
pub struct CostRecordRepository {
    db: DatabasePool,
    encryption: Arc<FieldEncryption>,
}

const RECORD_COLUMNS: &str = "id, document_id, location_id, supplier_id, cost_type, cost_category, \
     period_start, period_end, invoice_date, amount_gross, amount_net, vat_amount, vat_rate, \
     quantity, unit, price_per_unit, invoice_number_encrypted, contract_number_encrypted, \
     confidence, data_quality, is_verified, created_at, updated_at";

impl CostRecordRepository {
    pub fn new(db: DatabasePool, encryption: Arc<FieldEncryption>) -> Self {
        Self { db, encryption }
    }

    pub fn pool(&self) -> &sqlx::PgPool {
        self.db.get()
    }

    fn map_record(&self, row: &PgRow) -> Result<CostRecord> {
        let cost_type_str: String = row.try_get("cost_type")?;
        let category_str: String = row.try_get("cost_category")?;
        let quality_str: String = row.try_get("data_quality")?;

        let invoice_number = row
            .try_get::<Option<String>, _>("invoice_number_encrypted")?
            .map(|stored| self.encryption.decrypt_string_lenient(&stored).value);
        let contract_number = row
            .try_get::<Option<String>, _>("contract_number_encrypted")?
            .map(|stored| self.encryption.decrypt_string_lenient(&stored).value);

        Ok(CostRecord {
            id: row.try_get("id")?,
            document_id: row.try_get("document_id")?,
            location_id: row.try_get("location_id")?,
            supplier_id: row.try_get("supplier_id")?,
            cost_type: CostType::from_str(&cost_type_str)
                .map_err(|e| Error::internal(format!("Corrupt cost type: {}", e)))?,
            cost_category: CostCategory::from_str(&category_str)
                .map_err(|e| Error::internal(format!("Corrupt cost category: {}", e)))?,
            period_start: row.try_get("period_start")?,
            period_end: row.try_get("period_end")?,
            invoice_date: row.try_get("invoice_date")?,
            amount_gross: row.try_get("amount_gross")?,
            amount_net: row.try_get("amount_net")?,
            vat_amount: row.try_get("vat_amount")?,
            vat_rate: row.try_get("vat_rate")?,
            quantity: row.try_get("quantity")?,
            unit: row.try_get("unit")?,
            price_per_unit: row.try_get("price_per_unit")?,
            invoice_number,
            contract_number,
            confidence: row.try_get("confidence")?,
            data_quality: parse_data_quality(&quality_str)?,
            is_verified: row.try_get("is_verified")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    /// Insert within a caller-owned transaction so records, the document
    /// row, and outbox events commit atomically.
    pub async fn insert_in_tx(
        &self,
        conn: &mut PgConnection,
        record: &CostRecord,
    ) -> Result<()> {
        let invoice_number_encrypted = record
            .invoice_number
            .as_deref()
            .map(|value| self.encryption.encrypt_string(value))
            .transpose()?;
        let contract_number_encrypted = record
            .contract_number
            .as_deref()
            .map(|value| self.encryption.encrypt_string(value))
            .transpose()?;
        let invoice_number_hash = record.invoice_number.as_deref().map(invoice_hash);

        sqlx::query(
            r#"
            INSERT INTO cost_records (
                id, document_id, location_id, supplier_id, cost_type, cost_category,
                period_start, period_end, invoice_date, amount_gross, amount_net,
                vat_amount, vat_rate, quantity, unit, price_per_unit,
                invoice_number_encrypted, invoice_number_hash, contract_number_encrypted,
                confidence, data_quality, is_verified, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                      $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(record.id)
        .bind(record.document_id)
        .bind(record.location_id)
        .bind(record.supplier_id)
        .bind(record.cost_type.as_str())
        .bind(record.cost_category.as_str())
        .bind(record.period_start)
        .bind(record.period_end)
        .bind(record.invoice_date)
        .bind(record.amount_gross)
        .bind(record.amount_net)
        .bind(record.vat_amount)
        .bind(record.vat_rate)
        .bind(record.quantity)
        .bind(&record.unit)
        .bind(record.price_per_unit)
        .bind(invoice_number_encrypted)
        .bind(invoice_number_hash)
        .bind(contract_number_encrypted)
        .bind(record.confidence)
        .bind(record.data_quality.as_str())
        .bind(record.is_verified)
        .bind(record.created_at)
        .bind(record.updated_at)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<CostRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM cost_records WHERE id = $1",
            RECORD_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(|row| self.map_record(row)).transpose()
    }

    /// Whether a record with the same unique tuple already exists.
    pub async fn duplicate_exists(
        &self,
        location_id: Uuid,
        supplier_id: Uuid,
        cost_type: CostType,
        period_start: NaiveDate,
        invoice_number: &str,
    ) -> Result<bool> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM cost_records
             WHERE location_id = $1 AND supplier_id = $2 AND cost_type = $3
               AND period_start = $4 AND invoice_number_hash = $5",
        )
        .bind(location_id)
        .bind(supplier_id)
        .bind(cost_type.as_str())
        .bind(period_start)
        .bind(invoice_hash(invoice_number))
        .fetch_one(self.db.get())
        .await?;

        Ok(count > 0)
    }

    /// Records in the same lane over the trailing `months_back` months,
    /// excluding the record itself. The anomaly context is built from
    /// this list.
    pub async fn history_for(
        &self,
        record: &CostRecord,
        months_back: u32,
    ) -> Result<Vec<CostRecord>> {
        let cutoff = record
            .period_start
            .checked_sub_months(Months::new(months_back))
            .unwrap_or(record.period_start);

        let rows = sqlx::query(&format!(
            "SELECT {} FROM cost_records
             WHERE location_id = $1 AND supplier_id = $2 AND cost_type = $3
               AND id <> $4 AND period_start >= $5 AND period_start < $6
             ORDER BY period_start",
            RECORD_COLUMNS
        ))
        .bind(record.location_id)
        .bind(record.supplier_id)
        .bind(record.cost_type.as_str())
        .bind(record.id)
        .bind(cutoff)
        .bind(record.period_start)
        .fetch_all(self.db.get())
        .await?;

        rows.iter().map(|row| self.map_record(row)).collect()
    }

    /// Year-to-date gross spend through the record's month.
    pub async fn ytd_sum(
        &self,
        location_id: Uuid,
        supplier_id: Uuid,
        cost_type: CostType,
        year: i32,
        through: NaiveDate,
    ) -> Result<Decimal> {
        let year_start = NaiveDate::from_ymd_opt(year, 1, 1)
            .ok_or_else(|| Error::internal("invalid year"))?;

        let sum: Option<Decimal> = sqlx::query_scalar(
            "SELECT SUM(amount_gross) FROM cost_records
             WHERE location_id = $1 AND supplier_id = $2 AND cost_type = $3
               AND period_start >= $4 AND period_start <= $5",
        )
        .bind(location_id)
        .bind(supplier_id)
        .bind(cost_type.as_str())
        .bind(year_start)
        .bind(through)
        .fetch_one(self.db.get())
        .await?;

        Ok(sum.unwrap_or(Decimal::ZERO))
    }

    /// One cursor page for the full-rebuild scan: `id > after` in id
    /// order. Offset pagination is O(n²) over the table and is not
    /// offered.
    pub async fn scan_page(&self, after: Option<Uuid>, limit: u32) -> Result<Vec<CostRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM cost_records
             WHERE ($1::uuid IS NULL OR id > $1)
             ORDER BY id
             LIMIT $2",
            RECORD_COLUMNS
        ))
        .bind(after)
        .bind(limit as i64)
        .fetch_all(self.db.get())
        .await?;

        rows.iter().map(|row| self.map_record(row)).collect()
    }

    /// Backfill/admin update with re-encryption of sensitive fields.
    pub async fn update(&self, record: &CostRecord) -> Result<()> {
        let invoice_number_encrypted = record
            .invoice_number
            .as_deref()
            .map(|value| self.encryption.encrypt_string(value))
            .transpose()?;
        let contract_number_encrypted = record
            .contract_number
            .as_deref()
            .map(|value| self.encryption.encrypt_string(value))
            .transpose()?;
        let invoice_number_hash = record.invoice_number.as_deref().map(invoice_hash);

        sqlx::query(
            r#"
            UPDATE cost_records SET
                amount_gross = $2, amount_net = $3, vat_amount = $4, vat_rate = $5,
                quantity = $6, unit = $7, price_per_unit = $8,
                invoice_number_encrypted = $9, invoice_number_hash = $10,
                contract_number_encrypted = $11, confidence = $12, is_verified = $13,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(record.id)
        .bind(record.amount_gross)
        .bind(record.amount_net)
        .bind(record.vat_amount)
        .bind(record.vat_rate)
        .bind(record.quantity)
        .bind(&record.unit)
        .bind(record.price_per_unit)
        .bind(invoice_number_encrypted)
        .bind(invoice_number_hash)
        .bind(contract_number_encrypted)
        .bind(record.confidence)
        .bind(record.is_verified)
        .execute(self.db.get())
        .await?;

        Ok(())
    }
}

/// Deterministic digest of an invoice number for uniqueness over
/// ciphertext columns.
fn invoice_hash(invoice_number: &str) -> String {
    hex::encode(Sha256::digest(invoice_number.trim().as_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invoice_hash_deterministic_and_trimmed() {
        assert_eq!(invoice_hash("RE-1"), invoice_hash(" RE-1 "));
        assert_ne!(invoice_hash("RE-1"), invoice_hash("RE-2"));
        assert_eq!(invoice_hash("RE-1").len(), 64);
    }
}
