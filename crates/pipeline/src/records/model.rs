use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use uuid::Uuid;
use watchdog_core::{
    error::Result,
    types::{CostCategory, CostType, DataQuality},
    Error,
};

/// Tolerance for the gross = net + VAT invariant.
fn amount_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

/// A single time-bounded spend line.
///
/// `invoice_number` and `contract_number` are encrypted at rest; the model
/// always carries plaintext, the repository handles the conversion.
/// Amounts are fixed-point decimals with four fractional digits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CostRecord {
    pub id: Uuid,
    pub document_id: Option<Uuid>,
    pub location_id: Uuid,
    pub supplier_id: Uuid,
    pub cost_type: CostType,
    pub cost_category: CostCategory,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub invoice_date: Option<NaiveDate>,
    pub amount_gross: Decimal,
    pub amount_net: Decimal,
    pub vat_amount: Decimal,
    pub vat_rate: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub price_per_unit: Option<Decimal>,
    pub invoice_number: Option<String>,
    pub contract_number: Option<String>,
    pub confidence: f64,
    pub data_quality: DataQuality,
    pub is_verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CostRecord {
    /// Enforce the record invariants before persistence.
    pub fn validate(&self) -> Result<()> {
        if self.amount_gross <= Decimal::ZERO {
            return Err(Error::validation("amount_gross must be positive"));
        }

        if self.period_end < self.period_start {
            return Err(Error::validation("period_end must not precede period_start"));
        }

        let difference = (self.amount_gross - self.amount_net - self.vat_amount).abs();
        if difference > amount_tolerance() {
            return Err(Error::validation(format!(
                "amount_gross must equal amount_net + vat_amount (off by {})",
                difference
            )));
        }

        let today = Utc::now().date_naive();
        let years_off = (self.period_start.year() - today.year()).abs();
        if years_off > 10 {
            return Err(Error::validation(
                "period_start is more than 10 years from today",
            ));
        }

        if !(0.0..=1.0).contains(&self.confidence) {
            return Err(Error::validation("confidence must be within [0, 1]"));
        }

        Ok(())
    }

    /// `(year, month)` of the period start, the aggregation key.
    pub fn month_key(&self) -> (i32, u32) {
        (self.period_start.year(), self.period_start.month())
    }

    /// Rescale monetary fields to the persisted four fractional digits.
    pub fn normalized(mut self) -> Self {
        self.amount_gross = self.amount_gross.round_dp(4);
        self.amount_net = self.amount_net.round_dp(4);
        self.vat_amount = self.vat_amount.round_dp(4);
        if let Some(ppu) = self.price_per_unit {
            self.price_per_unit = Some(ppu.round_dp(4));
        }
        self
    }

    /// Derive price-per-unit when quantity is present and non-zero.
    pub fn with_derived_price_per_unit(mut self) -> Self {
        if self.price_per_unit.is_none() {
            if let Some(quantity) = self.quantity {
                if !quantity.is_zero() {
                    self.price_per_unit = Some((self.amount_net / quantity).round_dp(4));
                }
            }
        }
        self
    }
}

/// Map a stored data-quality string back to the enum.
pub(crate) fn parse_data_quality(value: &str) -> Result<DataQuality> {
    DataQuality::from_str(value).map_err(|e| Error::internal(format!("Corrupt data quality: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_record() -> CostRecord {
        CostRecord {
            id: Uuid::new_v4(),
            document_id: None,
            location_id: Uuid::new_v4(),
            supplier_id: Uuid::new_v4(),
            cost_type: CostType::Electricity,
            cost_category: CostCategory::Energy,
            period_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            period_end: NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
            invoice_date: None,
            amount_gross: Decimal::from_str("119.00").unwrap(),
            amount_net: Decimal::from_str("100.00").unwrap(),
            vat_amount: Decimal::from_str("19.00").unwrap(),
            vat_rate: Some(Decimal::from(19)),
            quantity: Some(Decimal::from(400)),
            unit: Some("kWh".into()),
            price_per_unit: None,
            invoice_number: Some("RE-1".into()),
            contract_number: None,
            confidence: 1.0,
            data_quality: DataQuality::Manual,
            is_verified: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_valid_record_passes() {
        assert!(base_record().validate().is_ok());
    }

    #[test]
    fn test_amount_invariant_tolerance() {
        let mut record = base_record();
        // Off by exactly 0.01 is still acceptable
        record.vat_amount = Decimal::from_str("19.01").unwrap();
        assert!(record.validate().is_ok());

        record.vat_amount = Decimal::from_str("19.02").unwrap();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_period_order_enforced() {
        let mut record = base_record();
        record.period_end = NaiveDate::from_ymd_opt(2023, 12, 31).unwrap();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_negative_amount_rejected() {
        let mut record = base_record();
        record.amount_gross = Decimal::from_str("-5").unwrap();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_far_future_period_rejected() {
        let mut record = base_record();
        record.period_start = NaiveDate::from_ymd_opt(2050, 1, 1).unwrap();
        record.period_end = NaiveDate::from_ymd_opt(2050, 1, 31).unwrap();
        assert!(record.validate().is_err());
    }

    #[test]
    fn test_price_per_unit_derivation() {
        let record = base_record().with_derived_price_per_unit();
        assert_eq!(record.price_per_unit, Some(Decimal::from_str("0.25").unwrap()));

        let mut zero_quantity = base_record();
        zero_quantity.quantity = Some(Decimal::ZERO);
        assert!(zero_quantity
            .with_derived_price_per_unit()
            .price_per_unit
            .is_none());
    }

    #[test]
    fn test_month_key() {
        assert_eq!(base_record().month_key(), (2024, 1));
    }
}
