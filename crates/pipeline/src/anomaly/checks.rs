use super::engine::{AnomalyCheck, AnomalyFinding, DetectionContext};
use super::model::{grade_severity, AnomalyDetails, TypedDetails};
use crate::records::CostRecord;
use chrono::Datelike;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;

fn to_f64(value: Decimal) -> Result<f64, String> {
    value
        .to_f64()
        .filter(|v| v.is_finite())
        .ok_or_else(|| "amount does not fit into f64".to_string())
}

fn percent_deviation(actual: Decimal, expected: Decimal) -> Result<f64, String> {
    if expected.is_zero() {
        return Err("expected value is zero".to_string());
    }
    let actual = to_f64(actual)?;
    let expected = to_f64(expected)?;
    let deviation = (actual - expected) / expected * 100.0;
    if !deviation.is_finite() {
        return Err("deviation is not finite".to_string());
    }
    Ok(deviation)
}

/// `(year, month)` arithmetic without day-of-month pitfalls.
fn previous_month(year: i32, month: u32) -> (i32, u32) {
    if month == 1 {
        (year - 1, 12)
    } else {
        (year, month - 1)
    }
}

/// Year-over-year deviation: the record's amount against the sum of
/// same-calendar-month records from the prior year. Requires twelve
/// months of lane history.
pub struct YoyDeviationCheck;

impl AnomalyCheck for YoyDeviationCheck {
    fn id(&self) -> &'static str {
        "yoy_deviation"
    }

    fn min_historical_months(&self) -> u32 {
        12
    }

    fn run(
        &self,
        record: &CostRecord,
        ctx: &DetectionContext,
    ) -> Result<Option<AnomalyFinding>, String> {
        let (year, month) = record.month_key();
        let prior_year = year - 1;

        let prior_sum: Decimal = ctx
            .historical_records
            .iter()
            .filter(|r| {
                r.period_start.year() == prior_year && r.period_start.month() == month
            })
            .map(|r| r.amount_gross)
            .sum();

        if prior_sum.is_zero() {
            return Ok(None);
        }

        let deviation = percent_deviation(record.amount_gross, prior_sum)?;
        if deviation.abs() < ctx.settings.yoy_deviation_percent {
            return Ok(None);
        }

        Ok(Some(AnomalyFinding {
            kind: self.id(),
            severity: grade_severity(deviation),
            message: format!(
                "{} spend deviates {:.1}% from {}-{:02} ({} vs {})",
                record.cost_type, deviation, prior_year, month, record.amount_gross, prior_sum
            ),
            details: AnomalyDetails::Typed(TypedDetails::YoyDeviation {
                deviation_percent: deviation,
                expected_value: prior_sum,
                actual_value: record.amount_gross,
                prior_year_month: format!("{}-{:02}", prior_year, month),
            }),
        }))
    }
}

/// Month-over-month deviation against the immediately preceding calendar
/// month. Threshold 25 %.
pub struct MomDeviationCheck;

impl AnomalyCheck for MomDeviationCheck {
    fn id(&self) -> &'static str {
        "mom_deviation"
    }

    fn min_historical_months(&self) -> u32 {
        1
    }

    fn run(
        &self,
        record: &CostRecord,
        ctx: &DetectionContext,
    ) -> Result<Option<AnomalyFinding>, String> {
        let (year, month) = record.month_key();
        let (prev_year, prev_month) = previous_month(year, month);

        let prev_sum: Decimal = ctx
            .historical_records
            .iter()
            .filter(|r| {
                r.period_start.year() == prev_year && r.period_start.month() == prev_month
            })
            .map(|r| r.amount_gross)
            .sum();

        if prev_sum.is_zero() {
            return Ok(None);
        }

        let deviation = percent_deviation(record.amount_gross, prev_sum)?;
        if deviation.abs() < ctx.settings.mom_deviation_percent {
            return Ok(None);
        }

        Ok(Some(AnomalyFinding {
            kind: self.id(),
            severity: grade_severity(deviation),
            message: format!(
                "{} spend deviates {:.1}% from {}-{:02}",
                record.cost_type, deviation, prev_year, prev_month
            ),
            details: AnomalyDetails::Typed(TypedDetails::MomDeviation {
                deviation_percent: deviation,
                expected_value: prev_sum,
                actual_value: record.amount_gross,
                previous_month: format!("{}-{:02}", prev_year, prev_month),
            }),
        }))
    }
}

/// Price-per-unit spike against the historical mean unit price. Needs a
/// unit price on the record and at least three priced historical rows;
/// zero prices are excluded from the mean.
pub struct PricePerUnitSpikeCheck;

impl AnomalyCheck for PricePerUnitSpikeCheck {
    fn id(&self) -> &'static str {
        "price_per_unit_spike"
    }

    fn run(
        &self,
        record: &CostRecord,
        ctx: &DetectionContext,
    ) -> Result<Option<AnomalyFinding>, String> {
        let Some(current_price) = record.price_per_unit else {
            return Ok(None);
        };

        let prices: Vec<Decimal> = ctx
            .historical_records
            .iter()
            .filter_map(|r| r.price_per_unit)
            .filter(|price| !price.is_zero())
            .collect();

        if prices.len() < 3 {
            return Ok(None);
        }

        let sum: Decimal = prices.iter().copied().sum();
        let mean = sum / Decimal::from(prices.len() as i64);
        if mean.is_zero() {
            return Ok(None);
        }

        let deviation = percent_deviation(current_price, mean)?;
        if deviation < ctx.settings.price_per_unit_deviation_percent {
            return Ok(None);
        }

        Ok(Some(AnomalyFinding {
            kind: self.id(),
            severity: grade_severity(deviation),
            message: format!(
                "Unit price {} is {:.1}% above the historical mean {}",
                current_price,
                deviation,
                mean.round_dp(4)
            ),
            details: AnomalyDetails::Typed(TypedDetails::PricePerUnitSpike {
                deviation_percent: deviation,
                mean_price: mean.round_dp(4),
                actual_price: current_price,
                samples: prices.len() as u32,
            }),
        }))
    }
}

/// Z-score outlier against the historical amounts. Requires six
/// observations and non-zero variance; flags |z| > 3.
pub struct StatisticalOutlierCheck;

const Z_THRESHOLD: f64 = 3.0;
const MIN_OBSERVATIONS: usize = 6;

impl AnomalyCheck for StatisticalOutlierCheck {
    fn id(&self) -> &'static str {
        "statistical_outlier"
    }

    fn min_historical_months(&self) -> u32 {
        6
    }

    fn run(
        &self,
        record: &CostRecord,
        ctx: &DetectionContext,
    ) -> Result<Option<AnomalyFinding>, String> {
        let amounts: Vec<f64> = ctx
            .historical_records
            .iter()
            .map(|r| to_f64(r.amount_gross))
            .collect::<Result<_, _>>()?;

        if amounts.len() < MIN_OBSERVATIONS {
            return Ok(None);
        }

        let n = amounts.len() as f64;
        let mean = amounts.iter().sum::<f64>() / n;
        let variance = amounts.iter().map(|a| (a - mean).powi(2)).sum::<f64>() / n;

        if variance <= f64::EPSILON {
            return Ok(None);
        }

        let std_dev = variance.sqrt();
        let actual = to_f64(record.amount_gross)?;
        let z_score = (actual - mean) / std_dev;

        if !z_score.is_finite() {
            return Err("z-score is not finite".to_string());
        }

        if z_score.abs() <= Z_THRESHOLD {
            return Ok(None);
        }

        let deviation_percent = if mean.abs() > f64::EPSILON {
            (actual - mean) / mean * 100.0
        } else {
            0.0
        };

        Ok(Some(AnomalyFinding {
            kind: self.id(),
            severity: grade_severity(deviation_percent),
            message: format!(
                "Amount {} is a statistical outlier (z = {:.2} over {} observations)",
                record.amount_gross,
                z_score,
                amounts.len()
            ),
            details: AnomalyDetails::Typed(TypedDetails::StatisticalOutlier {
                z_score,
                mean,
                std_dev,
                deviation_percent,
                observations: amounts.len() as u32,
            }),
        }))
    }
}

/// Budget check: cumulative year-to-date spend against the lane budget.
/// Fires when spend exceeds the budget by the configured percentage.
pub struct BudgetExceededCheck;

impl AnomalyCheck for BudgetExceededCheck {
    fn id(&self) -> &'static str {
        "budget_exceeded"
    }

    fn run(
        &self,
        _record: &CostRecord,
        ctx: &DetectionContext,
    ) -> Result<Option<AnomalyFinding>, String> {
        let Some(budget) = &ctx.budget else {
            return Ok(None);
        };

        if budget.budget_amount.is_zero() {
            return Ok(None);
        }

        let exceeded = percent_deviation(budget.ytd_spend, budget.budget_amount)?;
        if exceeded < ctx.settings.budget_exceeded_percent {
            return Ok(None);
        }

        Ok(Some(AnomalyFinding {
            kind: self.id(),
            severity: grade_severity(exceeded),
            message: format!(
                "Year-to-date spend {} exceeds budget {} by {:.1}%",
                budget.ytd_spend, budget.budget_amount, exceeded
            ),
            details: AnomalyDetails::Typed(TypedDetails::BudgetExceeded {
                budget_amount: budget.budget_amount,
                ytd_spend: budget.ytd_spend,
                exceeded_percent: exceeded,
            }),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::anomaly::engine::{AnomalyEngine, DetectionSettings};
    use crate::master_data::{Location, LocationType, Ownership, Supplier};
    use chrono::{NaiveDate, Utc};
    use std::str::FromStr;
    use uuid::Uuid;
    use watchdog_core::types::{AnomalySeverity, CostCategory, CostType, DataQuality};

    fn record(year: i32, month: u32, amount: &str) -> CostRecord {
        let period_start = NaiveDate::from_ymd_opt(year, month, 1).unwrap();
        CostRecord {
            id: Uuid::new_v4(),
            document_id: None,
            location_id: Uuid::nil(),
            supplier_id: Uuid::nil(),
            cost_type: CostType::Electricity,
            cost_category: CostCategory::Energy,
            period_start,
            period_end: period_start + chrono::Duration::days(27),
            invoice_date: None,
            amount_gross: Decimal::from_str(amount).unwrap(),
            amount_net: Decimal::from_str(amount).unwrap(),
            vat_amount: Decimal::ZERO,
            vat_rate: None,
            quantity: None,
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

    fn context(history: Vec<CostRecord>) -> DetectionContext {
        DetectionContext {
            location: Location {
                id: Uuid::nil(),
                org_id: Uuid::nil(),
                code: "BER-01".into(),
                location_type: LocationType::Office,
                ownership: Ownership::Leased,
                gross_floor_area: None,
                address: None,
                active_since: None,
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            supplier: Supplier {
                id: Uuid::nil(),
                name: "Stadtwerke".into(),
                short_name: None,
                tax_id: None,
                category: None,
                cost_types: vec![CostType::Electricity],
                is_active: true,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            historical_records: history,
            budget: None,
            settings: DetectionSettings::default(),
        }
    }

    /// Twelve monthly records covering 2023 at the given base amount.
    fn year_of_history(amount: &str) -> Vec<CostRecord> {
        (1..=12).map(|month| record(2023, month, amount)).collect()
    }

    #[test]
    fn test_yoy_critical_at_sixty_percent() {
        let current = record(2024, 1, "16000");
        let ctx = context(year_of_history("10000"));

        let finding = YoyDeviationCheck.run(&current, &ctx).unwrap().unwrap();
        assert_eq!(finding.kind, "yoy_deviation");
        assert_eq!(finding.severity, AnomalySeverity::Critical);
        let deviation = finding.details.deviation_percent().unwrap();
        assert!((deviation - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_yoy_within_threshold_is_silent() {
        let current = record(2024, 1, "11000");
        let ctx = context(year_of_history("10000"));
        assert!(YoyDeviationCheck.run(&current, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_yoy_requires_twelve_months() {
        let current = record(2024, 1, "16000");
        let short_history: Vec<CostRecord> =
            (10..=12).map(|month| record(2023, month, "10000")).collect();
        let ctx = context(short_history);

        // The engine enforces the gate
        let engine = AnomalyEngine::with_builtin_checks();
        let output = engine.detect(&current, &ctx);
        assert!(!output.findings.iter().any(|f| f.kind == "yoy_deviation"));
    }

    #[test]
    fn test_mom_warning() {
        let current = record(2024, 2, "13000");
        let ctx = context(vec![record(2024, 1, "10000")]);

        let finding = MomDeviationCheck.run(&current, &ctx).unwrap().unwrap();
        // 30% over the 25% threshold grades as warning
        assert_eq!(finding.severity, AnomalySeverity::Warning);
    }

    #[test]
    fn test_mom_january_looks_at_december() {
        let current = record(2024, 1, "20000");
        let ctx = context(vec![record(2023, 12, "10000")]);

        let finding = MomDeviationCheck.run(&current, &ctx).unwrap().unwrap();
        assert_eq!(finding.severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_price_per_unit_spike() {
        let mut current = record(2024, 4, "1000");
        current.price_per_unit = Some(Decimal::from_str("0.30").unwrap());

        let history: Vec<CostRecord> = (1..=3)
            .map(|month| {
                let mut r = record(2024, month, "1000");
                r.price_per_unit = Some(Decimal::from_str("0.20").unwrap());
                r
            })
            .collect();
        let ctx = context(history);

        let finding = PricePerUnitSpikeCheck.run(&current, &ctx).unwrap().unwrap();
        assert_eq!(finding.severity, AnomalySeverity::Critical);
        let deviation = finding.details.deviation_percent().unwrap();
        assert!((deviation - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_price_per_unit_ignores_zero_prices() {
        let mut current = record(2024, 4, "1000");
        current.price_per_unit = Some(Decimal::from_str("0.30").unwrap());

        // Two real prices plus a zero: not enough samples
        let mut history: Vec<CostRecord> = (1..=2)
            .map(|month| {
                let mut r = record(2024, month, "1000");
                r.price_per_unit = Some(Decimal::from_str("0.20").unwrap());
                r
            })
            .collect();
        let mut zero = record(2024, 3, "1000");
        zero.price_per_unit = Some(Decimal::ZERO);
        history.push(zero);

        let ctx = context(history);
        assert!(PricePerUnitSpikeCheck.run(&current, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_statistical_outlier() {
        // Stable history with slight noise, then a 10x value
        let amounts = ["1000", "1010", "990", "1005", "995", "1000", "1008", "992"];
        let history: Vec<CostRecord> = amounts
            .iter()
            .enumerate()
            .map(|(i, amount)| record(2023, (i + 1) as u32, amount))
            .collect();

        let current = record(2024, 1, "10000");
        let ctx = context(history);

        let finding = StatisticalOutlierCheck.run(&current, &ctx).unwrap().unwrap();
        assert_eq!(finding.kind, "statistical_outlier");
        assert_eq!(finding.severity, AnomalySeverity::Critical);
    }

    #[test]
    fn test_statistical_outlier_needs_variance() {
        let history: Vec<CostRecord> =
            (1..=8).map(|month| record(2023, month, "1000")).collect();
        let current = record(2024, 1, "5000");
        let ctx = context(history);

        assert!(StatisticalOutlierCheck.run(&current, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_budget_exceeded() {
        let current = record(2024, 6, "1000");
        let mut ctx = context(vec![]);
        ctx.budget = Some(super::super::engine::BudgetContext {
            budget_amount: Decimal::from_str("10000").unwrap(),
            ytd_spend: Decimal::from_str("11000").unwrap(),
        });

        let finding = BudgetExceededCheck.run(&current, &ctx).unwrap().unwrap();
        assert_eq!(finding.kind, "budget_exceeded");
        // 10% over budget grades as info
        assert_eq!(finding.severity, AnomalySeverity::Info);
    }

    #[test]
    fn test_budget_within_tolerance_is_silent() {
        let current = record(2024, 6, "1000");
        let mut ctx = context(vec![]);
        ctx.budget = Some(super::super::engine::BudgetContext {
            budget_amount: Decimal::from_str("10000").unwrap(),
            ytd_spend: Decimal::from_str("10300").unwrap(),
        });

        assert!(BudgetExceededCheck.run(&current, &ctx).unwrap().is_none());
    }

    #[test]
    fn test_engine_runs_all_checks_and_isolates_failures() {
        struct PanickyCheck;
        impl AnomalyCheck for PanickyCheck {
            fn id(&self) -> &'static str {
                "panicky"
            }
            fn run(
                &self,
                _record: &CostRecord,
                _ctx: &DetectionContext,
            ) -> Result<Option<AnomalyFinding>, String> {
                panic!("boom");
            }
        }

        let engine = AnomalyEngine::new(vec![Box::new(PanickyCheck), Box::new(MomDeviationCheck)]);
        let current = record(2024, 2, "13000");
        let ctx = context(vec![record(2024, 1, "10000")]);

        let output = engine.detect(&current, &ctx);
        assert_eq!(output.check_results.len(), 2);
        assert!(output.check_results[0].outcome.is_err());
        // The later check still produced its finding
        assert_eq!(output.findings.len(), 1);
        assert_eq!(output.findings[0].kind, "mom_deviation");
    }
}
