use super::model::AnomalyDetails;
use crate::master_data::{Location, Supplier};
use crate::records::CostRecord;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::{debug, warn};
use watchdog_core::types::AnomalySeverity;

/// Tunable detection thresholds. All percentages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSettings {
    pub yoy_deviation_percent: f64,
    pub mom_deviation_percent: f64,
    pub price_per_unit_deviation_percent: f64,
    pub budget_exceeded_percent: f64,
    pub min_historical_months: u32,
}

impl Default for DetectionSettings {
    fn default() -> Self {
        Self {
            yoy_deviation_percent: 15.0,
            mom_deviation_percent: 25.0,
            price_per_unit_deviation_percent: 20.0,
            budget_exceeded_percent: 5.0,
            min_historical_months: 12,
        }
    }
}

/// Budget figures for the record's lane and year.
#[derive(Debug, Clone)]
pub struct BudgetContext {
    pub budget_amount: Decimal,
    pub ytd_spend: Decimal,
}

/// Everything a check may look at besides the record itself.
///
/// `historical_records` covers the same `(location, supplier, cost_type)`
/// lane over the trailing 24 months, excluding the record under test.
pub struct DetectionContext {
    pub location: Location,
    pub supplier: Supplier,
    pub historical_records: Vec<CostRecord>,
    pub budget: Option<BudgetContext>,
    pub settings: DetectionSettings,
}

impl DetectionContext {
    /// Number of distinct calendar months covered by the history.
    pub fn historical_months(&self) -> u32 {
        self.historical_records
            .iter()
            .map(CostRecord::month_key)
            .collect::<HashSet<_>>()
            .len() as u32
    }
}

/// A positive finding produced by one check.
#[derive(Debug, Clone)]
pub struct AnomalyFinding {
    pub kind: &'static str,
    pub severity: AnomalySeverity,
    pub message: String,
    pub details: AnomalyDetails,
}

/// Result of running one check, errors isolated.
#[derive(Debug, Clone)]
pub struct CheckResult {
    pub check_id: &'static str,
    /// `Ok(None)`: ran, no anomaly. `Ok(Some)`: anomaly. `Err`: the check
    /// itself failed; other checks still run.
    pub outcome: Result<Option<AnomalyFinding>, String>,
}

/// A single anomaly check.
pub trait AnomalyCheck: Send + Sync {
    fn id(&self) -> &'static str;

    /// Months of lane history required before the check is meaningful.
    fn min_historical_months(&self) -> u32 {
        0
    }

    fn run(&self, record: &CostRecord, ctx: &DetectionContext) -> Result<Option<AnomalyFinding>, String>;
}

/// Output of a full engine run.
#[derive(Debug)]
pub struct DetectionOutput {
    pub findings: Vec<AnomalyFinding>,
    pub check_results: Vec<CheckResult>,
}

/// Runs the ordered check list against a record and its context.
///
/// Checks execute sequentially and independently: a panic or error in one
/// check is captured into its result and the remaining checks still run.
pub struct AnomalyEngine {
    checks: Vec<Box<dyn AnomalyCheck>>,
}

impl Default for AnomalyEngine {
    fn default() -> Self {
        Self::with_builtin_checks()
    }
}

impl AnomalyEngine {
    pub fn new(checks: Vec<Box<dyn AnomalyCheck>>) -> Self {
        Self { checks }
    }

    /// The built-in check list in its canonical order.
    pub fn with_builtin_checks() -> Self {
        use super::checks::*;
        Self::new(vec![
            Box::new(YoyDeviationCheck),
            Box::new(MomDeviationCheck),
            Box::new(PricePerUnitSpikeCheck),
            Box::new(StatisticalOutlierCheck),
            Box::new(BudgetExceededCheck),
        ])
    }

    pub fn detect(&self, record: &CostRecord, ctx: &DetectionContext) -> DetectionOutput {
        let mut findings = Vec::new();
        let mut check_results = Vec::new();
        let historical_months = ctx.historical_months();

        for check in &self.checks {
            if historical_months < check.min_historical_months() {
                debug!(
                    check = check.id(),
                    historical_months = historical_months,
                    required = check.min_historical_months(),
                    "Skipping check, not enough history"
                );
                check_results.push(CheckResult {
                    check_id: check.id(),
                    outcome: Ok(None),
                });
                continue;
            }

            let outcome = catch_unwind(AssertUnwindSafe(|| check.run(record, ctx)))
                .unwrap_or_else(|_| Err("check panicked".to_string()));

            match &outcome {
                Ok(Some(finding)) => {
                    debug!(check = check.id(), severity = %finding.severity, "Anomaly found");
                    findings.push(finding.clone());
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(check = check.id(), error = %e, "Check failed; continuing");
                }
            }

            check_results.push(CheckResult {
                check_id: check.id(),
                outcome,
            });
        }

        DetectionOutput {
            findings,
            check_results,
        }
    }
}
