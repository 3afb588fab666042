use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use watchdog_core::types::{AnomalySeverity, AnomalyStatus};

/// Typed anomaly detail payloads with a `check` discriminator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum TypedDetails {
    YoyDeviation {
        deviation_percent: f64,
        expected_value: Decimal,
        actual_value: Decimal,
        prior_year_month: String,
    },
    MomDeviation {
        deviation_percent: f64,
        expected_value: Decimal,
        actual_value: Decimal,
        previous_month: String,
    },
    PricePerUnitSpike {
        deviation_percent: f64,
        mean_price: Decimal,
        actual_price: Decimal,
        samples: u32,
    },
    StatisticalOutlier {
        z_score: f64,
        mean: f64,
        std_dev: f64,
        deviation_percent: f64,
        observations: u32,
    },
    BudgetExceeded {
        budget_amount: Decimal,
        ytd_spend: Decimal,
        exceeded_percent: f64,
    },
}

/// Anomaly details: a known typed variant or an opaque map for detail
/// shapes written by newer builds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnomalyDetails {
    Typed(TypedDetails),
    Opaque(serde_json::Value),
}

impl AnomalyDetails {
    pub fn deviation_percent(&self) -> Option<f64> {
        match self {
            AnomalyDetails::Typed(TypedDetails::YoyDeviation { deviation_percent, .. })
            | AnomalyDetails::Typed(TypedDetails::MomDeviation { deviation_percent, .. })
            | AnomalyDetails::Typed(TypedDetails::PricePerUnitSpike { deviation_percent, .. })
            | AnomalyDetails::Typed(TypedDetails::StatisticalOutlier { deviation_percent, .. }) => {
                Some(*deviation_percent)
            }
            AnomalyDetails::Typed(TypedDetails::BudgetExceeded { exceeded_percent, .. }) => {
                Some(*exceeded_percent)
            }
            AnomalyDetails::Opaque(value) => value
                .get("deviation_percent")
                .and_then(|v| v.as_f64()),
        }
    }
}

/// A detected anomaly, unique per `(cost_record_id, kind)` so detection
/// re-runs are idempotent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: Uuid,
    pub cost_record_id: Uuid,
    /// Check id, e.g. `yoy_deviation`.
    pub kind: String,
    pub severity: AnomalySeverity,
    pub status: AnomalyStatus,
    pub message: String,
    pub details: AnomalyDetails,
    pub is_backfill: bool,
    pub detected_at: DateTime<Utc>,
    pub acknowledged_at: Option<DateTime<Utc>>,
}

/// Uniform severity grading for magnitude-based checks: an absolute
/// deviation of 40 % or more is critical, 20 % or more a warning.
pub fn grade_severity(deviation_percent: f64) -> AnomalySeverity {
    let magnitude = deviation_percent.abs();
    if magnitude >= 40.0 {
        AnomalySeverity::Critical
    } else if magnitude >= 20.0 {
        AnomalySeverity::Warning
    } else {
        AnomalySeverity::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_severity_grading_thresholds() {
        assert_eq!(grade_severity(60.0), AnomalySeverity::Critical);
        assert_eq!(grade_severity(-45.0), AnomalySeverity::Critical);
        assert_eq!(grade_severity(40.0), AnomalySeverity::Critical);
        assert_eq!(grade_severity(25.0), AnomalySeverity::Warning);
        assert_eq!(grade_severity(-20.0), AnomalySeverity::Warning);
        assert_eq!(grade_severity(15.0), AnomalySeverity::Info);
    }

    #[test]
    fn test_details_round_trip() {
        let details = AnomalyDetails::Typed(TypedDetails::YoyDeviation {
            deviation_percent: 60.0,
            expected_value: Decimal::from_str("10000").unwrap(),
            actual_value: Decimal::from_str("16000").unwrap(),
            prior_year_month: "2023-01".into(),
        });

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["check"], "yoy_deviation");

        let back: AnomalyDetails = serde_json::from_value(json).unwrap();
        assert_eq!(back, details);
        assert_eq!(back.deviation_percent(), Some(60.0));
    }

    #[test]
    fn test_unknown_details_fall_back_to_opaque() {
        let json = serde_json::json!({ "check": "contract_drift", "deviation_percent": 12.5 });
        let details: AnomalyDetails = serde_json::from_value(json).unwrap();
        assert!(matches!(details, AnomalyDetails::Opaque(_)));
        assert_eq!(details.deviation_percent(), Some(12.5));
    }
}
