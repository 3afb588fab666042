//! Anomaly detection: ordered, independent checks over a cost record and
//! its lane history, producing graded anomalies.

pub mod checks;
pub mod engine;
pub mod model;
pub mod repository;
pub mod service;

pub use engine::{
    AnomalyCheck, AnomalyEngine, AnomalyFinding, BudgetContext, CheckResult, DetectionContext,
    DetectionOutput, DetectionSettings,
};
pub use model::{grade_severity, Anomaly, AnomalyDetails, TypedDetails};
pub use repository::AnomalyRepository;
pub use service::AnomalyDetectionService;
