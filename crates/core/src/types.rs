use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Cost types tracked by the platform.
///
/// Stored as lowercase snake-case text in Postgres; connectors normalize
/// German and English supplier vocabulary onto these variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostType {
    Electricity,
    NaturalGas,
    DistrictHeating,
    Water,
    Sewage,
    Waste,
    Cleaning,
    Maintenance,
    Security,
    Insurance,
    Rent,
    Other,
}

impl CostType {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostType::Electricity => "electricity",
            CostType::NaturalGas => "natural_gas",
            CostType::DistrictHeating => "district_heating",
            CostType::Water => "water",
            CostType::Sewage => "sewage",
            CostType::Waste => "waste",
            CostType::Cleaning => "cleaning",
            CostType::Maintenance => "maintenance",
            CostType::Security => "security",
            CostType::Insurance => "insurance",
            CostType::Rent => "rent",
            CostType::Other => "other",
        }
    }
}

impl fmt::Display for CostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for CostType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "electricity" => Ok(CostType::Electricity),
            "natural_gas" => Ok(CostType::NaturalGas),
            "district_heating" => Ok(CostType::DistrictHeating),
            "water" => Ok(CostType::Water),
            "sewage" => Ok(CostType::Sewage),
            "waste" => Ok(CostType::Waste),
            "cleaning" => Ok(CostType::Cleaning),
            "maintenance" => Ok(CostType::Maintenance),
            "security" => Ok(CostType::Security),
            "insurance" => Ok(CostType::Insurance),
            "rent" => Ok(CostType::Rent),
            "other" => Ok(CostType::Other),
            other => Err(format!("unknown cost type: {}", other)),
        }
    }
}

/// High-level grouping used for reporting and budgets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostCategory {
    Energy,
    Utilities,
    FacilityServices,
    RealEstate,
    Other,
}

impl CostCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            CostCategory::Energy => "energy",
            CostCategory::Utilities => "utilities",
            CostCategory::FacilityServices => "facility_services",
            CostCategory::RealEstate => "real_estate",
            CostCategory::Other => "other",
        }
    }

    /// Default category for a cost type.
    pub fn for_cost_type(cost_type: CostType) -> Self {
        match cost_type {
            CostType::Electricity | CostType::NaturalGas | CostType::DistrictHeating => {
                CostCategory::Energy
            }
            CostType::Water | CostType::Sewage | CostType::Waste => CostCategory::Utilities,
            CostType::Cleaning | CostType::Maintenance | CostType::Security => {
                CostCategory::FacilityServices
            }
            CostType::Rent | CostType::Insurance => CostCategory::RealEstate,
            CostType::Other => CostCategory::Other,
        }
    }
}

impl FromStr for CostCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "energy" => Ok(CostCategory::Energy),
            "utilities" => Ok(CostCategory::Utilities),
            "facility_services" => Ok(CostCategory::FacilityServices),
            "real_estate" => Ok(CostCategory::RealEstate),
            "other" => Ok(CostCategory::Other),
            other => Err(format!("unknown cost category: {}", other)),
        }
    }
}

impl fmt::Display for CostCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Provenance of a cost record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataQuality {
    Manual,
    Extracted,
    Imported,
}

impl DataQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataQuality::Manual => "manual",
            DataQuality::Extracted => "extracted",
            DataQuality::Imported => "imported",
        }
    }
}

impl FromStr for DataQuality {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(DataQuality::Manual),
            "extracted" => Ok(DataQuality::Extracted),
            "imported" => Ok(DataQuality::Imported),
            other => Err(format!("unknown data quality: {}", other)),
        }
    }
}

/// Anomaly severity, ordered so `Critical > Warning > Info`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum AnomalySeverity {
    Info,
    Warning,
    Critical,
}

impl AnomalySeverity {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalySeverity::Info => "info",
            AnomalySeverity::Warning => "warning",
            AnomalySeverity::Critical => "critical",
        }
    }

    /// Whether anomalies of this severity are alert-worthy.
    pub fn is_alertable(&self) -> bool {
        matches!(self, AnomalySeverity::Warning | AnomalySeverity::Critical)
    }
}

impl FromStr for AnomalySeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "info" => Ok(AnomalySeverity::Info),
            "warning" => Ok(AnomalySeverity::Warning),
            "critical" => Ok(AnomalySeverity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

impl fmt::Display for AnomalySeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Triage state of a detected anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyStatus {
    New,
    Acknowledged,
    Dismissed,
    FalsePositive,
}

impl AnomalyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnomalyStatus::New => "new",
            AnomalyStatus::Acknowledged => "acknowledged",
            AnomalyStatus::Dismissed => "dismissed",
            AnomalyStatus::FalsePositive => "false_positive",
        }
    }
}

impl FromStr for AnomalyStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(AnomalyStatus::New),
            "acknowledged" => Ok(AnomalyStatus::Acknowledged),
            "dismissed" => Ok(AnomalyStatus::Dismissed),
            "false_positive" => Ok(AnomalyStatus::FalsePositive),
            other => Err(format!("unknown anomaly status: {}", other)),
        }
    }
}

/// Alert delivery channels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    Email,
    Slack,
    Teams,
    InApp,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::Email => "email",
            AlertChannel::Slack => "slack",
            AlertChannel::Teams => "teams",
            AlertChannel::InApp => "in_app",
        }
    }
}

impl FromStr for AlertChannel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "email" => Ok(AlertChannel::Email),
            "slack" => Ok(AlertChannel::Slack),
            "teams" => Ok(AlertChannel::Teams),
            "in_app" => Ok(AlertChannel::InApp),
            other => Err(format!("unknown alert channel: {}", other)),
        }
    }
}

impl fmt::Display for AlertChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Alert lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertStatus {
    Pending,
    Sent,
    Failed,
}

impl AlertStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertStatus::Pending => "pending",
            AlertStatus::Sent => "sent",
            AlertStatus::Failed => "failed",
        }
    }
}

impl FromStr for AlertStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(AlertStatus::Pending),
            "sent" => Ok(AlertStatus::Sent),
            "failed" => Ok(AlertStatus::Failed),
            other => Err(format!("unknown alert status: {}", other)),
        }
    }
}

/// Document extraction lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExtractionStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Processing => "processing",
            ExtractionStatus::Completed => "completed",
            ExtractionStatus::Failed => "failed",
        }
    }
}

impl FromStr for ExtractionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ExtractionStatus::Pending),
            "processing" => Ok(ExtractionStatus::Processing),
            "completed" => Ok(ExtractionStatus::Completed),
            "failed" => Ok(ExtractionStatus::Failed),
            other => Err(format!("unknown extraction status: {}", other)),
        }
    }
}

/// User roles. `Admin` cannot disable its own MFA; `Auditor` is read-only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Manager,
    Analyst,
    Viewer,
    Auditor,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Manager => "manager",
            UserRole::Analyst => "analyst",
            UserRole::Viewer => "viewer",
            UserRole::Auditor => "auditor",
        }
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "admin" => Ok(UserRole::Admin),
            "manager" => Ok(UserRole::Manager),
            "analyst" => Ok(UserRole::Analyst),
            "viewer" => Ok(UserRole::Viewer),
            "auditor" => Ok(UserRole::Auditor),
            other => Err(format!("unknown role: {}", other)),
        }
    }
}

/// Per-request identity and audit headers.
///
/// `request_id` is echoed from `X-Request-ID` or generated; `ip_address` is
/// the first `X-Forwarded-For` entry, then `X-Real-IP`, then the transport
/// address. All audit entries capture these fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    pub request_id: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl RequestContext {
    pub fn new(
        request_id: Option<String>,
        ip_address: Option<String>,
        user_agent: Option<String>,
    ) -> Self {
        Self {
            request_id: request_id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            ip_address,
            user_agent,
            received_at: Utc::now(),
        }
    }

    /// Context for background work with no originating request.
    pub fn system() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            ip_address: None,
            user_agent: None,
            received_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(AnomalySeverity::Critical > AnomalySeverity::Warning);
        assert!(AnomalySeverity::Warning > AnomalySeverity::Info);
        assert!(AnomalySeverity::Critical.is_alertable());
        assert!(!AnomalySeverity::Info.is_alertable());
    }

    #[test]
    fn test_cost_type_round_trip() {
        for ct in [
            CostType::Electricity,
            CostType::NaturalGas,
            CostType::DistrictHeating,
            CostType::Other,
        ] {
            assert_eq!(ct.as_str().parse::<CostType>().unwrap(), ct);
        }
        assert!("plasma".parse::<CostType>().is_err());
    }

    #[test]
    fn test_default_category_assignment() {
        assert_eq!(
            CostCategory::for_cost_type(CostType::Electricity),
            CostCategory::Energy
        );
        assert_eq!(
            CostCategory::for_cost_type(CostType::Cleaning),
            CostCategory::FacilityServices
        );
    }

    #[test]
    fn test_request_context_generates_id() {
        let ctx = RequestContext::new(None, Some("10.0.0.1".into()), None);
        assert!(!ctx.request_id.is_empty());

        let ctx = RequestContext::new(Some("req-123".into()), None, None);
        assert_eq!(ctx.request_id, "req-123");
    }
}
