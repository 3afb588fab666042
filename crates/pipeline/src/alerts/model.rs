use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use watchdog_core::types::{AlertChannel, AlertStatus};

/// One alert delivery attempt target.
///
/// `recipient` is an e-mail address for the email channel, the webhook
/// URL for Slack/Teams, and the user id for in-app notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub anomaly_id: Uuid,
    pub channel: AlertChannel,
    pub recipient: String,
    pub status: AlertStatus,
    pub sent_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Alert {
    pub fn pending(anomaly_id: Uuid, channel: AlertChannel, recipient: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            anomaly_id,
            channel,
            recipient: recipient.into(),
            status: AlertStatus::Pending,
            sent_at: None,
            error_message: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_constructor() {
        let alert = Alert::pending(Uuid::nil(), AlertChannel::Email, "ops@example.com");
        assert_eq!(alert.status, AlertStatus::Pending);
        assert!(alert.sent_at.is_none());
        assert!(alert.error_message.is_none());
    }
}
