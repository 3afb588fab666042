use lettre::{
    message::header::ContentType,
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};
use watchdog_core::{
    config::EmailConfig,
    error::{Error, ErrorCode, Result},
    types::{AlertChannel, AnomalySeverity},
};

/// Host suffixes a webhook URL may resolve to, per channel. Anything else
/// is rejected before any network I/O happens.
const SLACK_HOST_SUFFIXES: &[&str] = &["hooks.slack.com"];
const TEAMS_HOST_SUFFIXES: &[&str] = &[".webhook.office.com", ".logic.azure.com"];

/// Pre-flight SSRF guard: parse the URL, require https, and check the
/// host against the channel's allow-list.
pub fn validate_webhook_url(url: &str, channel: AlertChannel) -> Result<()> {
    let parsed = reqwest::Url::parse(url).map_err(|_| {
        Error::new(
            ErrorCode::WebhookRejected,
            format!("Invalid {} webhook URL", channel),
        )
    })?;

    if parsed.scheme() != "https" {
        return Err(Error::new(
            ErrorCode::WebhookRejected,
            format!("Invalid {} webhook URL: https required", channel),
        ));
    }

    let host = parsed.host_str().unwrap_or("");
    let allowed = match channel {
        AlertChannel::Slack => SLACK_HOST_SUFFIXES
            .iter()
            .any(|suffix| host == *suffix || host.ends_with(&format!(".{}", suffix))),
        AlertChannel::Teams => TEAMS_HOST_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix)),
        _ => false,
    };

    if !allowed {
        return Err(Error::new(
            ErrorCode::WebhookRejected,
            format!("Invalid {} webhook URL", channel),
        ));
    }

    Ok(())
}

/// Content of one alert, rendered per channel.
#[derive(Debug, Clone)]
pub struct AlertMessage {
    pub title: String,
    pub body: String,
    pub severity: AnomalySeverity,
    pub anomaly_kind: String,
    pub deviation_percent: Option<f64>,
}

impl AlertMessage {
    fn severity_color(&self) -> &'static str {
        match self.severity {
            AnomalySeverity::Critical => "#d64545",
            AnomalySeverity::Warning => "#e0a030",
            AnomalySeverity::Info => "#4a90d9",
        }
    }

    /// Slack Block Kit payload.
    pub fn slack_payload(&self) -> serde_json::Value {
        json!({
            "text": self.title,
            "attachments": [{
                "color": self.severity_color(),
                "blocks": [
                    {
                        "type": "header",
                        "text": { "type": "plain_text", "text": self.title }
                    },
                    {
                        "type": "section",
                        "text": { "type": "mrkdwn", "text": self.body }
                    },
                    {
                        "type": "context",
                        "elements": [{
                            "type": "mrkdwn",
                            "text": format!("severity: *{}* · check: `{}`", self.severity, self.anomaly_kind)
                        }]
                    }
                ]
            }]
        })
    }

    /// Teams message wrapping an Adaptive Card v1.4.
    pub fn teams_payload(&self) -> serde_json::Value {
        json!({
            "type": "message",
            "attachments": [{
                "contentType": "application/vnd.microsoft.card.adaptive",
                "content": {
                    "$schema": "http://adaptivecards.io/schemas/adaptive-card.json",
                    "type": "AdaptiveCard",
                    "version": "1.4",
                    "body": [
                        {
                            "type": "TextBlock",
                            "size": "Medium",
                            "weight": "Bolder",
                            "text": self.title
                        },
                        {
                            "type": "TextBlock",
                            "wrap": true,
                            "text": self.body
                        },
                        {
                            "type": "FactSet",
                            "facts": [
                                { "title": "Severity", "value": self.severity.to_string() },
                                { "title": "Check", "value": self.anomaly_kind.clone() }
                            ]
                        }
                    ]
                }
            }]
        })
    }
}

/// Outbound webhook delivery with the 10-second ceiling.
pub struct WebhookSender {
    client: reqwest::Client,
}

impl WebhookSender {
    pub fn new(timeout_seconds: u64) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .map_err(|e| Error::internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// POST the channel payload. The URL is validated against the
    /// allow-list before the request is issued.
    pub async fn send(
        &self,
        channel: AlertChannel,
        url: &str,
        message: &AlertMessage,
    ) -> Result<()> {
        validate_webhook_url(url, channel)?;

        let payload = match channel {
            AlertChannel::Slack => message.slack_payload(),
            AlertChannel::Teams => message.teams_payload(),
            other => {
                return Err(Error::internal(format!(
                    "{} is not a webhook channel",
                    other
                )))
            }
        };

        let response = self
            .client
            .post(url)
            .json(&payload)
            .send()
            .await
            .map_err(|e| {
                let code = if e.is_timeout() {
                    ErrorCode::NetworkTimeout
                } else {
                    ErrorCode::ExternalServiceError
                };
                Error::new(code, format!("{} webhook failed: {}", channel, e))
            })?;

        if !response.status().is_success() {
            return Err(Error::new(
                ErrorCode::ExternalServiceError,
                format!("{} webhook returned {}", channel, response.status()),
            ));
        }

        debug!(channel = %channel, "Webhook delivered");
        Ok(())
    }
}

/// SMTP alert delivery; the `mock` provider logs instead of sending.
pub struct EmailSender {
    config: EmailConfig,
    transport: Option<AsyncSmtpTransport<Tokio1Executor>>,
}

impl EmailSender {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let transport = match config.provider.as_str() {
            "mock" => None,
            "smtp" => {
                let host = config.smtp_host.as_deref().ok_or_else(|| {
                    Error::configuration("email.smtp_host required for the smtp provider")
                })?;

                let mut builder =
                    AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host).map_err(|e| {
                        Error::configuration(format!("Invalid SMTP relay: {}", e))
                    })?;

                if let Some(port) = config.smtp_port {
                    builder = builder.port(port);
                }

                if let (Some(username), Some(password)) =
                    (config.smtp_username.clone(), config.smtp_password.clone())
                {
                    builder = builder.credentials(Credentials::new(username, password));
                }

                Some(
                    builder
                        .timeout(Some(Duration::from_secs(config.timeout_seconds)))
                        .build(),
                )
            }
            other => {
                return Err(Error::configuration(format!(
                    "Unsupported email provider: {}",
                    other
                )))
            }
        };

        Ok(Self { config, transport })
    }

    pub async fn send(&self, recipient: &str, message: &AlertMessage) -> Result<()> {
        let Some(transport) = &self.transport else {
            info!(
                recipient = %watchdog_core::utils::mask_email(recipient),
                title = %message.title,
                "Mock email provider: alert logged instead of sent"
            );
            return Ok(());
        };

        let email = Message::builder()
            .from(
                format!("{} <{}>", self.config.from_name, self.config.from_email)
                    .parse()
                    .map_err(|e| Error::configuration(format!("Invalid sender address: {}", e)))?,
            )
            .to(recipient
                .parse()
                .map_err(|e| Error::validation(format!("Invalid recipient address: {}", e)))?)
            .subject(&message.title)
            .header(ContentType::TEXT_PLAIN)
            .body(message.body.clone())
            .map_err(|e| Error::internal(format!("Failed to build email: {}", e)))?;

        transport.send(email).await.map_err(|e| {
            Error::new(
                ErrorCode::ExternalServiceError,
                format!("SMTP delivery failed: {}", e),
            )
        })?;

        debug!(recipient = %watchdog_core::utils::mask_email(recipient), "Alert email sent");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slack_allow_list() {
        assert!(validate_webhook_url(
            "https://hooks.slack.com/services/T000/B000/XXX",
            AlertChannel::Slack
        )
        .is_ok());

        let rejected = validate_webhook_url("https://evil.example.com/x", AlertChannel::Slack);
        assert!(rejected.is_err());
        assert_eq!(rejected.unwrap_err().code, ErrorCode::WebhookRejected);
    }

    #[test]
    fn test_teams_allow_list() {
        assert!(validate_webhook_url(
            "https://tenant.webhook.office.com/webhookb2/abc",
            AlertChannel::Teams
        )
        .is_ok());
        assert!(validate_webhook_url(
            "https://prod-01.westeurope.logic.azure.com/workflows/x",
            AlertChannel::Teams
        )
        .is_ok());
        assert!(validate_webhook_url(
            "https://webhook.office.com.evil.example/x",
            AlertChannel::Teams
        )
        .is_err());
    }

    #[test]
    fn test_https_required() {
        assert!(validate_webhook_url(
            "http://hooks.slack.com/services/T000/B000/XXX",
            AlertChannel::Slack
        )
        .is_err());
    }

    #[test]
    fn test_lookalike_hosts_rejected() {
        // Suffix must match on a label boundary
        assert!(validate_webhook_url(
            "https://nothooks.slack.com.evil.example/x",
            AlertChannel::Slack
        )
        .is_err());
        assert!(
            validate_webhook_url("https://xhooks.slack.com/x", AlertChannel::Slack).is_err()
        );
    }

    #[test]
    fn test_teams_payload_is_adaptive_card() {
        let message = AlertMessage {
            title: "Electricity spend anomaly".into(),
            body: "60% over last January".into(),
            severity: AnomalySeverity::Critical,
            anomaly_kind: "yoy_deviation".into(),
            deviation_percent: Some(60.0),
        };

        let payload = message.teams_payload();
        assert_eq!(payload["type"], "message");
        assert_eq!(
            payload["attachments"][0]["contentType"],
            "application/vnd.microsoft.card.adaptive"
        );
        assert_eq!(payload["attachments"][0]["content"]["version"], "1.4");
    }
}
