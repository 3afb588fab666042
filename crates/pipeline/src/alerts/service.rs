use super::channels::{AlertMessage, EmailSender, WebhookSender};
use super::model::Alert;
use super::repository::AlertRepository;
use crate::anomaly::AnomalyRepository;
use tracing::{debug, info, warn};
use uuid::Uuid;
use watchdog_core::{
    audit::{AuditAction, AuditEntry, AuditLogger},
    config::AlertsConfig,
    error::{Error, ErrorCode, Result},
    types::{AlertChannel, AlertStatus, RequestContext},
    DatabasePool,
};

/// Materializes alerts for detected anomalies and dispatches them.
///
/// Dispatch is idempotent on the alert status: anything not `pending` is
/// skipped, so queue redeliveries are harmless. A configurable daily cap
/// bounds the blast radius of a noisy detector.
pub struct AlertDispatchService {
    db: DatabasePool,
    alerts: AlertRepository,
    anomalies: AnomalyRepository,
    email: EmailSender,
    webhooks: WebhookSender,
    config: AlertsConfig,
    audit: AuditLogger,
}

impl AlertDispatchService {
    pub fn new(
        db: DatabasePool,
        alerts: AlertRepository,
        anomalies: AnomalyRepository,
        email: EmailSender,
        webhooks: WebhookSender,
        config: AlertsConfig,
        audit: AuditLogger,
    ) -> Self {
        Self {
            db,
            alerts,
            anomalies,
            email,
            webhooks,
            config,
            audit,
        }
    }

    /// Create pending alert rows for a freshly detected anomaly: one
    /// e-mail and one in-app alert per subscribed user, plus each
    /// configured webhook channel. Returns the created alert ids.
    pub async fn create_alerts_for_anomaly(&self, anomaly_id: Uuid) -> Result<Vec<Uuid>> {
        let mut created = Vec::new();

        let recipients: Vec<(Uuid, String)> = sqlx::query_as(
            "SELECT id, email FROM users
             WHERE is_active AND deleted_at IS NULL
               AND COALESCE(notification_settings->>'anomaly_alerts', 'true') = 'true'",
        )
        .fetch_all(self.db.get())
        .await?;

        for (user_id, email) in &recipients {
            let email_alert = Alert::pending(anomaly_id, AlertChannel::Email, email.clone());
            self.alerts.insert(&email_alert).await?;
            created.push(email_alert.id);

            let in_app = Alert::pending(anomaly_id, AlertChannel::InApp, user_id.to_string());
            self.alerts.insert(&in_app).await?;
            created.push(in_app.id);
        }

        if let Some(url) = &self.config.slack_webhook_url {
            let alert = Alert::pending(anomaly_id, AlertChannel::Slack, url.clone());
            self.alerts.insert(&alert).await?;
            created.push(alert.id);
        }

        if let Some(url) = &self.config.teams_webhook_url {
            let alert = Alert::pending(anomaly_id, AlertChannel::Teams, url.clone());
            self.alerts.insert(&alert).await?;
            created.push(alert.id);
        }

        debug!(anomaly_id = %anomaly_id, alerts = created.len(), "Alerts materialized");
        Ok(created)
    }

    /// Dispatch one alert. Called from the alerts queue worker; an `Err`
    /// return triggers queue retry with backoff.
    pub async fn dispatch(&self, alert_id: Uuid) -> Result<()> {
        let alert = self
            .alerts
            .find_by_id(alert_id)
            .await?
            .ok_or_else(|| Error::not_found("Alert"))?;

        // Idempotent skip on redelivery
        if alert.status != AlertStatus::Pending {
            debug!(alert_id = %alert_id, status = ?alert.status, "Alert not pending, skipping");
            return Ok(());
        }

        // Daily cap: over the line, the alert fails without dispatch and
        // without retry
        let sent_today = self.alerts.count_sent_today().await?;
        if sent_today >= self.config.max_alerts_per_day {
            warn!(
                alert_id = %alert_id,
                sent_today = sent_today,
                cap = self.config.max_alerts_per_day,
                "Daily alert cap reached"
            );
            self.alerts
                .mark_failed(alert_id, "daily alert cap reached")
                .await?;
            return Ok(());
        }

        let message = self.render_message(alert.anomaly_id).await?;

        let delivery = match alert.channel {
            AlertChannel::Email => self.email.send(&alert.recipient, &message).await,
            AlertChannel::Slack | AlertChannel::Teams => {
                self.webhooks
                    .send(alert.channel, &alert.recipient, &message)
                    .await
            }
            // No outbound call: the row itself is the notification
            AlertChannel::InApp => Ok(()),
        };

        match delivery {
            Ok(()) => {
                self.alerts.mark_sent(alert_id).await?;
                self.audit
                    .log(
                        AuditEntry::builder(AuditAction::AlertDispatched, "alert")
                            .entity_id(alert_id)
                            .request_context(&RequestContext::system())
                            .metadata(
                                "channel",
                                serde_json::Value::String(alert.channel.to_string()),
                            )
                            .build(),
                    )
                    .await;
                info!(alert_id = %alert_id, channel = %alert.channel, "Alert sent");
                Ok(())
            }
            Err(e) => {
                self.alerts.mark_failed(alert_id, &e.message).await?;

                if e.code == ErrorCode::WebhookRejected {
                    // A bad URL never gets better; no point retrying
                    warn!(alert_id = %alert_id, error = %e, "Webhook rejected pre-flight");
                    return Ok(());
                }

                // Put the row back to pending so the retried job finds it
                self.alerts.mark_pending(alert_id).await?;
                Err(e)
            }
        }
    }

    async fn render_message(&self, anomaly_id: Uuid) -> Result<AlertMessage> {
        let anomaly = self
            .anomalies
            .find_by_id(anomaly_id)
            .await?
            .ok_or_else(|| Error::not_found("Anomaly"))?;

        let deviation = anomaly.details.deviation_percent();
        let title = format!(
            "Cost anomaly: {} ({})",
            anomaly.kind.replace('_', " "),
            anomaly.severity
        );

        Ok(AlertMessage {
            title,
            body: anomaly.message.clone(),
            severity: anomaly.severity,
            anomaly_kind: anomaly.kind,
            deviation_percent: deviation,
        })
    }
}
