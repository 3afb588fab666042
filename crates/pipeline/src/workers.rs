use crate::alerts::AlertDispatchService;
use crate::anomaly::AnomalyDetectionService;
use crate::aggregation::AggregationService;
use crate::documents::DocumentRepository;
use crate::ingest::{IngestRequest, IngestionService};
use crate::outbox::{OutboxEvent, OutboxPayload, OutboxRouter, TypedPayload};
use crate::retention::RetentionRunner;
use crate::storage::ObjectStorage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use watchdog_connectors::{ConnectorInput, CsvConnector, PdfConnector};
use watchdog_core::{
    error::{Error, ErrorCode, Result},
    jobs::{
        queue::queues, EnqueueOptions, JobHandler, JobQueue, QueuedJob, QueueWorker, RedisJobQueue,
        WorkerConfig,
    },
    types::{ExtractionStatus, RequestContext},
};

/// Typed queue job payloads with a `kind` discriminator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JobPayload {
    /// Run a connector over a staged upload and ingest the result.
    Extraction {
        upload_key: String,
        filename: String,
        mime_type: Option<String>,
        location_id: Uuid,
        default_supplier_id: Option<Uuid>,
        /// `csv` or `pdf`.
        connector: String,
        config: serde_json::Value,
        uploaded_by: Option<Uuid>,
    },
    /// Detect anomalies for a committed cost record.
    AnomalyDetection {
        cost_record_id: Uuid,
        is_backfill: bool,
    },
    /// Incremental aggregate update, or a full rebuild when no record id
    /// is given.
    Aggregation { cost_record_id: Option<Uuid> },
    /// Dispatch one alert.
    AlertDispatch { alert_id: Uuid },
    /// Trigger a retention cleanup run outside the schedule.
    RetentionRun,
}

impl JobPayload {
    pub fn parse(job: &QueuedJob) -> Result<Self> {
        serde_json::from_value(job.payload.clone()).map_err(|e| {
            Error::new(
                ErrorCode::JobDeserializationError,
                format!("Unreadable {} job: {}", job.queue, e),
            )
        })
    }

    pub fn to_value(&self) -> Result<serde_json::Value> {
        Ok(serde_json::to_value(self)?)
    }
}

/// Extraction worker: staged bytes → connector → ingestion.
pub struct ExtractionHandler {
    pub storage: Arc<dyn ObjectStorage>,
    pub ingestion: Arc<IngestionService>,
    pub documents: DocumentRepository,
    pub pdf: PdfConnector,
}

#[async_trait]
impl JobHandler for ExtractionHandler {
    fn queue(&self) -> &'static str {
        queues::EXTRACTION
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::Extraction {
            upload_key,
            filename,
            mime_type,
            location_id,
            default_supplier_id,
            connector,
            config,
            uploaded_by,
        } = JobPayload::parse(job)?
        else {
            return Err(Error::new(
                ErrorCode::JobDeserializationError,
                "Wrong payload kind for the extraction queue",
            ));
        };

        let buffer = self.storage.get(&upload_key).await?;
        let input = ConnectorInput::new(&buffer).with_filename(filename.clone());

        let output = match connector.as_str() {
            "csv" => CsvConnector::extract(&input, &config),
            "pdf" => self.pdf.extract(&input, &config),
            other => {
                return Err(Error::new(
                    ErrorCode::UnsupportedDocument,
                    format!("Unknown connector: {}", other),
                ))
            }
        };

        if !output.success {
            warn!(
                upload_key = %upload_key,
                error = ?output.error,
                warnings = ?output.metadata.warnings,
                "Extraction failed"
            );
            return Err(Error::new(
                ErrorCode::ExtractionFailed,
                output
                    .error
                    .unwrap_or_else(|| "extraction produced no records".to_string()),
            ));
        }

        let outcome = self
            .ingestion
            .ingest(
                IngestRequest {
                    buffer: &buffer,
                    filename,
                    mime_type,
                    document_type: "invoice".to_string(),
                    uploaded_by,
                    location_id,
                    default_supplier_id,
                    extraction: &output,
                },
                &RequestContext::system(),
            )
            .await?;

        if !outcome.duplicate {
            self.documents
                .set_extraction_status(outcome.document_id, ExtractionStatus::Completed)
                .await?;
            // The staged upload is now persisted under its document key
            self.storage.delete(&upload_key).await?;
        }

        info!(
            document_id = %outcome.document_id,
            records = outcome.records_inserted,
            duplicate = outcome.duplicate,
            "Extraction job complete"
        );
        Ok(())
    }
}

/// Anomaly worker.
pub struct AnomalyHandler {
    pub service: Arc<AnomalyDetectionService>,
}

#[async_trait]
impl JobHandler for AnomalyHandler {
    fn queue(&self) -> &'static str {
        queues::ANOMALY
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::AnomalyDetection {
            cost_record_id,
            is_backfill,
        } = JobPayload::parse(job)?
        else {
            return Err(Error::new(
                ErrorCode::JobDeserializationError,
                "Wrong payload kind for the anomaly queue",
            ));
        };

        self.service
            .detect_for_record(cost_record_id, is_backfill)
            .await?;
        Ok(())
    }
}

/// Aggregation worker.
pub struct AggregationHandler {
    pub service: Arc<AggregationService>,
}

#[async_trait]
impl JobHandler for AggregationHandler {
    fn queue(&self) -> &'static str {
        queues::AGGREGATION
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        match JobPayload::parse(job)? {
            JobPayload::Aggregation {
                cost_record_id: Some(id),
            } => self.service.apply_incremental(id).await,
            JobPayload::Aggregation {
                cost_record_id: None,
            } => self.service.rebuild_all().await.map(|_| ()),
            _ => Err(Error::new(
                ErrorCode::JobDeserializationError,
                "Wrong payload kind for the aggregation queue",
            )),
        }
    }
}

/// Alert worker.
pub struct AlertHandler {
    pub service: Arc<AlertDispatchService>,
}

#[async_trait]
impl JobHandler for AlertHandler {
    fn queue(&self) -> &'static str {
        queues::ALERTS
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::AlertDispatch { alert_id } = JobPayload::parse(job)? else {
            return Err(Error::new(
                ErrorCode::JobDeserializationError,
                "Wrong payload kind for the alerts queue",
            ));
        };

        self.service.dispatch(alert_id).await
    }
}

/// Retention worker for out-of-schedule runs.
pub struct RetentionHandler {
    pub runner: Arc<RetentionRunner>,
}

#[async_trait]
impl JobHandler for RetentionHandler {
    fn queue(&self) -> &'static str {
        queues::RETENTION
    }

    async fn handle(&self, job: &QueuedJob) -> Result<()> {
        let JobPayload::RetentionRun = JobPayload::parse(job)? else {
            return Err(Error::new(
                ErrorCode::JobDeserializationError,
                "Wrong payload kind for the retention queue",
            ));
        };

        self.runner.run_all().await;
        Ok(())
    }
}

/// Routes committed outbox events onto the queues. Idempotent: repeated
/// routing of the same event enqueues another job, and every consumer
/// tolerates duplicates by aggregate key.
pub struct PipelineRouter {
    pub anomaly_queue: Arc<RedisJobQueue>,
    pub aggregation_queue: Arc<RedisJobQueue>,
    pub alerts_queue: Arc<RedisJobQueue>,
    pub alert_service: Arc<AlertDispatchService>,
}

#[async_trait]
impl OutboxRouter for PipelineRouter {
    async fn route(&self, event: &OutboxEvent) -> Result<()> {
        match &event.payload {
            OutboxPayload::Typed(TypedPayload::AnomalyDetectionRequested {
                cost_record_id,
                is_backfill,
            }) => {
                let payload = JobPayload::AnomalyDetection {
                    cost_record_id: *cost_record_id,
                    is_backfill: *is_backfill,
                };
                self.anomaly_queue
                    .enqueue(payload.to_value()?, EnqueueOptions::default())
                    .await?;
                Ok(())
            }
            OutboxPayload::Typed(TypedPayload::AggregationRequested { cost_record_id }) => {
                let payload = JobPayload::Aggregation {
                    cost_record_id: Some(*cost_record_id),
                };
                self.aggregation_queue
                    .enqueue(payload.to_value()?, EnqueueOptions::default())
                    .await?;
                Ok(())
            }
            OutboxPayload::Typed(TypedPayload::AnomalyDetected { anomaly_id, .. }) => {
                let alert_ids = self
                    .alert_service
                    .create_alerts_for_anomaly(*anomaly_id)
                    .await?;

                for alert_id in alert_ids {
                    let payload = JobPayload::AlertDispatch { alert_id };
                    self.alerts_queue
                        .enqueue(payload.to_value()?, EnqueueOptions::default())
                        .await?;
                }
                Ok(())
            }
            OutboxPayload::Opaque(_) => {
                warn!(
                    event_id = %event.id,
                    event_type = %event.event_type,
                    "Unknown outbox event kind, dropping"
                );
                Ok(())
            }
        }
    }
}

/// Declared worker pool sizes.
pub fn worker_configs() -> Vec<WorkerConfig> {
    vec![
        WorkerConfig::named(queues::EXTRACTION, 2),
        WorkerConfig::named(queues::ANOMALY, 5),
        WorkerConfig::named(queues::AGGREGATION, 3),
        WorkerConfig::named(queues::ALERTS, 3).with_rate_limit(20),
        WorkerConfig::named(queues::RETENTION, 1),
    ]
}

/// Wire one worker per queue with its declared concurrency.
pub fn build_workers(
    queues_by_name: impl Fn(&str) -> Arc<dyn JobQueue>,
    handlers: Vec<Arc<dyn JobHandler>>,
) -> Vec<QueueWorker> {
    handlers
        .into_iter()
        .map(|handler| {
            let queue_name = handler.queue();
            let config = worker_configs()
                .into_iter()
                .find(|c| c.worker_id.starts_with(queue_name))
                .unwrap_or_else(|| WorkerConfig::named(queue_name, 1));
            QueueWorker::new(queues_by_name(queue_name), handler, config)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_round_trip() {
        let payload = JobPayload::AnomalyDetection {
            cost_record_id: Uuid::nil(),
            is_backfill: true,
        };
        let value = payload.to_value().unwrap();
        assert_eq!(value["kind"], "anomaly_detection");

        let job = QueuedJob::new(queues::ANOMALY, value, EnqueueOptions::default());
        match JobPayload::parse(&job).unwrap() {
            JobPayload::AnomalyDetection {
                cost_record_id,
                is_backfill,
            } => {
                assert_eq!(cost_record_id, Uuid::nil());
                assert!(is_backfill);
            }
            other => panic!("wrong payload: {:?}", other),
        }
    }

    #[test]
    fn test_worker_configs_match_declared_concurrency() {
        let configs = worker_configs();
        let find = |name: &str| {
            configs
                .iter()
                .find(|c| c.worker_id.starts_with(name))
                .unwrap()
        };

        assert_eq!(find("extraction").concurrency, 2);
        assert_eq!(find("anomaly").concurrency, 5);
        assert_eq!(find("aggregation").concurrency, 3);
        assert_eq!(find("alerts").concurrency, 3);
        assert_eq!(find("alerts").rate_limit_per_second, Some(20));
        assert_eq!(find("retention").concurrency, 1);
    }
}
