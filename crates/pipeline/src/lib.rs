//! Ingestion, anomaly detection, aggregation, outbox dispatch, alert
//! fan-out, and retention for the cost-observability pipeline.
//!
//! Data flow: source bytes → connector → ingestion (one transaction:
//! document + records + outbox rows) → anomaly engine → outbox dispatcher
//! → alert worker → channel adapter.

pub mod aggregation;
pub mod alerts;
pub mod anomaly;
pub mod documents;
pub mod ingest;
pub mod master_data;
pub mod outbox;
pub mod records;
pub mod retention;
pub mod storage;
pub mod workers;

pub use aggregation::{AggregationService, MonthlyAggregate};
pub use alerts::{Alert, AlertDispatchService, AlertRepository};
pub use anomaly::{Anomaly, AnomalyDetectionService, AnomalyEngine, AnomalyRepository};
pub use documents::{Document, DocumentRepository};
pub use ingest::{IngestOutcome, IngestRequest, IngestionService};
pub use outbox::{OutboxDispatcher, OutboxEvent, OutboxPayload, OutboxRepository, TypedPayload};
pub use records::{CostRecord, CostRecordRepository};
pub use retention::{RetentionRunner, RetentionScheduler, TaskReport};
pub use storage::{build_document_key, FilesystemStorage, MemoryStorage, ObjectStorage};
pub use workers::{JobPayload, PipelineRouter};
