use crate::documents::{Document, DocumentRepository};
use crate::master_data::{LocationRepository, SupplierRepository};
use crate::outbox::{OutboxEvent, OutboxPayload, OutboxRepository, TypedPayload};
use crate::records::{CostRecord, CostRecordRepository};
use crate::storage::{build_document_key, ObjectStorage};
use chrono::Utc;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;
use watchdog_connectors::types::{ConnectorOutput, ExtractedCostRecord};
use watchdog_core::{
    audit::{AuditAction, AuditEntry, AuditLogger},
    error::Result,
    types::{CostCategory, DataQuality, ExtractionStatus, RequestContext},
    DatabasePool,
};

/// One upload to ingest, together with its extraction result.
pub struct IngestRequest<'a> {
    pub buffer: &'a [u8],
    pub filename: String,
    pub mime_type: Option<String>,
    pub document_type: String,
    pub uploaded_by: Option<Uuid>,
    /// Location the upload belongs to.
    pub location_id: Uuid,
    /// Supplier used when the extractor produced no resolvable hint.
    pub default_supplier_id: Option<Uuid>,
    pub extraction: &'a ConnectorOutput,
}

/// Outcome of an ingest call. A duplicate upload is a success carrying
/// the existing document id, never a conflict error.
#[derive(Debug, Clone)]
pub struct IngestOutcome {
    pub document_id: Uuid,
    pub duplicate: bool,
    pub records_inserted: usize,
    pub warnings: Vec<String>,
}

/// Turns extractor batches into persisted documents and cost records.
///
/// Persistence is a single transaction covering the document row, every
/// valid record, and the outbox events that fan out downstream jobs: a
/// failure rolls back all of it, so no orphan events exist. Invalid
/// records are skipped with warnings while the valid subset commits.
pub struct IngestionService {
    db: DatabasePool,
    documents: DocumentRepository,
    records: CostRecordRepository,
    locations: LocationRepository,
    suppliers: SupplierRepository,
    outbox: OutboxRepository,
    storage: Arc<dyn ObjectStorage>,
    audit: AuditLogger,
}

impl IngestionService {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: DatabasePool,
        documents: DocumentRepository,
        records: CostRecordRepository,
        locations: LocationRepository,
        suppliers: SupplierRepository,
        outbox: OutboxRepository,
        storage: Arc<dyn ObjectStorage>,
        audit: AuditLogger,
    ) -> Self {
        Self {
            db,
            documents,
            records,
            locations,
            suppliers,
            outbox,
            storage,
            audit,
        }
    }

    pub async fn ingest(
        &self,
        request: IngestRequest<'_>,
        ctx: &RequestContext,
    ) -> Result<IngestOutcome> {
        let file_hash = hex::encode(Sha256::digest(request.buffer));

        // Content-addressed dedup: identical bytes resolve to the one
        // existing document
        if let Some(existing) = self.documents.find_by_hash(&file_hash).await? {
            info!(document_id = %existing.id, "Duplicate upload detected");
            self.audit
                .log(
                    AuditEntry::builder(AuditAction::DocumentDuplicate, "document")
                        .entity_id(existing.id)
                        .request_context(ctx)
                        .metadata("file_hash", serde_json::Value::String(file_hash))
                        .build(),
                )
                .await;

            return Ok(IngestOutcome {
                document_id: existing.id,
                duplicate: true,
                records_inserted: 0,
                warnings: vec!["duplicate upload".to_string()],
            });
        }

        // Location must exist before anything is persisted
        let location = self
            .locations
            .find_by_id(request.location_id)
            .await?
            .ok_or_else(|| watchdog_core::Error::not_found("Location"))?;

        let document_id = Uuid::new_v4();
        let uploaded_at = Utc::now();
        let storage_path = build_document_key(uploaded_at, document_id, &request.filename);

        self.storage
            .put(
                &storage_path,
                request.buffer,
                request.mime_type.as_deref().unwrap_or("application/octet-stream"),
            )
            .await?;

        let document = Document {
            id: document_id,
            original_filename: request.filename.clone(),
            mime_type: request.mime_type.clone(),
            file_size: request.buffer.len() as i64,
            file_hash,
            storage_path,
            document_type: request.document_type.clone(),
            extraction_status: ExtractionStatus::Processing,
            verification_status: None,
            uploaded_at,
            uploaded_by: request.uploaded_by,
        };

        let mut warnings = request.extraction.metadata.warnings.clone();

        // One transaction: document, records, outbox events
        let mut tx = self.db.get().begin().await?;
        self.documents.insert_in_tx(&mut *tx, &document).await?;

        let mut inserted = 0usize;
        for extracted in &request.extraction.records {
            match self
                .prepare_record(extracted, &request, document_id)
                .await
            {
                Ok(record) => {
                    if let Some(invoice_number) = record.invoice_number.as_deref() {
                        if self
                            .records
                            .duplicate_exists(
                                record.location_id,
                                record.supplier_id,
                                record.cost_type,
                                record.period_start,
                                invoice_number,
                            )
                            .await?
                        {
                            warnings.push(format!(
                                "record {} skipped: invoice already recorded",
                                extracted.external_id
                            ));
                            continue;
                        }
                    }

                    self.records.insert_in_tx(&mut *tx, &record).await?;

                    let detection = OutboxEvent::new(
                        "cost_record",
                        record.id,
                        OutboxPayload::Typed(TypedPayload::AnomalyDetectionRequested {
                            cost_record_id: record.id,
                            is_backfill: false,
                        }),
                    );
                    self.outbox.insert_in_tx(&mut *tx, &detection).await?;

                    let aggregation = OutboxEvent::new(
                        "cost_record",
                        record.id,
                        OutboxPayload::Typed(TypedPayload::AggregationRequested {
                            cost_record_id: record.id,
                        }),
                    );
                    self.outbox.insert_in_tx(&mut *tx, &aggregation).await?;

                    inserted += 1;
                }
                Err(reason) => {
                    warn!(
                        external_id = %extracted.external_id,
                        reason = %reason,
                        "Skipping extracted record"
                    );
                    warnings.push(format!(
                        "record {} skipped: {}",
                        extracted.external_id, reason
                    ));
                }
            }
        }

        tx.commit().await?;

        self.audit
            .log(
                AuditEntry::builder(AuditAction::DocumentUploaded, "document")
                    .entity_id(document_id)
                    .request_context(ctx)
                    .metadata("location_code", serde_json::Value::String(location.code))
                    .metadata("records", serde_json::Value::from(inserted))
                    .build(),
            )
            .await;

        info!(
            document_id = %document_id,
            records = inserted,
            warnings = warnings.len(),
            "Ingest committed"
        );

        Ok(IngestOutcome {
            document_id,
            duplicate: false,
            records_inserted: inserted,
            warnings,
        })
    }

    /// Map an extracted record onto the persistence model, resolving the
    /// supplier and deriving missing monetary fields. Returns a skip
    /// reason rather than failing the batch.
    async fn prepare_record(
        &self,
        extracted: &ExtractedCostRecord,
        request: &IngestRequest<'_>,
        document_id: Uuid,
    ) -> std::result::Result<CostRecord, String> {
        let supplier_id = match &extracted.supplier_hint {
            Some(hint) => match self.suppliers.find_by_name(hint).await {
                Ok(Some(supplier)) => supplier.id,
                Ok(None) => request
                    .default_supplier_id
                    .ok_or_else(|| format!("unknown supplier '{}'", hint))?,
                Err(e) => return Err(format!("supplier lookup failed: {}", e)),
            },
            None => request
                .default_supplier_id
                .ok_or_else(|| "no supplier hint and no default supplier".to_string())?,
        };

        let amount_gross = extracted.amount_gross;
        let (amount_net, vat_amount) = match (extracted.amount_net, extracted.vat_rate) {
            (Some(net), _) => (net, amount_gross - net),
            (None, Some(rate)) => {
                let divisor = Decimal::ONE + rate / Decimal::from(100);
                if divisor.is_zero() {
                    (amount_gross, Decimal::ZERO)
                } else {
                    let net = (amount_gross / divisor).round_dp(4);
                    (net, amount_gross - net)
                }
            }
            (None, None) => (amount_gross, Decimal::ZERO),
        };

        let now = Utc::now();
        let record = CostRecord {
            id: Uuid::new_v4(),
            document_id: Some(document_id),
            location_id: request.location_id,
            supplier_id,
            cost_type: extracted.cost_type,
            cost_category: CostCategory::for_cost_type(extracted.cost_type),
            period_start: extracted.period_start,
            period_end: extracted.period_end.unwrap_or(extracted.period_start),
            invoice_date: extracted.invoice_date,
            amount_gross,
            amount_net,
            vat_amount,
            vat_rate: extracted.vat_rate,
            quantity: extracted.quantity,
            unit: extracted.unit.clone(),
            price_per_unit: None,
            invoice_number: extracted.invoice_number.clone(),
            contract_number: extracted.contract_number.clone(),
            confidence: request.extraction.metadata.confidence,
            data_quality: DataQuality::Extracted,
            is_verified: false,
            created_at: now,
            updated_at: now,
        }
        .normalized()
        .with_derived_price_per_unit();

        record.validate().map_err(|e| e.message)?;
        Ok(record)
    }
}
