use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgConnection, Row};
use std::str::FromStr;
use uuid::Uuid;
use watchdog_core::{error::Result, types::ExtractionStatus, DatabasePool, Error};

/// An uploaded source document, content-addressed by SHA-256.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: Uuid,
    pub original_filename: String,
    pub mime_type: Option<String>,
    pub file_size: i64,
    /// SHA-256 hex of the raw bytes; unique, the dedup key.
    pub file_hash: String,
    pub storage_path: String,
    pub document_type: String,
    pub extraction_status: ExtractionStatus,
    pub verification_status: Option<String>,
    pub uploaded_at: DateTime<Utc>,
    pub uploaded_by: Option<Uuid>,
}

#[derive(Clone)]
pub struct DocumentRepository {
    db: DatabasePool,
}

fn map_document(row: &PgRow) -> Result<Document> {
    let status_str: String = row.try_get("extraction_status")?;

    Ok(Document {
        id: row.try_get("id")?,
        original_filename: row.try_get("original_filename")?,
        mime_type: row.try_get("mime_type")?,
        file_size: row.try_get("file_size")?,
        file_hash: row.try_get("file_hash")?,
        storage_path: row.try_get("storage_path")?,
        document_type: row.try_get("document_type")?,
        extraction_status: ExtractionStatus::from_str(&status_str)
            .map_err(|e| Error::internal(format!("Corrupt extraction status: {}", e)))?,
        verification_status: row.try_get("verification_status")?,
        uploaded_at: row.try_get("uploaded_at")?,
        uploaded_by: row.try_get("uploaded_by")?,
    })
}

const DOCUMENT_COLUMNS: &str = "id, original_filename, mime_type, file_size, file_hash, \
     storage_path, document_type, extraction_status, verification_status, uploaded_at, uploaded_by";

impl DocumentRepository {
    pub fn new(db: DatabasePool) -> Self {
        Self { db }
    }

    /// Content-addressed lookup for the dedup law: one row per hash.
    pub async fn find_by_hash(&self, file_hash: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE file_hash = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(file_hash)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_document).transpose()
    }

    pub async fn find_by_id(&self, id: Uuid) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = $1",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(self.db.get())
        .await?;

        row.as_ref().map(map_document).transpose()
    }

    pub async fn insert_in_tx(&self, conn: &mut PgConnection, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents (id, original_filename, mime_type, file_size, file_hash,
                                   storage_path, document_type, extraction_status,
                                   verification_status, uploaded_at, uploaded_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(document.id)
        .bind(&document.original_filename)
        .bind(&document.mime_type)
        .bind(document.file_size)
        .bind(&document.file_hash)
        .bind(&document.storage_path)
        .bind(&document.document_type)
        .bind(document.extraction_status.as_str())
        .bind(&document.verification_status)
        .bind(document.uploaded_at)
        .bind(document.uploaded_by)
        .execute(conn)
        .await?;

        Ok(())
    }

    pub async fn set_extraction_status(
        &self,
        id: Uuid,
        status: ExtractionStatus,
    ) -> Result<()> {
        sqlx::query("UPDATE documents SET extraction_status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(self.db.get())
            .await?;
        Ok(())
    }
}
