use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use watchdog_core::types::CostType;

/// Raw input handed to a connector.
#[derive(Debug, Clone)]
pub struct ConnectorInput<'a> {
    pub buffer: &'a [u8],
    pub filename: Option<String>,
    pub mime_type: Option<String>,
}

impl<'a> ConnectorInput<'a> {
    pub fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            filename: None,
            mime_type: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }

    /// SHA-256 of the input bytes, hex encoded.
    pub fn input_hash(&self) -> String {
        hex::encode(Sha256::digest(self.buffer))
    }
}

/// A cost record as extracted from a source document, before validation
/// and persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedCostRecord {
    /// Deterministic id derived from the input hash and row index, so
    /// re-running a connector on the same bytes yields the same ids.
    pub external_id: String,
    pub period_start: NaiveDate,
    pub period_end: Option<NaiveDate>,
    pub invoice_date: Option<NaiveDate>,
    pub amount_gross: Decimal,
    pub amount_net: Option<Decimal>,
    pub vat_rate: Option<Decimal>,
    pub quantity: Option<Decimal>,
    pub unit: Option<String>,
    pub cost_type: CostType,
    pub supplier_hint: Option<String>,
    pub invoice_number: Option<String>,
    pub contract_number: Option<String>,
    pub meter_number: Option<String>,
    pub customer_number: Option<String>,
}

impl ExtractedCostRecord {
    /// `sha256(input_hash ":" row_index)`, hex encoded.
    pub fn derive_external_id(input_hash: &str, row_index: usize) -> String {
        let mut hasher = Sha256::new();
        hasher.update(input_hash.as_bytes());
        hasher.update(b":");
        hasher.update(row_index.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Extraction metadata reported alongside the records.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionMetadata {
    pub source_type: String,
    /// Overall extraction confidence in `[0, 1]`.
    pub confidence: f64,
    pub warnings: Vec<String>,
}

/// Audit block identifying the connector run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionAudit {
    pub connector_id: String,
    pub connector_version: String,
    /// SHA-256 hex of the input buffer.
    pub input_hash: String,
}

/// Complete connector result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectorOutput {
    pub success: bool,
    pub records: Vec<ExtractedCostRecord>,
    pub metadata: ExtractionMetadata,
    pub audit: ExtractionAudit,
    pub error: Option<String>,
}

impl ConnectorOutput {
    pub fn failure(
        connector_id: &str,
        connector_version: &str,
        input_hash: String,
        source_type: &str,
        warnings: Vec<String>,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            records: Vec::new(),
            metadata: ExtractionMetadata {
                source_type: source_type.to_string(),
                confidence: 0.0,
                warnings,
            },
            audit: ExtractionAudit {
                connector_id: connector_id.to_string(),
                connector_version: connector_version.to_string(),
                input_hash,
            },
            error: Some(error.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_external_id_is_deterministic() {
        let a = ExtractedCostRecord::derive_external_id("abc123", 0);
        let b = ExtractedCostRecord::derive_external_id("abc123", 0);
        let c = ExtractedCostRecord::derive_external_id("abc123", 1);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
    }

    #[test]
    fn test_input_hash_matches_sha256() {
        let input = ConnectorInput::new(b"hello");
        assert_eq!(
            input.input_hash(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
