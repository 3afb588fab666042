//! Pure extraction connectors.
//!
//! A connector is a function from raw bytes plus typed configuration to
//! canonical cost records and audit metadata. Connectors never touch the
//! database, storage, or queues; identical input bytes produce identical
//! output, including the deterministic `external_id` of every record.

pub mod cost_type;
pub mod csv_connector;
pub mod parse;
pub mod pdf_connector;
pub mod supplier;
pub mod types;

pub use cost_type::normalize_cost_type;
pub use csv_connector::{CsvConnector, CsvConnectorConfig};
pub use pdf_connector::{PdfConnector, PdfConnectorConfig};
pub use supplier::{SupplierDetector, SupplierMatch, SupplierMatchMethod};
pub use types::{
    ConnectorInput, ConnectorOutput, ExtractedCostRecord, ExtractionAudit, ExtractionMetadata,
};
