use crate::cost_type::normalize_cost_type;
use crate::parse::{decode_text, detect_delimiter, parse_amount, parse_date};
use crate::types::{
    ConnectorInput, ConnectorOutput, ExtractedCostRecord, ExtractionAudit, ExtractionMetadata,
};
use csv::ReaderBuilder;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use watchdog_core::types::CostType;

pub const CONNECTOR_ID: &str = "csv";
pub const CONNECTOR_VERSION: &str = "1.2.0";

/// Column mappings by zero-based index. `period_start` and `amount` are
/// required; everything else is optional.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvColumnMappings {
    pub period_start: usize,
    pub amount: usize,
    pub period_end: Option<usize>,
    pub invoice_date: Option<usize>,
    pub invoice_number: Option<usize>,
    pub supplier: Option<usize>,
    pub cost_type: Option<usize>,
    pub quantity: Option<usize>,
    pub unit: Option<usize>,
    pub amount_net: Option<usize>,
    pub vat_rate: Option<usize>,
}

/// Typed configuration for the CSV connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CsvConnectorConfig {
    /// Explicit delimiter; auto-detected over `; , \t |` when absent.
    #[serde(default)]
    pub delimiter: Option<char>,
    /// Quote character, doubled-quote escaping.
    #[serde(default = "default_quote")]
    pub quote: char,
    /// Whether the file starts with a header row.
    #[serde(default = "default_true")]
    pub has_header: bool,
    /// First data row (zero-based). Defaults to 1 with a header, 0 without.
    #[serde(default)]
    pub start_row: Option<usize>,
    /// `utf-8` (default) or `latin1`.
    #[serde(default = "default_encoding")]
    pub encoding: String,
    pub columns: CsvColumnMappings,
    /// Cost type applied when no cost-type column is mapped.
    #[serde(default)]
    pub default_cost_type: Option<String>,
}

fn default_quote() -> char {
    '"'
}

fn default_true() -> bool {
    true
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl CsvConnectorConfig {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        serde_json::from_value(value.clone())
            .map_err(|e| format!("Invalid CSV connector config: {}", e))
    }

    fn first_data_row(&self) -> usize {
        self.start_row
            .unwrap_or(if self.has_header { 1 } else { 0 })
    }
}

/// CSV cost-record extractor.
pub struct CsvConnector;

impl CsvConnector {
    /// JSON Schema describing the accepted configuration.
    pub fn config_schema() -> serde_json::Value {
        serde_json::json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "CsvConnectorConfig",
            "type": "object",
            "required": ["columns"],
            "properties": {
                "delimiter": { "type": ["string", "null"], "maxLength": 1 },
                "quote": { "type": "string", "maxLength": 1, "default": "\"" },
                "has_header": { "type": "boolean", "default": true },
                "start_row": { "type": ["integer", "null"], "minimum": 0 },
                "encoding": { "type": "string", "enum": ["utf-8", "latin1"], "default": "utf-8" },
                "default_cost_type": { "type": ["string", "null"] },
                "columns": {
                    "type": "object",
                    "required": ["period_start", "amount"],
                    "properties": {
                        "period_start": { "type": "integer", "minimum": 0 },
                        "amount": { "type": "integer", "minimum": 0 },
                        "period_end": { "type": ["integer", "null"], "minimum": 0 },
                        "invoice_date": { "type": ["integer", "null"], "minimum": 0 },
                        "invoice_number": { "type": ["integer", "null"], "minimum": 0 },
                        "supplier": { "type": ["integer", "null"], "minimum": 0 },
                        "cost_type": { "type": ["integer", "null"], "minimum": 0 },
                        "quantity": { "type": ["integer", "null"], "minimum": 0 },
                        "unit": { "type": ["integer", "null"], "minimum": 0 },
                        "amount_net": { "type": ["integer", "null"], "minimum": 0 },
                        "vat_rate": { "type": ["integer", "null"], "minimum": 0 }
                    }
                }
            }
        })
    }

    pub fn extract(input: &ConnectorInput<'_>, config: &serde_json::Value) -> ConnectorOutput {
        let input_hash = input.input_hash();

        let config = match CsvConnectorConfig::from_json(config) {
            Ok(config) => config,
            Err(e) => {
                return ConnectorOutput::failure(
                    CONNECTOR_ID,
                    CONNECTOR_VERSION,
                    input_hash,
                    "csv",
                    Vec::new(),
                    e,
                )
            }
        };

        let text = decode_text(input.buffer, &config.encoding);
        if text.trim().is_empty() {
            return ConnectorOutput::failure(
                CONNECTOR_ID,
                CONNECTOR_VERSION,
                input_hash,
                "csv",
                Vec::new(),
                "Empty input",
            );
        }

        let delimiter = config
            .delimiter
            .map(|c| c as u8)
            .unwrap_or_else(|| detect_delimiter(&text));
        debug!(delimiter = %(delimiter as char), "CSV delimiter selected");

        let mut reader = ReaderBuilder::new()
            .delimiter(delimiter)
            .quote(config.quote as u8)
            .has_headers(false)
            .flexible(true)
            .from_reader(text.as_bytes());

        let first_data_row = config.first_data_row();
        let mut warnings = Vec::new();
        let mut records = Vec::new();
        let mut data_rows = 0usize;

        for (row_index, result) in reader.records().enumerate() {
            if row_index < first_data_row {
                continue;
            }

            let row = match result {
                Ok(row) => row,
                Err(e) => {
                    warnings.push(format!("row {}: unreadable ({})", row_index, e));
                    data_rows += 1;
                    continue;
                }
            };

            // Ignore fully empty rows without counting them
            if row.iter().all(|field| field.trim().is_empty()) {
                continue;
            }
            data_rows += 1;

            match Self::parse_row(&row, row_index, &config, &input_hash) {
                Ok(record) => records.push(record),
                Err(e) => warnings.push(format!("row {}: {}", row_index, e)),
            }
        }

        if data_rows == 0 {
            return ConnectorOutput::failure(
                CONNECTOR_ID,
                CONNECTOR_VERSION,
                input_hash,
                "csv",
                warnings,
                "No data rows found",
            );
        }

        let confidence = (0.5 + (records.len() as f64 / data_rows as f64) * 0.4).min(0.9);
        let success = !records.is_empty();
        let error = if success {
            None
        } else {
            Some("No rows could be parsed".to_string())
        };

        ConnectorOutput {
            success,
            records,
            metadata: ExtractionMetadata {
                source_type: "csv".to_string(),
                confidence: if success { confidence } else { 0.0 },
                warnings,
            },
            audit: ExtractionAudit {
                connector_id: CONNECTOR_ID.to_string(),
                connector_version: CONNECTOR_VERSION.to_string(),
                input_hash,
            },
            error,
        }
    }

    fn parse_row(
        row: &csv::StringRecord,
        row_index: usize,
        config: &CsvConnectorConfig,
        input_hash: &str,
    ) -> Result<ExtractedCostRecord, String> {
        let columns = &config.columns;

        let field = |index: usize| -> Option<&str> {
            row.get(index).map(str::trim).filter(|s| !s.is_empty())
        };

        let period_start_raw = field(columns.period_start)
            .ok_or_else(|| format!("missing period_start column {}", columns.period_start))?;
        let period_start = parse_date(period_start_raw)
            .ok_or_else(|| format!("unparseable date '{}'", period_start_raw))?;

        let amount_raw = field(columns.amount)
            .ok_or_else(|| format!("missing amount column {}", columns.amount))?;
        let amount_gross = parse_amount(amount_raw)
            .ok_or_else(|| format!("unparseable amount '{}'", amount_raw))?;

        let optional_date = |index: Option<usize>| index.and_then(field).and_then(parse_date);
        let optional_amount = |index: Option<usize>| index.and_then(field).and_then(parse_amount);
        let optional_string =
            |index: Option<usize>| index.and_then(field).map(|s| s.to_string());

        let cost_type = columns
            .cost_type
            .and_then(field)
            .map(normalize_cost_type)
            .or_else(|| {
                config
                    .default_cost_type
                    .as_deref()
                    .map(normalize_cost_type)
            })
            .unwrap_or(CostType::Other);

        let quantity: Option<Decimal> = optional_amount(columns.quantity);

        Ok(ExtractedCostRecord {
            external_id: ExtractedCostRecord::derive_external_id(input_hash, row_index),
            period_start,
            period_end: optional_date(columns.period_end),
            invoice_date: optional_date(columns.invoice_date),
            amount_gross,
            amount_net: optional_amount(columns.amount_net),
            vat_rate: optional_amount(columns.vat_rate),
            quantity,
            unit: optional_string(columns.unit),
            cost_type,
            supplier_hint: optional_string(columns.supplier),
            invoice_number: optional_string(columns.invoice_number),
            contract_number: None,
            meter_number: None,
            customer_number: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn minimal_config() -> serde_json::Value {
        serde_json::json!({
            "columns": { "period_start": 0, "amount": 1 },
            "has_header": false
        })
    }

    #[test]
    fn test_german_decimal_row() {
        let bytes = b"01.03.2024;1.234,56 \xe2\x82\xac\n";
        let input = ConnectorInput::new(bytes);
        let output = CsvConnector::extract(&input, &minimal_config());

        assert!(output.success, "warnings: {:?}", output.metadata.warnings);
        assert_eq!(output.records.len(), 1);

        let record = &output.records[0];
        assert_eq!(
            record.period_start,
            chrono::NaiveDate::from_ymd_opt(2024, 3, 1).unwrap()
        );
        assert_eq!(record.amount_gross, Decimal::from_str("1234.56").unwrap());
    }

    #[test]
    fn test_header_row_skipped_and_columns_mapped() {
        let csv = "Datum,Betrag,Lieferant,Kostenart\n\
                   2024-01-15,99.50,Stadtwerke,Strom\n\
                   2024-02-15,88.20,Stadtwerke,Strom\n";
        let config = serde_json::json!({
            "columns": {
                "period_start": 0,
                "amount": 1,
                "supplier": 2,
                "cost_type": 3
            }
        });

        let input = ConnectorInput::new(csv.as_bytes());
        let output = CsvConnector::extract(&input, &config);

        assert!(output.success);
        assert_eq!(output.records.len(), 2);
        assert_eq!(output.records[0].cost_type, CostType::Electricity);
        assert_eq!(output.records[0].supplier_hint.as_deref(), Some("Stadtwerke"));
        // All rows parsed: confidence at the 0.9 cap
        assert!((output.metadata.confidence - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_partial_success_accumulates_warnings() {
        let csv = "01.01.2024;100,00\nnot-a-date;50,00\n01.03.2024;oops\n";
        let config = serde_json::json!({
            "columns": { "period_start": 0, "amount": 1 },
            "has_header": false
        });

        let input = ConnectorInput::new(csv.as_bytes());
        let output = CsvConnector::extract(&input, &config);

        assert!(output.success);
        assert_eq!(output.records.len(), 1);
        assert_eq!(output.metadata.warnings.len(), 2);
        // 1 of 3 rows parsed: 0.5 + (1/3)·0.4
        let expected = 0.5 + (1.0 / 3.0) * 0.4;
        assert!((output.metadata.confidence - expected).abs() < 1e-9);
    }

    #[test]
    fn test_identical_input_yields_identical_external_ids() {
        let csv = "01.01.2024;100,00\n";
        let config = serde_json::json!({
            "columns": { "period_start": 0, "amount": 1 },
            "has_header": false
        });

        let a = CsvConnector::extract(&ConnectorInput::new(csv.as_bytes()), &config);
        let b = CsvConnector::extract(&ConnectorInput::new(csv.as_bytes()), &config);
        assert_eq!(a.records[0].external_id, b.records[0].external_id);
        assert_eq!(a.audit.input_hash, b.audit.input_hash);
    }

    #[test]
    fn test_missing_required_mapping_rejected() {
        let config = serde_json::json!({ "columns": { "period_start": 0 } });
        let input = ConnectorInput::new(b"01.01.2024;1,00\n");
        let output = CsvConnector::extract(&input, &config);
        assert!(!output.success);
        assert!(output.error.is_some());
    }

    #[test]
    fn test_empty_input_fails() {
        let config = minimal_config();
        let output = CsvConnector::extract(&ConnectorInput::new(b"  "), &config);
        assert!(!output.success);
    }
}
