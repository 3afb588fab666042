use crate::cost_type::normalize_cost_type;
use crate::parse::{parse_amount, parse_date};
use crate::supplier::{SupplierDetector, SupplierMatch};
use crate::types::{
    ConnectorInput, ConnectorOutput, ExtractedCostRecord, ExtractionAudit, ExtractionMetadata,
};
use once_cell::sync::Lazy;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::debug;
use watchdog_core::types::CostType;

pub const CONNECTOR_ID: &str = "pdf-invoice";
pub const CONNECTOR_VERSION: &str = "1.4.0";

/// Minimum embedded text per page; below this a PDF is treated as scanned.
const MIN_CHARS_PER_PAGE: usize = 100;
/// Minimum share of alphanumeric characters among non-whitespace text.
const MIN_ALNUM_RATIO: f64 = 0.5;

static INVOICE_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:rechnungs[-\s]?n(?:ummer|r)\.?|invoice\s*(?:no|number)\.?)\s*[:\s]\s*([A-Za-z0-9][A-Za-z0-9\-/]{2,})")
        .expect("invoice number pattern is valid")
});

static CONTRACT_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:vertrags[-\s]?n(?:ummer|r)\.?|contract\s*(?:no|number)\.?)\s*[:\s]\s*([A-Za-z0-9][A-Za-z0-9\-/]{2,})")
        .expect("contract number pattern is valid")
});

static METER_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:z[äa]hler[-\s]?n(?:ummer|r)\.?|meter\s*(?:no|number)\.?)\s*[:\s]\s*([A-Za-z0-9][A-Za-z0-9\-/]{2,})")
        .expect("meter number pattern is valid")
});

static CUSTOMER_NUMBER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:kunden[-\s]?n(?:ummer|r)\.?|customer\s*(?:no|number)\.?)\s*[:\s]\s*([A-Za-z0-9][A-Za-z0-9\-/]{2,})")
        .expect("customer number pattern is valid")
});

static INVOICE_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:rechnungsdatum|invoice\s*date)\s*[:\s]\s*(\d{1,2}\.\d{1,2}\.\d{4}|\d{4}-\d{2}-\d{2})")
        .expect("invoice date pattern is valid")
});

static PERIOD_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:abrechnungszeitraum|lieferzeitraum|verbrauchszeitraum|zeitraum|billing\s*period)\s*[:\s]?\s*(?:vom?\s*)?(\d{1,2}\.\d{1,2}\.\d{4})\s*(?:bis|[-–])\s*(\d{1,2}\.\d{1,2}\.\d{4})")
        .expect("period range pattern is valid")
});

static GROSS_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:rechnungsbetrag|gesamtbetrag|bruttobetrag|zu\s*zahlen(?:der\s*betrag)?|endbetrag|total\s*amount)\s*\(?(?:brutto)?\)?\s*[:\s]?\s*(\d{1,3}(?:\.\d{3})*,\d{2})\s*(?:€|EUR)?")
        .expect("gross amount pattern is valid")
});

static NET_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:nettobetrag|netto|net\s*amount)\s*[:\s]?\s*(\d{1,3}(?:\.\d{3})*,\d{2})\s*(?:€|EUR)?")
        .expect("net amount pattern is valid")
});

static ANY_AMOUNT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d{3})*,\d{2})\s*(?:€|EUR)")
        .expect("amount pattern is valid")
});

static CONSUMPTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d{3})*(?:,\d+)?)\s*(kWh|MWh|m³|m3)")
        .expect("consumption pattern is valid")
});

/// Typed configuration for the PDF connector.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PdfConnectorConfig {
    /// Cost type applied when neither supplier profile nor document text
    /// determines one.
    #[serde(default)]
    pub default_cost_type: Option<String>,
}

impl PdfConnectorConfig {
    pub fn from_json(value: &serde_json::Value) -> Result<Self, String> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| format!("Invalid PDF connector config: {}", e))
    }
}

/// Extractor for embedded-text PDF invoices.
///
/// Scanned PDFs (image-only) are rejected with a `needs_ocr` warning; OCR
/// is deliberately out of scope.
pub struct PdfConnector {
    detector: SupplierDetector,
}

impl Default for PdfConnector {
    fn default() -> Self {
        Self::new()
    }
}

impl PdfConnector {
    pub fn new() -> Self {
        Self {
            detector: SupplierDetector::with_builtin_profiles(),
        }
    }

    pub fn with_detector(detector: SupplierDetector) -> Self {
        Self { detector }
    }

    /// JSON Schema describing the accepted configuration.
    pub fn config_schema() -> serde_json::Value {
        serde_json::json!({
            "$schema": "http://json-schema.org/draft-07/schema#",
            "title": "PdfConnectorConfig",
            "type": "object",
            "properties": {
                "default_cost_type": { "type": ["string", "null"] }
            }
        })
    }

    pub fn extract(&self, input: &ConnectorInput<'_>, config: &serde_json::Value) -> ConnectorOutput {
        let input_hash = input.input_hash();

        let config = match PdfConnectorConfig::from_json(config) {
            Ok(config) => config,
            Err(e) => {
                return ConnectorOutput::failure(
                    CONNECTOR_ID,
                    CONNECTOR_VERSION,
                    input_hash,
                    "pdf",
                    Vec::new(),
                    e,
                )
            }
        };

        let pages = match pdf_extract::extract_text_from_mem_by_pages(input.buffer) {
            Ok(pages) => pages,
            Err(e) => {
                return ConnectorOutput::failure(
                    CONNECTOR_ID,
                    CONNECTOR_VERSION,
                    input_hash,
                    "pdf",
                    Vec::new(),
                    format!("Failed to extract PDF text: {}", e),
                )
            }
        };

        if is_scanned(&pages) {
            return ConnectorOutput::failure(
                CONNECTOR_ID,
                CONNECTOR_VERSION,
                input_hash,
                "pdf",
                vec!["needs_ocr".to_string()],
                "Document appears to be scanned; embedded text is insufficient",
            );
        }

        let text = pages.join("\n");
        self.extract_from_text(&text, &config, input_hash)
    }

    /// Parse already-extracted text. Separated so the parsing logic is
    /// testable without binary PDF fixtures.
    pub fn extract_from_text(
        &self,
        text: &str,
        config: &PdfConnectorConfig,
        input_hash: String,
    ) -> ConnectorOutput {
        let mut warnings = Vec::new();

        let supplier = self.detector.detect(text);
        if supplier.is_none() {
            warnings.push("supplier not recognized".to_string());
        }

        let invoice_number = capture(&INVOICE_NUMBER, text);
        let contract_number = capture(&CONTRACT_NUMBER, text);
        let meter_number = capture(&METER_NUMBER, text);
        let customer_number = capture(&CUSTOMER_NUMBER, text);

        let invoice_date = capture(&INVOICE_DATE, text).and_then(|raw| parse_date(&raw));

        let period = PERIOD_RANGE.captures(text).and_then(|caps| {
            let start = parse_date(caps.get(1)?.as_str())?;
            let end = parse_date(caps.get(2)?.as_str())?;
            Some((start, end))
        });

        let labeled_gross = GROSS_AMOUNT
            .captures(text)
            .and_then(|caps| parse_amount(caps.get(1)?.as_str()));

        let amount_gross = labeled_gross.or_else(|| {
            // Fall back to the largest currency-tagged amount in the text
            ANY_AMOUNT
                .captures_iter(text)
                .filter_map(|caps| parse_amount(caps.get(1)?.as_str()))
                .max()
        });

        let amount_net = NET_AMOUNT
            .captures(text)
            .and_then(|caps| parse_amount(caps.get(1)?.as_str()));

        let (quantity, unit) = CONSUMPTION
            .captures(text)
            .and_then(|caps| {
                let value = parse_amount(caps.get(1)?.as_str())?;
                let unit = caps.get(2)?.as_str();
                let unit = if unit == "m3" { "m³" } else { unit };
                Some((Some(value), Some(unit.to_string())))
            })
            .unwrap_or((None, None));

        let Some(amount_gross) = amount_gross else {
            warnings.push("no amount found".to_string());
            return ConnectorOutput::failure(
                CONNECTOR_ID,
                CONNECTOR_VERSION,
                input_hash,
                "pdf",
                warnings,
                "Could not determine invoice amount",
            );
        };

        let period_start = period.map(|(start, _)| start).or(invoice_date);
        let Some(period_start) = period_start else {
            warnings.push("no billing period or invoice date found".to_string());
            return ConnectorOutput::failure(
                CONNECTOR_ID,
                CONNECTOR_VERSION,
                input_hash,
                "pdf",
                warnings,
                "Could not determine billing period",
            );
        };

        if period.is_none() {
            warnings.push("billing period missing, using invoice date".to_string());
        }

        let cost_type = resolve_cost_type(&supplier, text, config);

        let record = ExtractedCostRecord {
            external_id: ExtractedCostRecord::derive_external_id(&input_hash, 0),
            period_start,
            period_end: period.map(|(_, end)| end),
            invoice_date,
            amount_gross,
            amount_net,
            vat_rate: derive_vat_rate(amount_gross, amount_net),
            quantity,
            unit,
            cost_type,
            supplier_hint: supplier.as_ref().map(|m| m.supplier_name.clone()),
            invoice_number,
            contract_number,
            meter_number,
            customer_number,
        };

        let confidence = confidence_score(&supplier, labeled_gross.is_some(), period.is_some());
        debug!(confidence = confidence, "PDF extraction complete");

        ConnectorOutput {
            success: true,
            records: vec![record],
            metadata: ExtractionMetadata {
                source_type: "pdf".to_string(),
                confidence,
                warnings,
            },
            audit: ExtractionAudit {
                connector_id: CONNECTOR_ID.to_string(),
                connector_version: CONNECTOR_VERSION.to_string(),
                input_hash,
            },
            error: None,
        }
    }
}

/// Scanned-document heuristic: too little embedded text per page, or a
/// character distribution dominated by non-alphanumeric glyphs.
pub fn is_scanned(pages: &[String]) -> bool {
    if pages.is_empty() {
        return true;
    }

    let non_whitespace: usize = pages
        .iter()
        .map(|page| page.chars().filter(|c| !c.is_whitespace()).count())
        .sum();

    if non_whitespace < MIN_CHARS_PER_PAGE * pages.len() {
        return true;
    }

    let alphanumeric: usize = pages
        .iter()
        .map(|page| page.chars().filter(|c| c.is_alphanumeric()).count())
        .sum();

    (alphanumeric as f64 / non_whitespace as f64) < MIN_ALNUM_RATIO
}

fn capture(pattern: &Regex, text: &str) -> Option<String> {
    pattern
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

fn resolve_cost_type(
    supplier: &Option<SupplierMatch>,
    text: &str,
    config: &PdfConnectorConfig,
) -> CostType {
    if let Some(cost_type) = supplier.as_ref().and_then(|m| m.default_cost_type) {
        return cost_type;
    }

    let lower = text.to_lowercase();
    for keyword in ["fernwärme", "erdgas", "strom", "abwasser", "wasser", "abfall"] {
        if lower.contains(keyword) {
            return normalize_cost_type(keyword);
        }
    }

    config
        .default_cost_type
        .as_deref()
        .map(normalize_cost_type)
        .unwrap_or(CostType::Other)
}

fn derive_vat_rate(gross: Decimal, net: Option<Decimal>) -> Option<Decimal> {
    let net = net?;
    if net.is_zero() || gross < net {
        return None;
    }
    // Rate as a percentage, rounded to two places
    let rate = (gross - net) / net * Decimal::from(100);
    Some(rate.round_dp(2))
}

fn confidence_score(
    supplier: &Option<SupplierMatch>,
    labeled_amount: bool,
    period_found: bool,
) -> f64 {
    let mut score = supplier.as_ref().map(|m| m.confidence).unwrap_or(0.5);
    if !labeled_amount {
        score -= 0.15;
    }
    if !period_found {
        score -= 0.05;
    }
    score.clamp(0.1, 0.95)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::str::FromStr;

    const SAMPLE_INVOICE: &str = "\
Stadtwerke München GmbH
USt-IdNr: DE129523843

Rechnungsnummer: SWM-2024-001234
Kundennummer: 987654
Zählernummer: Z-44-0815
Rechnungsdatum: 05.02.2024
Abrechnungszeitraum: 01.01.2024 bis 31.01.2024

Verbrauch: 4.250 kWh
Nettobetrag: 1.037,44 €
Umsatzsteuer 19%
Rechnungsbetrag: 1.234,56 €
";

    fn extract(text: &str) -> ConnectorOutput {
        PdfConnector::new().extract_from_text(
            text,
            &PdfConnectorConfig::default(),
            "testhash".to_string(),
        )
    }

    #[test]
    fn test_full_invoice_extraction() {
        let output = extract(SAMPLE_INVOICE);
        assert!(output.success, "warnings: {:?}", output.metadata.warnings);

        let record = &output.records[0];
        assert_eq!(record.invoice_number.as_deref(), Some("SWM-2024-001234"));
        assert_eq!(record.customer_number.as_deref(), Some("987654"));
        assert_eq!(record.meter_number.as_deref(), Some("Z-44-0815"));
        assert_eq!(
            record.period_start,
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
        );
        assert_eq!(
            record.period_end,
            Some(NaiveDate::from_ymd_opt(2024, 1, 31).unwrap())
        );
        assert_eq!(
            record.invoice_date,
            Some(NaiveDate::from_ymd_opt(2024, 2, 5).unwrap())
        );
        assert_eq!(record.amount_gross, Decimal::from_str("1234.56").unwrap());
        assert_eq!(record.amount_net, Some(Decimal::from_str("1037.44").unwrap()));
        assert_eq!(record.quantity, Some(Decimal::from(4250)));
        assert_eq!(record.unit.as_deref(), Some("kWh"));
        assert_eq!(record.cost_type, CostType::Electricity);
        assert_eq!(record.supplier_hint.as_deref(), Some("Stadtwerke München"));
        // Tax-id supplier match dominates the confidence
        assert!((output.metadata.confidence - 0.95).abs() < 1e-9);
    }

    #[test]
    fn test_vat_rate_derived_from_gross_and_net() {
        let gross = Decimal::from_str("119.00").unwrap();
        let net = Decimal::from_str("100.00").unwrap();
        assert_eq!(
            derive_vat_rate(gross, Some(net)),
            Some(Decimal::from_str("19.00").unwrap())
        );
        assert_eq!(derive_vat_rate(gross, None), None);
    }

    #[test]
    fn test_scan_detection_by_char_count() {
        // Two pages with almost no text
        let pages = vec!["   x  ".to_string(), "Seite 2".to_string()];
        assert!(is_scanned(&pages));

        let dense = vec!["a".repeat(250)];
        assert!(!is_scanned(&dense));
    }

    #[test]
    fn test_scan_detection_by_alnum_ratio() {
        // Plenty of characters but mostly line-drawing garbage
        let garbage: String = "|._-~^".repeat(50);
        assert!(is_scanned(&[garbage]));
    }

    #[test]
    fn test_missing_amount_fails() {
        let output = extract("Rechnungsdatum: 05.02.2024\nKein Betrag vorhanden");
        assert!(!output.success);
        assert!(output.error.as_deref().unwrap_or("").contains("amount"));
    }

    #[test]
    fn test_fallback_to_largest_currency_amount() {
        let text = "\
Irgendein Dokument
Zeitraum: 01.03.2024 bis 31.03.2024
Teilbetrag 100,00 €
Teilbetrag 2.500,00 €
";
        let output = extract(text);
        assert!(output.success);
        assert_eq!(
            output.records[0].amount_gross,
            Decimal::from_str("2500.00").unwrap()
        );
        // Unlabeled amount costs confidence
        assert!(output.metadata.confidence < 0.5);
    }

    #[test]
    fn test_period_falls_back_to_invoice_date() {
        let text = "Rechnungsdatum: 15.06.2024\nGesamtbetrag: 321,00 €\n";
        let output = extract(text);
        assert!(output.success);
        assert_eq!(
            output.records[0].period_start,
            NaiveDate::from_ymd_opt(2024, 6, 15).unwrap()
        );
        assert!(output
            .metadata
            .warnings
            .iter()
            .any(|w| w.contains("billing period missing")));
    }
}
