//! Shared parsing helpers for number, date, and delimiter heuristics.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use std::str::FromStr;

/// Candidate CSV delimiters, checked by occurrence count.
pub const DELIMITER_CANDIDATES: [u8; 4] = [b';', b',', b'\t', b'|'];

/// Pick the delimiter with the highest total count over the first five
/// lines of the input.
pub fn detect_delimiter(text: &str) -> u8 {
    let sample: Vec<&str> = text.lines().take(5).collect();

    let mut best = b';';
    let mut best_count = 0usize;

    for &candidate in &DELIMITER_CANDIDATES {
        let count: usize = sample
            .iter()
            .map(|line| line.bytes().filter(|&b| b == candidate).count())
            .sum();
        if count > best_count {
            best = candidate;
            best_count = count;
        }
    }

    best
}

/// Parse an amount string, deciding between German (`1.234,56`) and
/// English (`1,234.56`) conventions.
///
/// Heuristic: when the last `,` appears after the last `.`, the comma is
/// the decimal separator. Currency symbols and whitespace are stripped
/// first.
pub fn parse_amount(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ',' || *c == '.' || *c == '-')
        .collect();

    if cleaned.is_empty() || !cleaned.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }

    let last_comma = cleaned.rfind(',');
    let last_dot = cleaned.rfind('.');

    let normalized = match (last_comma, last_dot) {
        (Some(comma), Some(dot)) => {
            if comma > dot {
                // German: dots are thousands separators
                cleaned.replace('.', "").replace(',', ".")
            } else {
                // English: commas are thousands separators
                cleaned.replace(',', "")
            }
        }
        (Some(_), None) => {
            // Only commas present: a single comma with 1-2 trailing digits
            // is a decimal comma, otherwise thousands grouping
            let after = cleaned.rsplit(',').next().unwrap_or("");
            if cleaned.matches(',').count() == 1 && after.len() <= 2 {
                cleaned.replace(',', ".")
            } else {
                cleaned.replace(',', "")
            }
        }
        (None, Some(_)) => {
            // Only dots present: exactly three trailing digits is German
            // thousands grouping (`4.250` kWh), otherwise a decimal point
            let after = cleaned.rsplit('.').next().unwrap_or("");
            if after.len() == 3 {
                cleaned.replace('.', "")
            } else {
                cleaned
            }
        }
        (None, None) => cleaned,
    };

    Decimal::from_str(&normalized).ok()
}

/// Date formats tried in order before falling back to RFC 3339.
const DATE_FORMATS: [&str; 4] = ["%d.%m.%Y", "%d/%m/%Y", "%Y-%m-%d", "%d-%m-%Y"];

pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();

    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }

    // Native fallback: full RFC 3339 timestamps
    chrono::DateTime::parse_from_rfc3339(trimmed)
        .ok()
        .map(|dt| dt.date_naive())
}

/// Decode bytes per the configured encoding. Latin-1 maps each byte to the
/// code point of the same value; anything else is treated as UTF-8 with
/// lossy replacement.
pub fn decode_text(buffer: &[u8], encoding: &str) -> String {
    match encoding.to_lowercase().as_str() {
        "latin1" | "latin-1" | "iso-8859-1" => {
            buffer.iter().map(|&b| b as char).collect()
        }
        _ => String::from_utf8_lossy(buffer).into_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_semicolon_delimiter() {
        let text = "datum;betrag;lieferant\n01.01.2024;100,00;Stadtwerke\n";
        assert_eq!(detect_delimiter(text), b';');
    }

    #[test]
    fn test_detect_tab_delimiter() {
        let text = "datum\tbetrag\n01.01.2024\t100.00\n";
        assert_eq!(detect_delimiter(text), b'\t');
    }

    #[test]
    fn test_parse_german_amount() {
        assert_eq!(parse_amount("1.234,56"), Decimal::from_str("1234.56").ok());
        assert_eq!(parse_amount("1.234,56 €"), Decimal::from_str("1234.56").ok());
        assert_eq!(parse_amount("12,50"), Decimal::from_str("12.50").ok());
    }

    #[test]
    fn test_parse_english_amount() {
        assert_eq!(parse_amount("1,234.56"), Decimal::from_str("1234.56").ok());
        assert_eq!(parse_amount("1234.56"), Decimal::from_str("1234.56").ok());
        assert_eq!(parse_amount("$ 99.95"), Decimal::from_str("99.95").ok());
    }

    #[test]
    fn test_parse_dot_only_grouping() {
        // Three trailing digits after a dot is German thousands grouping
        assert_eq!(parse_amount("4.250"), Decimal::from_str("4250").ok());
        assert_eq!(parse_amount("1.234.567"), Decimal::from_str("1234567").ok());
        // One or two trailing digits is a decimal point
        assert_eq!(parse_amount("99.5"), Decimal::from_str("99.5").ok());
    }

    #[test]
    fn test_parse_comma_only_grouping() {
        // One comma with two decimals is a decimal comma
        assert_eq!(parse_amount("512,30"), Decimal::from_str("512.30").ok());
        // Repeated commas are thousands grouping
        assert_eq!(parse_amount("1,234,567"), Decimal::from_str("1234567").ok());
    }

    #[test]
    fn test_parse_amount_rejects_garbage() {
        assert_eq!(parse_amount(""), None);
        assert_eq!(parse_amount("n/a"), None);
        assert_eq!(parse_amount("€"), None);
    }

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        assert_eq!(parse_date("01.03.2024"), Some(expected));
        assert_eq!(parse_date("01/03/2024"), Some(expected));
        assert_eq!(parse_date("2024-03-01"), Some(expected));
        assert_eq!(parse_date("01-03-2024"), Some(expected));
        assert_eq!(parse_date("2024-03-01T10:30:00+01:00"), Some(expected));
        assert_eq!(parse_date("yesterday"), None);
    }

    #[test]
    fn test_decode_latin1() {
        let bytes = [b'M', 0xE4, b'r', b'z'];
        assert_eq!(decode_text(&bytes, "latin1"), "März");
        assert_eq!(decode_text(b"plain", "utf-8"), "plain");
    }
}
