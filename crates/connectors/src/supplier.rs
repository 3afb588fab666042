use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::debug;
use watchdog_core::types::CostType;

/// How a supplier was identified, strongest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupplierMatchMethod {
    TaxId,
    Iban,
    NamePattern,
    Keyword,
}

impl SupplierMatchMethod {
    pub fn confidence(&self) -> f64 {
        match self {
            SupplierMatchMethod::TaxId => 0.95,
            SupplierMatchMethod::Iban => 0.90,
            SupplierMatchMethod::NamePattern => 0.80,
            SupplierMatchMethod::Keyword => 0.60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SupplierMatch {
    pub supplier_name: String,
    pub confidence: f64,
    pub method: SupplierMatchMethod,
    pub default_cost_type: Option<CostType>,
}

/// A known supplier with its identifying marks.
///
/// `name_patterns` are regular expressions matched case-insensitively
/// against the raw document text. Patterns use Unicode letter classes so
/// suppliers with non-ASCII names classify correctly.
#[derive(Debug, Clone)]
pub struct SupplierProfile {
    pub name: String,
    pub tax_ids: Vec<String>,
    pub ibans: Vec<String>,
    pub name_patterns: Vec<String>,
    pub keywords: Vec<String>,
    pub default_cost_type: Option<CostType>,
}

/// Tiered supplier detection over extracted document text.
///
/// Match order per profile: tax id (0.95), IBAN (0.90), name pattern
/// (0.80), keyword (0.60). The first tier that matches any profile wins;
/// tiers are exhausted across all profiles before moving to the next.
pub struct SupplierDetector {
    profiles: Vec<SupplierProfile>,
    compiled_patterns: Vec<Vec<Regex>>,
}

impl SupplierDetector {
    pub fn new(profiles: Vec<SupplierProfile>) -> Self {
        let compiled_patterns = profiles
            .iter()
            .map(|profile| {
                profile
                    .name_patterns
                    .iter()
                    .filter_map(|pattern| Regex::new(&format!("(?i){}", pattern)).ok())
                    .collect()
            })
            .collect();

        Self {
            profiles,
            compiled_patterns,
        }
    }

    /// Detector preloaded with common German utility suppliers.
    pub fn with_builtin_profiles() -> Self {
        Self::new(builtin_profiles())
    }

    pub fn detect(&self, text: &str) -> Option<SupplierMatch> {
        // Identifier matching is insensitive to spacing and case
        let normalized: String = text
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_uppercase();
        let lower = text.to_lowercase();

        // Tier 1: tax id
        for profile in &self.profiles {
            for tax_id in &profile.tax_ids {
                let needle: String = tax_id
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_uppercase();
                if !needle.is_empty() && normalized.contains(&needle) {
                    return Some(self.matched(profile, SupplierMatchMethod::TaxId));
                }
            }
        }

        // Tier 2: IBAN
        for profile in &self.profiles {
            for iban in &profile.ibans {
                let needle: String = iban
                    .chars()
                    .filter(|c| !c.is_whitespace())
                    .collect::<String>()
                    .to_uppercase();
                if !needle.is_empty() && normalized.contains(&needle) {
                    return Some(self.matched(profile, SupplierMatchMethod::Iban));
                }
            }
        }

        // Tier 3: vendor name pattern
        for (profile, patterns) in self.profiles.iter().zip(&self.compiled_patterns) {
            if patterns.iter().any(|pattern| pattern.is_match(text)) {
                return Some(self.matched(profile, SupplierMatchMethod::NamePattern));
            }
        }

        // Tier 4: keyword
        for profile in &self.profiles {
            if profile
                .keywords
                .iter()
                .any(|keyword| lower.contains(&keyword.to_lowercase()))
            {
                return Some(self.matched(profile, SupplierMatchMethod::Keyword));
            }
        }

        debug!("No supplier profile matched");
        None
    }

    fn matched(&self, profile: &SupplierProfile, method: SupplierMatchMethod) -> SupplierMatch {
        SupplierMatch {
            supplier_name: profile.name.clone(),
            confidence: method.confidence(),
            method,
            default_cost_type: profile.default_cost_type,
        }
    }
}

fn builtin_profiles() -> Vec<SupplierProfile> {
    vec![
        SupplierProfile {
            name: "Stadtwerke München".to_string(),
            tax_ids: vec!["DE129523843".to_string()],
            ibans: vec![],
            name_patterns: vec![r"stadtwerke\s+m[üu]nchen|\bSWM\b".to_string()],
            keywords: vec!["stadtwerke".to_string()],
            default_cost_type: Some(CostType::Electricity),
        },
        SupplierProfile {
            name: "E.ON Energie Deutschland".to_string(),
            tax_ids: vec!["DE814774335".to_string()],
            ibans: vec![],
            name_patterns: vec![r"e\.?on\s+energie(\s+\p{L}+)?".to_string()],
            keywords: vec!["e.on".to_string()],
            default_cost_type: Some(CostType::Electricity),
        },
        SupplierProfile {
            name: "Vattenfall Europe Sales".to_string(),
            tax_ids: vec!["DE812399045".to_string()],
            ibans: vec![],
            name_patterns: vec![r"vattenfall(\s+europe)?(\s+\p{L}+)?".to_string()],
            keywords: vec!["vattenfall".to_string()],
            default_cost_type: Some(CostType::Electricity),
        },
        SupplierProfile {
            name: "GASAG".to_string(),
            tax_ids: vec!["DE136622902".to_string()],
            ibans: vec![],
            name_patterns: vec![r"\bGASAG\b".to_string()],
            keywords: vec!["gasag".to_string()],
            default_cost_type: Some(CostType::NaturalGas),
        },
        SupplierProfile {
            name: "Berliner Wasserbetriebe".to_string(),
            tax_ids: vec!["DE136630236".to_string()],
            ibans: vec![],
            name_patterns: vec![r"berliner\s+wasserbetriebe".to_string()],
            keywords: vec!["wasserbetriebe".to_string()],
            default_cost_type: Some(CostType::Water),
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> SupplierDetector {
        SupplierDetector::with_builtin_profiles()
    }

    #[test]
    fn test_tax_id_beats_all_other_tiers() {
        let text = "Rechnung\nStadtwerke München GmbH\nUSt-IdNr: DE 129 523 843\n";
        let matched = detector().detect(text).unwrap();
        assert_eq!(matched.method, SupplierMatchMethod::TaxId);
        assert!((matched.confidence - 0.95).abs() < 1e-9);
        assert_eq!(matched.supplier_name, "Stadtwerke München");
    }

    #[test]
    fn test_iban_match() {
        let profiles = vec![SupplierProfile {
            name: "Fernwärme Wien".to_string(),
            tax_ids: vec![],
            ibans: vec!["AT61 1904 3002 3457 3201".to_string()],
            name_patterns: vec![],
            keywords: vec![],
            default_cost_type: Some(CostType::DistrictHeating),
        }];
        let detector = SupplierDetector::new(profiles);

        let matched = detector
            .detect("Zahlung an IBAN AT611904300234573201 innerhalb 14 Tagen")
            .unwrap();
        assert_eq!(matched.method, SupplierMatchMethod::Iban);
        assert!((matched.confidence - 0.90).abs() < 1e-9);
    }

    #[test]
    fn test_name_pattern_handles_non_ascii() {
        let matched = detector()
            .detect("Ihre Abrechnung von Stadtwerke München")
            .unwrap();
        assert_eq!(matched.method, SupplierMatchMethod::NamePattern);
        assert!((matched.confidence - 0.80).abs() < 1e-9);
    }

    #[test]
    fn test_keyword_fallback() {
        let matched = detector().detect("abschlag vattenfal keyword? no... e.on something").unwrap();
        assert_eq!(matched.method, SupplierMatchMethod::Keyword);
        assert!((matched.confidence - 0.60).abs() < 1e-9);
    }

    #[test]
    fn test_no_match() {
        assert!(detector().detect("Completely unrelated text").is_none());
    }
}
