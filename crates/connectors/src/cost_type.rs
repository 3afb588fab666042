use watchdog_core::types::CostType;

/// Case-insensitive normalization of German and English cost-type labels.
///
/// Unrecognized labels map to [`CostType::Other`] rather than failing the
/// row; the record keeps its raw label as a supplier hint where relevant.
pub fn normalize_cost_type(raw: &str) -> CostType {
    let label = raw.trim().to_lowercase();

    match label.as_str() {
        "strom" | "electricity" | "elektrizität" | "power" | "stromkosten" => CostType::Electricity,
        "erdgas" | "gas" | "natural gas" | "natural_gas" | "gaskosten" => CostType::NaturalGas,
        "fernwärme" | "fernwaerme" | "district heating" | "district_heating" | "wärme"
        | "waerme" | "heizung" => CostType::DistrictHeating,
        "wasser" | "water" | "trinkwasser" | "frischwasser" => CostType::Water,
        "abwasser" | "sewage" | "wastewater" | "schmutzwasser" => CostType::Sewage,
        "abfall" | "müll" | "muell" | "waste" | "entsorgung" | "abfallentsorgung" => {
            CostType::Waste
        }
        "reinigung" | "cleaning" | "gebäudereinigung" | "gebaeudereinigung" => CostType::Cleaning,
        "wartung" | "maintenance" | "instandhaltung" | "facility management" => {
            CostType::Maintenance
        }
        "sicherheit" | "security" | "bewachung" | "wachdienst" => CostType::Security,
        "versicherung" | "insurance" => CostType::Insurance,
        "miete" | "rent" | "pacht" | "leasing" => CostType::Rent,
        _ => CostType::Other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_german_labels() {
        assert_eq!(normalize_cost_type("Strom"), CostType::Electricity);
        assert_eq!(normalize_cost_type("ERDGAS"), CostType::NaturalGas);
        assert_eq!(normalize_cost_type("Fernwärme"), CostType::DistrictHeating);
        assert_eq!(normalize_cost_type("Abwasser"), CostType::Sewage);
        assert_eq!(normalize_cost_type(" müll "), CostType::Waste);
    }

    #[test]
    fn test_english_labels() {
        assert_eq!(normalize_cost_type("electricity"), CostType::Electricity);
        assert_eq!(normalize_cost_type("District Heating"), CostType::DistrictHeating);
        assert_eq!(normalize_cost_type("cleaning"), CostType::Cleaning);
    }

    #[test]
    fn test_unknown_maps_to_other() {
        assert_eq!(normalize_cost_type("Kaffeebohnen"), CostType::Other);
        assert_eq!(normalize_cost_type(""), CostType::Other);
    }
}
