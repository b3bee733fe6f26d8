//! Stage identifiers and the progress weight table

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One named unit of pipeline work
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageId {
    /// Element inventory from model files
    ModelParse,
    /// Per-element quantities
    QuantityTakeoff,
    /// Regulation-rule evaluation
    ComplianceCheck,
    /// Construction sequence via the reasoning service
    Sequencing,
    /// Requirement notes extracted from documents
    DocumentContext,
    /// Tabular bill-of-quantities parsing
    BoqParse,
    /// Unit-price matching
    PriceMatching,
    /// Schedule derived from the sequence
    Scheduling,
    /// Tabular export
    SpreadsheetExport,
    /// XML export
    XmlExport,
    /// Background review of the sequence and priced quantities
    Review,
}

/// Declared stage order with progress weights. Weights sum to 100.
pub const STAGE_WEIGHTS: [(StageId, u32); 11] = [
    (StageId::ModelParse, 15),
    (StageId::QuantityTakeoff, 10),
    (StageId::ComplianceCheck, 10),
    (StageId::Sequencing, 15),
    (StageId::DocumentContext, 8),
    (StageId::BoqParse, 8),
    (StageId::PriceMatching, 8),
    (StageId::Scheduling, 8),
    (StageId::SpreadsheetExport, 6),
    (StageId::XmlExport, 6),
    (StageId::Review, 6),
];

impl StageId {
    /// All stages in declared order
    pub fn declared_order() -> Vec<StageId> {
        STAGE_WEIGHTS.iter().map(|(id, _)| *id).collect()
    }

    /// Progress weight of this stage
    pub fn weight(self) -> u32 {
        STAGE_WEIGHTS
            .iter()
            .find(|(id, _)| *id == self)
            .map(|(_, w)| *w)
            .unwrap_or(0)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            StageId::ModelParse => "model_parse",
            StageId::QuantityTakeoff => "quantity_takeoff",
            StageId::ComplianceCheck => "compliance_check",
            StageId::Sequencing => "sequencing",
            StageId::DocumentContext => "document_context",
            StageId::BoqParse => "boq_parse",
            StageId::PriceMatching => "price_matching",
            StageId::Scheduling => "scheduling",
            StageId::SpreadsheetExport => "spreadsheet_export",
            StageId::XmlExport => "xml_export",
            StageId::Review => "review",
        }
    }

    /// Human readable label for progress messages
    pub fn label(self) -> &'static str {
        match self {
            StageId::ModelParse => "Parsing model files",
            StageId::QuantityTakeoff => "Extracting quantities",
            StageId::ComplianceCheck => "Checking regulations",
            StageId::Sequencing => "Planning construction sequence",
            StageId::DocumentContext => "Reading project documents",
            StageId::BoqParse => "Parsing bill of quantities",
            StageId::PriceMatching => "Matching unit prices",
            StageId::Scheduling => "Building schedule",
            StageId::SpreadsheetExport => "Exporting spreadsheet",
            StageId::XmlExport => "Exporting XML",
            StageId::Review => "Reviewing results",
        }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StageId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        STAGE_WEIGHTS
            .iter()
            .map(|(id, _)| *id)
            .find(|id| id.as_str() == s)
            .ok_or_else(|| format!("Unknown stage: {}", s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_100() {
        let total: u32 = STAGE_WEIGHTS.iter().map(|(_, w)| w).sum();
        assert_eq!(total, 100);
    }

    #[test]
    fn test_declared_order_has_eleven_unique_stages() {
        let order = StageId::declared_order();
        assert_eq!(order.len(), 11);
        let unique: std::collections::HashSet<_> = order.iter().collect();
        assert_eq!(unique.len(), 11);
        assert_eq!(order.first(), Some(&StageId::ModelParse));
        assert_eq!(order.last(), Some(&StageId::Review));
    }

    #[test]
    fn test_string_form_matches_serde() {
        for id in StageId::declared_order() {
            let json = serde_json::to_string(&id).unwrap();
            assert_eq!(json, format!("\"{}\"", id.as_str()));
            assert_eq!(id.as_str().parse::<StageId>().unwrap(), id);
        }
        assert!("nope".parse::<StageId>().is_err());
    }
}
