//! `price_matching`: unit prices for bill items
//!
//! Rows that already carry a price keep it. Others are matched against a
//! built-in unit price catalogue by Jaro-Winkler similarity of descriptions.

use super::{Stage, StageInput, StageOutput};
use crate::models::artifacts::{PricedBoq, PricedLine};
use crate::models::{Artifact, ArtifactKind, BoqItem, StageId};
use async_trait::async_trait;
use tokio::sync::OnceCell;

pub const CURRENCY: &str = "EUR";
pub const MATCH_THRESHOLD: f64 = 0.75;

#[derive(Debug, Clone, PartialEq)]
pub struct CatalogueEntry {
    pub description: String,
    pub unit: String,
    pub unit_price: f64,
}

const CATALOGUE: &[(&str, &str, f64)] = &[
    ("Footing", "nr", 850.0),
    ("Pile", "nr", 1400.0),
    ("Column", "nr", 620.0),
    ("Beam", "nr", 540.0),
    ("Slab", "nr", 2100.0),
    ("Wall", "nr", 1250.0),
    ("Structural member", "nr", 310.0),
    ("Stair", "nr", 3200.0),
    ("Stair flight", "nr", 1800.0),
    ("Ramp", "nr", 2600.0),
    ("Roof", "nr", 4800.0),
    ("Curtain wall", "nr", 3900.0),
    ("Plate", "nr", 180.0),
    ("Window", "nr", 450.0),
    ("Door", "nr", 380.0),
    ("Pipe segment", "nr", 65.0),
    ("Duct segment", "nr", 90.0),
    ("Cable segment", "nr", 25.0),
    ("Flow terminal", "nr", 140.0),
    ("Sanitary terminal", "nr", 420.0),
    ("Light fixture", "nr", 95.0),
    ("Covering", "nr", 210.0),
    ("Railing", "nr", 260.0),
    ("Furniture", "nr", 300.0),
    ("Landscaping", "nr", 150.0),
];

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Best catalogue entry for `description` at or above the threshold
pub fn best_match<'a>(
    catalogue: &'a [CatalogueEntry],
    description: &str,
) -> Option<(&'a CatalogueEntry, f64)> {
    let needle = normalize(description);
    catalogue
        .iter()
        .map(|entry| {
            let score = strsim::jaro_winkler(&needle, &normalize(&entry.description));
            (entry, score)
        })
        .filter(|(_, score)| *score >= MATCH_THRESHOLD)
        .max_by(|a, b| a.1.total_cmp(&b.1))
}

/// Price every item; items with no price and no match are listed as unpriced
pub fn price_items(catalogue: &[CatalogueEntry], items: &[BoqItem]) -> PricedBoq {
    let mut lines = Vec::with_capacity(items.len());
    let mut unpriced = Vec::new();

    for item in items {
        let (unit_price, catalogue_match, match_score) = match item.unit_price {
            Some(price) => (price, None, None),
            None => match best_match(catalogue, &item.description) {
                Some((entry, score)) => (
                    entry.unit_price,
                    Some(entry.description.clone()),
                    Some((score * 1000.0).round() / 1000.0),
                ),
                None => {
                    unpriced.push(item.code.clone());
                    continue;
                }
            },
        };
        lines.push(PricedLine {
            code: item.code.clone(),
            description: item.description.clone(),
            unit: item.unit.clone(),
            quantity: item.quantity,
            unit_price,
            total: item.quantity * unit_price,
            catalogue_match,
            match_score,
        });
    }

    let total = lines.iter().map(|l| l.total).sum();
    PricedBoq {
        currency: CURRENCY.to_string(),
        lines,
        unpriced,
        total,
    }
}

pub struct PriceMatchingStage {
    catalogue: OnceCell<Vec<CatalogueEntry>>,
}

impl PriceMatchingStage {
    pub fn new() -> Self {
        Self {
            catalogue: OnceCell::new(),
        }
    }

    async fn catalogue(&self) -> &[CatalogueEntry] {
        self.catalogue
            .get_or_init(|| async {
                let entries: Vec<CatalogueEntry> = CATALOGUE
                    .iter()
                    .map(|(description, unit, unit_price)| CatalogueEntry {
                        description: description.to_string(),
                        unit: unit.to_string(),
                        unit_price: *unit_price,
                    })
                    .collect();
                tracing::debug!(entries = entries.len(), "Price catalogue loaded");
                entries
            })
            .await
    }
}

impl Default for PriceMatchingStage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Stage for PriceMatchingStage {
    fn id(&self) -> StageId {
        StageId::PriceMatching
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::BillOfQuantities]
    }

    fn has_input(&self, input: &StageInput) -> bool {
        input
            .artifacts
            .bill_of_quantities()
            .map(|b| !b.items.is_empty())
            .unwrap_or(!input.project.boq_items.is_empty())
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let items = match input.artifacts.bill_of_quantities() {
            Some(bill) => bill.items.as_slice(),
            None => input.project.boq_items.as_slice(),
        };
        let priced = price_items(self.catalogue().await, items);
        tracing::info!(
            lines = priced.lines.len(),
            unpriced = priced.unpriced.len(),
            total = priced.total,
            "Bill priced"
        );

        let mut output = StageOutput::new();
        if !priced.unpriced.is_empty() {
            output.warnings.push(format!(
                "No unit price found for {} items: {}",
                priced.unpriced.len(),
                priced.unpriced.join(", ")
            ));
        }
        Ok(output.with_artifact(Artifact::PricedBoq(priced)))
    }
}
