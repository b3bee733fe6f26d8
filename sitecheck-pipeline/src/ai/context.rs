//! Bounded project summary sent to the reasoning service

use super::client::MAX_USER_PAYLOAD_CHARS;
use crate::models::{BuildingElement, DepthMode, ProjectRecord};
use serde::Serialize;
use std::collections::BTreeMap;

/// Elements listed individually before the inventory switches to type counts
const MAX_LISTED_ELEMENTS: usize = 2000;
/// Characters the element listing may take; validation and refinement
/// payloads carry the inventory next to a full sequence
const ELEMENT_LISTING_BUDGET: usize = MAX_USER_PAYLOAD_CHARS / 3;
const MAX_DOCUMENT_NOTES: usize = 60;

/// Element count above which deep runs request extended reasoning
pub const LARGE_INPUT_ELEMENTS: usize = 150;

#[derive(Serialize)]
struct ElementLine<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    ifc_type: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    storey: Option<&'a str>,
}

/// Read-only input of the refinement loop
#[derive(Debug, Clone)]
pub struct SequencingContext {
    pub project_name: String,
    /// Element ids every sequence is sanitised against
    pub universe: Vec<String>,
    /// Text inventory embedded in every request
    pub inventory: String,
}

/// JSON array of element lines within the listing budget, and how many
/// elements it holds
fn element_listing(elements: &[BuildingElement]) -> (String, usize) {
    let mut listing = String::from("[");
    let mut count = 0;
    for element in elements.iter().take(MAX_LISTED_ELEMENTS) {
        let line = serde_json::to_string(&ElementLine {
            id: &element.id,
            ifc_type: &element.ifc_type,
            name: element.name.as_deref(),
            storey: element.storey.as_deref(),
        })
        .unwrap_or_default();
        if listing.len() + line.len() + 2 > ELEMENT_LISTING_BUDGET {
            break;
        }
        if count > 0 {
            listing.push(',');
        }
        listing.push_str(&line);
        count += 1;
    }
    listing.push(']');
    (listing, count)
}

/// `IFCSLAB 40, IFCWALL 120` for the given elements
fn type_counts(elements: &[BuildingElement]) -> String {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for element in elements {
        *counts.entry(element.ifc_type.as_str()).or_default() += 1;
    }
    counts
        .iter()
        .map(|(ifc_type, n)| format!("{} {}", ifc_type, n))
        .collect::<Vec<_>>()
        .join(", ")
}

impl SequencingContext {
    pub fn from_project(project: &ProjectRecord) -> Self {
        let (listing, listed) = element_listing(&project.elements);

        let mut inventory = format!(
            "Project: {}\nElements ({}):\n{}",
            project.name,
            project.elements.len(),
            listing
        );
        if listed < project.elements.len() {
            let rest = &project.elements[listed..];
            inventory.push_str(&format!(
                "\n({} further elements not listed; by type: {})",
                rest.len(),
                type_counts(rest)
            ));
        }

        if !project.quantities.is_empty() {
            inventory.push_str("\nQuantities:");
            for line in &project.quantities {
                inventory.push_str(&format!(
                    "\n- {}: {} {}",
                    line.description, line.quantity, line.unit
                ));
            }
        }

        if !project.document_notes.is_empty() {
            inventory.push_str("\nProject requirements:");
            for note in project.document_notes.iter().take(MAX_DOCUMENT_NOTES) {
                inventory.push_str(&format!("\n- ({}) {}", note.source, note.text));
            }
        }

        Self {
            project_name: project.name.clone(),
            universe: project.element_ids(),
            inventory,
        }
    }

    pub fn element_count(&self) -> usize {
        self.universe.len()
    }

    /// Extended reasoning budget: deep runs on large inputs only
    pub fn thinking_budget(&self, depth: DepthMode) -> Option<u32> {
        if depth == DepthMode::Deep && self.element_count() > LARGE_INPUT_ELEMENTS {
            Some(4096 + 16 * self.element_count() as u32)
        } else {
            None
        }
    }
}
