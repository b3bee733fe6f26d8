//! Mutable project record threaded through the stages
//!
//! Owned by the orchestrator for the duration of a run. Stages read it and
//! hand back a whole replacement value.

use super::sequence::Sequence;
use serde::{Deserialize, Serialize};

/// Building element found in a model file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildingElement {
    /// Stable id (IFC GlobalId when present, otherwise `<file>#<entity>`)
    pub id: String,
    /// IFC entity type, upper case (e.g. `IFCWALL`)
    pub ifc_type: String,
    pub name: Option<String>,
    pub storey: Option<String>,
    pub source_file: String,
}

/// Aggregated quantity for one element type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityLine {
    pub ifc_type: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    pub element_ids: Vec<String>,
}

/// Requirement-like line extracted from a project document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentNote {
    pub source: String,
    pub line: usize,
    pub text: String,
}

/// Bill-of-quantities row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoqItem {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub name: String,
    pub elements: Vec<BuildingElement>,
    pub quantities: Vec<QuantityLine>,
    pub document_notes: Vec<DocumentNote>,
    pub boq_items: Vec<BoqItem>,
    pub sequence: Option<Sequence>,
}

impl ProjectRecord {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Element universe for sequencing, in model order
    pub fn element_ids(&self) -> Vec<String> {
        self.elements.iter().map(|e| e.id.clone()).collect()
    }

    pub fn element(&self, id: &str) -> Option<&BuildingElement> {
        self.elements.iter().find(|e| e.id == id)
    }
}
