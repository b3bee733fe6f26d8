//! `quantity_takeoff`: element counts per IFC type

use super::ifc::ELEMENT_TYPES;
use super::{Stage, StageInput, StageOutput};
use crate::models::artifacts::QuantityTakeoff;
use crate::models::{Artifact, ProjectRecord, QuantityLine, StageId};
use async_trait::async_trait;
use std::collections::BTreeMap;

pub struct QuantityTakeoffStage;

/// Aggregate elements into one line per type, in takeoff table order
pub fn takeoff(project: &ProjectRecord) -> Vec<QuantityLine> {
    let mut by_type: BTreeMap<&str, Vec<String>> = BTreeMap::new();
    for element in &project.elements {
        by_type
            .entry(element.ifc_type.as_str())
            .or_default()
            .push(element.id.clone());
    }

    let mut lines = Vec::new();
    for known in ELEMENT_TYPES {
        if let Some(ids) = by_type.remove(known.ifc_type) {
            lines.push(QuantityLine {
                ifc_type: known.ifc_type.to_string(),
                description: known.description.to_string(),
                unit: "nr".to_string(),
                quantity: ids.len() as f64,
                element_ids: ids,
            });
        }
    }
    // Types outside the table, alphabetical
    for (ifc_type, ids) in by_type {
        lines.push(QuantityLine {
            ifc_type: ifc_type.to_string(),
            description: ifc_type.trim_start_matches("IFC").to_lowercase(),
            unit: "nr".to_string(),
            quantity: ids.len() as f64,
            element_ids: ids,
        });
    }
    lines
}

#[async_trait]
impl Stage for QuantityTakeoffStage {
    fn id(&self) -> StageId {
        StageId::QuantityTakeoff
    }

    fn has_input(&self, input: &StageInput) -> bool {
        !input.project.elements.is_empty()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let lines = takeoff(&input.project);
        let mut project = (*input.project).clone();
        project.quantities = lines.clone();

        Ok(StageOutput::new()
            .with_project(project)
            .with_artifact(Artifact::Quantities(QuantityTakeoff {
                element_count: input.project.elements.len(),
                lines,
            })))
    }
}
