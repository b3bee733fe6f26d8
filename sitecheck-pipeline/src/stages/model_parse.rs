//! `model_parse`: element inventory from IFC model files

use super::ifc;
use super::{Stage, StageInput, StageOutput};
use crate::models::{ProjectRecord, StageId};
use anyhow::Context;
use async_trait::async_trait;

pub struct ModelParseStage;

#[async_trait]
impl Stage for ModelParseStage {
    fn id(&self) -> StageId {
        StageId::ModelParse
    }

    fn has_input(&self, input: &StageInput) -> bool {
        !input.files.models.is_empty()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let mut project: ProjectRecord = (*input.project).clone();
        let mut output = StageOutput::new();
        let total = input.files.models.len();

        for (index, file) in input.files.models.iter().enumerate() {
            let ext = file.extension();
            if ext != "ifc" {
                output
                    .warnings
                    .push(format!("{}: .{} models are not supported, skipped", file.name, ext));
                continue;
            }

            let text = file
                .read_text()
                .await
                .with_context(|| format!("Failed to read {}", file.name))?;
            if !ifc::is_step_file(&text) {
                output
                    .warnings
                    .push(format!("{}: not an IFC STEP file, skipped", file.name));
                continue;
            }

            let elements = ifc::parse_elements(&file.name, &text);
            let before = project.elements.len();
            for element in elements {
                if project.element(&element.id).is_none() {
                    project.elements.push(element);
                }
            }
            tracing::debug!(
                file = %file.name,
                elements = project.elements.len() - before,
                "Model parsed"
            );

            input.progress.report(
                (index + 1) as f64 / total as f64,
                format!("Parsed {}", file.name),
            );
        }

        if project.elements.is_empty() {
            output
                .warnings
                .push("No building elements found in model files".to_string());
        }

        Ok(output.with_project(project))
    }
}
