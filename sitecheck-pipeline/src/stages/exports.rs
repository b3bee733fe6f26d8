//! `spreadsheet_export` and `xml_export`: rendered files as binary payloads

use super::{Stage, StageInput, StageOutput};
use crate::models::artifacts::{ExportFile, PricedBoq, Schedule};
use crate::models::{Artifact, ArtifactKind, Sequence, StageId};
use anyhow::bail;
use async_trait::async_trait;
use std::fmt::Write;

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

fn csv_row(fields: &[String]) -> String {
    let mut row = fields
        .iter()
        .map(|f| csv_field(f))
        .collect::<Vec<_>>()
        .join(",");
    row.push_str("\r\n");
    row
}

/// Priced bill section followed by schedule section, blank line between
pub fn render_spreadsheet(priced: Option<&PricedBoq>, schedule: Option<&Schedule>) -> String {
    let mut out = String::new();

    if let Some(priced) = priced {
        out.push_str(&csv_row(&[
            "code".into(),
            "description".into(),
            "unit".into(),
            "quantity".into(),
            format!("unit_price_{}", priced.currency.to_lowercase()),
            "total".into(),
        ]));
        for line in &priced.lines {
            out.push_str(&csv_row(&[
                line.code.clone(),
                line.description.clone(),
                line.unit.clone(),
                line.quantity.to_string(),
                format!("{:.2}", line.unit_price),
                format!("{:.2}", line.total),
            ]));
        }
        out.push_str(&csv_row(&[
            String::new(),
            "TOTAL".into(),
            String::new(),
            String::new(),
            String::new(),
            format!("{:.2}", priced.total),
        ]));
    }

    if let Some(schedule) = schedule {
        if !out.is_empty() {
            out.push_str("\r\n");
        }
        out.push_str(&csv_row(&[
            "step_id".into(),
            "name".into(),
            "start_day".into(),
            "end_day".into(),
        ]));
        for entry in &schedule.entries {
            out.push_str(&csv_row(&[
                entry.step_id.clone(),
                entry.name.clone(),
                entry.start_day.to_string(),
                entry.end_day.to_string(),
            ]));
        }
    }
    out
}

pub fn xml_escape(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            c => escaped.push(c),
        }
    }
    escaped
}

/// Construction plan document: steps with their elements and scheduled days
pub fn render_xml(project_name: &str, sequence: &Sequence, schedule: Option<&Schedule>) -> String {
    let mut out = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    let _ = writeln!(
        out,
        "<constructionPlan project=\"{}\">",
        xml_escape(project_name)
    );

    for step in &sequence.steps {
        let _ = write!(
            out,
            "  <step id=\"{}\" phase=\"{}\"",
            xml_escape(&step.id),
            step.phase.as_str()
        );
        if let Some(entry) = schedule.and_then(|s| s.entries.iter().find(|e| e.step_id == step.id)) {
            let _ = write!(
                out,
                " startDay=\"{}\" endDay=\"{}\"",
                entry.start_day, entry.end_day
            );
        }
        out.push_str(">\n");
        let _ = writeln!(out, "    <name>{}</name>", xml_escape(&step.name));
        if let Some(group) = &step.group {
            let _ = writeln!(out, "    <group>{}</group>", xml_escape(group));
        }
        for pred in &step.predecessors {
            let _ = writeln!(out, "    <predecessor ref=\"{}\"/>", xml_escape(pred));
        }
        for id in &step.element_ids {
            let _ = writeln!(out, "    <element ref=\"{}\"/>", xml_escape(id));
        }
        out.push_str("  </step>\n");
    }

    if !sequence.unmapped.is_empty() {
        out.push_str("  <unmapped>\n");
        for id in &sequence.unmapped {
            let _ = writeln!(out, "    <element ref=\"{}\"/>", xml_escape(id));
        }
        out.push_str("  </unmapped>\n");
    }
    out.push_str("</constructionPlan>\n");
    out
}

fn file_stem(project_name: &str) -> String {
    let stem: String = project_name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c.to_ascii_lowercase() } else { '-' })
        .collect();
    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        "project".to_string()
    } else {
        stem.to_string()
    }
}

pub struct SpreadsheetExportStage;

#[async_trait]
impl Stage for SpreadsheetExportStage {
    fn id(&self) -> StageId {
        StageId::SpreadsheetExport
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::PricedBoq, ArtifactKind::Schedule]
    }

    fn has_input(&self, input: &StageInput) -> bool {
        input.artifacts.priced_boq().is_some() || input.artifacts.schedule().is_some()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let text = render_spreadsheet(input.artifacts.priced_boq(), input.artifacts.schedule());
        if text.is_empty() {
            bail!("Nothing to export");
        }
        let file = ExportFile {
            file_name: format!("{}.csv", file_stem(&input.project.name)),
            mime_type: "text/csv".to_string(),
            bytes: text.into_bytes(),
        };
        tracing::debug!(file = %file.file_name, bytes = file.bytes.len(), "Spreadsheet exported");
        Ok(StageOutput::new().with_artifact(Artifact::SpreadsheetExport(file)))
    }
}

pub struct XmlExportStage;

impl XmlExportStage {
    fn sequence<'a>(input: &'a StageInput) -> Option<&'a Sequence> {
        input
            .artifacts
            .sequence()
            .or(input.project.sequence.as_ref())
    }
}

#[async_trait]
impl Stage for XmlExportStage {
    fn id(&self) -> StageId {
        StageId::XmlExport
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Sequence, ArtifactKind::Schedule]
    }

    fn has_input(&self, input: &StageInput) -> bool {
        Self::sequence(input).is_some()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let Some(sequence) = Self::sequence(&input) else {
            bail!("No construction sequence available");
        };
        let text = render_xml(&input.project.name, sequence, input.artifacts.schedule());
        let file = ExportFile {
            file_name: format!("{}-plan.xml", file_stem(&input.project.name)),
            mime_type: "application/xml".to_string(),
            bytes: text.into_bytes(),
        };
        tracing::debug!(file = %file.file_name, bytes = file.bytes.len(), "XML exported");
        Ok(StageOutput::new().with_artifact(Artifact::XmlExport(file)))
    }
}
