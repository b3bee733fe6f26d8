//! `document_context`: requirement-like lines from project documents

use super::{Stage, StageInput, StageOutput};
use crate::models::artifacts::DocumentContext;
use crate::models::{Artifact, DocumentNote, StageId};
use anyhow::Context;
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;

const MAX_NOTE_CHARS: usize = 300;
const MAX_NOTES_PER_DOCUMENT: usize = 200;
const TEXT_EXTENSIONS: &[&str] = &["txt", "md"];

fn requirement_regex() -> &'static Regex {
    static REQUIREMENT: OnceLock<Regex> = OnceLock::new();
    REQUIREMENT.get_or_init(|| {
        Regex::new(r"(?i)\b(shall|must|required|minimum|maximum)\b").expect("valid regex")
    })
}

/// Requirement lines of one document, 1-based line numbers
pub fn extract_notes(source: &str, text: &str) -> Vec<DocumentNote> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| requirement_regex().is_match(line))
        .take(MAX_NOTES_PER_DOCUMENT)
        .map(|(index, line)| {
            let line_text = line.trim().trim_start_matches(['-', '*', '#']).trim();
            DocumentNote {
                source: source.to_string(),
                line: index + 1,
                text: line_text.chars().take(MAX_NOTE_CHARS).collect(),
            }
        })
        .collect()
}

pub struct DocumentContextStage;

#[async_trait]
impl Stage for DocumentContextStage {
    fn id(&self) -> StageId {
        StageId::DocumentContext
    }

    fn has_input(&self, input: &StageInput) -> bool {
        !input.files.documents.is_empty()
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let mut project = (*input.project).clone();
        let mut output = StageOutput::new();
        let mut documents_read = Vec::new();
        let mut notes = Vec::new();
        let total = input.files.documents.len();

        for (index, file) in input.files.documents.iter().enumerate() {
            let ext = file.extension();
            if !TEXT_EXTENSIONS.contains(&ext.as_str()) {
                output.warnings.push(format!(
                    "{}: .{} text extraction is not available, document skipped",
                    file.name, ext
                ));
                continue;
            }

            let text = file
                .read_text()
                .await
                .with_context(|| format!("Failed to read {}", file.name))?;
            let found = extract_notes(&file.name, &text);
            tracing::debug!(file = %file.name, notes = found.len(), "Document scanned");
            notes.extend(found);
            documents_read.push(file.name.clone());

            input.progress.report(
                (index + 1) as f64 / total as f64,
                format!("Read {}", file.name),
            );
        }

        project.document_notes = notes.clone();
        Ok(output
            .with_project(project)
            .with_artifact(Artifact::Documents(DocumentContext {
                documents_read,
                notes,
            })))
    }
}
