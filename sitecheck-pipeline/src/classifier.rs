//! File classification by extension
//!
//! Partitions an uploaded batch into model files, tabular bills of
//! quantities, documents, schedule files and unrecognised files.

use crate::models::InputFile;

const MODEL_EXTENSIONS: &[&str] = &["ifc", "ifczip", "ifcxml"];
const TABULAR_EXTENSIONS: &[&str] = &["csv", "tsv", "xlsx", "xls"];
const DOCUMENT_EXTENSIONS: &[&str] = &["pdf", "txt", "md", "docx"];
const SCHEDULE_EXTENSIONS: &[&str] = &["xer", "mpp", "xml"];

/// Typed file group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Model,
    Tabular,
    Document,
    Schedule,
    Other,
}

/// Determine the kind of a single file
pub fn kind_of(file: &InputFile) -> FileKind {
    let ext = file.extension();
    let ext = ext.as_str();
    if MODEL_EXTENSIONS.contains(&ext) {
        FileKind::Model
    } else if TABULAR_EXTENSIONS.contains(&ext) {
        FileKind::Tabular
    } else if DOCUMENT_EXTENSIONS.contains(&ext) {
        FileKind::Document
    } else if SCHEDULE_EXTENSIONS.contains(&ext) {
        FileKind::Schedule
    } else {
        FileKind::Other
    }
}

/// Five disjoint groups, each in upload order
#[derive(Debug, Clone, Default)]
pub struct ClassifiedFiles {
    pub models: Vec<InputFile>,
    pub tabular: Vec<InputFile>,
    pub documents: Vec<InputFile>,
    pub schedules: Vec<InputFile>,
    pub other: Vec<InputFile>,
}

impl ClassifiedFiles {
    /// False when every typed bucket is empty
    pub fn has_typed_input(&self) -> bool {
        !(self.models.is_empty()
            && self.tabular.is_empty()
            && self.documents.is_empty()
            && self.schedules.is_empty())
    }

    pub fn total(&self) -> usize {
        self.models.len()
            + self.tabular.len()
            + self.documents.len()
            + self.schedules.len()
            + self.other.len()
    }

    /// One-line description for logs and cache summaries
    pub fn summary(&self) -> String {
        format!(
            "{} model, {} tabular, {} document, {} schedule, {} other",
            self.models.len(),
            self.tabular.len(),
            self.documents.len(),
            self.schedules.len(),
            self.other.len()
        )
    }
}

/// Partition files by extension. Never fails.
pub fn classify(files: &[InputFile]) -> ClassifiedFiles {
    let mut classified = ClassifiedFiles::default();
    for file in files {
        let bucket = match kind_of(file) {
            FileKind::Model => &mut classified.models,
            FileKind::Tabular => &mut classified.tabular,
            FileKind::Document => &mut classified.documents,
            FileKind::Schedule => &mut classified.schedules,
            FileKind::Other => &mut classified.other,
        };
        bucket.push(file.clone());
    }
    classified
}
