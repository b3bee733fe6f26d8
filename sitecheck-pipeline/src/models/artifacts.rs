//! Typed artifacts produced by stages

use super::findings::Severity;
use super::project::{BoqItem, DocumentNote, QuantityLine};
use super::sequence::Sequence;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Quantities,
    Compliance,
    Sequence,
    Documents,
    BillOfQuantities,
    PricedBoq,
    Schedule,
    SpreadsheetExport,
    XmlExport,
    Review,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantityTakeoff {
    pub lines: Vec<QuantityLine>,
    pub element_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub description: String,
    pub element_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub profile: String,
    pub rules_evaluated: usize,
    pub findings: Vec<ComplianceFinding>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentContext {
    pub documents_read: Vec<String>,
    pub notes: Vec<DocumentNote>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BoqSource {
    Tabular,
    DerivedFromModel,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BillOfQuantities {
    pub source: BoqSource,
    pub items: Vec<BoqItem>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedLine {
    pub code: String,
    pub description: String,
    pub unit: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total: f64,
    /// Catalogue entry used when the row carried no price
    pub catalogue_match: Option<String>,
    pub match_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricedBoq {
    pub currency: String,
    pub lines: Vec<PricedLine>,
    pub unpriced: Vec<String>,
    pub total: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduleEntry {
    pub step_id: String,
    pub name: String,
    pub start_day: f64,
    pub end_day: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
    pub total_days: f64,
}

/// Rendered export file (binary payload)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportFile {
    pub file_name: String,
    pub mime_type: String,
    #[serde(with = "crate::serializer::base64_bytes")]
    pub bytes: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewReport {
    /// "reasoning" or "heuristic"
    pub source: String,
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum Artifact {
    Quantities(QuantityTakeoff),
    Compliance(ComplianceReport),
    Sequence(Sequence),
    Documents(DocumentContext),
    BillOfQuantities(BillOfQuantities),
    PricedBoq(PricedBoq),
    Schedule(Schedule),
    SpreadsheetExport(ExportFile),
    XmlExport(ExportFile),
    Review(ReviewReport),
}

impl Artifact {
    pub fn kind(&self) -> ArtifactKind {
        match self {
            Artifact::Quantities(_) => ArtifactKind::Quantities,
            Artifact::Compliance(_) => ArtifactKind::Compliance,
            Artifact::Sequence(_) => ArtifactKind::Sequence,
            Artifact::Documents(_) => ArtifactKind::Documents,
            Artifact::BillOfQuantities(_) => ArtifactKind::BillOfQuantities,
            Artifact::PricedBoq(_) => ArtifactKind::PricedBoq,
            Artifact::Schedule(_) => ArtifactKind::Schedule,
            Artifact::SpreadsheetExport(_) => ArtifactKind::SpreadsheetExport,
            Artifact::XmlExport(_) => ArtifactKind::XmlExport,
            Artifact::Review(_) => ArtifactKind::Review,
        }
    }
}

/// Artifacts of a run, at most one per kind (later stages replace earlier output)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ArtifactSet {
    items: Vec<Artifact>,
}

impl ArtifactSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, artifact: Artifact) {
        let kind = artifact.kind();
        match self.items.iter_mut().find(|a| a.kind() == kind) {
            Some(slot) => *slot = artifact,
            None => self.items.push(artifact),
        }
    }

    pub fn get(&self, kind: ArtifactKind) -> Option<&Artifact> {
        self.items.iter().find(|a| a.kind() == kind)
    }

    /// Copy of the artifacts whose kind is listed
    pub fn subset(&self, kinds: &[ArtifactKind]) -> ArtifactSet {
        ArtifactSet {
            items: self
                .items
                .iter()
                .filter(|a| kinds.contains(&a.kind()))
                .cloned()
                .collect(),
        }
    }

    pub fn kinds(&self) -> Vec<ArtifactKind> {
        self.items.iter().map(Artifact::kind).collect()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Artifact> {
        self.items.iter()
    }

    pub fn quantities(&self) -> Option<&QuantityTakeoff> {
        match self.get(ArtifactKind::Quantities) {
            Some(Artifact::Quantities(q)) => Some(q),
            _ => None,
        }
    }

    pub fn compliance(&self) -> Option<&ComplianceReport> {
        match self.get(ArtifactKind::Compliance) {
            Some(Artifact::Compliance(c)) => Some(c),
            _ => None,
        }
    }

    pub fn sequence(&self) -> Option<&Sequence> {
        match self.get(ArtifactKind::Sequence) {
            Some(Artifact::Sequence(s)) => Some(s),
            _ => None,
        }
    }

    pub fn bill_of_quantities(&self) -> Option<&BillOfQuantities> {
        match self.get(ArtifactKind::BillOfQuantities) {
            Some(Artifact::BillOfQuantities(b)) => Some(b),
            _ => None,
        }
    }

    pub fn priced_boq(&self) -> Option<&PricedBoq> {
        match self.get(ArtifactKind::PricedBoq) {
            Some(Artifact::PricedBoq(p)) => Some(p),
            _ => None,
        }
    }

    pub fn schedule(&self) -> Option<&Schedule> {
        match self.get(ArtifactKind::Schedule) {
            Some(Artifact::Schedule(s)) => Some(s),
            _ => None,
        }
    }

    pub fn review(&self) -> Option<&ReviewReport> {
        match self.get(ArtifactKind::Review) {
            Some(Artifact::Review(r)) => Some(r),
            _ => None,
        }
    }

    pub fn export(&self, kind: ArtifactKind) -> Option<&ExportFile> {
        match self.get(kind) {
            Some(Artifact::SpreadsheetExport(f)) | Some(Artifact::XmlExport(f)) => Some(f),
            _ => None,
        }
    }
}
