//! Construction sequence (ordered steps claiming building elements)
//!
//! Every element id of the input universe is claimed by at most one step;
//! ids claimed by no step are listed in `unmapped`. [`Sequence::sanitize`]
//! is the only way raw reasoning-service output becomes a `Sequence`, so the
//! partition holds after generation and after every refinement.

use super::lenient;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Fixed phase enumeration for steps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConstructionPhase {
    SitePreparation,
    Foundation,
    Structure,
    Envelope,
    Services,
    Finishes,
    ExternalWorks,
}

impl ConstructionPhase {
    pub const ALL: [ConstructionPhase; 7] = [
        ConstructionPhase::SitePreparation,
        ConstructionPhase::Foundation,
        ConstructionPhase::Structure,
        ConstructionPhase::Envelope,
        ConstructionPhase::Services,
        ConstructionPhase::Finishes,
        ConstructionPhase::ExternalWorks,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ConstructionPhase::SitePreparation => "site_preparation",
            ConstructionPhase::Foundation => "foundation",
            ConstructionPhase::Structure => "structure",
            ConstructionPhase::Envelope => "envelope",
            ConstructionPhase::Services => "services",
            ConstructionPhase::Finishes => "finishes",
            ConstructionPhase::ExternalWorks => "external_works",
        }
    }

    /// Lenient parse of phase names produced by the reasoning service
    pub fn from_loose(s: &str) -> Option<ConstructionPhase> {
        let normalized = s.trim().to_lowercase().replace([' ', '-'], "_");
        let phase = match normalized.as_str() {
            "site_preparation" | "site" | "sitework" | "site_works" | "preliminaries" => {
                ConstructionPhase::SitePreparation
            }
            "foundation" | "foundations" | "substructure" | "earthworks" => {
                ConstructionPhase::Foundation
            }
            "structure" | "superstructure" | "frame" | "structural" => ConstructionPhase::Structure,
            "envelope" | "enclosure" | "facade" | "roofing" | "shell" => {
                ConstructionPhase::Envelope
            }
            "services" | "mep" | "building_services" | "installations" => {
                ConstructionPhase::Services
            }
            "finishes" | "fit_out" | "fitout" | "interior" | "interiors" => {
                ConstructionPhase::Finishes
            }
            "external_works" | "external" | "landscaping" | "externals" => {
                ConstructionPhase::ExternalWorks
            }
            _ => return None,
        };
        Some(phase)
    }
}

/// Atomic unit of a sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    pub id: String,
    pub name: String,
    pub phase: ConstructionPhase,
    pub element_ids: Vec<String>,
    /// Physical subdivision (storey, zone)
    pub group: Option<String>,
    pub predecessors: Vec<String>,
    pub rationale: String,
    pub duration_days: Option<f64>,
}

/// Ordered construction plan
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Sequence {
    pub steps: Vec<Step>,
    /// Universe elements claimed by no step, in universe order
    pub unmapped: Vec<String>,
}

/// Step as emitted by the reasoning service, before sanitizing
///
/// Every field decodes leniently, so one malformed field never discards the
/// rest of a generated sequence.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RawStep {
    #[serde(deserialize_with = "lenient::opt_string")]
    pub id: Option<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub name: String,
    #[serde(deserialize_with = "lenient::string")]
    pub phase: String,
    #[serde(
        alias = "elements",
        alias = "elementIds",
        deserialize_with = "lenient::string_list"
    )]
    pub element_ids: Vec<String>,
    #[serde(alias = "zone", alias = "storey", deserialize_with = "lenient::opt_string")]
    pub group: Option<String>,
    #[serde(
        alias = "depends_on",
        alias = "dependencies",
        deserialize_with = "lenient::string_list"
    )]
    pub predecessors: Vec<String>,
    #[serde(deserialize_with = "lenient::string")]
    pub rationale: String,
    #[serde(
        alias = "duration",
        alias = "durationDays",
        deserialize_with = "lenient::opt_f64"
    )]
    pub duration_days: Option<f64>,
}

impl From<&Step> for RawStep {
    fn from(step: &Step) -> Self {
        Self {
            id: Some(step.id.clone()),
            name: step.name.clone(),
            phase: step.phase.as_str().to_string(),
            element_ids: step.element_ids.clone(),
            group: step.group.clone(),
            predecessors: step.predecessors.clone(),
            rationale: step.rationale.clone(),
            duration_days: step.duration_days,
        }
    }
}

impl Sequence {
    /// Sequence with no steps: the whole universe is unmapped
    pub fn empty(universe: &[String]) -> Self {
        let mut seen = HashSet::new();
        Self {
            steps: Vec::new(),
            unmapped: universe
                .iter()
                .filter(|id| seen.insert(id.as_str()))
                .cloned()
                .collect(),
        }
    }

    /// Build a sequence from raw steps, enforcing the partition over `universe`
    ///
    /// - element ids outside the universe, or already claimed by an earlier
    ///   step, are dropped
    /// - duplicate step ids get a numeric suffix
    /// - predecessors must name an earlier step; others are dropped
    /// - unknown phases fall back to `structure`
    ///
    /// Returns the sequence and the number of dropped claims.
    pub fn sanitize(raw_steps: Vec<RawStep>, universe: &[String]) -> (Sequence, usize) {
        let universe_set: HashSet<&str> = universe.iter().map(String::as_str).collect();
        let mut claimed: HashSet<String> = HashSet::new();
        let mut step_ids: HashSet<String> = HashSet::new();
        let mut dropped = 0usize;
        let mut steps = Vec::with_capacity(raw_steps.len());

        for (index, raw) in raw_steps.into_iter().enumerate() {
            let base_id = raw
                .id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| format!("step-{}", index + 1));
            let mut id = base_id.clone();
            let mut suffix = 2;
            while step_ids.contains(&id) {
                id = format!("{}-{}", base_id, suffix);
                suffix += 1;
            }

            let mut element_ids = Vec::new();
            for element_id in raw.element_ids {
                if universe_set.contains(element_id.as_str()) && !claimed.contains(&element_id) {
                    claimed.insert(element_id.clone());
                    element_ids.push(element_id);
                } else {
                    dropped += 1;
                }
            }

            let mut predecessors: Vec<String> = Vec::new();
            for pred in raw.predecessors {
                if step_ids.contains(&pred) && !predecessors.contains(&pred) {
                    predecessors.push(pred);
                }
            }

            let name = if raw.name.trim().is_empty() {
                id.clone()
            } else {
                raw.name.trim().to_string()
            };

            step_ids.insert(id.clone());
            steps.push(Step {
                id,
                name,
                phase: ConstructionPhase::from_loose(&raw.phase)
                    .unwrap_or(ConstructionPhase::Structure),
                element_ids,
                group: raw.group.filter(|g| !g.trim().is_empty()),
                predecessors,
                rationale: raw.rationale,
                duration_days: raw.duration_days.filter(|d| d.is_finite() && *d > 0.0),
            });
        }

        let mut seen = HashSet::new();
        let unmapped = universe
            .iter()
            .filter(|id| !claimed.contains(id.as_str()) && seen.insert(id.as_str()))
            .cloned()
            .collect();

        (Sequence { steps, unmapped }, dropped)
    }

    /// All claimed element ids, in step order
    pub fn claimed_ids(&self) -> Vec<&str> {
        self.steps
            .iter()
            .flat_map(|s| s.element_ids.iter().map(String::as_str))
            .collect()
    }

    /// Check uniqueness of claims and `|unmapped| + |claimed| = |universe|`
    pub fn is_partition_of(&self, universe: &[String]) -> bool {
        let universe_set: HashSet<&str> = universe.iter().map(String::as_str).collect();
        let claimed = self.claimed_ids();
        let claimed_set: HashSet<&str> = claimed.iter().copied().collect();
        if claimed_set.len() != claimed.len() {
            return false;
        }
        let unmapped_set: HashSet<&str> = self.unmapped.iter().map(String::as_str).collect();
        claimed_set.is_subset(&universe_set)
            && unmapped_set.is_disjoint(&claimed_set)
            && unmapped_set.len() + claimed_set.len() == universe_set.len()
    }

    pub fn step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    pub fn to_raw(&self) -> Vec<RawStep> {
        self.steps.iter().map(RawStep::from).collect()
    }
}
