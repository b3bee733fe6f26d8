//! Stage ordering per depth mode

use crate::models::{DepthMode, StageId};

/// Stages moved ahead of sequencing in deep runs, in this order
const DEEP_PULLED_FORWARD: [StageId; 2] = [StageId::DocumentContext, StageId::BoqParse];

/// Background stages and the stage whose completion launches them
const BACKGROUND: [(StageId, StageId); 1] = [(StageId::Review, StageId::PriceMatching)];

/// Execution order of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagePlan {
    order: Vec<StageId>,
}

impl StagePlan {
    /// Declared order, except `deep` runs document context and bill parsing
    /// before sequencing. Every other stage keeps its relative order.
    pub fn for_depth(depth: DepthMode) -> Self {
        let declared = StageId::declared_order();
        if depth != DepthMode::Deep {
            return Self { order: declared };
        }

        let mut order: Vec<StageId> = declared
            .into_iter()
            .filter(|id| !DEEP_PULLED_FORWARD.contains(id))
            .collect();
        let at = order
            .iter()
            .position(|id| *id == StageId::Sequencing)
            .unwrap_or(order.len());
        for (offset, id) in DEEP_PULLED_FORWARD.iter().enumerate() {
            order.insert(at + offset, *id);
        }
        Self { order }
    }

    pub fn stages(&self) -> &[StageId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn is_background(stage: StageId) -> bool {
        BACKGROUND.iter().any(|(id, _)| *id == stage)
    }

    /// Background stages launched by the completion of `stage`
    pub fn launched_by(stage: StageId) -> Vec<StageId> {
        BACKGROUND
            .iter()
            .filter(|(_, after)| *after == stage)
            .map(|(id, _)| *id)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_keeps_declared_order() {
        assert_eq!(
            StagePlan::for_depth(DepthMode::Standard).stages(),
            StageId::declared_order().as_slice()
        );
        assert_eq!(
            StagePlan::for_depth(DepthMode::Quick).stages(),
            StageId::declared_order().as_slice()
        );
    }

    #[test]
    fn test_deep_pulls_context_before_sequencing() {
        let plan = StagePlan::for_depth(DepthMode::Deep);
        assert_eq!(
            plan.stages(),
            &[
                StageId::ModelParse,
                StageId::QuantityTakeoff,
                StageId::ComplianceCheck,
                StageId::DocumentContext,
                StageId::BoqParse,
                StageId::Sequencing,
                StageId::PriceMatching,
                StageId::Scheduling,
                StageId::SpreadsheetExport,
                StageId::XmlExport,
                StageId::Review,
            ]
        );
        assert_eq!(plan.len(), 11);
    }

    #[test]
    fn test_background_table() {
        assert!(StagePlan::is_background(StageId::Review));
        assert!(!StagePlan::is_background(StageId::Scheduling));
        assert_eq!(StagePlan::launched_by(StageId::PriceMatching), vec![StageId::Review]);
        assert!(StagePlan::launched_by(StageId::Sequencing).is_empty());
    }
}
