//! `scheduling`: earliest-start schedule over the step predecessor graph

use super::{Stage, StageInput, StageOutput};
use crate::models::artifacts::{Schedule, ScheduleEntry};
use crate::models::{Artifact, ArtifactKind, Sequence, StageId};
use anyhow::bail;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};

pub const DEFAULT_STEP_DAYS: f64 = 1.0;

/// Schedule entries in topological order (ties keep sequence order)
///
/// Predecessors naming unknown steps are ignored. A cycle is an error.
pub fn build_schedule(sequence: &Sequence) -> anyhow::Result<Schedule> {
    let index: HashMap<&str, usize> = sequence
        .steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.id.as_str(), i))
        .collect();

    let mut in_degree = vec![0usize; sequence.steps.len()];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); sequence.steps.len()];
    for (i, step) in sequence.steps.iter().enumerate() {
        for pred in &step.predecessors {
            if let Some(&p) = index.get(pred.as_str()) {
                successors[p].push(i);
                in_degree[i] += 1;
            }
        }
    }

    let mut ready: VecDeque<usize> = (0..sequence.steps.len())
        .filter(|&i| in_degree[i] == 0)
        .collect();
    let mut start = vec![0.0f64; sequence.steps.len()];
    let mut entries = Vec::with_capacity(sequence.steps.len());

    while let Some(i) = ready.pop_front() {
        let step = &sequence.steps[i];
        let end = start[i] + step.duration_days.unwrap_or(DEFAULT_STEP_DAYS);
        entries.push(ScheduleEntry {
            step_id: step.id.clone(),
            name: step.name.clone(),
            start_day: start[i],
            end_day: end,
        });
        for &next in &successors[i] {
            start[next] = start[next].max(end);
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                ready.push_back(next);
            }
        }
    }

    if entries.len() != sequence.steps.len() {
        let stuck: Vec<&str> = sequence
            .steps
            .iter()
            .enumerate()
            .filter(|(i, _)| in_degree[*i] > 0)
            .map(|(_, s)| s.id.as_str())
            .collect();
        bail!("Step dependencies contain a cycle: {}", stuck.join(", "));
    }

    let total_days = entries.iter().map(|e| e.end_day).fold(0.0, f64::max);
    Ok(Schedule {
        entries,
        total_days,
    })
}

pub struct SchedulingStage;

impl SchedulingStage {
    fn sequence<'a>(input: &'a StageInput) -> Option<&'a Sequence> {
        input
            .artifacts
            .sequence()
            .or(input.project.sequence.as_ref())
    }
}

#[async_trait]
impl Stage for SchedulingStage {
    fn id(&self) -> StageId {
        StageId::Scheduling
    }

    fn dependencies(&self) -> &'static [ArtifactKind] {
        &[ArtifactKind::Sequence]
    }

    fn has_input(&self, input: &StageInput) -> bool {
        Self::sequence(input).is_some_and(|s| !s.steps.is_empty())
    }

    async fn run(&self, input: StageInput) -> anyhow::Result<StageOutput> {
        let Some(sequence) = Self::sequence(&input) else {
            bail!("No construction sequence available");
        };
        let schedule = build_schedule(sequence)?;
        tracing::info!(
            steps = schedule.entries.len(),
            total_days = schedule.total_days,
            "Schedule built"
        );
        Ok(StageOutput::new().with_artifact(Artifact::Schedule(schedule)))
    }
}
