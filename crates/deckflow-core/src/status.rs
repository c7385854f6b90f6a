//! StepStatus model
//!
//! A pure data holder for per-stage status. It never checks dependency rules
//! (see [`crate::graph`]) and never touches the network.

use deckflow_model::{PipelineStep, Presentation, StageKind, StepResult, StepStatus};
use std::collections::BTreeMap;

/// Read/write access to per-stage status
pub trait StepStatusModel {
    /// Step record for `stage`, if present
    fn step(&self, stage: StageKind) -> Option<&PipelineStep>;

    /// Set status, and the result payload when given
    ///
    /// `None` keeps the current payload (used for optimistic flips).
    fn set_status(&mut self, stage: StageKind, status: StepStatus, result: Option<StepResult>);

    /// Replace every step at once, returning the stages whose status changed
    fn replace_all(&mut self, steps: BTreeMap<StageKind, PipelineStep>) -> Vec<(StageKind, StepStatus)>;

    /// Status of `stage`; absent stages read as pending
    fn status(&self, stage: StageKind) -> StepStatus {
        self.step(stage).map_or(StepStatus::Pending, |s| s.status)
    }

    /// Copy of every stage's status
    fn snapshot(&self) -> StatusSnapshot {
        StageKind::ALL
            .iter()
            .map(|stage| (*stage, self.status(*stage)))
            .collect()
    }
}

impl StepStatusModel for BTreeMap<StageKind, PipelineStep> {
    fn step(&self, stage: StageKind) -> Option<&PipelineStep> {
        self.get(&stage)
    }

    fn set_status(&mut self, stage: StageKind, status: StepStatus, result: Option<StepResult>) {
        let step = self
            .entry(stage)
            .or_insert_with(|| PipelineStep::pending(stage));
        step.status = status;
        if let Some(result) = result {
            step.result = result;
        }
        if status != StepStatus::Error {
            step.error_message = None;
        }
    }

    fn replace_all(&mut self, steps: BTreeMap<StageKind, PipelineStep>) -> Vec<(StageKind, StepStatus)> {
        let changed = StageKind::ALL
            .iter()
            .filter_map(|stage| {
                let incoming = steps.status(*stage);
                (incoming != self.status(*stage)).then_some((*stage, incoming))
            })
            .collect();
        *self = steps;
        changed
    }
}

impl StepStatusModel for Presentation {
    fn step(&self, stage: StageKind) -> Option<&PipelineStep> {
        self.steps.step(stage)
    }

    fn set_status(&mut self, stage: StageKind, status: StepStatus, result: Option<StepResult>) {
        self.steps.set_status(stage, status, result);
    }

    fn replace_all(&mut self, steps: BTreeMap<StageKind, PipelineStep>) -> Vec<(StageKind, StepStatus)> {
        self.steps.replace_all(steps)
    }
}

/// Immutable status of every stage at one point in time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusSnapshot(BTreeMap<StageKind, StepStatus>);

impl StatusSnapshot {
    /// Snapshot with every stage pending
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With one stage's status
    #[inline]
    #[must_use]
    pub fn with(mut self, stage: StageKind, status: StepStatus) -> Self {
        self.0.insert(stage, status);
        self
    }

    /// Status of `stage`; absent stages read as pending
    #[inline]
    #[must_use]
    pub fn get(&self, stage: StageKind) -> StepStatus {
        self.0.get(&stage).copied().unwrap_or_default()
    }

    /// Any stage processing
    #[inline]
    #[must_use]
    pub fn any_processing(&self) -> bool {
        self.0.values().any(|s| *s == StepStatus::Processing)
    }

    /// Iterate over `(stage, status)` in pipeline order
    pub fn iter(&self) -> impl Iterator<Item = (StageKind, StepStatus)> + '_ {
        StageKind::ALL.iter().map(move |stage| (*stage, self.get(*stage)))
    }
}

impl FromIterator<(StageKind, StepStatus)> for StatusSnapshot {
    fn from_iter<I: IntoIterator<Item = (StageKind, StepStatus)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Transitions a local actor may make
///
/// The poller's overwrite with a remote snapshot is not restricted by this
/// table; it mirrors whatever the service reports.
#[must_use]
pub fn allowed_transitions(from: StepStatus) -> Vec<StepStatus> {
    use StepStatus::{Completed, Error, Pending, Processing};
    match from {
        Pending => vec![Processing],
        Processing => vec![Completed, Error],
        // explicit re-run
        Completed | Error => vec![Processing],
    }
}

/// Whether `from -> to` is a legal local transition
#[inline]
#[must_use]
pub fn transition_is_legal(from: StepStatus, to: StepStatus) -> bool {
    allowed_transitions(from).contains(&to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckflow_model::ResearchResult;

    #[test]
    fn absent_stage_reads_pending() {
        let steps: BTreeMap<StageKind, PipelineStep> = BTreeMap::new();
        assert_eq!(steps.status(StageKind::Pptx), StepStatus::Pending);
    }

    #[test]
    fn set_status_keeps_result_when_none() {
        let mut p = Presentation::new("p", "Deck");
        p.set_status(
            StageKind::Research,
            StepStatus::Completed,
            Some(StepResult::Research(ResearchResult::new("doc"))),
        );
        p.set_status(StageKind::Research, StepStatus::Processing, None);

        assert_eq!(p.status(StageKind::Research), StepStatus::Processing);
        assert!(p.step(StageKind::Research).unwrap().result.as_research().is_some());
    }

    #[test]
    fn set_status_clears_stale_error_message() {
        let mut steps = BTreeMap::new();
        let mut failed = PipelineStep::pending(StageKind::Pptx).with_status(StepStatus::Error);
        failed.error_message = Some("boom".into());
        steps.insert(StageKind::Pptx, failed);

        steps.set_status(StageKind::Pptx, StepStatus::Processing, None);
        assert!(steps.step(StageKind::Pptx).unwrap().error_message.is_none());
    }

    #[test]
    fn snapshot_covers_all_stages() {
        let p = Presentation::new("p", "Deck").with_step_status(StageKind::Slides, StepStatus::Processing);
        let snap = p.snapshot();
        assert_eq!(snap.iter().count(), StageKind::ALL.len());
        assert!(snap.any_processing());
        assert_eq!(snap.get(StageKind::Slides), StepStatus::Processing);
    }

    #[test]
    fn replace_all_reports_changed_stages() {
        let mut p = Presentation::new("p", "Deck").with_step_status(StageKind::Research, StepStatus::Completed);
        let incoming = Presentation::new("p", "Deck")
            .with_step_status(StageKind::Research, StepStatus::Completed)
            .with_step_status(StageKind::Slides, StepStatus::Processing)
            .steps;

        let changed = p.replace_all(incoming);
        assert_eq!(changed, vec![(StageKind::Slides, StepStatus::Processing)]);
        assert_eq!(p.status(StageKind::Slides), StepStatus::Processing);
        assert!(p.replace_all(p.steps.clone()).is_empty());
    }

    #[test]
    fn transition_table() {
        assert!(transition_is_legal(StepStatus::Pending, StepStatus::Processing));
        assert!(transition_is_legal(StepStatus::Error, StepStatus::Processing));
        assert!(transition_is_legal(StepStatus::Completed, StepStatus::Processing));
        assert!(!transition_is_legal(StepStatus::Completed, StepStatus::Pending));
        assert!(!transition_is_legal(StepStatus::Pending, StepStatus::Completed));
    }
}
