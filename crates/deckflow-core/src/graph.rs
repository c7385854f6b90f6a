//! Dependency graph
//!
//! Fixed stage order:
//!
//! ```text
//! research ──┐
//!            ├──> slides ──> illustration ──> compiled ──> pptx
//! manual ────┘
//! ```
//!
//! A stage is enabled when it is a first stage or any of its immediate
//! predecessors is completed. A predecessor regressing after a dependent
//! completed does not invalidate the dependent.

use crate::status::StatusSnapshot;
use deckflow_model::{StageKind, StepStatus};

/// Immediate predecessors of `stage`; empty for first stages
#[must_use]
pub fn predecessors(stage: StageKind) -> &'static [StageKind] {
    match stage {
        StageKind::Research | StageKind::ManualResearch => &[],
        StageKind::Slides => &[StageKind::Research, StageKind::ManualResearch],
        StageKind::Illustration => &[StageKind::Slides],
        StageKind::Compiled => &[StageKind::Illustration],
        StageKind::Pptx => &[StageKind::Compiled],
    }
}

/// Immediate dependents of `stage`
#[must_use]
pub fn dependents(stage: StageKind) -> Vec<StageKind> {
    StageKind::ALL
        .iter()
        .copied()
        .filter(|candidate| predecessors(*candidate).contains(&stage))
        .collect()
}

/// Whether `stage` may start given the current statuses
#[inline]
#[must_use]
pub fn is_enabled(stage: StageKind, statuses: &StatusSnapshot) -> bool {
    let preds = predecessors(stage);
    preds.is_empty()
        || preds
            .iter()
            .any(|pred| statuses.get(*pred) == StepStatus::Completed)
}

/// Status of the predecessor holding `stage` back, if it is blocked
///
/// For stages with several predecessors the first one is reported.
#[must_use]
pub fn blocking_status(stage: StageKind, statuses: &StatusSnapshot) -> Option<StepStatus> {
    if is_enabled(stage, statuses) {
        return None;
    }
    predecessors(stage).first().map(|pred| statuses.get(*pred))
}

/// Every enabled stage, in pipeline order
#[must_use]
pub fn enabled_stages(statuses: &StatusSnapshot) -> Vec<StageKind> {
    StageKind::ALL
        .iter()
        .copied()
        .filter(|stage| is_enabled(*stage, statuses))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_stages_are_always_enabled() {
        let snap = StatusSnapshot::new();
        assert!(is_enabled(StageKind::Research, &snap));
        assert!(is_enabled(StageKind::ManualResearch, &snap));
        assert!(!is_enabled(StageKind::Slides, &snap));
    }

    #[test]
    fn completed_research_enables_slides_only() {
        let snap = StatusSnapshot::new().with(StageKind::Research, StepStatus::Completed);
        assert!(is_enabled(StageKind::Slides, &snap));
        assert!(!is_enabled(StageKind::Illustration, &snap));
        assert_eq!(
            blocking_status(StageKind::Illustration, &snap),
            Some(StepStatus::Pending)
        );
    }

    #[test]
    fn manual_research_enables_slides() {
        let snap = StatusSnapshot::new().with(StageKind::ManualResearch, StepStatus::Completed);
        assert!(is_enabled(StageKind::Slides, &snap));
        assert_eq!(blocking_status(StageKind::Slides, &snap), None);
    }

    #[test]
    fn processing_predecessor_blocks() {
        let snap = StatusSnapshot::new()
            .with(StageKind::Research, StepStatus::Completed)
            .with(StageKind::Slides, StepStatus::Processing);
        assert_eq!(
            blocking_status(StageKind::Illustration, &snap),
            Some(StepStatus::Processing)
        );
    }

    #[test]
    fn regression_does_not_cascade() {
        let snap = StatusSnapshot::new()
            .with(StageKind::Research, StepStatus::Error)
            .with(StageKind::Slides, StepStatus::Completed);
        assert!(!is_enabled(StageKind::Slides, &snap));
        assert!(is_enabled(StageKind::Illustration, &snap));
    }

    #[test]
    fn dependents_mirror_predecessors() {
        assert_eq!(dependents(StageKind::Research), vec![StageKind::Slides]);
        assert_eq!(dependents(StageKind::Compiled), vec![StageKind::Pptx]);
        assert!(dependents(StageKind::Pptx).is_empty());
    }

    #[test]
    fn enabled_stages_in_order() {
        let snap = StatusSnapshot::new()
            .with(StageKind::Research, StepStatus::Completed)
            .with(StageKind::Slides, StepStatus::Completed);
        assert_eq!(
            enabled_stages(&snap),
            vec![
                StageKind::Research,
                StageKind::ManualResearch,
                StageKind::Slides,
                StageKind::Illustration
            ]
        );
    }
}
