//! Session state
//!
//! The single owned state object behind a [`crate::PipelineOrchestrator`]:
//! the presentation, the selected slide, the active suggestion, and the
//! bookkeeping that keeps remote snapshots from clobbering local edits.
//!
//! # Sequencing
//!
//! Every fetch takes the next sequence number. A response is applied only if
//! its number is above the last applied one and at or above the snapshot
//! floor. Local optimistic mutations raise the floor to the next unissued
//! number, so anything already in flight is discarded on arrival.

use crate::error::{GatingError, RemoteError};
use crate::events::ChangeEvent;
use crate::poller::{PollOutcome, SkipReason};
use crate::status::StepStatusModel;
use deckflow_model::{
    Presentation, SlideId, StageKind, StepStatus, SuggestionPatch, SuggestionState,
    WizardSuggestion,
};

/// Sync bookkeeping for one presentation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncBookkeeping {
    /// Next sequence number to hand out
    pub next_seq: u64,
    /// Highest sequence number applied so far
    pub last_applied: u64,
    /// Responses below this are stale
    pub floor: u64,
    /// A fetch is outstanding
    pub poll_in_flight: bool,
    /// A suggestion write is outstanding; polling is suspended
    pub apply_in_flight: bool,
    /// Shut down; nothing is applied any more
    pub torn_down: bool,
    /// Bumped on every suggestion request
    pub suggestion_generation: u64,
}

/// State owned by one orchestrator
#[derive(Debug, Clone)]
pub struct SessionState {
    pub(crate) presentation: Presentation,
    pub(crate) selected: Option<SlideId>,
    pub(crate) suggestion: Option<WizardSuggestion>,
    pub(crate) sync: SyncBookkeeping,
}

impl SessionState {
    /// Fresh state for `presentation`, nothing selected
    #[must_use]
    pub fn new(presentation: Presentation) -> Self {
        Self {
            presentation,
            selected: None,
            suggestion: None,
            sync: SyncBookkeeping {
                next_seq: 1,
                ..SyncBookkeeping::default()
            },
        }
    }

    /// With a selected slide; ignored if the slide does not exist
    #[must_use]
    pub fn with_selection(mut self, id: impl Into<SlideId>) -> Self {
        let id = id.into();
        if self.presentation.contains_slide(&id) {
            self.selected = Some(id);
        }
        self
    }

    /// Current presentation
    #[inline]
    #[must_use]
    pub fn presentation(&self) -> &Presentation {
        &self.presentation
    }

    /// Selected slide id
    #[inline]
    #[must_use]
    pub fn selected(&self) -> Option<&SlideId> {
        self.selected.as_ref()
    }

    /// Active suggestion
    #[inline]
    #[must_use]
    pub fn suggestion(&self) -> Option<&WizardSuggestion> {
        self.suggestion.as_ref()
    }

    /// Sync bookkeeping
    #[inline]
    #[must_use]
    pub fn sync(&self) -> &SyncBookkeeping {
        &self.sync
    }

    /// Fail if shut down
    pub fn ensure_live(&self) -> Result<(), GatingError> {
        if self.sync.torn_down {
            Err(GatingError::TornDown)
        } else {
            Ok(())
        }
    }

    /// Hand out the next sequence number
    pub fn issue_seq(&mut self) -> u64 {
        let seq = self.sync.next_seq;
        self.sync.next_seq += 1;
        seq
    }

    /// Invalidate every sequence number issued so far
    pub fn raise_floor(&mut self) {
        self.sync.floor = self.sync.next_seq;
    }

    /// Whether a response tagged `seq` may be applied now
    #[must_use]
    pub fn accepts(&self, seq: u64) -> bool {
        !self.sync.torn_down
            && !self.sync.apply_in_flight
            && seq > self.sync.last_applied
            && seq >= self.sync.floor
    }

    /// Start a poll fetch, or say why the tick must skip
    pub fn begin_fetch(&mut self) -> Result<u64, SkipReason> {
        if self.sync.torn_down {
            return Err(SkipReason::TornDown);
        }
        if self.sync.apply_in_flight {
            return Err(SkipReason::Suspended);
        }
        if self.sync.poll_in_flight {
            return Err(SkipReason::InFlight);
        }
        self.sync.poll_in_flight = true;
        Ok(self.issue_seq())
    }

    /// Settle the poll fetch tagged `seq`
    pub fn finish_fetch(
        &mut self,
        seq: u64,
        fetched: Result<Presentation, RemoteError>,
    ) -> (PollOutcome, Vec<ChangeEvent>) {
        self.sync.poll_in_flight = false;
        match fetched {
            Ok(snapshot) => self.apply_snapshot(seq, snapshot),
            Err(error) => (PollOutcome::Failed(error), Vec::new()),
        }
    }

    /// Reconcile a remote snapshot if `seq` is still current
    pub fn apply_snapshot(
        &mut self,
        seq: u64,
        snapshot: Presentation,
    ) -> (PollOutcome, Vec<ChangeEvent>) {
        if self.sync.torn_down {
            return (PollOutcome::Skipped(SkipReason::TornDown), Vec::new());
        }
        if !self.accepts(seq) {
            return (PollOutcome::Discarded(seq), Vec::new());
        }
        self.sync.last_applied = seq;
        let mut events = self.reconcile(snapshot);
        events.push(ChangeEvent::SnapshotApplied { seq });
        (PollOutcome::Applied(seq), events)
    }

    /// Overwrite local state with `snapshot`, reporting what changed
    fn reconcile(&mut self, mut snapshot: Presentation) -> Vec<ChangeEvent> {
        let steps = std::mem::take(&mut snapshot.steps);
        let mut events: Vec<ChangeEvent> = self
            .presentation
            .replace_all(steps)
            .into_iter()
            .map(|(stage, status)| ChangeEvent::StepChanged { stage, status })
            .collect();
        snapshot.steps = std::mem::take(&mut self.presentation.steps);
        // Identity comes from the session, not the payload
        snapshot.id = self.presentation.id.clone();
        let slides_changed = snapshot.slides != self.presentation.slides;
        self.presentation = snapshot;
        if slides_changed {
            events.push(ChangeEvent::SlidesChanged);
        }
        events.extend(self.follow_selection());
        events
    }

    /// Keep the selection on the same slide id, else the first slide
    ///
    /// Returns the event if the selection moved.
    pub(crate) fn follow_selection(&mut self) -> Option<ChangeEvent> {
        let previous = self.selected.clone()?;
        if self.presentation.contains_slide(&previous) {
            return None;
        }
        self.selected = self.presentation.slides.first().map(|s| s.id.clone());
        Some(ChangeEvent::SelectionChanged(self.selected.clone()))
    }

    /// Select a slide, or clear the selection with `None`
    pub fn select(&mut self, id: Option<SlideId>) -> Result<Option<ChangeEvent>, GatingError> {
        if let Some(id) = &id {
            if !self.presentation.contains_slide(id) {
                return Err(GatingError::UnknownSlide(id.clone()));
            }
        }
        if self.selected == id {
            return Ok(None);
        }
        self.selected = id;
        Ok(Some(ChangeEvent::SelectionChanged(self.selected.clone())))
    }

    /// Reject a run that the graph or in-flight work forbids
    pub fn gate_run(&self, stage: StageKind) -> Result<(), GatingError> {
        self.ensure_live()?;
        if !stage.is_runnable() {
            return Err(GatingError::NotRunnable(stage));
        }
        let statuses = self.presentation.snapshot();
        if !crate::graph::is_enabled(stage, &statuses) {
            return Err(GatingError::NotEnabled {
                stage,
                blocking: crate::graph::blocking_status(stage, &statuses),
            });
        }
        if statuses.get(stage) == StepStatus::Processing {
            return Err(GatingError::AlreadyProcessing(stage));
        }
        Ok(())
    }

    /// Optimistically mark `stage` processing
    pub fn begin_run(&mut self, stage: StageKind) -> Result<Vec<ChangeEvent>, GatingError> {
        self.gate_run(stage)?;
        self.presentation
            .set_status(stage, StepStatus::Processing, None);
        self.raise_floor();
        Ok(vec![ChangeEvent::StepChanged {
            stage,
            status: StepStatus::Processing,
        }])
    }

    /// Record an unacknowledged run
    pub fn fail_run(&mut self, stage: StageKind, error: &RemoteError) -> Vec<ChangeEvent> {
        if self.sync.torn_down {
            return Vec::new();
        }
        self.presentation.set_status(stage, StepStatus::Error, None);
        if let Some(step) = self.presentation.steps.get_mut(&stage) {
            step.error_message = Some(error.to_string());
        }
        self.raise_floor();
        vec![
            ChangeEvent::StepChanged {
                stage,
                status: StepStatus::Error,
            },
            ChangeEvent::RunFailed {
                stage,
                error: error.clone(),
            },
        ]
    }

    /// Discard any pending suggestion and open a new request generation
    pub fn begin_suggestion(&mut self) -> Result<(u64, Vec<ChangeEvent>), GatingError> {
        self.ensure_live()?;
        self.sync.suggestion_generation += 1;
        let events = self.dismiss_suggestion().into_iter().collect();
        Ok((self.sync.suggestion_generation, events))
    }

    /// Install the interpretation result for `generation`
    ///
    /// Returns `None` (and changes nothing) if a newer request was issued.
    pub fn finish_suggestion(
        &mut self,
        generation: u64,
        prompt: &str,
        patch: Option<SuggestionPatch>,
    ) -> (Option<WizardSuggestion>, Vec<ChangeEvent>) {
        if self.sync.torn_down || generation != self.sync.suggestion_generation {
            return (None, Vec::new());
        }
        match patch.filter(|p| !p.is_noop()) {
            Some(patch) => {
                let suggestion = WizardSuggestion::new(prompt, patch);
                self.suggestion = Some(suggestion.clone());
                (
                    Some(suggestion),
                    vec![ChangeEvent::SuggestionChanged(Some(SuggestionState::Pending))],
                )
            }
            None => (None, vec![ChangeEvent::SuggestionChanged(None)]),
        }
    }

    /// Drop the pending suggestion, if any
    pub fn dismiss_suggestion(&mut self) -> Option<ChangeEvent> {
        let mut suggestion = self.suggestion.take()?;
        if !suggestion.is_pending() {
            return None;
        }
        suggestion.state = SuggestionState::Dismissed;
        Some(ChangeEvent::SuggestionChanged(Some(SuggestionState::Dismissed)))
    }

    /// Mark shut down
    pub fn tear_down(&mut self) {
        self.sync.torn_down = true;
        self.sync.poll_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deckflow_model::Slide;
    use pretty_assertions::assert_eq;

    fn deck() -> Presentation {
        Presentation::new("p-1", "Deck")
            .with_slides(vec![Slide::new("a", "A"), Slide::new("b", "B")])
    }

    #[test]
    fn sequence_numbers_start_at_one() {
        let mut state = SessionState::new(deck());
        assert_eq!(state.issue_seq(), 1);
        assert_eq!(state.issue_seq(), 2);
    }

    #[test]
    fn overlapping_fetch_is_skipped() {
        let mut state = SessionState::new(deck());
        let seq = state.begin_fetch().unwrap();
        assert_eq!(state.begin_fetch(), Err(SkipReason::InFlight));

        let (outcome, _) = state.finish_fetch(seq, Ok(deck()));
        assert_eq!(outcome, PollOutcome::Applied(seq));
        assert!(state.begin_fetch().is_ok());
    }

    #[test]
    fn floor_discards_in_flight_fetch() {
        let mut state = SessionState::new(deck());
        let seq = state.begin_fetch().unwrap();
        state.begin_run(StageKind::Research).unwrap();

        let remote = deck();
        let (outcome, events) = state.finish_fetch(seq, Ok(remote));
        assert_eq!(outcome, PollOutcome::Discarded(seq));
        assert!(events.is_empty());
        assert_eq!(
            state.presentation().status(StageKind::Research),
            StepStatus::Processing
        );
    }

    #[test]
    fn reconcile_reports_changes_and_keeps_selection() {
        let mut state = SessionState::new(deck()).with_selection("b");
        let remote = deck()
            .with_step_status(StageKind::Research, StepStatus::Completed)
            .with_slides(vec![Slide::new("b", "B2")]);
        let seq = state.issue_seq();

        let (_, events) = state.apply_snapshot(seq, remote);
        assert!(events.contains(&ChangeEvent::StepChanged {
            stage: StageKind::Research,
            status: StepStatus::Completed
        }));
        assert!(events.contains(&ChangeEvent::SlidesChanged));
        assert_eq!(state.selected(), Some(&SlideId::from("b")));
    }

    #[test]
    fn selection_falls_back_to_first_slide() {
        let mut state = SessionState::new(deck()).with_selection("b");
        let seq = state.issue_seq();
        let (_, events) = state.apply_snapshot(seq, deck().with_slides(vec![Slide::new("c", "C")]));

        assert_eq!(state.selected(), Some(&SlideId::from("c")));
        assert!(events.contains(&ChangeEvent::SelectionChanged(Some(SlideId::from("c")))));
    }

    #[test]
    fn run_gating_order() {
        let state = SessionState::new(deck());
        assert_eq!(
            state.gate_run(StageKind::Compiled),
            Err(GatingError::NotRunnable(StageKind::Compiled))
        );
        assert_eq!(
            state.gate_run(StageKind::Slides),
            Err(GatingError::NotEnabled {
                stage: StageKind::Slides,
                blocking: Some(StepStatus::Pending)
            })
        );

        let mut state = state;
        state.begin_run(StageKind::Research).unwrap();
        assert_eq!(
            state.gate_run(StageKind::Research),
            Err(GatingError::AlreadyProcessing(StageKind::Research))
        );
    }

    #[test]
    fn stale_suggestion_generation_is_dropped() {
        let mut state = SessionState::new(deck());
        let (first, _) = state.begin_suggestion().unwrap();
        let (second, _) = state.begin_suggestion().unwrap();
        let patch = SuggestionPatch::AllSlides { slides: vec![] };

        let (stale, events) = state.finish_suggestion(first, "old", Some(patch.clone()));
        assert!(stale.is_none());
        assert!(events.is_empty());

        let (fresh, _) = state.finish_suggestion(second, "new", Some(patch));
        assert_eq!(fresh.unwrap().prompt, "new");
        assert!(state.suggestion().is_some());
    }

    #[test]
    fn torn_down_rejects_everything() {
        let mut state = SessionState::new(deck());
        state.tear_down();
        assert_eq!(state.begin_fetch(), Err(SkipReason::TornDown));
        assert_eq!(state.gate_run(StageKind::Research), Err(GatingError::TornDown));
        assert!(state.begin_suggestion().is_err());
    }
}
