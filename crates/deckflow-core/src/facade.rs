//! Orchestration facade
//!
//! [`PipelineOrchestrator`] is what a UI layer talks to. It is a cheap
//! `Clone` handle over shared state.
//!
//! - All state lives in one [`SessionState`] behind a `parking_lot::Mutex`
//! - The lock is never held across an `.await`
//! - Subscribers are called after the lock is released
//! - The poll task holds only a weak reference; dropping the last handle
//!   stops it

use crate::applier::{self, MergePlan, Rollback};
use crate::config::SyncConfig;
use crate::error::{GatingError, OrchestratorError, RemoteError};
use crate::events::{ChangeEvent, Listener, Subscribers, SubscriptionId};
use crate::poller::{AdaptivePoller, Cadence, PollOutcome, PollTarget};
use crate::remote::{InterpretRequest, RemoteSync, RunAck, RunParameters, ScopeHint};
use crate::session::SessionState;
use crate::status::{StatusSnapshot, StepStatusModel};
use async_trait::async_trait;
use deckflow_model::{
    NewPresentation, Presentation, PresentationId, SlideId, StageKind, StepStatus,
    SuggestionState, WizardSuggestion,
};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::{Arc, Weak};
use std::time::Duration;

/// Outcome of `apply_suggestion`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Merged locally and persisted
    Applied,
    /// Nothing pending, or already applied
    NoOp,
}

struct Inner {
    id: PresentationId,
    state: Mutex<SessionState>,
    remote: Arc<dyn RemoteSync>,
    poller: AdaptivePoller,
    config: SyncConfig,
    subscribers: Subscribers,
}

impl Inner {
    fn emit(&self, events: &[ChangeEvent]) {
        self.subscribers.emit_all(events);
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.poller.cancel(&self.id);
    }
}

#[async_trait]
impl PollTarget for Inner {
    async fn poll_once(&self) -> PollOutcome {
        let seq = match self.state.lock().begin_fetch() {
            Ok(seq) => seq,
            Err(reason) => {
                tracing::debug!("poll skipped for {}: {:?}", self.id, reason);
                return PollOutcome::Skipped(reason);
            }
        };
        let fetching = FetchGuard::new(&self.state);
        let fetched = bounded(
            self.config.fetch_timeout(),
            self.remote.fetch_presentation(&self.id),
        )
        .await;
        fetching.disarm();
        let (outcome, events) = self.state.lock().finish_fetch(seq, fetched);
        if let PollOutcome::Discarded(seq) = outcome {
            tracing::debug!("discarded stale snapshot {} for {}", seq, self.id);
        }
        self.emit(&events);
        outcome
    }

    fn cadence(&self) -> Cadence {
        let state = self.state.lock();
        if state.sync().torn_down {
            return Cadence::Idle;
        }
        let presentation = state.presentation();
        let unused_research = match presentation.research_method.research_stage() {
            StageKind::ManualResearch => StageKind::Research,
            _ => StageKind::ManualResearch,
        };
        Cadence::for_statuses(&presentation.snapshot(), Some(unused_research), &self.config)
    }
}

/// Clears `poll_in_flight` if the fetch future is dropped before it settles
struct FetchGuard<'a> {
    state: Option<&'a Mutex<SessionState>>,
}

impl<'a> FetchGuard<'a> {
    fn new(state: &'a Mutex<SessionState>) -> Self {
        Self { state: Some(state) }
    }

    fn disarm(mut self) {
        self.state = None;
    }
}

impl Drop for FetchGuard<'_> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            state.lock().sync.poll_in_flight = false;
        }
    }
}

/// Undoes an optimistic merge if the save future is dropped before it settles
///
/// Clears `apply_in_flight`, restores the rollback, emits the resulting
/// events and wakes the poller.
struct ApplyGuard<'a> {
    inner: &'a Inner,
    rollback: Option<Rollback>,
}

impl<'a> ApplyGuard<'a> {
    fn new(inner: &'a Inner, rollback: Rollback) -> Self {
        Self {
            inner,
            rollback: Some(rollback),
        }
    }

    /// The save settled; hand the rollback back to the caller
    fn settle(mut self) -> Option<Rollback> {
        self.rollback.take()
    }
}

impl Drop for ApplyGuard<'_> {
    fn drop(&mut self) {
        let Some(rollback) = self.rollback.take() else {
            return;
        };
        let events = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.sync.apply_in_flight = false;
            state.raise_floor();
            rollback.restore(&mut state.presentation, &mut state.selected)
        };
        tracing::warn!("suggestion save on {} abandoned, rolled back", self.inner.id);
        self.inner.emit(&events);
        self.inner.poller.wake(&self.inner.id);
    }
}

/// Await `fut`, turning an elapsed budget into [`RemoteError::Timeout`]
async fn bounded<T>(
    budget: Duration,
    fut: impl Future<Output = Result<T, RemoteError>>,
) -> Result<T, RemoteError> {
    match tokio::time::timeout(budget, fut).await {
        Ok(result) => result,
        Err(_) => Err(RemoteError::timeout(budget)),
    }
}

/// Handle to one presentation's pipeline
#[derive(Clone)]
pub struct PipelineOrchestrator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("id", &self.inner.id)
            .finish_non_exhaustive()
    }
}

impl PipelineOrchestrator {
    /// Wrap existing session state
    #[must_use]
    pub fn new(
        state: SessionState,
        remote: Arc<dyn RemoteSync>,
        poller: AdaptivePoller,
        config: SyncConfig,
    ) -> Self {
        let id = state.presentation().id.clone();
        Self {
            inner: Arc::new(Inner {
                id,
                state: Mutex::new(state),
                remote,
                poller,
                config,
                subscribers: Subscribers::new(),
            }),
        }
    }

    /// Fetch `id` and wrap it
    pub async fn open(
        remote: Arc<dyn RemoteSync>,
        id: &PresentationId,
        poller: AdaptivePoller,
        config: SyncConfig,
    ) -> Result<Self, OrchestratorError> {
        let presentation = bounded(config.fetch_timeout(), remote.fetch_presentation(id)).await?;
        tracing::info!("opened presentation {}", id);
        Ok(Self::new(SessionState::new(presentation), remote, poller, config))
    }

    /// Create a presentation remotely and wrap it
    pub async fn create(
        remote: Arc<dyn RemoteSync>,
        new: NewPresentation,
        poller: AdaptivePoller,
        config: SyncConfig,
    ) -> Result<Self, OrchestratorError> {
        let presentation = bounded(config.save_timeout(), remote.create_presentation(new)).await?;
        tracing::info!("created presentation {}", presentation.id);
        Ok(Self::new(SessionState::new(presentation), remote, poller, config))
    }

    /// Presentation id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &PresentationId {
        &self.inner.id
    }

    /// Copy of the current presentation
    #[must_use]
    pub fn presentation(&self) -> Presentation {
        self.inner.state.lock().presentation().clone()
    }

    /// Status of `stage`
    #[must_use]
    pub fn status(&self, stage: StageKind) -> StepStatus {
        self.inner.state.lock().presentation().status(stage)
    }

    /// Status of every stage
    #[must_use]
    pub fn statuses(&self) -> StatusSnapshot {
        self.inner.state.lock().presentation().snapshot()
    }

    /// Whether `stage` may start now
    #[must_use]
    pub fn is_enabled(&self, stage: StageKind) -> bool {
        crate::graph::is_enabled(stage, &self.statuses())
    }

    /// Current poll cadence
    #[must_use]
    pub fn cadence(&self) -> Cadence {
        self.inner.cadence()
    }

    /// Start a stage
    ///
    /// Rejected without any network call if the stage is not runnable, not
    /// enabled or already processing. Otherwise the stage is marked
    /// processing right away and the acknowledgement is awaited within the
    /// stage's budget; a failure or timeout marks it `error`. No retry.
    pub async fn request_run(
        &self,
        stage: StageKind,
        params: RunParameters,
    ) -> Result<RunAck, OrchestratorError> {
        let events = self.inner.state.lock().begin_run(stage)?;
        self.inner.emit(&events);
        tracing::info!("run requested: {} on {}", stage, self.inner.id);

        let budget = self.inner.config.run_timeout(stage);
        let acked = bounded(budget, self.inner.remote.run_step(&self.inner.id, stage, params)).await;
        let result = match acked {
            Ok(ack) => Ok(ack),
            Err(error) => {
                tracing::warn!("run {} on {} failed: {}", stage, self.inner.id, error);
                let events = self.inner.state.lock().fail_run(stage, &error);
                self.inner.emit(&events);
                Err(error.into())
            }
        };
        self.inner.poller.wake(&self.inner.id);
        result
    }

    /// Ask for a suggestion scoped to the current selection
    pub async fn request_suggestion(
        &self,
        prompt: impl Into<String>,
    ) -> Result<Option<WizardSuggestion>, OrchestratorError> {
        let hint = match self.selected_slide() {
            Some(id) => ScopeHint::Slide(id),
            None => ScopeHint::Deck,
        };
        self.request_suggestion_scoped(prompt, hint).await
    }

    /// Ask for a suggestion with an explicit scope hint
    ///
    /// Any pending suggestion is discarded first. If another request is
    /// issued before this one answers, this one resolves to `None`.
    pub async fn request_suggestion_scoped(
        &self,
        prompt: impl Into<String>,
        hint: ScopeHint,
    ) -> Result<Option<WizardSuggestion>, OrchestratorError> {
        let prompt = prompt.into();
        let (generation, events) = self.inner.state.lock().begin_suggestion()?;
        self.inner.emit(&events);

        let request = InterpretRequest::new(prompt.clone(), hint);
        let patch = bounded(
            self.inner.config.interpret_timeout(),
            self.inner.remote.interpret(&self.inner.id, request),
        )
        .await?;

        let (suggestion, events) = self
            .inner
            .state
            .lock()
            .finish_suggestion(generation, &prompt, patch);
        if events.is_empty() {
            tracing::debug!("dropped stale suggestion response for {}", self.inner.id);
        }
        self.inner.emit(&events);
        Ok(suggestion)
    }

    /// Active suggestion, if any
    #[must_use]
    pub fn active_suggestion(&self) -> Option<WizardSuggestion> {
        self.inner.state.lock().suggestion().cloned()
    }

    /// Discard the pending suggestion; returns whether there was one
    pub fn dismiss_suggestion(&self) -> bool {
        let event = self.inner.state.lock().dismiss_suggestion();
        let dismissed = event.is_some();
        self.inner.emit(&event.into_iter().collect::<Vec<_>>());
        dismissed
    }

    /// Apply the pending suggestion
    ///
    /// The merge happens locally first and polling is suspended while the
    /// save is outstanding. On failure the merge is rolled back, the
    /// suggestion stays pending and `SuggestionApplyFailed` is emitted.
    pub async fn apply_suggestion(&self) -> Result<ApplyOutcome, OrchestratorError> {
        let (suggestion_id, plan) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.ensure_live()?;
            if state.sync.apply_in_flight {
                return Err(GatingError::ApplyInFlight.into());
            }
            let Some(suggestion) = state.suggestion.as_ref().filter(|s| s.is_pending()) else {
                return Ok(ApplyOutcome::NoOp);
            };
            let suggestion_id = suggestion.id;
            let patch = suggestion.patch.clone();
            let plan = applier::merge(&mut state.presentation, &mut state.selected, &patch)?;
            state.sync.apply_in_flight = true;
            state.raise_floor();
            (suggestion_id, plan)
        };
        let MergePlan {
            payload,
            rollback,
            events,
        } = plan;
        self.inner.emit(&events);
        tracing::info!(
            "applying suggestion {} ({}) to {}",
            suggestion_id,
            payload.label(),
            self.inner.id
        );

        let pending_save = ApplyGuard::new(&self.inner, rollback);
        let saved = bounded(
            self.inner.config.save_timeout(),
            self.inner.remote.save(&self.inner.id, payload),
        )
        .await;
        let rollback = pending_save.settle();

        let (result, events) = {
            let mut guard = self.inner.state.lock();
            let state = &mut *guard;
            state.sync.apply_in_flight = false;
            state.raise_floor();
            match saved {
                Ok(()) => {
                    let mut events = Vec::new();
                    if state.suggestion.as_ref().is_some_and(|s| s.id == suggestion_id) {
                        state.suggestion = None;
                        events.push(ChangeEvent::SuggestionChanged(Some(SuggestionState::Applied)));
                    }
                    (Ok(ApplyOutcome::Applied), events)
                }
                Err(error) => {
                    let mut events = rollback
                        .map(|r| r.restore(&mut state.presentation, &mut state.selected))
                        .unwrap_or_default();
                    events.push(ChangeEvent::SuggestionApplyFailed {
                        error: error.clone(),
                    });
                    (Err(error), events)
                }
            }
        };
        self.inner.emit(&events);
        match &result {
            Ok(_) => tracing::info!("suggestion {} applied to {}", suggestion_id, self.inner.id),
            Err(e) => tracing::warn!(
                "suggestion {} rolled back on {}: {}",
                suggestion_id,
                self.inner.id,
                e
            ),
        }
        self.inner.poller.wake(&self.inner.id);
        result.map_err(OrchestratorError::from)
    }

    /// Select a slide, or clear the selection
    pub fn select_slide(&self, id: Option<SlideId>) -> Result<(), OrchestratorError> {
        let event = self.inner.state.lock().select(id)?;
        self.inner.emit(&event.into_iter().collect::<Vec<_>>());
        Ok(())
    }

    /// Selected slide id
    #[must_use]
    pub fn selected_slide(&self) -> Option<SlideId> {
        self.inner.state.lock().selected().cloned()
    }

    /// Register a change callback
    pub fn subscribe(&self, listener: impl Fn(&ChangeEvent) + Send + Sync + 'static) -> SubscriptionId {
        let listener: Listener = Arc::new(listener);
        self.inner.subscribers.subscribe(listener)
    }

    /// Remove a change callback
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.inner.subscribers.unsubscribe(id)
    }

    /// Fetch and reconcile once, outside the poll schedule
    pub async fn poll_now(&self) -> PollOutcome {
        self.inner.poll_once().await
    }

    /// Start background polling; returns `false` if already running
    pub fn start(&self) -> bool {
        if self.inner.state.lock().sync().torn_down {
            return false;
        }
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        self.inner.poller.start(self.inner.id.clone(), weak)
    }

    /// Stop polling and reject further requests
    pub fn shutdown(&self) {
        self.inner.state.lock().tear_down();
        self.inner.poller.cancel(&self.inner.id);
        tracing::info!("orchestrator for {} shut down", self.inner.id);
    }

    /// Whether background polling is running
    #[must_use]
    pub fn is_polling(&self) -> bool {
        self.inner.poller.is_active(&self.inner.id)
    }
}
