use deckflow_core::{
    AdaptivePoller, ApplyOutcome, ChangeEvent, GatingError, OrchestratorError, PipelineOrchestrator,
    PollOutcome, RemoteError, RemoteSync, RunParameters, SavePayload, ScopeHint, SessionState,
    SyncConfig,
};
use deckflow_model::{
    NewPresentation, Presentation, ResearchMethod, ResearchResult, Slide, SlideId, SlidePatch,
    StageKind, StepStatus, SuggestionPatch, SuggestionState,
};
use deckflow_test_utils::{
    fast_config, researched_presentation, sample_presentation, settle, EventLog, ScriptedRemote,
};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use std::time::Duration;

fn orchestrator(remote: &Arc<ScriptedRemote>, config: SyncConfig) -> PipelineOrchestrator {
    let state = SessionState::new(remote.snapshot().expect("remote has a snapshot"));
    let dyn_remote: Arc<dyn RemoteSync> = remote.clone();
    PipelineOrchestrator::new(state, dyn_remote, AdaptivePoller::new(), config)
}

fn retitle(slide: &str, title: &str) -> SuggestionPatch {
    SuggestionPatch::SingleSlide {
        slide_id: SlideId::from(slide),
        patch: SlidePatch::title(title),
    }
}

fn slide_ids(p: &Presentation) -> Vec<String> {
    p.slides.iter().map(|s| s.id.to_string()).collect()
}

fn server_error() -> RemoteError {
    RemoteError::Status {
        code: 500,
        message: "internal".into(),
    }
}

// ============================================================================
// Run requests
// ============================================================================

#[tokio::test]
async fn gated_runs_never_reach_remote() {
    let remote = ScriptedRemote::shared(sample_presentation());
    let orch = orchestrator(&remote, SyncConfig::default());

    for stage in [StageKind::Slides, StageKind::Illustration, StageKind::Pptx, StageKind::Compiled] {
        let err = orch.request_run(stage, RunParameters::new()).await.unwrap_err();
        assert!(err.is_gating(), "{stage}: {err}");
    }
    assert!(remote.runs().is_empty());
}

#[tokio::test]
async fn second_run_while_processing_is_rejected() {
    let remote = ScriptedRemote::shared(researched_presentation());
    let orch = orchestrator(&remote, SyncConfig::default());

    orch.request_run(StageKind::Slides, RunParameters::new().with("count", 5))
        .await
        .unwrap();
    let err = orch
        .request_run(StageKind::Slides, RunParameters::new())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        OrchestratorError::Gating(GatingError::AlreadyProcessing(StageKind::Slides))
    ));
    let runs = remote.runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].1.get("count"), Some(&serde_json::json!(5)));
}

#[tokio::test(start_paused = true)]
async fn unacknowledged_export_errors_then_reruns() {
    let mut ready = researched_presentation();
    for stage in [StageKind::Slides, StageKind::Illustration, StageKind::Compiled] {
        ready = ready.with_step_status(stage, StepStatus::Completed);
    }
    let remote = ScriptedRemote::shared(ready);
    remote.never_ack(StageKind::Pptx);
    let orch = orchestrator(&remote, SyncConfig::default());
    let (log, _) = EventLog::attach(&orch);

    let err = orch
        .request_run(StageKind::Pptx, RunParameters::new())
        .await
        .unwrap_err();
    assert!(err.is_transport());
    assert_eq!(orch.status(StageKind::Pptx), StepStatus::Error);
    assert_eq!(
        log.count(|e| matches!(
            e,
            ChangeEvent::RunFailed {
                stage: StageKind::Pptx,
                error: RemoteError::Timeout { after_ms: 30_000 }
            }
        )),
        1
    );

    let rerun = tokio::spawn({
        let orch = orch.clone();
        async move { orch.request_run(StageKind::Pptx, RunParameters::new()).await }
    });
    settle().await;
    assert_eq!(orch.status(StageKind::Pptx), StepStatus::Processing);
    assert_eq!(remote.runs().len(), 2);

    assert!(rerun.await.unwrap().is_err());
    assert_eq!(orch.status(StageKind::Pptx), StepStatus::Error);
}

#[tokio::test]
async fn rejected_run_keeps_stage_rerunnable() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.fail_run(StageKind::Research, RemoteError::Network("connection reset".into()));
    let orch = orchestrator(&remote, SyncConfig::default());

    assert!(orch
        .request_run(StageKind::Research, RunParameters::new())
        .await
        .is_err());
    let step = orch.presentation().steps[&StageKind::Research].clone();
    assert_eq!(step.status, StepStatus::Error);
    assert!(step.error_message.unwrap().contains("connection reset"));
    assert!(orch.is_enabled(StageKind::Research));
}

// ============================================================================
// Suggestions
// ============================================================================

#[tokio::test]
async fn single_slide_patch_replaces_only_title() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.queue_interpretation(Some(retitle("7", "New Title")));
    let orch = orchestrator(&remote, SyncConfig::default());
    orch.select_slide(Some(SlideId::from("7"))).unwrap();

    orch.request_suggestion("better title").await.unwrap().unwrap();
    assert_eq!(
        remote.interprets()[0].scope_hint,
        ScopeHint::Slide(SlideId::from("7"))
    );
    assert_eq!(orch.apply_suggestion().await.unwrap(), ApplyOutcome::Applied);

    let before = sample_presentation();
    let after = orch.presentation();
    let slide = after.slide(&SlideId::from("7")).unwrap();
    assert_eq!(slide.title, "New Title");
    assert_eq!(slide.content, before.slide(&SlideId::from("7")).unwrap().content);
    assert_eq!(slide.position, 1);
    assert_eq!(remote.snapshot().unwrap().slides, after.slides);
}

#[tokio::test]
async fn applying_twice_mutates_once() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.queue_interpretation(Some(retitle("6", "Welcome")));
    let orch = orchestrator(&remote, SyncConfig::default());
    let (log, _) = EventLog::attach(&orch);

    orch.request_suggestion("friendlier").await.unwrap();
    assert_eq!(orch.apply_suggestion().await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(orch.apply_suggestion().await.unwrap(), ApplyOutcome::NoOp);

    assert_eq!(remote.saves().len(), 1);
    assert_eq!(log.count(|e| *e == ChangeEvent::SlidesChanged), 1);
    assert_eq!(
        log.count(|e| *e == ChangeEvent::SuggestionChanged(Some(SuggestionState::Applied))),
        1
    );
    assert!(orch.active_suggestion().is_none());
}

#[tokio::test]
async fn failed_save_rolls_back_and_allows_retry() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.queue_interpretation(Some(retitle("7", "New Title")));
    remote.fail_next_save(server_error());
    let orch = orchestrator(&remote, SyncConfig::default());
    let (log, _) = EventLog::attach(&orch);

    orch.request_suggestion("retitle").await.unwrap();
    let err = orch.apply_suggestion().await.unwrap_err();
    assert!(err.is_transport());

    assert_eq!(orch.presentation(), sample_presentation());
    assert!(orch.active_suggestion().unwrap().is_pending());
    assert_eq!(
        log.count(|e| matches!(e, ChangeEvent::SuggestionApplyFailed { .. })),
        1
    );

    assert_eq!(orch.apply_suggestion().await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(
        orch.presentation().slide(&SlideId::from("7")).unwrap().title,
        "New Title"
    );
}

#[tokio::test]
async fn second_apply_waits_for_first() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.queue_interpretation(Some(retitle("8", "Thanks")));
    remote.hold_saves();
    let orch = orchestrator(&remote, SyncConfig::default());
    orch.request_suggestion("closing").await.unwrap();

    let first = tokio::spawn({
        let orch = orch.clone();
        async move { orch.apply_suggestion().await }
    });
    settle().await;
    assert!(matches!(
        orch.apply_suggestion().await,
        Err(OrchestratorError::Gating(GatingError::ApplyInFlight))
    ));

    remote.release_saves();
    assert_eq!(first.await.unwrap().unwrap(), ApplyOutcome::Applied);
    assert_eq!(remote.saves().len(), 1);
}

#[tokio::test]
async fn abandoned_apply_rolls_back_and_resumes_polling() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.queue_interpretation(Some(retitle("7", "New Title")));
    remote.hold_saves();
    let orch = orchestrator(&remote, SyncConfig::default());
    let (log, _) = EventLog::attach(&orch);
    orch.request_suggestion("retitle").await.unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(20), orch.apply_suggestion()).await;
    assert!(abandoned.is_err());
    assert_eq!(
        orch.presentation().slide(&SlideId::from("7")).unwrap().title,
        "Old"
    );
    assert!(orch.active_suggestion().unwrap().is_pending());
    assert_eq!(log.count(|e| e == &ChangeEvent::SlidesChanged), 2);

    remote.release_saves();
    assert!(orch.poll_now().await.is_applied());
    assert_eq!(orch.apply_suggestion().await.unwrap(), ApplyOutcome::Applied);
    assert_eq!(
        orch.presentation().slide(&SlideId::from("7")).unwrap().title,
        "New Title"
    );
}

#[tokio::test]
async fn research_patch_targets_chosen_method() {
    let manual = sample_presentation().with_research_method(ResearchMethod::Manual);
    let remote = ScriptedRemote::shared(manual);
    remote.queue_interpretation(Some(SuggestionPatch::Research {
        result: ResearchResult::new("my notes"),
    }));
    let orch = orchestrator(&remote, SyncConfig::default());

    orch.request_suggestion_scoped("use my notes", ScopeHint::Deck)
        .await
        .unwrap();
    orch.apply_suggestion().await.unwrap();

    assert_eq!(orch.status(StageKind::ManualResearch), StepStatus::Completed);
    assert_eq!(orch.status(StageKind::Research), StepStatus::Pending);
    assert!(orch.is_enabled(StageKind::Slides));
    assert!(matches!(
        remote.saves()[0],
        SavePayload::Research {
            stage: StageKind::ManualResearch,
            ..
        }
    ));
}

#[tokio::test]
async fn new_request_discards_pending_suggestion() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.queue_interpretation(Some(retitle("6", "First")));
    remote.queue_interpretation(None);
    let orch = orchestrator(&remote, SyncConfig::default());
    let (log, _) = EventLog::attach(&orch);

    orch.request_suggestion("first").await.unwrap();
    assert!(orch.active_suggestion().is_some());

    assert!(orch.request_suggestion("never mind").await.unwrap().is_none());
    assert!(orch.active_suggestion().is_none());
    assert_eq!(
        log.count(|e| *e == ChangeEvent::SuggestionChanged(Some(SuggestionState::Dismissed))),
        1
    );
    assert_eq!(orch.apply_suggestion().await.unwrap(), ApplyOutcome::NoOp);
}

// ============================================================================
// Polling and ordering
// ============================================================================

#[test]
fn responses_applied_in_sequence_order_only() {
    let mut state = SessionState::new(sample_presentation());
    let (s1, s2, s3) = (state.issue_seq(), state.issue_seq(), state.issue_seq());
    let named = |name: &str| {
        let mut p = sample_presentation();
        p.name = name.into();
        p
    };

    assert_eq!(state.apply_snapshot(s1, named("one")).0, PollOutcome::Applied(s1));
    assert_eq!(state.apply_snapshot(s3, named("three")).0, PollOutcome::Applied(s3));
    assert_eq!(state.apply_snapshot(s2, named("two")).0, PollOutcome::Discarded(s2));
    assert_eq!(state.presentation().name, "three");
}

#[tokio::test]
async fn fetch_started_before_write_is_discarded() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.queue_interpretation(Some(SuggestionPatch::AllSlides {
        slides: vec![Slide::new("x", "X")],
    }));
    let orch = orchestrator(&remote, SyncConfig::default());
    orch.request_suggestion("one slide").await.unwrap();

    remote.hold_fetches();
    let stale = tokio::spawn({
        let orch = orch.clone();
        async move { orch.poll_now().await }
    });
    settle().await;
    assert_eq!(remote.fetch_count(), 1);

    orch.apply_suggestion().await.unwrap();
    remote.release_fetches();

    assert!(matches!(stale.await.unwrap(), PollOutcome::Discarded(_)));
    assert_eq!(slide_ids(&orch.presentation()), vec!["x"]);
}

#[tokio::test(start_paused = true)]
async fn polling_suspended_during_write() {
    let remote = ScriptedRemote::shared(researched_presentation());
    remote.queue_interpretation(Some(SuggestionPatch::AllSlides {
        slides: vec![Slide::new("x", "X"), Slide::new("y", "Y")],
    }));
    let config = fast_config().with_save_timeout(Duration::from_secs(60));
    let orch = orchestrator(&remote, config);
    orch.start();
    settle().await;
    assert_eq!(remote.fetch_count(), 1);

    orch.request_suggestion("two slides").await.unwrap();
    remote.hold_saves();
    let apply = tokio::spawn({
        let orch = orch.clone();
        async move { orch.apply_suggestion().await }
    });
    settle().await;
    assert_eq!(remote.saves().len(), 1);

    // Remote moves on while the write is outstanding
    remote.set_status(StageKind::Slides, StepStatus::Processing);
    tokio::time::sleep(Duration::from_secs(3)).await;
    settle().await;
    assert_eq!(remote.fetch_count(), 1);
    assert_eq!(slide_ids(&orch.presentation()), vec!["x", "y"]);
    assert_eq!(orch.status(StageKind::Slides), StepStatus::Pending);

    remote.release_saves();
    assert_eq!(apply.await.unwrap().unwrap(), ApplyOutcome::Applied);
    settle().await;
    assert_eq!(remote.fetch_count(), 2);
    assert_eq!(orch.status(StageKind::Slides), StepStatus::Processing);
    assert_eq!(slide_ids(&orch.presentation()), vec!["x", "y"]);
    orch.shutdown();
}

#[tokio::test(start_paused = true)]
async fn cadence_tracks_activity() {
    let busy = researched_presentation().with_step_status(StageKind::Slides, StepStatus::Processing);
    let remote = ScriptedRemote::shared(busy);
    let orch = orchestrator(&remote, fast_config());
    orch.start();
    settle().await;
    assert_eq!(remote.fetch_count(), 1);

    tokio::time::sleep(Duration::from_millis(350)).await;
    settle().await;
    assert_eq!(remote.fetch_count(), 4);

    // Everything done: the poller parks
    let mut done = remote.snapshot().unwrap();
    for stage in StageKind::ALL {
        done = done.with_step_status(stage, StepStatus::Completed);
    }
    remote.set_snapshot(done);
    tokio::time::sleep(Duration::from_millis(100)).await;
    settle().await;
    let parked_at = remote.fetch_count();
    assert!(orch.statuses().iter().all(|(_, s)| s == StepStatus::Completed));

    tokio::time::sleep(Duration::from_secs(120)).await;
    settle().await;
    assert_eq!(remote.fetch_count(), parked_at);
    assert!(orch.is_polling());
    orch.shutdown();
}

#[tokio::test(start_paused = true)]
async fn no_poll_after_shutdown() {
    let remote = ScriptedRemote::shared(researched_presentation());
    let orch = orchestrator(&remote, fast_config());
    orch.start();
    settle().await;
    let before = remote.fetch_count();

    orch.shutdown();
    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;

    assert_eq!(remote.fetch_count(), before);
    assert!(!orch.is_polling());
    assert!(matches!(orch.poll_now().await, PollOutcome::Skipped(_)));
}

#[tokio::test(start_paused = true)]
async fn dropping_last_handle_stops_polling() {
    let remote = ScriptedRemote::shared(researched_presentation());
    let orch = orchestrator(&remote, fast_config());
    orch.start();
    settle().await;
    let before = remote.fetch_count();

    drop(orch);
    tokio::time::sleep(Duration::from_secs(30)).await;
    settle().await;
    assert_eq!(remote.fetch_count(), before);
}

#[tokio::test]
async fn failed_fetch_leaves_state_untouched() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.fail_next_fetch(RemoteError::Network("unreachable".into()));
    let orch = orchestrator(&remote, SyncConfig::default());
    remote.set_status(StageKind::Research, StepStatus::Completed);

    assert!(matches!(orch.poll_now().await, PollOutcome::Failed(_)));
    assert_eq!(orch.status(StageKind::Research), StepStatus::Pending);

    assert!(orch.poll_now().await.is_applied());
    assert_eq!(orch.status(StageKind::Research), StepStatus::Completed);
}

#[tokio::test]
async fn abandoned_fetch_does_not_block_later_polls() {
    let remote = ScriptedRemote::shared(sample_presentation());
    remote.hold_fetches();
    let orch = orchestrator(&remote, SyncConfig::default());

    let abandoned = tokio::time::timeout(Duration::from_millis(20), orch.poll_now()).await;
    assert!(abandoned.is_err());

    remote.release_fetches();
    remote.set_status(StageKind::Research, StepStatus::Completed);
    assert!(orch.poll_now().await.is_applied());
    assert_eq!(orch.status(StageKind::Research), StepStatus::Completed);
}

#[tokio::test]
async fn subscribers_see_reconciled_changes() {
    let remote = ScriptedRemote::shared(sample_presentation());
    let orch = orchestrator(&remote, SyncConfig::default());
    let (log, id) = EventLog::attach(&orch);
    remote.set_status(StageKind::Research, StepStatus::Processing);

    orch.poll_now().await;
    let events = log.events();
    assert!(events.contains(&ChangeEvent::StepChanged {
        stage: StageKind::Research,
        status: StepStatus::Processing
    }));
    assert!(matches!(events.last(), Some(ChangeEvent::SnapshotApplied { .. })));

    assert!(orch.unsubscribe(id));
    log.clear();
    remote.set_status(StageKind::Research, StepStatus::Completed);
    orch.poll_now().await;
    assert!(log.events().is_empty());
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn create_wraps_new_presentation() {
    let remote = Arc::new(ScriptedRemote::empty());
    let dyn_remote: Arc<dyn RemoteSync> = remote.clone();
    let orch = PipelineOrchestrator::create(
        dyn_remote,
        NewPresentation::new("Launch", "Product launch").with_author("Ada"),
        AdaptivePoller::new(),
        SyncConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(orch.id().as_str(), "created-1");
    let p = orch.presentation();
    assert_eq!((p.name.as_str(), p.author.as_str()), ("Launch", "Ada"));
    assert!(orch.statuses().iter().all(|(_, s)| s == StepStatus::Pending));
    assert!(orch.poll_now().await.is_applied());
}

#[tokio::test]
async fn open_missing_presentation_fails() {
    let remote: Arc<dyn RemoteSync> = Arc::new(ScriptedRemote::empty());
    let err = PipelineOrchestrator::open(
        remote,
        &"nope".into(),
        AdaptivePoller::new(),
        SyncConfig::default(),
    )
    .await
    .unwrap_err();
    assert!(matches!(
        err,
        OrchestratorError::Transport(RemoteError::NotFound(_))
    ));
}
