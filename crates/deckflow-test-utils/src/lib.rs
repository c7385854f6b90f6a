//! Testing utilities for Deckflow workspace
//!
//! Shared fixtures, a scriptable in-memory remote and an event recorder.

#![allow(missing_docs)]

use async_trait::async_trait;
use deckflow_core::{
    ChangeEvent, InterpretRequest, PipelineOrchestrator, RemoteError, RemoteSync, RunAck,
    RunParameters, SavePayload, SubscriptionId, SyncConfig,
};
use deckflow_model::{
    ContentBlock, NewPresentation, Presentation, PresentationId, ResearchResult, Slide,
    StageKind, StepResult, StepStatus, SuggestionPatch,
};
use parking_lot::Mutex;
use serde_json::json;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

pub const DECK_ID: &str = "deck-1";

/// Three-slide deck; slide "7" is titled "Old" with two bullets
pub fn sample_presentation() -> Presentation {
    Presentation::new(DECK_ID, "Quarterly Review")
        .with_topic("Q3 results")
        .with_slides(vec![
            Slide::new("6", "Intro"),
            Slide::new("7", "Old").with_content(vec![
                ContentBlock::bullet("revenue up"),
                ContentBlock::bullet("costs flat"),
            ]),
            Slide::new("8", "Outro"),
        ])
}

/// Sample deck with research completed
pub fn researched_presentation() -> Presentation {
    let mut p = sample_presentation();
    p.set_step(
        StageKind::Research,
        StepStatus::Completed,
        StepResult::Research(ResearchResult::new("findings")),
    );
    p
}

/// Wire-shaped snapshot of the sample deck, with the usual inconsistencies
pub fn sample_snapshot_json() -> serde_json::Value {
    json!({
        "id": DECK_ID,
        "name": "Quarterly Review",
        "topic": "Q3 results",
        "research_method": "ai",
        "slides": [
            {"id": 6, "title": "Intro", "position": 0},
            {"id": "7", "title": "Old", "content": "- revenue up\n- costs flat", "position": 1},
            {"id": "8", "title": "Outro", "position": 2, "layout": "title"}
        ],
        "steps": [
            {"step_type": "research", "status": "completed", "result": {"text": "findings"}},
            {"step_type": "slides", "status": "processing"}
        ]
    })
}

/// Small intervals and budgets for paused-clock tests
pub fn fast_config() -> SyncConfig {
    SyncConfig::default()
        .with_short_interval(Duration::from_millis(100))
        .with_long_interval(Duration::from_millis(1000))
        .with_save_timeout(Duration::from_millis(500))
}

/// A gate that tasks wait on while closed
#[derive(Debug)]
struct Gate(watch::Sender<bool>);

impl Gate {
    fn open() -> Self {
        Self(watch::channel(true).0)
    }

    fn set(&self, open: bool) {
        self.0.send_replace(open);
    }

    async fn pass(&self) {
        let mut rx = self.0.subscribe();
        // Sender lives as long as self, so this cannot fail
        let _ = rx.wait_for(|open| *open).await;
    }
}

#[derive(Debug, Default)]
struct Script {
    snapshot: Option<Presentation>,
    fetches: usize,
    runs: Vec<(StageKind, RunParameters)>,
    saves: Vec<SavePayload>,
    interprets: Vec<InterpretRequest>,
    interpretations: VecDeque<Option<SuggestionPatch>>,
    run_failures: HashMap<StageKind, RemoteError>,
    never_ack: HashSet<StageKind>,
    save_failures: VecDeque<RemoteError>,
    fetch_failures: VecDeque<RemoteError>,
    created: usize,
}

/// In-memory [`RemoteSync`] driven by the test
///
/// - `fetch_presentation` returns the current snapshot, captured when the
///   call starts
/// - Accepted runs mark the stage processing in the snapshot
/// - Successful saves are mirrored into the snapshot
#[derive(Debug)]
pub struct ScriptedRemote {
    script: Mutex<Script>,
    fetch_gate: Gate,
    save_gate: Gate,
}

impl ScriptedRemote {
    pub fn new(snapshot: Presentation) -> Self {
        Self {
            script: Mutex::new(Script {
                snapshot: Some(snapshot),
                ..Script::default()
            }),
            fetch_gate: Gate::open(),
            save_gate: Gate::open(),
        }
    }

    /// Remote with no presentation; fetches report not found
    pub fn empty() -> Self {
        Self {
            script: Mutex::new(Script::default()),
            fetch_gate: Gate::open(),
            save_gate: Gate::open(),
        }
    }

    pub fn shared(snapshot: Presentation) -> Arc<Self> {
        Arc::new(Self::new(snapshot))
    }

    pub fn snapshot(&self) -> Option<Presentation> {
        self.script.lock().snapshot.clone()
    }

    pub fn set_snapshot(&self, snapshot: Presentation) {
        self.script.lock().snapshot = Some(snapshot);
    }

    /// Mutate the remote snapshot in place
    pub fn update(&self, f: impl FnOnce(&mut Presentation)) {
        if let Some(p) = self.script.lock().snapshot.as_mut() {
            f(p);
        }
    }

    /// Set a stage's remote status
    pub fn set_status(&self, stage: StageKind, status: StepStatus) {
        self.update(|p| {
            *p = p.clone().with_step_status(stage, status);
        });
    }

    pub fn queue_interpretation(&self, patch: Option<SuggestionPatch>) {
        self.script.lock().interpretations.push_back(patch);
    }

    pub fn fail_run(&self, stage: StageKind, error: RemoteError) {
        self.script.lock().run_failures.insert(stage, error);
    }

    /// Runs of `stage` are never acknowledged
    pub fn never_ack(&self, stage: StageKind) {
        self.script.lock().never_ack.insert(stage);
    }

    pub fn fail_next_save(&self, error: RemoteError) {
        self.script.lock().save_failures.push_back(error);
    }

    pub fn fail_next_fetch(&self, error: RemoteError) {
        self.script.lock().fetch_failures.push_back(error);
    }

    /// Block saves until `release_saves`
    pub fn hold_saves(&self) {
        self.save_gate.set(false);
    }

    pub fn release_saves(&self) {
        self.save_gate.set(true);
    }

    /// Block fetches until `release_fetches`
    pub fn hold_fetches(&self) {
        self.fetch_gate.set(false);
    }

    pub fn release_fetches(&self) {
        self.fetch_gate.set(true);
    }

    pub fn fetch_count(&self) -> usize {
        self.script.lock().fetches
    }

    pub fn runs(&self) -> Vec<(StageKind, RunParameters)> {
        self.script.lock().runs.clone()
    }

    pub fn saves(&self) -> Vec<SavePayload> {
        self.script.lock().saves.clone()
    }

    pub fn interprets(&self) -> Vec<InterpretRequest> {
        self.script.lock().interprets.clone()
    }
}

#[async_trait]
impl RemoteSync for ScriptedRemote {
    async fn fetch_presentation(&self, id: &PresentationId) -> Result<Presentation, RemoteError> {
        let captured = {
            let mut script = self.script.lock();
            script.fetches += 1;
            match script.fetch_failures.pop_front() {
                Some(error) => Err(error),
                None => script
                    .snapshot
                    .clone()
                    .ok_or_else(|| RemoteError::NotFound(id.to_string())),
            }
        };
        self.fetch_gate.pass().await;
        captured
    }

    async fn run_step(
        &self,
        _id: &PresentationId,
        stage: StageKind,
        params: RunParameters,
    ) -> Result<RunAck, RemoteError> {
        let (failure, hang) = {
            let mut script = self.script.lock();
            script.runs.push((stage, params));
            (
                script.run_failures.get(&stage).cloned(),
                script.never_ack.contains(&stage),
            )
        };
        if hang {
            std::future::pending::<()>().await;
        }
        if let Some(error) = failure {
            return Err(error);
        }
        self.set_status(stage, StepStatus::Processing);
        Ok(RunAck {
            job_id: Some(format!("job-{stage}")),
        })
    }

    async fn save(&self, _id: &PresentationId, payload: SavePayload) -> Result<(), RemoteError> {
        self.script.lock().saves.push(payload.clone());
        self.save_gate.pass().await;
        let mut script = self.script.lock();
        if let Some(error) = script.save_failures.pop_front() {
            return Err(error);
        }
        if let Some(p) = script.snapshot.as_mut() {
            mirror_save(p, payload);
        }
        Ok(())
    }

    async fn interpret(
        &self,
        _id: &PresentationId,
        request: InterpretRequest,
    ) -> Result<Option<SuggestionPatch>, RemoteError> {
        let mut script = self.script.lock();
        script.interprets.push(request);
        Ok(script.interpretations.pop_front().flatten())
    }

    async fn create_presentation(&self, new: NewPresentation) -> Result<Presentation, RemoteError> {
        let mut script = self.script.lock();
        script.created += 1;
        let mut p = Presentation::new(format!("created-{}", script.created), new.name)
            .with_topic(new.topic)
            .with_research_method(new.research_method);
        p.author = new.author;
        script.snapshot = Some(p.clone());
        Ok(p)
    }
}

fn mirror_save(p: &mut Presentation, payload: SavePayload) {
    match payload {
        SavePayload::Slides { slides } => p.slides = slides,
        SavePayload::Research { stage, result } => {
            p.set_step(stage, StepStatus::Completed, StepResult::Research(result));
        }
        SavePayload::Presentation {
            name,
            topic,
            author,
            slides,
        } => {
            p.name = name;
            p.topic = topic;
            p.author = author;
            p.slides = slides;
        }
    }
}

/// Records every event delivered to a subscriber
#[derive(Debug, Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<ChangeEvent>>>,
}

impl EventLog {
    /// Subscribe a new log to `orch`
    pub fn attach(orch: &PipelineOrchestrator) -> (Self, SubscriptionId) {
        let log = Self::default();
        let sink = Arc::clone(&log.events);
        let id = orch.subscribe(move |event| sink.lock().push(event.clone()));
        (log, id)
    }

    pub fn events(&self) -> Vec<ChangeEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self, pred: impl Fn(&ChangeEvent) -> bool) -> usize {
        self.events.lock().iter().filter(|e| pred(e)).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

/// Let spawned tasks run to their next suspension point
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}
