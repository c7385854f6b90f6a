//! Remote sync contract
//!
//! The orchestrator talks to the presentation service only through
//! [`RemoteSync`]. The HTTP implementation lives in `deckflow-remote`; tests
//! use `deckflow-test-utils::ScriptedRemote` or the generated mock.

use crate::error::RemoteError;
use async_trait::async_trait;
use deckflow_model::{
    NewPresentation, Presentation, PresentationId, ResearchResult, Slide, SlideId, StageKind,
    SuggestionPatch,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Stage-specific run parameters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunParameters(pub BTreeMap<String, serde_json::Value>);

impl RunParameters {
    /// Empty parameters
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With one parameter
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Parameter by key
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    /// No parameters
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Acknowledgement of a run request
///
/// Only means the service accepted the request; completion is observed by a
/// later fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunAck {
    /// Service-side job identifier, when reported
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
}

/// Body of a save call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SavePayload {
    /// Full slide sequence
    Slides {
        /// Slides in position order
        slides: Vec<Slide>,
    },
    /// Research document for the presentation's research stage
    Research {
        /// Stage the document belongs to
        stage: StageKind,
        /// Document
        result: ResearchResult,
    },
    /// Presentation-level attributes and slides
    Presentation {
        /// Display name
        name: String,
        /// Topic
        topic: String,
        /// Author
        author: String,
        /// Slides in position order
        slides: Vec<Slide>,
    },
}

impl SavePayload {
    /// Short label for logs
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            SavePayload::Slides { .. } => "slides",
            SavePayload::Research { .. } => "research",
            SavePayload::Presentation { .. } => "presentation",
        }
    }
}

/// Scope the interpretation service should aim for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", content = "slide_id", rename_all = "snake_case")]
pub enum ScopeHint {
    /// The user is looking at one slide
    Slide(SlideId),
    /// No slide selected
    Deck,
}

/// Natural-language edit request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterpretRequest {
    /// The user's instruction
    pub prompt: String,
    /// Where the edit should land
    pub scope_hint: ScopeHint,
}

impl InterpretRequest {
    /// New request
    #[inline]
    #[must_use]
    pub fn new(prompt: impl Into<String>, scope_hint: ScopeHint) -> Self {
        Self {
            prompt: prompt.into(),
            scope_hint,
        }
    }
}

/// Client for the presentation service
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteSync: Send + Sync {
    /// Fetch the full presentation snapshot
    async fn fetch_presentation(&self, id: &PresentationId) -> Result<Presentation, RemoteError>;

    /// Ask the service to start a stage
    async fn run_step(
        &self,
        id: &PresentationId,
        stage: StageKind,
        params: RunParameters,
    ) -> Result<RunAck, RemoteError>;

    /// Persist locally applied edits
    async fn save(&self, id: &PresentationId, payload: SavePayload) -> Result<(), RemoteError>;

    /// Turn a prompt into a scoped patch; `None` means no actionable change
    async fn interpret(
        &self,
        id: &PresentationId,
        request: InterpretRequest,
    ) -> Result<Option<SuggestionPatch>, RemoteError>;

    /// Create a new presentation
    async fn create_presentation(&self, new: NewPresentation) -> Result<Presentation, RemoteError>;
}
