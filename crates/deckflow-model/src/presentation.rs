//! Presentation aggregate root

use crate::slide::{Slide, SlideId};
use crate::stage::{StageKind, StepStatus};
use crate::step::{PipelineStep, ResearchResult, StepResult};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Presentation identifier assigned by the remote service
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PresentationId(pub String);

impl PresentationId {
    /// Create id
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PresentationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PresentationId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for PresentationId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// How the research document is produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResearchMethod {
    /// Generated by the `research` stage
    #[default]
    Ai,
    /// Supplied by the user through `manual_research`
    Manual,
}

impl ResearchMethod {
    /// Stage that owns the research document for this method
    #[inline]
    #[must_use]
    pub fn research_stage(&self) -> StageKind {
        match self {
            ResearchMethod::Ai => StageKind::Research,
            ResearchMethod::Manual => StageKind::ManualResearch,
        }
    }
}

/// The aggregate root: one presentation and its pipeline
///
/// Steps are keyed by stage kind, so a presentation never holds two steps of
/// the same kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Presentation {
    /// Identifier
    pub id: PresentationId,
    /// Display name
    pub name: String,
    /// Topic the deck is about
    pub topic: String,
    /// Author shown on the title slide
    pub author: String,
    /// Chosen research method
    pub research_method: ResearchMethod,
    /// Slides in position order
    pub slides: Vec<Slide>,
    /// One step per stage kind
    pub steps: BTreeMap<StageKind, PipelineStep>,
    /// Creation time reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Presentation {
    /// Empty presentation with every stage pending
    #[must_use]
    pub fn new(id: impl Into<PresentationId>, name: impl Into<String>) -> Self {
        let steps = StageKind::ALL
            .iter()
            .map(|kind| (*kind, PipelineStep::pending(*kind)))
            .collect();
        Self {
            id: id.into(),
            name: name.into(),
            topic: String::new(),
            author: String::new(),
            research_method: ResearchMethod::default(),
            slides: Vec::new(),
            steps,
            created_at: None,
        }
    }

    /// With topic
    #[inline]
    #[must_use]
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// With research method
    #[inline]
    #[must_use]
    pub fn with_research_method(mut self, method: ResearchMethod) -> Self {
        self.research_method = method;
        self
    }

    /// With slides; positions are renumbered in sequence order
    #[inline]
    #[must_use]
    pub fn with_slides(mut self, mut slides: Vec<Slide>) -> Self {
        crate::slide::renumber(&mut slides);
        self.slides = slides;
        self
    }

    /// With step status, keeping any existing result
    #[must_use]
    pub fn with_step_status(mut self, kind: StageKind, status: StepStatus) -> Self {
        self.steps
            .entry(kind)
            .or_insert_with(|| PipelineStep::pending(kind))
            .status = status;
        self
    }

    /// Status of `kind`; absent steps read as pending
    #[inline]
    #[must_use]
    pub fn status(&self, kind: StageKind) -> StepStatus {
        self.steps
            .get(&kind)
            .map_or(StepStatus::Pending, |s| s.status)
    }

    /// Slide by id
    #[inline]
    #[must_use]
    pub fn slide(&self, id: &SlideId) -> Option<&Slide> {
        self.slides.iter().find(|s| &s.id == id)
    }

    /// Whether a slide with `id` exists
    #[inline]
    #[must_use]
    pub fn contains_slide(&self, id: &SlideId) -> bool {
        self.slide(id).is_some()
    }

    /// Research document, from the step matching the research method
    #[must_use]
    pub fn research(&self) -> Option<&ResearchResult> {
        self.steps
            .get(&self.research_method.research_stage())
            .and_then(|s| s.result.as_research())
    }

    /// Replace a step's result and status
    pub fn set_step(&mut self, kind: StageKind, status: StepStatus, result: StepResult) {
        let step = self
            .steps
            .entry(kind)
            .or_insert_with(|| PipelineStep::pending(kind));
        step.status = status;
        step.result = result;
        if status != StepStatus::Error {
            step.error_message = None;
        }
    }
}

/// Parameters for the remote "create" call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPresentation {
    /// Display name
    pub name: String,
    /// Topic
    pub topic: String,
    /// Author
    #[serde(default)]
    pub author: String,
    /// Research method
    #[serde(default)]
    pub research_method: ResearchMethod,
}

impl NewPresentation {
    /// Create request for an AI-researched deck
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, topic: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            topic: topic.into(),
            author: String::new(),
            research_method: ResearchMethod::Ai,
        }
    }

    /// With author
    #[inline]
    #[must_use]
    pub fn with_author(mut self, author: impl Into<String>) -> Self {
        self.author = author.into();
        self
    }

    /// With research method
    #[inline]
    #[must_use]
    pub fn with_research_method(mut self, method: ResearchMethod) -> Self {
        self.research_method = method;
        self
    }
}
