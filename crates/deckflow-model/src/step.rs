//! Pipeline steps and their typed result payloads

use crate::slide::SlideId;
use crate::stage::{StageKind, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Source cited by the research document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    /// Source title
    pub title: String,
    /// Source URL
    pub url: String,
}

impl Citation {
    /// Create new citation
    #[inline]
    #[must_use]
    pub fn new(title: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            url: url.into(),
        }
    }
}

/// Research document produced by `research` or `manual_research`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResearchResult {
    /// Document body
    pub text: String,
    /// Cited sources
    #[serde(default)]
    pub citations: Vec<Citation>,
}

impl ResearchResult {
    /// Create research result without citations
    #[inline]
    #[must_use]
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            citations: Vec::new(),
        }
    }

    /// With citations
    #[inline]
    #[must_use]
    pub fn with_citations(mut self, citations: Vec<Citation>) -> Self {
        self.citations = citations;
        self
    }
}

/// Result payload of a step, keyed by stage kind
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepResult {
    /// Nothing produced yet
    #[default]
    Empty,
    /// Research document
    Research(ResearchResult),
    /// Slide generation summary; slides live on the presentation
    Slides {
        /// Number of slides produced
        slide_count: usize,
    },
    /// Generated images per slide
    Illustration {
        /// Image URL per slide id
        images: BTreeMap<SlideId, String>,
    },
    /// Compiled document
    Compiled {
        /// Location of the compiled document
        document_url: Option<String>,
    },
    /// Exported PowerPoint file
    Export {
        /// Download location
        download_url: Option<String>,
    },
}

impl StepResult {
    /// Research payload if this is one
    #[inline]
    #[must_use]
    pub fn as_research(&self) -> Option<&ResearchResult> {
        match self {
            StepResult::Research(r) => Some(r),
            _ => None,
        }
    }

    /// Whether this payload shape belongs to `stage`
    ///
    /// `Empty` fits every stage.
    #[must_use]
    pub fn fits(&self, stage: StageKind) -> bool {
        match self {
            StepResult::Empty => true,
            StepResult::Research(_) => stage.is_research(),
            StepResult::Slides { .. } => stage == StageKind::Slides,
            StepResult::Illustration { .. } => stage == StageKind::Illustration,
            StepResult::Compiled { .. } => stage == StageKind::Compiled,
            StepResult::Export { .. } => stage == StageKind::Pptx,
        }
    }
}

/// Status and result of one pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineStep {
    /// Stage this step represents
    pub kind: StageKind,
    /// Current status
    pub status: StepStatus,
    /// Result payload
    #[serde(default)]
    pub result: StepResult,
    /// Failure reason reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    /// Last update time reported by the service
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl PipelineStep {
    /// Pending step with no result
    #[inline]
    #[must_use]
    pub fn pending(kind: StageKind) -> Self {
        Self {
            kind,
            status: StepStatus::Pending,
            result: StepResult::Empty,
            error_message: None,
            updated_at: None,
        }
    }

    /// With status
    #[inline]
    #[must_use]
    pub fn with_status(mut self, status: StepStatus) -> Self {
        self.status = status;
        self
    }

    /// With result
    #[inline]
    #[must_use]
    pub fn with_result(mut self, result: StepResult) -> Self {
        self.result = result;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn result_shape_matches_stage() {
        let research = StepResult::Research(ResearchResult::new("body"));
        assert!(research.fits(StageKind::Research));
        assert!(research.fits(StageKind::ManualResearch));
        assert!(!research.fits(StageKind::Slides));
        assert!(StepResult::Empty.fits(StageKind::Pptx));
        assert!(StepResult::Export { download_url: None }.fits(StageKind::Pptx));
    }

    #[test]
    fn step_builder() {
        let step = PipelineStep::pending(StageKind::Slides)
            .with_status(StepStatus::Completed)
            .with_result(StepResult::Slides { slide_count: 4 });
        assert_eq!(step.status, StepStatus::Completed);
        assert!(step.result.fits(step.kind));
    }
}
