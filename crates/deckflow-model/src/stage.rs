//! Pipeline stage kinds and step statuses
//!
//! The pipeline is a fixed sequence of stages:
//! research / manual research → slides → illustration → compiled → pptx

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One phase of the generation pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    /// AI-driven research document
    Research,
    /// User-supplied research (alternate entry point)
    ManualResearch,
    /// Slide authoring
    Slides,
    /// Image generation for slides
    Illustration,
    /// Server-side compilation, driven by illustration completing
    Compiled,
    /// PowerPoint export
    Pptx,
}

impl StageKind {
    /// Every stage kind, in pipeline order
    pub const ALL: [StageKind; 6] = [
        StageKind::Research,
        StageKind::ManualResearch,
        StageKind::Slides,
        StageKind::Illustration,
        StageKind::Compiled,
        StageKind::Pptx,
    ];

    /// Wire name of the stage
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Research => "research",
            StageKind::ManualResearch => "manual_research",
            StageKind::Slides => "slides",
            StageKind::Illustration => "illustration",
            StageKind::Compiled => "compiled",
            StageKind::Pptx => "pptx",
        }
    }

    /// Whether the client may issue a run request for this stage
    ///
    /// `compiled` is only ever observed; the remote service advances it.
    #[inline]
    #[must_use]
    pub fn is_runnable(&self) -> bool {
        !matches!(self, StageKind::Compiled)
    }

    /// Whether this stage produces the research document
    #[inline]
    #[must_use]
    pub fn is_research(&self) -> bool {
        matches!(self, StageKind::Research | StageKind::ManualResearch)
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown stage name
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown stage: '{0}'")]
pub struct UnknownStage(pub String);

impl FromStr for StageKind {
    type Err = UnknownStage;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "research" => Ok(StageKind::Research),
            "manual_research" => Ok(StageKind::ManualResearch),
            "slides" => Ok(StageKind::Slides),
            "illustration" => Ok(StageKind::Illustration),
            "compiled" => Ok(StageKind::Compiled),
            "pptx" => Ok(StageKind::Pptx),
            _ => Err(UnknownStage(s.to_string())),
        }
    }
}

/// Status of one pipeline step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Not started
    #[default]
    Pending,
    /// Running on the remote service
    Processing,
    /// Finished successfully
    Completed,
    /// Finished with a failure
    Error,
}

impl StepStatus {
    /// Every status value
    pub const ALL: [StepStatus; 4] = [
        StepStatus::Pending,
        StepStatus::Processing,
        StepStatus::Completed,
        StepStatus::Error,
    ];

    /// Settled: completed or error
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, StepStatus::Completed | StepStatus::Error)
    }

    /// Wire name of the status
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            StepStatus::Pending => "pending",
            StepStatus::Processing => "processing",
            StepStatus::Completed => "completed",
            StepStatus::Error => "error",
        }
    }

    /// Lenient parse used for remote snapshots
    ///
    /// Unknown values read as `Pending`. A few synonyms the service has used
    /// over time are accepted.
    #[must_use]
    pub fn from_wire(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "processing" | "running" | "in_progress" => StepStatus::Processing,
            "completed" | "complete" | "done" | "success" => StepStatus::Completed,
            "error" | "failed" | "failure" => StepStatus::Error,
            _ => StepStatus::Pending,
        }
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
