//! Deckflow Model
//!
//! Strongly typed data model for the presentation generation pipeline.
//!
//! # Core Concepts
//!
//! - [`Presentation`]: Aggregate root holding slides and one step per stage
//! - [`StageKind`] / [`StepStatus`]: Pipeline stages and their states
//! - [`StepResult`]: Result payload, a tagged union keyed by stage kind
//! - [`Slide`]: Slide record with structured content blocks
//! - [`WizardSuggestion`]: Scoped, not-yet-committed patch
//! - [`coerce`]: Total conversion of loosely typed remote snapshots
//!
//! # Example
//!
//! ```rust,ignore
//! use deckflow_model::{coerce, PresentationId, StageKind};
//!
//! let snapshot: serde_json::Value = fetch_somehow();
//! let presentation = coerce::presentation(&snapshot, &PresentationId::from("p-1"));
//! println!("slides: {}", presentation.status(StageKind::Slides));
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
mod presentation;
mod slide;
mod stage;
mod step;
mod suggestion;

/// Lenient coercion of remote payloads
pub mod coerce;

// Re-exports
pub use presentation::{NewPresentation, Presentation, PresentationId, ResearchMethod};
pub use slide::{
    normalize_positions, renumber, ContentBlock, Slide, SlideId, SlideLayout, SlidePatch,
};
pub use stage::{StageKind, StepStatus, UnknownStage};
pub use step::{Citation, PipelineStep, ResearchResult, StepResult};
pub use suggestion::{
    PresentationPatch, SuggestionId, SuggestionPatch, SuggestionScope, SuggestionState,
    WizardSuggestion,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
