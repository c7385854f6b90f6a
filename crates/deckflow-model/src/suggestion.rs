//! Wizard suggestions: scoped, not-yet-committed patches

use crate::slide::{Slide, SlideId, SlidePatch};
use crate::step::ResearchResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use ulid::Ulid;

/// Suggestion identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SuggestionId(pub Ulid);

impl SuggestionId {
    /// Generate new suggestion ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for SuggestionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SuggestionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What a suggestion applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionScope {
    /// One slide
    SingleSlide,
    /// The whole slide sequence
    AllSlides,
    /// The research document
    Research,
    /// Presentation-level attributes and/or slide set
    Presentation,
}

impl SuggestionScope {
    /// Wire name of the scope
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionScope::SingleSlide => "single_slide",
            SuggestionScope::AllSlides => "all_slides",
            SuggestionScope::Research => "research",
            SuggestionScope::Presentation => "presentation",
        }
    }
}

impl fmt::Display for SuggestionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Presentation-level patch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PresentationPatch {
    /// New display name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// New topic
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
    /// New author
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    /// New slide sequence (e.g. slides added or removed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub slides: Option<Vec<Slide>>,
}

impl PresentationPatch {
    /// No field present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.topic.is_none() && self.author.is_none() && self.slides.is_none()
    }
}

/// Scope-specific patch proposed by the interpretation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum SuggestionPatch {
    /// Shallow-merge `patch` into the slide `slide_id`
    SingleSlide {
        /// Target slide
        slide_id: SlideId,
        /// Fields to replace
        patch: SlidePatch,
    },
    /// Replace the slide sequence
    AllSlides {
        /// New sequence
        slides: Vec<Slide>,
    },
    /// Replace the research document
    Research {
        /// New document
        result: ResearchResult,
    },
    /// Replace presentation-level attributes and/or slides
    Presentation(PresentationPatch),
}

impl SuggestionPatch {
    /// Scope of this patch
    #[inline]
    #[must_use]
    pub fn scope(&self) -> SuggestionScope {
        match self {
            SuggestionPatch::SingleSlide { .. } => SuggestionScope::SingleSlide,
            SuggestionPatch::AllSlides { .. } => SuggestionScope::AllSlides,
            SuggestionPatch::Research { .. } => SuggestionScope::Research,
            SuggestionPatch::Presentation(_) => SuggestionScope::Presentation,
        }
    }

    /// Whether applying the patch would change nothing
    #[must_use]
    pub fn is_noop(&self) -> bool {
        match self {
            SuggestionPatch::SingleSlide { patch, .. } => patch.is_empty(),
            SuggestionPatch::Presentation(patch) => patch.is_empty(),
            SuggestionPatch::AllSlides { .. } | SuggestionPatch::Research { .. } => false,
        }
    }
}

/// Lifecycle of a suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionState {
    /// Proposed, not yet applied
    Pending,
    /// Merged and persisted
    Applied,
    /// Discarded by the user or superseded
    Dismissed,
}

/// A pending proposal produced by the interpretation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WizardSuggestion {
    /// Identity, used for idempotent application
    pub id: SuggestionId,
    /// Prompt that produced this suggestion
    pub prompt: String,
    /// The proposed patch
    pub patch: SuggestionPatch,
    /// Lifecycle state
    pub state: SuggestionState,
}

impl WizardSuggestion {
    /// New pending suggestion
    #[inline]
    #[must_use]
    pub fn new(prompt: impl Into<String>, patch: SuggestionPatch) -> Self {
        Self {
            id: SuggestionId::new(),
            prompt: prompt.into(),
            patch,
            state: SuggestionState::Pending,
        }
    }

    /// Scope of the patch
    #[inline]
    #[must_use]
    pub fn scope(&self) -> SuggestionScope {
        self.patch.scope()
    }

    /// Still awaiting apply or dismiss
    #[inline]
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.state == SuggestionState::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn patch_scope() {
        let patch = SuggestionPatch::SingleSlide {
            slide_id: SlideId::from(7u64),
            patch: SlidePatch::title("New"),
        };
        assert_eq!(patch.scope(), SuggestionScope::SingleSlide);
        assert!(!patch.is_noop());

        let empty = SuggestionPatch::Presentation(PresentationPatch::default());
        assert!(empty.is_noop());
    }

    #[test]
    fn new_suggestion_is_pending() {
        let s = WizardSuggestion::new(
            "shorter",
            SuggestionPatch::AllSlides { slides: Vec::new() },
        );
        assert!(s.is_pending());
        assert_eq!(s.scope(), SuggestionScope::AllSlides);
    }

    #[test]
    fn patch_serializes_with_scope_tag() {
        let patch = SuggestionPatch::Research {
            result: ResearchResult::new("doc"),
        };
        let json = serde_json::to_value(&patch).unwrap();
        assert_eq!(json["scope"], "research");
        assert_eq!(json["result"]["text"], "doc");
    }
}
