//! Suggestion applier
//!
//! Merges a [`SuggestionPatch`] into local state and captures a [`Rollback`]
//! holding exactly the fields it replaced. No I/O happens here; the facade
//! persists the returned [`SavePayload`] and decides whether to roll back.

use crate::error::GatingError;
use crate::events::ChangeEvent;
use crate::remote::SavePayload;
use crate::status::StepStatusModel;
use deckflow_model::{
    renumber, PipelineStep, Presentation, PresentationPatch, Slide, SlideId, StageKind,
    StepResult, StepStatus, SuggestionPatch,
};

/// Result of merging a patch
#[derive(Debug, Clone, PartialEq)]
pub struct MergePlan {
    /// What to persist
    pub payload: SavePayload,
    /// How to undo the merge
    pub rollback: Rollback,
    /// What changed locally
    pub events: Vec<ChangeEvent>,
}

/// Fields replaced by a merge
#[derive(Debug, Clone, PartialEq)]
pub enum Rollback {
    /// One slide, as it was
    Slide(Slide),
    /// Slide sequence and selection
    Slides {
        /// Previous sequence
        slides: Vec<Slide>,
        /// Previous selection
        selected: Option<SlideId>,
    },
    /// Research step before and after the merge
    Research {
        /// Step as it was
        previous: PipelineStep,
        /// Step as the merge left it
        applied: PipelineStep,
    },
    /// Presentation attributes; `slides` only if the patch replaced them
    Presentation {
        /// Previous name
        name: String,
        /// Previous topic
        topic: String,
        /// Previous author
        author: String,
        /// Previous sequence and selection
        slides: Option<(Vec<Slide>, Option<SlideId>)>,
    },
}

impl Rollback {
    /// Restore the captured fields
    pub fn restore(
        self,
        presentation: &mut Presentation,
        selected: &mut Option<SlideId>,
    ) -> Vec<ChangeEvent> {
        match self {
            Rollback::Slide(original) => {
                match presentation.slides.iter_mut().find(|s| s.id == original.id) {
                    Some(slide) => {
                        *slide = original;
                        vec![ChangeEvent::SlidesChanged]
                    }
                    None => Vec::new(),
                }
            }
            Rollback::Slides { slides, selected: previous } => {
                presentation.slides = slides;
                restore_selection(selected, previous)
            }
            Rollback::Research { previous, applied } => {
                // A re-run started since the merge owns the step now
                if presentation.steps.get(&applied.kind) != Some(&applied) {
                    return Vec::new();
                }
                let (kind, status) = (previous.kind, previous.status);
                presentation.steps.insert(kind, previous);
                vec![ChangeEvent::StepChanged {
                    stage: kind,
                    status,
                }]
            }
            Rollback::Presentation {
                name,
                topic,
                author,
                slides,
            } => {
                presentation.name = name;
                presentation.topic = topic;
                presentation.author = author;
                match slides {
                    Some((slides, previous)) => {
                        presentation.slides = slides;
                        restore_selection(selected, previous)
                    }
                    None => Vec::new(),
                }
            }
        }
    }
}

fn restore_selection(selected: &mut Option<SlideId>, previous: Option<SlideId>) -> Vec<ChangeEvent> {
    let mut events = vec![ChangeEvent::SlidesChanged];
    if *selected != previous {
        *selected = previous;
        events.push(ChangeEvent::SelectionChanged(selected.clone()));
    }
    events
}

/// Merge `patch` into `presentation`
///
/// Fails without touching anything if a single-slide patch names an unknown
/// slide.
pub fn merge(
    presentation: &mut Presentation,
    selected: &mut Option<SlideId>,
    patch: &SuggestionPatch,
) -> Result<MergePlan, GatingError> {
    match patch {
        SuggestionPatch::SingleSlide { slide_id, patch } => {
            let slide = presentation
                .slides
                .iter_mut()
                .find(|s| &s.id == slide_id)
                .ok_or_else(|| GatingError::UnknownSlide(slide_id.clone()))?;
            let original = slide.clone();
            *slide = patch.merged_onto(&original);
            Ok(MergePlan {
                payload: SavePayload::Slides {
                    slides: presentation.slides.clone(),
                },
                rollback: Rollback::Slide(original),
                events: vec![ChangeEvent::SlidesChanged],
            })
        }
        SuggestionPatch::AllSlides { slides } => {
            let previous_selection = selected.clone();
            let previous = replace_slides(presentation, slides.clone());
            let mut events = vec![ChangeEvent::SlidesChanged];
            events.extend(follow(presentation, selected));
            Ok(MergePlan {
                payload: SavePayload::Slides {
                    slides: presentation.slides.clone(),
                },
                rollback: Rollback::Slides {
                    slides: previous,
                    selected: previous_selection,
                },
                events,
            })
        }
        SuggestionPatch::Research { result } => {
            let stage = presentation.research_method.research_stage();
            let original = presentation
                .step(stage)
                .cloned()
                .unwrap_or_else(|| PipelineStep::pending(stage));
            presentation.set_status(
                stage,
                StepStatus::Completed,
                Some(StepResult::Research(result.clone())),
            );
            let applied = presentation
                .step(stage)
                .cloned()
                .unwrap_or_else(|| PipelineStep::pending(stage));
            Ok(MergePlan {
                payload: SavePayload::Research {
                    stage,
                    result: result.clone(),
                },
                rollback: Rollback::Research {
                    previous: original,
                    applied,
                },
                events: research_events(stage),
            })
        }
        SuggestionPatch::Presentation(patch) => Ok(merge_presentation(presentation, selected, patch)),
    }
}

fn research_events(stage: StageKind) -> Vec<ChangeEvent> {
    vec![ChangeEvent::StepChanged {
        stage,
        status: StepStatus::Completed,
    }]
}

fn merge_presentation(
    presentation: &mut Presentation,
    selected: &mut Option<SlideId>,
    patch: &PresentationPatch,
) -> MergePlan {
    let mut events = Vec::new();
    let name = patch.name.clone().unwrap_or_else(|| presentation.name.clone());
    let topic = patch.topic.clone().unwrap_or_else(|| presentation.topic.clone());
    let author = patch.author.clone().unwrap_or_else(|| presentation.author.clone());
    let name = std::mem::replace(&mut presentation.name, name);
    let topic = std::mem::replace(&mut presentation.topic, topic);
    let author = std::mem::replace(&mut presentation.author, author);
    let slides = patch.slides.as_ref().map(|slides| {
        let previous_selection = selected.clone();
        let previous = replace_slides(presentation, slides.clone());
        events.push(ChangeEvent::SlidesChanged);
        events.extend(follow(presentation, selected));
        (previous, previous_selection)
    });
    MergePlan {
        payload: SavePayload::Presentation {
            name: presentation.name.clone(),
            topic: presentation.topic.clone(),
            author: presentation.author.clone(),
            slides: presentation.slides.clone(),
        },
        rollback: Rollback::Presentation {
            name,
            topic,
            author,
            slides,
        },
        events,
    }
}

/// Swap in a new sequence with contiguous positions; returns the old one
fn replace_slides(presentation: &mut Presentation, mut slides: Vec<Slide>) -> Vec<Slide> {
    renumber(&mut slides);
    std::mem::replace(&mut presentation.slides, slides)
}

/// Selection follows its id if still present, else the first slide
fn follow(presentation: &Presentation, selected: &mut Option<SlideId>) -> Option<ChangeEvent> {
    let current = selected.as_ref()?;
    if presentation.contains_slide(current) {
        return None;
    }
    *selected = presentation.slides.first().map(|s| s.id.clone());
    Some(ChangeEvent::SelectionChanged(selected.clone()))
}
