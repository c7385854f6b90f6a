//! Defensive coercion of remote snapshots
//!
//! Remote payloads are loosely typed and occasionally malformed. Everything in
//! this module is total: missing or mistyped fields become safe defaults, so
//! consumers always see fully populated values.
//!
//! - Numbers and numeric strings are interchangeable
//! - Slide bodies may be a string, an array of strings or an array of blocks
//! - Steps may be an array of records or an object keyed by stage name
//! - Slide positions are renumbered to be contiguous; duplicate ids are replaced

use crate::presentation::{Presentation, PresentationId, ResearchMethod};
use crate::slide::{normalize_positions, ContentBlock, Slide, SlideId, SlideLayout, SlidePatch};
use crate::stage::{StageKind, StepStatus};
use crate::step::{Citation, PipelineStep, ResearchResult, StepResult};
use crate::suggestion::{PresentationPatch, SuggestionPatch};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::sync::OnceLock;

fn bullet_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^(\s*)(?:[-*•]|\d+[.)])\s+(.*)$").expect("bullet pattern is valid")
    })
}

/// First present key among `keys`
fn field<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()))
}

/// String-ish value: strings as-is, numbers and bools stringified
fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty_text(value: Option<&Value>) -> Option<String> {
    text(value).filter(|s| !s.trim().is_empty())
}

fn unsigned(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn timestamp(value: Option<&Value>) -> Option<DateTime<Utc>> {
    let raw = text(value)?;
    DateTime::parse_from_rfc3339(&raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Split a text body into paragraph and bullet blocks
#[must_use]
pub fn blocks_from_text(body: &str) -> Vec<ContentBlock> {
    body.lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| match bullet_pattern().captures(line) {
            Some(caps) => {
                let indent = caps.get(1).map_or(0, |m| m.as_str().len());
                ContentBlock::Bullet {
                    text: caps.get(2).map_or("", |m| m.as_str()).trim().to_string(),
                    level: u8::try_from(indent / 2).unwrap_or(u8::MAX),
                }
            }
            None => ContentBlock::paragraph(line.trim()),
        })
        .collect()
}

fn block(value: &Value) -> Option<ContentBlock> {
    match value {
        Value::String(s) if !s.trim().is_empty() => blocks_from_text(s).into_iter().next(),
        Value::Object(obj) => {
            let body = text(field(obj, &["text", "content", "value"]))?;
            let kind = text(field(obj, &["type", "kind"])).unwrap_or_default();
            if kind.eq_ignore_ascii_case("bullet") || kind.eq_ignore_ascii_case("list_item") {
                let level = unsigned(field(obj, &["level", "indent"])).unwrap_or(0);
                Some(ContentBlock::Bullet {
                    text: body,
                    level: u8::try_from(level).unwrap_or(u8::MAX),
                })
            } else {
                Some(ContentBlock::paragraph(body))
            }
        }
        _ => None,
    }
}

/// Content blocks from any of the shapes the service produces
#[must_use]
pub fn content_blocks(value: Option<&Value>) -> Vec<ContentBlock> {
    match value {
        Some(Value::String(s)) => blocks_from_text(s),
        Some(Value::Array(items)) => items
            .iter()
            .flat_map(|item| match item {
                Value::String(s) if s.contains('\n') => blocks_from_text(s),
                other => block(other).into_iter().collect(),
            })
            .collect(),
        Some(other) => block(other).into_iter().collect(),
        None => Vec::new(),
    }
}

/// One slide; `index` is the fallback position
#[must_use]
pub fn slide(value: &Value, index: usize) -> Slide {
    let fallback_position = u32::try_from(index).unwrap_or(u32::MAX);
    let Some(obj) = value.as_object() else {
        return Slide::new(SlideId::fallback(index), "").with_position(fallback_position);
    };

    let id = non_empty_text(field(obj, &["id", "slide_id", "slideId"]))
        .map_or_else(|| SlideId::fallback(index), SlideId::from);
    let position = unsigned(field(obj, &["position", "order", "index", "slide_number"]))
        .and_then(|p| u32::try_from(p).ok())
        .unwrap_or(fallback_position);

    Slide {
        id,
        layout: text(field(obj, &["layout", "slide_type", "type"]))
            .map(SlideLayout::from)
            .unwrap_or_default(),
        position,
        title: text(field(obj, &["title", "heading"])).unwrap_or_default(),
        content: content_blocks(field(obj, &["content", "body", "bullets"])),
        image_url: non_empty_text(field(obj, &["image_url", "imageUrl", "image"])),
        image_prompt: non_empty_text(field(obj, &["image_prompt", "imagePrompt"])),
    }
}

/// First `slide-{index}[-n]` id not in `seen`
fn unused_fallback(seen: &HashSet<SlideId>, index: usize) -> SlideId {
    let base = SlideId::fallback(index);
    if !seen.contains(&base) {
        return base;
    }
    let mut n = 1_usize;
    loop {
        let candidate = SlideId::new(format!("{base}-{n}"));
        if !seen.contains(&candidate) {
            return candidate;
        }
        n += 1;
    }
}

/// Slide sequence with unique ids and contiguous positions
#[must_use]
pub fn slides(value: Option<&Value>) -> Vec<Slide> {
    let Some(Value::Array(items)) = value else {
        return Vec::new();
    };

    let mut seen = HashSet::new();
    let mut out: Vec<Slide> = items
        .iter()
        .enumerate()
        .map(|(idx, item)| {
            let mut s = slide(item, idx);
            if seen.contains(&s.id) {
                s.id = unused_fallback(&seen, idx);
            }
            seen.insert(s.id.clone());
            s
        })
        .collect();
    normalize_positions(&mut out);
    out
}

fn citation(value: &Value) -> Option<Citation> {
    match value {
        Value::String(url) if !url.trim().is_empty() => Some(Citation::new(url.clone(), url.clone())),
        Value::Object(obj) => {
            let url = text(field(obj, &["url", "link", "href"])).unwrap_or_default();
            let title = text(field(obj, &["title", "name"])).unwrap_or_else(|| url.clone());
            (!url.is_empty() || !title.is_empty()).then(|| Citation::new(title, url))
        }
        _ => None,
    }
}

/// Research document from a string or an object
#[must_use]
pub fn research_result(value: Option<&Value>) -> ResearchResult {
    match value {
        Some(Value::String(s)) => ResearchResult::new(s.clone()),
        Some(Value::Object(obj)) => {
            let citations = match field(obj, &["citations", "sources", "references"]) {
                Some(Value::Array(items)) => items.iter().filter_map(citation).collect(),
                _ => Vec::new(),
            };
            ResearchResult::new(
                text(field(obj, &["text", "content", "research", "markdown"])).unwrap_or_default(),
            )
            .with_citations(citations)
        }
        _ => ResearchResult::default(),
    }
}

fn images(value: Option<&Value>) -> BTreeMap<SlideId, String> {
    match value {
        Some(Value::Object(obj)) => obj
            .iter()
            .filter_map(|(k, v)| text(Some(v)).map(|url| (SlideId::from(k.as_str()), url)))
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_object)
            .filter_map(|obj| {
                let id = non_empty_text(field(obj, &["slide_id", "slideId", "id"]))?;
                let url = non_empty_text(field(obj, &["url", "image_url", "imageUrl"]))?;
                Some((SlideId::from(id), url))
            })
            .collect(),
        _ => BTreeMap::new(),
    }
}

/// Typed result payload for `kind`
#[must_use]
pub fn step_result(kind: StageKind, value: Option<&Value>) -> StepResult {
    let Some(value) = value.filter(|v| !v.is_null()) else {
        return StepResult::Empty;
    };
    let obj = value.as_object();
    let get = |keys: &[&str]| obj.and_then(|o| field(o, keys));

    match kind {
        StageKind::Research | StageKind::ManualResearch => {
            StepResult::Research(research_result(Some(value)))
        }
        StageKind::Slides => {
            let slide_count = unsigned(get(&["slide_count", "count"]))
                .and_then(|n| usize::try_from(n).ok())
                .or_else(|| get(&["slides"]).and_then(Value::as_array).map(Vec::len))
                .or_else(|| value.as_array().map(Vec::len))
                .unwrap_or(0);
            StepResult::Slides { slide_count }
        }
        StageKind::Illustration => StepResult::Illustration {
            images: images(get(&["images", "image_map"]).or(Some(value))),
        },
        StageKind::Compiled => StepResult::Compiled {
            document_url: non_empty_text(get(&["document_url", "url"]))
                .or_else(|| value.as_str().map(str::to_string)),
        },
        StageKind::Pptx => StepResult::Export {
            download_url: non_empty_text(get(&["download_url", "url", "file_url"]))
                .or_else(|| value.as_str().map(str::to_string)),
        },
    }
}

/// One step record; `None` when its stage kind is unrecognizable
#[must_use]
pub fn step(value: &Value, kind_hint: Option<StageKind>) -> Option<PipelineStep> {
    let obj = value.as_object();
    let kind = obj
        .and_then(|o| text(field(o, &["kind", "step_type", "stage", "type"])))
        .and_then(|s| s.parse::<StageKind>().ok())
        .or(kind_hint)?;

    let Some(obj) = obj else {
        // Bare status string keyed by stage name
        let status = value.as_str().map_or(StepStatus::Pending, StepStatus::from_wire);
        return Some(PipelineStep::pending(kind).with_status(status));
    };

    let status = text(field(obj, &["status", "state"]))
        .map_or(StepStatus::Pending, |s| StepStatus::from_wire(&s));
    Some(PipelineStep {
        kind,
        status,
        result: step_result(kind, field(obj, &["result", "output", "data"])),
        error_message: non_empty_text(field(obj, &["error_message", "error", "message"]))
            .filter(|_| status == StepStatus::Error),
        updated_at: timestamp(field(obj, &["updated_at", "updatedAt"])),
    })
}

/// Step map with every stage present; later duplicates win
#[must_use]
pub fn steps(value: Option<&Value>) -> BTreeMap<StageKind, PipelineStep> {
    let mut out: BTreeMap<StageKind, PipelineStep> = StageKind::ALL
        .iter()
        .map(|k| (*k, PipelineStep::pending(*k)))
        .collect();

    let parsed: Vec<PipelineStep> = match value {
        Some(Value::Array(items)) => items.iter().filter_map(|v| step(v, None)).collect(),
        Some(Value::Object(obj)) => obj
            .iter()
            .filter_map(|(k, v)| step(v, k.parse::<StageKind>().ok()))
            .collect(),
        _ => Vec::new(),
    };
    for s in parsed {
        out.insert(s.kind, s);
    }
    out
}

/// Full presentation snapshot
///
/// `fallback_id` is used when the payload carries no id.
#[must_use]
pub fn presentation(value: &Value, fallback_id: &PresentationId) -> Presentation {
    let empty = Map::new();
    let obj = value.as_object().unwrap_or(&empty);
    let steps = steps(field(obj, &["steps", "pipeline_steps", "pipelineSteps"]));

    let slide_source = field(obj, &["slides"]).or_else(|| {
        // Older snapshots only carry slides inside the slides step result
        let raw_steps = field(obj, &["steps", "pipeline_steps"])?;
        let slides_step = match raw_steps {
            Value::Array(items) => items.iter().find(|s| {
                s.as_object()
                    .and_then(|o| text(field(o, &["kind", "step_type", "stage", "type"])))
                    .is_some_and(|k| k == "slides")
            })?,
            Value::Object(map) => map.get("slides")?,
            _ => return None,
        };
        slides_step.get("result")?.get("slides")
    });

    let research_method = match text(field(obj, &["research_method", "researchMethod"]))
        .map(|s| s.to_ascii_lowercase())
        .as_deref()
    {
        Some("manual") => ResearchMethod::Manual,
        _ => ResearchMethod::Ai,
    };

    Presentation {
        id: non_empty_text(field(obj, &["id", "presentation_id"]))
            .map_or_else(|| fallback_id.clone(), PresentationId::from),
        name: text(field(obj, &["name", "title"])).unwrap_or_default(),
        topic: text(field(obj, &["topic"])).unwrap_or_default(),
        author: text(field(obj, &["author"])).unwrap_or_default(),
        research_method,
        slides: slides(slide_source),
        steps,
        created_at: timestamp(field(obj, &["created_at", "createdAt"])),
    }
}

fn slide_patch(obj: &Map<String, Value>) -> SlidePatch {
    SlidePatch {
        title: text(field(obj, &["title", "heading"])),
        content: field(obj, &["content", "body", "bullets"]).map(|v| content_blocks(Some(v))),
        layout: text(field(obj, &["layout", "slide_type"])).map(SlideLayout::from),
        image_url: non_empty_text(field(obj, &["image_url", "imageUrl"])),
        image_prompt: non_empty_text(field(obj, &["image_prompt", "imagePrompt"])),
    }
}

/// Suggestion patch from an interpretation response
///
/// `None` means "no actionable change": null, empty objects, unknown scopes,
/// and patches that would change nothing.
#[must_use]
pub fn suggestion_patch(value: &Value) -> Option<SuggestionPatch> {
    let obj = value.as_object().filter(|o| !o.is_empty())?;
    // The patch body may be nested under "patch" or "changes"
    let body = field(obj, &["patch", "changes"])
        .and_then(Value::as_object)
        .unwrap_or(obj);

    let scope = text(field(obj, &["scope", "type"])).map(|s| s.to_ascii_lowercase().replace('-', "_"));
    let scope = scope.as_deref().or_else(|| {
        if field(obj, &["slide_id", "slideId"]).is_some() {
            Some("single_slide")
        } else if field(body, &["text", "research"]).is_some() {
            Some("research")
        } else if field(body, &["slides"]).is_some() {
            Some("all_slides")
        } else {
            None
        }
    })?;

    let patch = match scope {
        "single_slide" | "slide" => {
            let slide_id = non_empty_text(field(obj, &["slide_id", "slideId"]))
                .or_else(|| non_empty_text(field(body, &["slide_id", "slideId", "id"])))?;
            SuggestionPatch::SingleSlide {
                slide_id: SlideId::from(slide_id),
                patch: slide_patch(body),
            }
        }
        "all_slides" | "slides" | "deck" => SuggestionPatch::AllSlides {
            slides: slides(field(body, &["slides"]).or(Some(value)).filter(|v| v.is_array())),
        },
        "research" => SuggestionPatch::Research {
            result: research_result(field(body, &["research", "result"]).or(Some(&Value::Object(body.clone())))),
        },
        "presentation" => SuggestionPatch::Presentation(PresentationPatch {
            name: text(field(body, &["name", "title"])),
            topic: text(field(body, &["topic"])),
            author: text(field(body, &["author"])),
            slides: field(body, &["slides"]).map(|v| slides(Some(v))),
        }),
        _ => return None,
    };

    (!patch.is_noop()).then_some(patch)
}
