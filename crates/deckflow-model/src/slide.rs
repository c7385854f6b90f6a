//! Slides and slide-level patches

use serde::{Deserialize, Serialize};
use std::fmt;

/// Slide identifier
///
/// The remote service has used both numeric and string ids; both are kept as
/// strings locally.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SlideId(pub String);

impl SlideId {
    /// Create id from any string-like value
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Stand-in id for the slide at `index` when the service sent none
    #[inline]
    #[must_use]
    pub fn fallback(index: usize) -> Self {
        Self(format!("slide-{index}"))
    }

    /// Borrow as str
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SlideId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SlideId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SlideId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u64> for SlideId {
    fn from(value: u64) -> Self {
        Self(value.to_string())
    }
}

/// Layout variant tag, consumed by the renderers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum SlideLayout {
    /// Title slide
    Title,
    /// Title plus body blocks
    #[default]
    Content,
    /// Image on the left, text on the right
    ImageLeft,
    /// Image on the right, text on the left
    ImageRight,
    /// Two text columns
    TwoColumn,
    /// Large quotation
    Quote,
    /// Section divider
    Section,
    /// Any layout this client does not know about
    Other(String),
}

impl SlideLayout {
    /// Wire name of the layout
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            SlideLayout::Title => "title",
            SlideLayout::Content => "content",
            SlideLayout::ImageLeft => "image_left",
            SlideLayout::ImageRight => "image_right",
            SlideLayout::TwoColumn => "two_column",
            SlideLayout::Quote => "quote",
            SlideLayout::Section => "section",
            SlideLayout::Other(name) => name,
        }
    }
}

impl From<String> for SlideLayout {
    fn from(value: String) -> Self {
        match value.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "title" => SlideLayout::Title,
            "content" | "" => SlideLayout::Content,
            "image_left" => SlideLayout::ImageLeft,
            "image_right" => SlideLayout::ImageRight,
            "two_column" | "two_columns" => SlideLayout::TwoColumn,
            "quote" => SlideLayout::Quote,
            "section" => SlideLayout::Section,
            _ => SlideLayout::Other(value),
        }
    }
}

impl From<&str> for SlideLayout {
    fn from(value: &str) -> Self {
        SlideLayout::from(value.to_string())
    }
}

impl From<SlideLayout> for String {
    fn from(value: SlideLayout) -> Self {
        value.as_str().to_string()
    }
}

/// One block of slide body content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Free text paragraph
    Paragraph {
        /// Paragraph text
        text: String,
    },
    /// Bullet point
    Bullet {
        /// Bullet text
        text: String,
        /// Nesting level, 0 = top level
        #[serde(default)]
        level: u8,
    },
}

impl ContentBlock {
    /// Paragraph block
    #[inline]
    #[must_use]
    pub fn paragraph(text: impl Into<String>) -> Self {
        ContentBlock::Paragraph { text: text.into() }
    }

    /// Top-level bullet block
    #[inline]
    #[must_use]
    pub fn bullet(text: impl Into<String>) -> Self {
        ContentBlock::Bullet {
            text: text.into(),
            level: 0,
        }
    }

    /// Block text regardless of kind
    #[inline]
    #[must_use]
    pub fn text(&self) -> &str {
        match self {
            ContentBlock::Paragraph { text } | ContentBlock::Bullet { text, .. } => text,
        }
    }
}

/// A single slide
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slide {
    /// Slide identifier
    pub id: SlideId,
    /// Layout variant
    #[serde(default)]
    pub layout: SlideLayout,
    /// Ordinal position, contiguous from 0 within a presentation
    #[serde(default)]
    pub position: u32,
    /// Title text
    #[serde(default)]
    pub title: String,
    /// Body blocks
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    /// Generated or uploaded image
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// Prompt used for image generation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
}

impl Slide {
    /// Create slide with defaults for everything but id and title
    #[inline]
    #[must_use]
    pub fn new(id: impl Into<SlideId>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            layout: SlideLayout::default(),
            position: 0,
            title: title.into(),
            content: Vec::new(),
            image_url: None,
            image_prompt: None,
        }
    }

    /// With layout
    #[inline]
    #[must_use]
    pub fn with_layout(mut self, layout: SlideLayout) -> Self {
        self.layout = layout;
        self
    }

    /// With position
    #[inline]
    #[must_use]
    pub fn with_position(mut self, position: u32) -> Self {
        self.position = position;
        self
    }

    /// With content blocks
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: Vec<ContentBlock>) -> Self {
        self.content = content;
        self
    }

    /// With image URL
    #[inline]
    #[must_use]
    pub fn with_image(mut self, url: impl Into<String>) -> Self {
        self.image_url = Some(url.into());
        self
    }
}

/// Partial update for one slide
///
/// Every present field replaces the slide's field; absent fields are kept.
/// Id and position are not patchable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidePatch {
    /// New title
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// New body blocks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Vec<ContentBlock>>,
    /// New layout
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<SlideLayout>,
    /// New image URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    /// New image prompt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_prompt: Option<String>,
}

impl SlidePatch {
    /// Patch that only sets the title
    #[inline]
    #[must_use]
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// With content
    #[inline]
    #[must_use]
    pub fn with_content(mut self, content: Vec<ContentBlock>) -> Self {
        self.content = Some(content);
        self
    }

    /// No field present
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.content.is_none()
            && self.layout.is_none()
            && self.image_url.is_none()
            && self.image_prompt.is_none()
    }

    /// Shallow merge onto `slide`
    #[must_use]
    pub fn merged_onto(&self, slide: &Slide) -> Slide {
        Slide {
            id: slide.id.clone(),
            position: slide.position,
            layout: self.layout.clone().unwrap_or_else(|| slide.layout.clone()),
            title: self.title.clone().unwrap_or_else(|| slide.title.clone()),
            content: self.content.clone().unwrap_or_else(|| slide.content.clone()),
            image_url: self.image_url.clone().or_else(|| slide.image_url.clone()),
            image_prompt: self
                .image_prompt
                .clone()
                .or_else(|| slide.image_prompt.clone()),
        }
    }
}

/// Assign positions `0..n` in sequence order
pub fn renumber(slides: &mut [Slide]) {
    for (idx, slide) in slides.iter_mut().enumerate() {
        slide.position = u32::try_from(idx).unwrap_or(u32::MAX);
    }
}

/// Order by current position (stable) and make positions contiguous
pub fn normalize_positions(slides: &mut [Slide]) {
    slides.sort_by_key(|s| s.position);
    renumber(slides);
}
