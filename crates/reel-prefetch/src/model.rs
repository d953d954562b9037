//! Feed item model.

use std::fmt;

/// What an item shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaKind {
    /// A single video played from the item's locator.
    Video,
    /// A carousel of still images. Never prefetched.
    ImageSet { images: Vec<String> },
}

/// One entry of the feed. Immutable once created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// Unique per feed slot; not a content identity.
    pub id: String,
    /// Remote URL or bundled asset name of the content.
    pub locator: String,
    pub kind: MediaKind,
}

/// How the playback side presents an item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderTarget<'a> {
    Player { locator: &'a str },
    Carousel { images: &'a [String] },
}

impl MediaRef {
    pub fn video(id: impl Into<String>, locator: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            locator: locator.into(),
            kind: MediaKind::Video,
        }
    }

    /// Image carousel; its locator is the first image, for reference only.
    pub fn image_set<I, S>(id: impl Into<String>, images: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let images: Vec<String> = images.into_iter().map(Into::into).collect();
        Self {
            id: id.into(),
            locator: images.first().cloned().unwrap_or_default(),
            kind: MediaKind::ImageSet { images },
        }
    }

    /// Copy of this item under a different slot id.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..self.clone()
        }
    }

    /// Whether the scheduler may fetch this item ahead of time.
    pub fn is_prefetchable(&self) -> bool {
        match self.kind {
            MediaKind::Video => true,
            MediaKind::ImageSet { .. } => false,
        }
    }

    pub fn render_target(&self) -> RenderTarget<'_> {
        match &self.kind {
            MediaKind::Video => RenderTarget::Player {
                locator: &self.locator,
            },
            MediaKind::ImageSet { images } => RenderTarget::Carousel { images },
        }
    }
}

impl fmt::Display for MediaRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            MediaKind::Video => write!(f, "{} (video {})", self.id, self.locator),
            MediaKind::ImageSet { images } => {
                write!(f, "{} (image set, {} images)", self.id, images.len())
            }
        }
    }
}
