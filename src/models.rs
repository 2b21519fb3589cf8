use serde::{Deserialize, Serialize};

/// Persistent key of a playlist entry.
pub type EntryId = i64;

/// Order value used by entries that were never placed in the playlist.
pub const UNORDERED: i64 = -1;

/// A playable item: a story, a podcast episode or a station stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlaylistEntry {
    /// `None` until the entry is persisted
    pub id: Option<EntryId>,
    pub url: String,
    pub title: String,
    /// True when the source may need protocol translation before decoding
    pub is_stream: bool,
    pub order: i64,
    /// Back-reference to the story this entry was created from
    pub story_ref: Option<String>,
}

impl PlaylistEntry {
    /// Create a transient entry that is not part of the stored playlist
    pub fn new(url: impl Into<String>, title: impl Into<String>, is_stream: bool) -> Self {
        Self {
            id: None,
            url: url.into(),
            title: title.into(),
            is_stream,
            order: UNORDERED,
            story_ref: None,
        }
    }

    pub fn with_story_ref(mut self, story_ref: impl Into<String>) -> Self {
        self.story_ref = Some(story_ref.into());
        self
    }

    pub fn with_order(mut self, order: i64) -> Self {
        self.order = order;
        self
    }

    pub fn is_persisted(&self) -> bool {
        self.id.is_some()
    }

    /// Get the display name for this entry (title or URL)
    pub fn display_name(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.url
        } else {
            &self.title
        }
    }
}

/// Engine lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlaybackPhase {
    Idle,
    Preparing,
    Playing,
    Paused,
    Error,
}

impl PlaybackPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlaybackPhase::Idle => "idle",
            PlaybackPhase::Preparing => "preparing",
            PlaybackPhase::Playing => "playing",
            PlaybackPhase::Paused => "paused",
            PlaybackPhase::Error => "error",
        }
    }

    /// Phases in which the decoder holds a prepared session
    pub fn is_active(&self) -> bool {
        matches!(self, PlaybackPhase::Playing | PlaybackPhase::Paused)
    }
}

impl std::fmt::Display for PlaybackPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Point-in-time view of the engine, for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackStatus {
    pub phase: PlaybackPhase,
    pub current: Option<PlaylistEntry>,
    pub position_ms: u64,
    pub duration_ms: u64,
    pub buffered_percent: u8,
    pub pending_manifest_urls: usize,
    pub paused_for_call: bool,
}

impl PlaybackStatus {
    pub fn idle() -> Self {
        Self {
            phase: PlaybackPhase::Idle,
            current: None,
            position_ms: 0,
            duration_ms: 0,
            buffered_percent: 0,
            pending_manifest_urls: 0,
            paused_for_call: false,
        }
    }

    /// Calculate progress as a fraction (0.0 to 1.0)
    pub fn progress(&self) -> f32 {
        if self.duration_ms > 0 {
            (self.position_ms as f32 / self.duration_ms as f32).min(1.0)
        } else {
            0.0
        }
    }
}
