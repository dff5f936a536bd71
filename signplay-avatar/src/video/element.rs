//! Video element handles
//!
//! A `VideoElement` is the pool-owned handle for one loaded clip. Callers
//! never touch it directly; they receive a `ClonedVideo`, which copies the
//! source, flags and metadata but carries its own playback cursor and its
//! own lifetime.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use std::time::Duration;

/// Clip metadata, known once the clip has loaded
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VideoMetadata {
    pub duration_seconds: f64,
    pub width: u32,
    pub height: u32,
}

impl VideoMetadata {
    pub fn new(duration_seconds: f64, width: u32, height: u32) -> Self {
        Self {
            duration_seconds,
            width,
            height,
        }
    }

    /// Width over height, 0.0 when the height is unknown
    pub fn aspect_ratio(&self) -> f64 {
        if self.height == 0 {
            0.0
        } else {
            self.width as f64 / self.height as f64
        }
    }

    /// Clip duration, `None` when unknown or invalid
    pub fn duration(&self) -> Option<Duration> {
        (self.duration_seconds.is_finite() && self.duration_seconds > 0.0)
            .then(|| Duration::from_secs_f64(self.duration_seconds))
    }
}

impl Default for VideoMetadata {
    fn default() -> Self {
        Self::new(2.0, 640, 480)
    }
}

/// Element flags copied onto every clone
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaFlags {
    pub muted: bool,
    pub plays_inline: bool,
    pub cross_origin: Option<String>,
}

impl Default for MediaFlags {
    fn default() -> Self {
        Self {
            muted: true,
            plays_inline: true,
            cross_origin: Some("anonymous".to_string()),
        }
    }
}

/// Playable clip handle with its own cursor
#[derive(Debug, PartialEq)]
pub struct VideoElement {
    source_uri: String,
    flags: MediaFlags,
    metadata: VideoMetadata,
    position: Duration,
    playing: bool,
    released: bool,
}

impl VideoElement {
    pub fn new(source_uri: impl Into<String>, flags: MediaFlags, metadata: VideoMetadata) -> Self {
        Self {
            source_uri: source_uri.into(),
            flags,
            metadata,
            position: Duration::ZERO,
            playing: false,
            released: false,
        }
    }

    pub fn source_uri(&self) -> &str {
        &self.source_uri
    }

    pub fn flags(&self) -> &MediaFlags {
        &self.flags
    }

    pub fn metadata(&self) -> &VideoMetadata {
        &self.metadata
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    /// Start playback; returns false once released
    pub fn play(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.playing = true;
        true
    }

    pub fn pause(&mut self) {
        self.playing = false;
    }

    /// Move the cursor, clamped to the clip duration when known
    pub fn seek(&mut self, position: Duration) {
        self.position = match self.metadata.duration() {
            Some(duration) => position.min(duration),
            None => position,
        };
    }

    /// Advance the cursor by rendered time while playing
    ///
    /// Playback pauses at the end of the clip.
    pub fn advance(&mut self, elapsed: Duration) {
        if !self.playing {
            return;
        }
        let target = self.position.saturating_add(elapsed);
        self.seek(target);
        if let Some(duration) = self.metadata.duration() {
            if self.position >= duration {
                self.playing = false;
            }
        }
    }

    /// Pause and rewind
    pub fn stop(&mut self) {
        self.playing = false;
        self.position = Duration::ZERO;
    }

    /// Stop and detach the source; the element cannot play again
    pub fn release(&mut self) {
        self.stop();
        self.released = true;
    }

    /// Fresh element sharing source, flags and metadata but nothing else
    pub fn duplicate(&self) -> VideoElement {
        VideoElement::new(self.source_uri.clone(), self.flags.clone(), self.metadata)
    }
}

/// Caller-owned clone of a pooled clip
#[derive(Debug)]
pub struct ClonedVideo {
    sign_id: String,
    element: VideoElement,
}

impl ClonedVideo {
    pub(crate) fn new(sign_id: impl Into<String>, element: VideoElement) -> Self {
        Self {
            sign_id: sign_id.into(),
            element,
        }
    }

    pub fn sign_id(&self) -> &str {
        &self.sign_id
    }

    pub fn duration_seconds(&self) -> f64 {
        self.element.metadata().duration_seconds
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.element.metadata().aspect_ratio()
    }
}

impl Deref for ClonedVideo {
    type Target = VideoElement;

    fn deref(&self) -> &VideoElement {
        &self.element
    }
}

impl DerefMut for ClonedVideo {
    fn deref_mut(&mut self) -> &mut VideoElement {
        &mut self.element
    }
}

impl Drop for ClonedVideo {
    fn drop(&mut self) {
        self.element.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element() -> VideoElement {
        VideoElement::new("videos/A.mp4", MediaFlags::default(), VideoMetadata::new(1.5, 1280, 720))
    }

    #[test]
    fn test_seek_clamps_to_duration() {
        let mut el = element();
        el.seek(Duration::from_secs(10));
        assert_eq!(el.position(), Duration::from_millis(1500));
    }

    #[test]
    fn test_advance_only_while_playing() {
        let mut el = element();
        el.advance(Duration::from_millis(200));
        assert_eq!(el.position(), Duration::ZERO);

        el.play();
        el.advance(Duration::from_millis(200));
        assert_eq!(el.position(), Duration::from_millis(200));

        el.advance(Duration::from_secs(5));
        assert_eq!(el.position(), Duration::from_millis(1500));
        assert!(!el.is_playing(), "playback stops at end of clip");
    }

    #[test]
    fn test_released_element_cannot_play() {
        let mut el = element();
        el.release();
        assert!(!el.play());
        assert!(!el.is_playing());
    }

    #[test]
    fn test_duplicate_has_fresh_cursor() {
        let mut el = element();
        el.play();
        el.seek(Duration::from_millis(900));

        let copy = el.duplicate();
        assert_eq!(copy.position(), Duration::ZERO);
        assert!(!copy.is_playing());
        assert_eq!(copy.source_uri(), el.source_uri());
        assert_eq!(copy.metadata(), el.metadata());
    }

    #[test]
    fn test_aspect_ratio() {
        assert!((VideoMetadata::new(1.0, 1280, 720).aspect_ratio() - 16.0 / 9.0).abs() < 1e-9);
        assert_eq!(VideoMetadata::new(1.0, 1280, 0).aspect_ratio(), 0.0);
        assert!(VideoMetadata::new(f64::NAN, 1, 1).duration().is_none());
    }
}
