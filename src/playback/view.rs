use crate::api::models::{CurrentlyPlaying, TrackRef};
use serde::Serialize;

/// The local clip currently overlaying the remote view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewOverlay {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub artist_id: Option<String>,
    pub artwork_url: Option<String>,
    pub is_playing: bool,
    pub position_ms: u64,
    pub duration_ms: u64,
}

/// Unified now-playing snapshot. The remote fields always hold the last
/// polled state, including while a preview overlays them.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaybackView {
    pub track: Option<TrackRef>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub duration_ms: u64,
    pub artwork_url: Option<String>,
    pub preview: Option<PreviewOverlay>,
}

impl PlaybackView {
    pub fn is_preview_playing(&self) -> bool {
        self.preview.is_some()
    }

    /// Overwrite the remote fields from a poll result. An empty snapshot or
    /// one without an item resets them.
    pub fn apply_remote(&mut self, snapshot: Option<CurrentlyPlaying>) {
        let Some(snapshot) = snapshot else {
            self.clear_remote();
            return;
        };
        let Some(item) = snapshot.item else {
            self.clear_remote();
            return;
        };
        let track = TrackRef::from(item);
        self.is_playing = snapshot.is_playing;
        self.progress_ms = snapshot.progress_ms.unwrap_or(0);
        self.duration_ms = track.duration_ms;
        self.artwork_url = track.album_artwork_url.clone();
        self.track = Some(track);
    }

    pub fn clear_remote(&mut self) {
        self.track = None;
        self.is_playing = false;
        self.progress_ms = 0;
        self.duration_ms = 0;
        self.artwork_url = None;
    }

    /// What the screen shows: the preview when one is active, the remote
    /// track otherwise.
    pub fn now_playing(&self) -> Option<NowPlaying> {
        if let Some(preview) = &self.preview {
            return Some(NowPlaying {
                source: PlaybackSource::Preview,
                track_id: preview.track_id.clone(),
                title: preview.title.clone(),
                artist: preview.artist.clone(),
                artwork_url: preview.artwork_url.clone(),
                is_playing: preview.is_playing,
                progress_ms: preview.position_ms,
                duration_ms: preview.duration_ms,
            });
        }

        self.track.as_ref().map(|track| NowPlaying {
            source: PlaybackSource::Remote,
            track_id: track.id.clone(),
            title: track.name.clone(),
            artist: track.artist_names(),
            artwork_url: self.artwork_url.clone(),
            is_playing: self.is_playing,
            progress_ms: self.progress_ms,
            duration_ms: self.duration_ms,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlaybackSource {
    Remote,
    Preview,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NowPlaying {
    pub source: PlaybackSource,
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub artwork_url: Option<String>,
    pub is_playing: bool,
    pub progress_ms: u64,
    pub duration_ms: u64,
}
