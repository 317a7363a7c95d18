use crate::error::AppResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Nominal length of a preview clip, used until the player reports one.
pub const PREVIEW_DURATION_SECS: f64 = 30.0;

/// Playback state of the local preview player.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlayerState {
    #[default]
    Idle,
    Loading,
    Buffering,
    Ready,
    Playing,
    Paused,
    Stopped,
    Ended,
    Error,
}

impl PlayerState {
    pub fn is_audible(self) -> bool {
        matches!(self, PlayerState::Playing | PlayerState::Buffering)
    }

    fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "loading" | "connecting" => PlayerState::Loading,
            "buffering" => PlayerState::Buffering,
            "ready" => PlayerState::Ready,
            "playing" => PlayerState::Playing,
            "paused" => PlayerState::Paused,
            "stopped" => PlayerState::Stopped,
            "ended" => PlayerState::Ended,
            "error" => PlayerState::Error,
            _ => PlayerState::Idle,
        }
    }

    fn from_code(code: i64) -> Self {
        // Native media session codes.
        match code {
            1 => PlayerState::Stopped,
            2 => PlayerState::Paused,
            3 => PlayerState::Playing,
            6 => PlayerState::Buffering,
            7 => PlayerState::Error,
            8 => PlayerState::Loading,
            _ => PlayerState::Idle,
        }
    }
}

/// Player state as native bridges report it: a name, a numeric code, or an
/// object wrapping either.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum RawPlayerState {
    Name(String),
    Code(i64),
    Wrapped { state: Box<RawPlayerState> },
}

impl From<RawPlayerState> for PlayerState {
    fn from(raw: RawPlayerState) -> Self {
        match raw {
            RawPlayerState::Name(name) => PlayerState::from_name(&name),
            RawPlayerState::Code(code) => PlayerState::from_code(code),
            RawPlayerState::Wrapped { state } => PlayerState::from(*state),
        }
    }
}

/// One sample of the player's position feed. Units are seconds, as the
/// native engine reports them.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PlayerStatus {
    pub state: PlayerState,
    pub position_secs: f64,
    pub duration_secs: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PreviewMetadata {
    pub id: String,
    pub title: String,
    pub artist: String,
    pub artwork: Option<String>,
    pub duration_secs: f64,
}

/// The host's local audio engine. It holds at most one loaded clip.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PreviewPlayer: Send + Sync {
    /// One-time engine initialisation. Safe to call again.
    async fn setup(&self) -> AppResult<()>;
    async fn load(&self, url: &str, metadata: &PreviewMetadata) -> AppResult<()>;
    async fn play(&self) -> AppResult<()>;
    async fn pause(&self) -> AppResult<()>;
    /// Stop and unload the current clip.
    async fn stop(&self) -> AppResult<()>;
    async fn seek_to(&self, position_ms: u64) -> AppResult<()>;
    async fn status(&self) -> AppResult<PlayerStatus>;
}
