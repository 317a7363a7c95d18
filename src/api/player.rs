use crate::api::client::SpotifyClient;
use crate::api::models::{CurrentlyPlaying, PlayRequest};
use crate::error::AppResult;
use async_trait::async_trait;

/// Remote playback endpoint as seen by the reconciler.
#[async_trait]
pub trait PlaybackApi: Send + Sync {
    /// `None` when nothing is playing on any device.
    async fn currently_playing(&self) -> AppResult<Option<CurrentlyPlaying>>;
    /// Resume in place when `uris` is `None`, otherwise start those tracks from zero.
    async fn play(&self, uris: Option<Vec<String>>) -> AppResult<()>;
    async fn pause(&self) -> AppResult<()>;
    async fn next(&self) -> AppResult<()>;
    async fn previous(&self) -> AppResult<()>;
}

#[async_trait]
impl PlaybackApi for SpotifyClient {
    async fn currently_playing(&self) -> AppResult<Option<CurrentlyPlaying>> {
        self.get_json("/me/player/currently-playing").await
    }

    async fn play(&self, uris: Option<Vec<String>>) -> AppResult<()> {
        log::info!("[play] uris={:?}", uris);
        match uris {
            Some(uris) => {
                self.put("/me/player/play", Some(&PlayRequest { uris: Some(uris) }))
                    .await
            }
            None => self.put::<PlayRequest>("/me/player/play", None).await,
        }
    }

    async fn pause(&self) -> AppResult<()> {
        log::info!("[pause]");
        self.put::<()>("/me/player/pause", None).await
    }

    async fn next(&self) -> AppResult<()> {
        log::info!("[next]");
        self.post::<()>("/me/player/next", None).await
    }

    async fn previous(&self) -> AppResult<()> {
        log::info!("[previous]");
        self.post::<()>("/me/player/previous", None).await
    }
}
