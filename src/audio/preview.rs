use crate::audio::player::{PlayerStatus, PreviewMetadata, PreviewPlayer};
use crate::error::AppResult;
use std::sync::Arc;
use tokio::sync::Mutex;

#[derive(Default)]
struct SlotState {
    set_up: bool,
    loaded: Option<String>,
}

/// Sole owner of the local preview player. Operations are serialised, the
/// engine is set up once per slot, and a loaded clip is always stopped
/// before the next one is loaded.
pub struct PreviewSlot {
    player: Arc<dyn PreviewPlayer>,
    state: Mutex<SlotState>,
}

impl PreviewSlot {
    pub fn new(player: Arc<dyn PreviewPlayer>) -> Self {
        Self {
            player,
            state: Mutex::new(SlotState::default()),
        }
    }

    pub async fn start(&self, url: &str, metadata: &PreviewMetadata) -> AppResult<()> {
        let mut state = self.state.lock().await;

        if !state.set_up {
            self.player.setup().await?;
            state.set_up = true;
            log::info!("[preview] Player set up");
        }

        if let Some(previous) = state.loaded.take() {
            log::info!("[preview] Stopping {} before loading {}", previous, metadata.id);
            self.player.stop().await?;
        }

        self.player.load(url, metadata).await?;
        state.loaded = Some(metadata.id.clone());

        if let Err(e) = self.player.play().await {
            // Leave nothing half-started behind.
            state.loaded = None;
            if let Err(stop_err) = self.player.stop().await {
                log::warn!("[preview] Failed to unload after play error: {}", stop_err);
            }
            return Err(e);
        }
        Ok(())
    }

    /// Stop the loaded clip. No-op when nothing is loaded.
    pub async fn stop(&self) -> AppResult<()> {
        let mut state = self.state.lock().await;
        match state.loaded.take() {
            Some(id) => {
                log::info!("[preview] Stopping {}", id);
                self.player.stop().await
            }
            None => Ok(()),
        }
    }

    pub async fn pause(&self) -> AppResult<()> {
        let state = self.state.lock().await;
        if state.loaded.is_none() {
            return Ok(());
        }
        self.player.pause().await
    }

    pub async fn resume(&self) -> AppResult<()> {
        let state = self.state.lock().await;
        if state.loaded.is_none() {
            return Ok(());
        }
        self.player.play().await
    }

    pub async fn seek_to(&self, position_ms: u64) -> AppResult<()> {
        let state = self.state.lock().await;
        if state.loaded.is_none() {
            return Ok(());
        }
        self.player.seek_to(position_ms).await
    }

    pub async fn status(&self) -> AppResult<PlayerStatus> {
        self.player.status().await
    }

    #[cfg(test)]
    async fn loaded_track_id(&self) -> Option<String> {
        self.state.lock().await.loaded.clone()
    }
}
