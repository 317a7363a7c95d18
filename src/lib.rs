pub mod api;
pub mod audio;
pub mod config;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod theme;

use api::auth::{AuthorizationPrompt, SpotifyAuthClient, TokenEndpoint};
use api::client::SpotifyClient;
use api::previews::{DeezerPreviewResolver, PreviewResolver};
use audio::player::PreviewPlayer;
use config::AppConfig;
use error::AppResult;
use events::EventHub;
use playback::PlaybackReconciler;
use session::store::{FileStore, KeyValueStore};
use session::{AuthStatus, TokenManager};
use std::sync::Arc;
use theme::ThemePreference;

/// Install the `env_logger` backend. `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    // A host may already have installed a logger.
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("spotify_remote_lib=info"),
    )
    .try_init();
}

/// Composition root. The host constructs one per process, injecting its
/// secure storage and local audio engine, and drives its lifecycle.
pub struct AppState {
    pub config: AppConfig,
    pub events: EventHub,
    pub tokens: TokenManager,
    pub client: Arc<SpotifyClient>,
    pub playback: PlaybackReconciler,
    store: Arc<dyn KeyValueStore>,
}

impl AppState {
    /// Config from `~/.spotify-remote/config.json` and a file-backed session
    /// store beside it, for hosts without a secure store of their own.
    pub fn from_home_dir(player: Arc<dyn PreviewPlayer>) -> AppResult<Self> {
        let config = AppConfig::load_or_default();
        let store = Arc::new(FileStore::default_location()?);
        Self::new(config, store, player)
    }

    pub fn new(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        player: Arc<dyn PreviewPlayer>,
    ) -> AppResult<Self> {
        let endpoint = Arc::new(SpotifyAuthClient::new(&config)?);
        let resolver = Arc::new(DeezerPreviewResolver::new(&config)?);
        Self::with_services(config, store, player, endpoint, resolver)
    }

    pub fn with_services(
        config: AppConfig,
        store: Arc<dyn KeyValueStore>,
        player: Arc<dyn PreviewPlayer>,
        endpoint: Arc<dyn TokenEndpoint>,
        resolver: Arc<dyn PreviewResolver>,
    ) -> AppResult<Self> {
        config.validate()?;

        let events = EventHub::new();
        let tokens = TokenManager::new(&config, endpoint, Arc::clone(&store));
        let client = Arc::new(SpotifyClient::new(&config, tokens.clone())?);
        let playback = PlaybackReconciler::new(
            &config,
            client.clone(),
            tokens.subscribe(),
            player,
            resolver,
            events.clone(),
        );

        Ok(Self {
            config,
            events,
            tokens,
            client,
            playback,
            store,
        })
    }

    /// Restore the stored session and start polling playback.
    pub async fn start(&self) -> AuthStatus {
        let status = self.tokens.restore().await;
        self.playback.start_polling();
        log::info!("Started, session {:?}", status.phase);
        status
    }

    pub async fn login(&self, prompt: &dyn AuthorizationPrompt) -> AppResult<()> {
        self.tokens.login(prompt).await
    }

    /// The poll loop notices the session change and clears playback.
    pub fn logout(&self) {
        self.tokens.logout();
    }

    pub fn theme(&self) -> ThemePreference {
        ThemePreference::load(self.store.as_ref())
    }

    pub fn set_theme(&self, theme: ThemePreference) -> AppResult<()> {
        theme.save(self.store.as_ref())
    }

    pub async fn shutdown(&self) {
        self.playback.shutdown().await;
        self.tokens.shutdown();
        log::info!("Shut down");
    }
}
