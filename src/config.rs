use crate::error::{AppError, AppResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,
    #[serde(default = "default_auth_endpoint")]
    pub auth_endpoint: String,
    #[serde(default = "default_token_endpoint")]
    pub token_endpoint: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_preview_search_url")]
    pub preview_search_url: String,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// Upper bound for the poll delay after repeated fetch failures.
    /// Equal to `poll_interval_ms` disables the backoff.
    #[serde(default = "default_poll_backoff_max_ms")]
    pub poll_backoff_max_ms: u64,
    #[serde(default = "default_refresh_threshold_secs")]
    pub refresh_threshold_secs: u64,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_redirect_uri() -> String {
    "spotifyremote://auth/callback".to_string()
}

fn default_scopes() -> Vec<String> {
    [
        "user-read-email",
        "user-read-private",
        "user-modify-playback-state",
        "user-read-playback-state",
        "user-read-currently-playing",
        "user-read-playback-position",
        "user-read-recently-played",
        "user-library-read",
        "user-top-read",
        "playlist-read-private",
        "streaming",
        "app-remote-control",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_auth_endpoint() -> String {
    "https://accounts.spotify.com/authorize".to_string()
}

fn default_token_endpoint() -> String {
    "https://accounts.spotify.com/api/token".to_string()
}

fn default_api_base_url() -> String {
    "https://api.spotify.com/v1".to_string()
}

fn default_preview_search_url() -> String {
    "https://api.deezer.com/search/track".to_string()
}

fn default_poll_interval_ms() -> u64 {
    2000
}

fn default_poll_backoff_max_ms() -> u64 {
    30_000
}

fn default_refresh_threshold_secs() -> u64 {
    5 * 60
}

fn default_request_timeout_secs() -> u64 {
    10
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            redirect_uri: default_redirect_uri(),
            scopes: default_scopes(),
            auth_endpoint: default_auth_endpoint(),
            token_endpoint: default_token_endpoint(),
            api_base_url: default_api_base_url(),
            preview_search_url: default_preview_search_url(),
            poll_interval_ms: default_poll_interval_ms(),
            poll_backoff_max_ms: default_poll_backoff_max_ms(),
            refresh_threshold_secs: default_refresh_threshold_secs(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

impl AppConfig {
    pub fn config_dir() -> AppResult<PathBuf> {
        let home = dirs::home_dir()
            .ok_or_else(|| AppError::Config("Cannot find home directory".into()))?;
        Ok(home.join(".spotify-remote"))
    }

    pub fn config_path() -> AppResult<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    pub fn load() -> AppResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> AppResult<Self> {
        if !path.exists() {
            return Err(AppError::Config(format!(
                "Config file not found at {}",
                path.display()
            )));
        }
        let content = std::fs::read_to_string(path)?;
        let mut config: Self = serde_json::from_str(&content)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load the config file, falling back to (and writing out) the defaults.
    pub fn load_or_default() -> Self {
        Self::load().unwrap_or_else(|e| {
            log::warn!("Failed to load config: {}. Using defaults.", e);
            let mut config = AppConfig::default();
            if let Err(save_err) = config.save() {
                log::error!("Failed to save default config: {}", save_err);
            }
            config.apply_env_overrides();
            config
        })
    }

    pub fn save(&self) -> AppResult<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> AppResult<()> {
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// `SPOTIFY_CLIENT_ID` / `SPOTIFY_REDIRECT_URI` win over the file.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(id) = std::env::var("SPOTIFY_CLIENT_ID") {
            if !id.is_empty() {
                self.client_id = id;
            }
        }
        if let Ok(uri) = std::env::var("SPOTIFY_REDIRECT_URI") {
            if !uri.is_empty() {
                self.redirect_uri = uri;
            }
        }
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.client_id.is_empty() {
            return Err(AppError::Config("client_id is not set".into()));
        }
        if self.poll_interval_ms == 0 {
            return Err(AppError::Config("poll_interval_ms must be positive".into()));
        }
        url::Url::parse(&self.api_base_url)?;
        url::Url::parse(&self.token_endpoint)?;
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_backoff_max(&self) -> Duration {
        Duration::from_millis(self.poll_backoff_max_ms.max(self.poll_interval_ms))
    }

    pub fn refresh_threshold(&self) -> Duration {
        Duration::from_secs(self.refresh_threshold_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}
