use crate::config::AppConfig;
use crate::error::AppResult;
use async_trait::async_trait;
use serde::Deserialize;

/// Finds a playable ~30 second clip for a track the catalog has no preview for.
#[async_trait]
pub trait PreviewResolver: Send + Sync {
    /// `None` when no clip can be found. Lookup failures are not errors.
    async fn resolve(&self, artist: &str, title: &str) -> Option<String>;
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<SearchHit>,
}

#[derive(Debug, Deserialize)]
struct SearchHit {
    #[serde(default)]
    preview: Option<String>,
}

/// Track search of the public Deezer API, which serves previews without auth.
pub struct DeezerPreviewResolver {
    http: reqwest::Client,
    search_url: String,
}

impl DeezerPreviewResolver {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("SpotifyRemote/0.1.0")
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            search_url: config.preview_search_url.clone(),
        })
    }

    async fn search(&self, query: &str) -> AppResult<Option<String>> {
        let response = self
            .http
            .get(&self.search_url)
            .query(&[("q", query)])
            .send()
            .await?
            .error_for_status()?;
        let body: SearchResponse = response.json().await?;

        Ok(body
            .data
            .into_iter()
            .next()
            .and_then(|hit| hit.preview)
            .filter(|url| !url.is_empty()))
    }
}

#[async_trait]
impl PreviewResolver for DeezerPreviewResolver {
    async fn resolve(&self, artist: &str, title: &str) -> Option<String> {
        let query = format!("{} {}", artist, title);
        match self.search(query.trim()).await {
            Ok(Some(url)) => Some(url),
            Ok(None) => {
                log::info!("[preview] No preview found for '{}'", query.trim());
                None
            }
            Err(e) => {
                log::warn!("[preview] Preview lookup failed for '{}': {}", query.trim(), e);
                None
            }
        }
    }
}
