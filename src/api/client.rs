use crate::api::models::ApiErrorBody;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use crate::session::TokenManager;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

const EXPIRED_TOKEN_MESSAGE: &str = "access token expired";

pub struct SpotifyClient {
    http: reqwest::Client,
    base_url: String,
    tokens: TokenManager,
}

/// A failed response, kept structured so the expiry signal can be checked
/// without re-reading the body.
struct Rejection {
    status: StatusCode,
    message: String,
}

impl Rejection {
    fn is_token_expired(&self) -> bool {
        self.status == StatusCode::UNAUTHORIZED
            || self.message.to_lowercase().contains(EXPIRED_TOKEN_MESSAGE)
    }

    fn into_error(self) -> AppError {
        match self.status {
            StatusCode::UNAUTHORIZED => AppError::AuthRequired,
            StatusCode::NOT_FOUND => AppError::NotFound(self.message),
            status => AppError::SpotifyApi {
                status: status.as_u16(),
                message: self.message,
            },
        }
    }
}

impl SpotifyClient {
    pub fn new(config: &AppConfig, tokens: TokenManager) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("SpotifyRemote/0.1.0")
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    /// GET a JSON resource. `None` when the API answers 204 or an empty body.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> AppResult<Option<T>> {
        let body = self.send(Method::GET, path, None::<&()>).await?;
        match body {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub async fn put<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> AppResult<()> {
        self.send(Method::PUT, path, body).await.map(|_| ())
    }

    pub async fn post<B: Serialize + ?Sized>(&self, path: &str, body: Option<&B>) -> AppResult<()> {
        self.send(Method::POST, path, body).await.map(|_| ())
    }

    /// Issue an authenticated request. On the expiry signal the token is
    /// refreshed once and the request retried once; a second failure is
    /// returned as is.
    async fn send<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        body: Option<&B>,
    ) -> AppResult<Option<Vec<u8>>> {
        let token = self
            .tokens
            .get_valid_token()
            .await
            .ok_or(AppError::AuthRequired)?;

        match self.attempt(&method, path, body, &token).await? {
            Ok(bytes) => Ok(bytes),
            Err(rejection) if rejection.is_token_expired() => {
                log::info!(
                    "[client] {} {} rejected with expired token, refreshing",
                    method,
                    path
                );
                let token = self.tokens.refresh_access_token().await?;
                match self.attempt(&method, path, body, &token).await? {
                    Ok(bytes) => Ok(bytes),
                    Err(rejection) => Err(rejection.into_error()),
                }
            }
            Err(rejection) => Err(rejection.into_error()),
        }
    }

    async fn attempt<B: Serialize + ?Sized>(
        &self,
        method: &Method,
        path: &str,
        body: Option<&B>,
        token: &str,
    ) -> AppResult<Result<Option<Vec<u8>>, Rejection>> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self
            .http
            .request(method.clone(), &url)
            .headers(auth_headers(token)?);
        request = match body {
            Some(body) => request.json(body),
            // Spotify wants a Content-Length on body-less PUT/POST.
            None if *method != Method::GET => request.body(""),
            None => request,
        };

        let response = request.send().await?;
        let status = response.status();
        let bytes = response.bytes().await?;

        if !status.is_success() {
            let message = serde_json::from_slice::<ApiErrorBody>(&bytes)
                .map(|body| body.error.message)
                .ok()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| {
                    let text = String::from_utf8_lossy(&bytes).trim().to_string();
                    if text.is_empty() {
                        status.canonical_reason().unwrap_or("Unknown error").to_string()
                    } else {
                        text
                    }
                });
            log::debug!("[client] {} {} -> {}: {}", method, path, status, message);
            return Ok(Err(Rejection { status, message }));
        }

        if status == StatusCode::NO_CONTENT || bytes.iter().all(u8::is_ascii_whitespace) {
            return Ok(Ok(None));
        }
        Ok(Ok(Some(bytes.to_vec())))
    }
}

fn auth_headers(token: &str) -> AppResult<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
    let auth_value = format!("Bearer {}", token);
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&auth_value).map_err(|e| AppError::Config(e.to_string()))?,
    );
    Ok(headers)
}
