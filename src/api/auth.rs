use crate::api::models::{OAuthErrorBody, TokenResponse};
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};
use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone)]
pub struct PkceChallenge {
    pub verifier: String,
    pub challenge: String,
}

impl PkceChallenge {
    pub fn generate() -> Self {
        let mut rng = rand::thread_rng();
        // 64 random bytes encode to an 86 character verifier (RFC 7636 allows 43..=128).
        let verifier_bytes: Vec<u8> = (0..64).map(|_| rng.gen::<u8>()).collect();
        let verifier = URL_SAFE_NO_PAD.encode(&verifier_bytes);
        let challenge = Self::challenge_for(&verifier);

        Self {
            verifier,
            challenge,
        }
    }

    /// S256 transform of a verifier.
    pub fn challenge_for(verifier: &str) -> String {
        let digest = Sha256::digest(verifier.as_bytes());
        URL_SAFE_NO_PAD.encode(digest)
    }
}

/// A login the user has been sent to the browser for and that has not come back yet.
#[derive(Debug, Clone)]
pub struct PendingAuthorization {
    pub pkce: PkceChallenge,
    pub state: String,
    pub url: String,
}

impl PendingAuthorization {
    pub fn new(config: &AppConfig) -> Self {
        let pkce = PkceChallenge::generate();
        let state = uuid::Uuid::new_v4().simple().to_string();
        let url = build_auth_url(config, &pkce.challenge, &state);
        Self { pkce, state, url }
    }
}

pub fn build_auth_url(config: &AppConfig, code_challenge: &str, state: &str) -> String {
    let scopes = config.scopes.join(" ");

    let url = format!(
        "{}?response_type=code&client_id={}&redirect_uri={}&scope={}&code_challenge_method=S256&code_challenge={}&state={}",
        config.auth_endpoint,
        urlencoding::encode(&config.client_id),
        urlencoding::encode(&config.redirect_uri),
        urlencoding::encode(&scopes),
        code_challenge,
        state
    );
    log::debug!("Auth URL: {}", url);
    url
}

/// What the browser handed back on the redirect URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthRedirect {
    Code { code: String, state: Option<String> },
    Denied { error: String },
}

pub fn parse_redirect(redirect_url: &str) -> AppResult<AuthRedirect> {
    let url = url::Url::parse(redirect_url)?;
    let mut code = None;
    let mut state = None;
    let mut error = None;
    for (key, value) in url.query_pairs() {
        match key.as_ref() {
            "code" => code = Some(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        return Ok(AuthRedirect::Denied { error });
    }
    match code {
        Some(code) if !code.is_empty() => Ok(AuthRedirect::Code { code, state }),
        _ => Err(AppError::AuthExchange(
            "Redirect did not carry an authorization code".into(),
        )),
    }
}

/// Platform browser auth session: opens the authorization URL and resolves
/// with the redirect URL the provider sent the user back to.
#[async_trait]
pub trait AuthorizationPrompt: Send + Sync {
    async fn authorize(&self, auth_url: &str) -> AppResult<String>;
}

/// OAuth2 token endpoint, as seen by the session manager.
#[async_trait]
pub trait TokenEndpoint: Send + Sync {
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AppResult<TokenResponse>;
    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenResponse>;
}

pub struct SpotifyAuthClient {
    http: reqwest::Client,
    client_id: String,
    redirect_uri: String,
    token_endpoint: String,
}

impl SpotifyAuthClient {
    pub fn new(config: &AppConfig) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .user_agent("SpotifyRemote/0.1.0")
            .timeout(config.request_timeout())
            .build()?;

        Ok(Self {
            http,
            client_id: config.client_id.clone(),
            redirect_uri: config.redirect_uri.clone(),
            token_endpoint: config.token_endpoint.clone(),
        })
    }

    async fn post_form(&self, params: &[(&str, &str)]) -> AppResult<Result<TokenResponse, String>> {
        let response = self
            .http
            .post(&self.token_endpoint)
            .form(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            let reason = match serde_json::from_str::<OAuthErrorBody>(&body) {
                Ok(err) => match err.error_description {
                    Some(desc) => format!("{} ({})", err.error, desc),
                    None => err.error,
                },
                Err(_) => format!("HTTP {}: {}", status.as_u16(), body),
            };
            return Ok(Err(reason));
        }

        let token: TokenResponse = response.json().await?;
        Ok(Ok(token))
    }
}

#[async_trait]
impl TokenEndpoint for SpotifyAuthClient {
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> AppResult<TokenResponse> {
        // Public client: PKCE replaces the client secret.
        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("client_id", self.client_id.as_str()),
            ("code_verifier", code_verifier),
        ];

        self.post_form(&params)
            .await?
            .map_err(|reason| AppError::AuthExchange(format!("Token exchange failed: {}", reason)))
    }

    async fn refresh(&self, refresh_token: &str) -> AppResult<TokenResponse> {
        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
            ("client_id", self.client_id.as_str()),
        ];

        self.post_form(&params)
            .await?
            .map_err(AppError::RefreshFailed)
    }
}
