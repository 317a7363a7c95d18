use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Authorization code exchange failed: {0}")]
    AuthExchange(String),

    #[error("No refresh token available")]
    NoRefreshToken,

    #[error("Token refresh failed: {0}")]
    RefreshFailed(String),

    /// The token endpoint could not be reached. The session is still valid.
    #[error("Token endpoint unreachable: {0}")]
    AuthNetwork(String),

    #[error("Spotify API error: {status} - {message}")]
    SpotifyApi { status: u16, message: String },

    #[error("Playback command failed: {0}")]
    PlaybackCommand(String),

    #[error("Preview unavailable: {0}")]
    PreviewUnavailable(String),

    #[error("Preview player error: {0}")]
    Player(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        use serde::ser::SerializeStruct;
        let mut state = serializer.serialize_struct("AppError", 2)?;
        state.serialize_field("kind", &self.kind())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

impl AppError {
    pub fn kind(&self) -> &str {
        match self {
            AppError::Http(_) => "http",
            AppError::Json(_) => "json",
            AppError::Url(_) => "url",
            AppError::AuthRequired => "auth_required",
            AppError::AuthExchange(_) => "auth_exchange",
            AppError::NoRefreshToken => "no_refresh_token",
            AppError::RefreshFailed(_) => "refresh_failed",
            AppError::AuthNetwork(_) => "auth_network",
            AppError::SpotifyApi { .. } => "spotify_api",
            AppError::PlaybackCommand(_) => "playback_command",
            AppError::PreviewUnavailable(_) => "preview_unavailable",
            AppError::Player(_) => "player",
            AppError::Storage(_) => "storage",
            AppError::Config(_) => "config",
            AppError::NotFound(_) => "not_found",
            AppError::Io(_) => "io",
        }
    }
}

/// The kind recorded as the session's `last_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthErrorKind {
    /// Code or verifier rejected; the user has to start the login again.
    Exchange,
    NoRefreshToken,
    /// Refresh token rejected (revoked or expired).
    RefreshFailed,
    /// Token endpoint unreachable. Recoverable, the UI may offer a retry.
    Network,
    Storage,
}

/// Cloneable outcome of a failed auth operation, shared between every
/// caller awaiting the same in-flight refresh.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFailure {
    pub kind: AuthErrorKind,
    pub message: String,
}

impl AuthFailure {
    pub fn new(kind: AuthErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Fatal failures end the session; the rest leave it usable.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self.kind,
            AuthErrorKind::Exchange | AuthErrorKind::NoRefreshToken | AuthErrorKind::RefreshFailed
        )
    }
}

impl From<AuthFailure> for AppError {
    fn from(failure: AuthFailure) -> Self {
        match failure.kind {
            AuthErrorKind::Exchange => AppError::AuthExchange(failure.message),
            AuthErrorKind::NoRefreshToken => AppError::NoRefreshToken,
            AuthErrorKind::RefreshFailed => AppError::RefreshFailed(failure.message),
            AuthErrorKind::Network => AppError::AuthNetwork(failure.message),
            AuthErrorKind::Storage => AppError::Storage(failure.message),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;
