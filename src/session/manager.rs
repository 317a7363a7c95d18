//! Token lifecycle: login, restore, proactive refresh and logout.
//!
//! The manager is the only owner of the access/refresh token pair. Other
//! components read a token through [`TokenManager::get_valid_token`] and
//! observe the session through [`TokenManager::subscribe`].

use crate::api::auth::{
    parse_redirect, AuthRedirect, AuthorizationPrompt, PendingAuthorization, TokenEndpoint,
};
use crate::api::models::TokenResponse;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult, AuthErrorKind, AuthFailure};
use crate::session::schedule;
use crate::session::store::{self, KeyValueStore};
use chrono::{DateTime, Utc};
use futures_util::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

type RefreshOutcome = Result<String, AuthFailure>;
type SharedRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

#[derive(Clone)]
struct Credentials {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: DateTime<Utc>,
}

impl Credentials {
    fn from_response(token: TokenResponse, previous_refresh: Option<String>) -> Self {
        let expires_at = schedule::expiry_from(Utc::now(), token.expires_in_secs());
        Self {
            access_token: token.access_token,
            // The endpoint only sends a refresh token when it rotates it.
            refresh_token: token
                .refresh_token
                .filter(|rt| !rt.is_empty())
                .or(previous_refresh),
            expires_at,
        }
    }

    fn is_fresh(&self) -> bool {
        Utc::now() < self.expires_at
    }
}

enum Session {
    Unauthenticated,
    Authenticating,
    Authenticated(Credentials),
    Refreshing(Credentials),
}

impl Session {
    fn credentials(&self) -> Option<&Credentials> {
        match self {
            Session::Authenticated(creds) | Session::Refreshing(creds) => Some(creds),
            Session::Unauthenticated | Session::Authenticating => None,
        }
    }
}

struct SessionState {
    session: Session,
    last_error: Option<AuthErrorKind>,
    /// Bumped on logout so a refresh that was in flight cannot revive the session.
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AuthPhase {
    Unauthenticated,
    Authenticating,
    Authenticated,
    Refreshing,
}

/// Read-only view of the session, safe to hand to any observer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthStatus {
    pub phase: AuthPhase,
    pub expires_at: Option<DateTime<Utc>>,
    pub last_error: Option<AuthErrorKind>,
}

impl AuthStatus {
    pub fn unauthenticated() -> Self {
        Self {
            phase: AuthPhase::Unauthenticated,
            expires_at: None,
            last_error: None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.phase, AuthPhase::Authenticated | AuthPhase::Refreshing)
    }

    pub fn is_refreshing(&self) -> bool {
        self.phase == AuthPhase::Refreshing
    }
}

struct Inner {
    endpoint: Arc<dyn TokenEndpoint>,
    store: Arc<dyn KeyValueStore>,
    config: AppConfig,
    state: RwLock<SessionState>,
    pending: Mutex<Option<PendingAuthorization>>,
    in_flight: Mutex<Option<SharedRefresh>>,
    refresh_timer: Mutex<Option<JoinHandle<()>>>,
    status_tx: watch::Sender<AuthStatus>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.refresh_timer.lock().take() {
            timer.abort();
        }
    }
}

#[derive(Clone)]
pub struct TokenManager {
    inner: Arc<Inner>,
}

impl TokenManager {
    pub fn new(
        config: &AppConfig,
        endpoint: Arc<dyn TokenEndpoint>,
        store: Arc<dyn KeyValueStore>,
    ) -> Self {
        let (status_tx, _) = watch::channel(AuthStatus::unauthenticated());
        Self {
            inner: Arc::new(Inner {
                endpoint,
                store,
                config: config.clone(),
                state: RwLock::new(SessionState {
                    session: Session::Unauthenticated,
                    last_error: None,
                    epoch: 0,
                }),
                pending: Mutex::new(None),
                in_flight: Mutex::new(None),
                refresh_timer: Mutex::new(None),
                status_tx,
            }),
        }
    }

    pub fn status(&self) -> AuthStatus {
        self.inner.status_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AuthStatus> {
        self.inner.status_tx.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.status().is_authenticated()
    }

    /// Load a previous session from the store. An expired session is
    /// refreshed right away.
    pub async fn restore(&self) -> AuthStatus {
        match self.read_persisted() {
            Ok(Some(creds)) => {
                let expired = !creds.is_fresh();
                log::info!(
                    "Restored session (expires {}, expired={})",
                    creds.expires_at,
                    expired
                );
                let expires_at = creds.expires_at;
                self.update(|state| {
                    state.session = Session::Authenticated(creds);
                    state.last_error = None;
                });
                if expired {
                    if let Err(e) = self.refresh_access_token().await {
                        log::warn!("Refresh of restored session failed: {}", e);
                    }
                } else {
                    self.arm_restored(expires_at);
                }
            }
            Ok(None) => log::info!("No stored session"),
            Err(e) => {
                log::error!("Failed to load session from storage: {}", e);
                self.update(|state| state.last_error = Some(AuthErrorKind::Storage));
            }
        }
        self.status()
    }

    fn read_persisted(&self) -> AppResult<Option<Credentials>> {
        let store = &self.inner.store;
        let access = store.get(store::ACCESS_TOKEN)?.filter(|t| !t.is_empty());
        let refresh = store.get(store::REFRESH_TOKEN)?.filter(|t| !t.is_empty());
        let expiration = store.get(store::TOKEN_EXPIRATION)?;

        let (Some(access_token), Some(refresh_token)) = (access, refresh) else {
            return Ok(None);
        };
        // Unreadable expiry counts as already expired.
        let expires_at = expiration
            .as_deref()
            .and_then(schedule::from_epoch_ms)
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

        Ok(Some(Credentials {
            access_token,
            refresh_token: Some(refresh_token),
            expires_at,
        }))
    }

    /// Start an authorization request and return the URL to open in the browser.
    pub fn begin_login(&self) -> String {
        let pending = PendingAuthorization::new(&self.inner.config);
        let url = pending.url.clone();
        *self.inner.pending.lock() = Some(pending);
        self.update(|state| {
            state.last_error = None;
            if state.session.credentials().is_none() {
                state.session = Session::Authenticating;
            }
        });
        url
    }

    /// Interactive login through the platform's browser auth session.
    pub async fn login(&self, prompt: &dyn AuthorizationPrompt) -> AppResult<()> {
        let url = self.begin_login();
        let redirect = match prompt.authorize(&url).await {
            Ok(redirect) => redirect,
            Err(e) => {
                log::warn!("Authorization prompt failed: {}", e);
                self.inner.pending.lock().take();
                self.fail_login(AuthErrorKind::Exchange);
                return Err(e);
            }
        };
        self.complete_login(&redirect).await
    }

    /// Finish a login from the redirect URL the browser came back with.
    pub async fn complete_login(&self, redirect_url: &str) -> AppResult<()> {
        let pending = self.inner.pending.lock().clone();
        let Some(pending) = pending else {
            self.fail_login(AuthErrorKind::Exchange);
            return Err(AppError::AuthExchange(
                "No authorization request is pending".into(),
            ));
        };

        let redirect = parse_redirect(redirect_url).inspect_err(|_| {
            self.fail_login(AuthErrorKind::Exchange);
        })?;

        match redirect {
            AuthRedirect::Denied { error } => {
                self.inner.pending.lock().take();
                self.fail_login(AuthErrorKind::Exchange);
                Err(AppError::AuthExchange(format!("Authorization denied: {}", error)))
            }
            AuthRedirect::Code { state, .. } if state.as_deref() != Some(pending.state.as_str()) => {
                self.inner.pending.lock().take();
                self.fail_login(AuthErrorKind::Exchange);
                Err(AppError::AuthExchange(
                    "Redirect state does not match the pending request".into(),
                ))
            }
            AuthRedirect::Code { code, .. } => {
                self.exchange_code_for_token(&code, &pending.pkce.verifier)
                    .await
            }
        }
    }

    /// Trade an authorization code for a token pair. The verifier has to be
    /// the one generated for the pending request.
    pub async fn exchange_code_for_token(&self, code: &str, code_verifier: &str) -> AppResult<()> {
        if code.is_empty() || code_verifier.is_empty() {
            self.fail_login(AuthErrorKind::Exchange);
            return Err(AppError::AuthExchange(
                "Code and code verifier must not be empty".into(),
            ));
        }

        let verifier_matches = self
            .inner
            .pending
            .lock()
            .as_ref()
            .is_some_and(|p| p.pkce.verifier == code_verifier);
        if !verifier_matches {
            self.fail_login(AuthErrorKind::Exchange);
            return Err(AppError::AuthExchange(
                "Code verifier does not match the pending authorization request".into(),
            ));
        }

        let token = match self.inner.endpoint.exchange_code(code, code_verifier).await {
            Ok(token) => token,
            Err(e) => {
                let kind = classify(&e, AuthErrorKind::Exchange);
                if kind != AuthErrorKind::Network {
                    // Codes are single use; a rejected one cannot be retried.
                    self.inner.pending.lock().take();
                }
                log::error!("Token exchange failed: {}", e);
                self.fail_login(kind);
                return Err(e);
            }
        };

        let creds = Credentials::from_response(token, None);
        let persisted = self.persist_all(&creds);
        self.inner.pending.lock().take();

        let expires_at = creds.expires_at;
        self.update(|state| {
            state.session = Session::Authenticated(creds);
            state.last_error = persisted.err();
        });
        self.arm_issued(expires_at);
        log::info!("Login complete, token valid until {}", expires_at);
        Ok(())
    }

    fn persist_all(&self, creds: &Credentials) -> Result<(), AuthErrorKind> {
        let expiration = schedule::to_epoch_ms(creds.expires_at).to_string();
        let entries = [
            (store::ACCESS_TOKEN, creds.access_token.as_str()),
            (
                store::REFRESH_TOKEN,
                creds.refresh_token.as_deref().unwrap_or(""),
            ),
            (store::TOKEN_EXPIRATION, expiration.as_str()),
        ];
        self.inner.store.set_many(&entries).map_err(|e| {
            log::error!("Failed to persist session: {}", e);
            AuthErrorKind::Storage
        })
    }

    fn persist_refreshed(&self, creds: &Credentials, rotated: bool) -> Result<(), AuthErrorKind> {
        let expiration = schedule::to_epoch_ms(creds.expires_at).to_string();
        let mut entries = vec![
            (store::ACCESS_TOKEN, creds.access_token.as_str()),
            (store::TOKEN_EXPIRATION, expiration.as_str()),
        ];
        if rotated {
            if let Some(rt) = creds.refresh_token.as_deref() {
                entries.push((store::REFRESH_TOKEN, rt));
            }
        }
        self.inner.store.set_many(&entries).map_err(|e| {
            log::error!("Failed to persist refreshed token: {}", e);
            AuthErrorKind::Storage
        })
    }

    fn fail_login(&self, kind: AuthErrorKind) {
        self.update(|state| {
            state.last_error = Some(kind);
            if matches!(state.session, Session::Authenticating) {
                state.session = Session::Unauthenticated;
            }
        });
    }

    /// Refresh the access token. Callers arriving while a refresh is in
    /// flight share its outcome instead of issuing another request.
    pub async fn refresh_access_token(&self) -> AppResult<String> {
        let refresh = {
            let mut slot = self.inner.in_flight.lock();
            match slot.as_ref() {
                Some(in_flight) => in_flight.clone(),
                None => {
                    let manager = self.clone();
                    let refresh = async move {
                        let outcome = manager.run_refresh().await;
                        manager.inner.in_flight.lock().take();
                        outcome
                    }
                    .boxed()
                    .shared();
                    *slot = Some(refresh.clone());
                    refresh
                }
            }
        };
        refresh.await.map_err(AppError::from)
    }

    async fn run_refresh(&self) -> RefreshOutcome {
        let (creds, epoch) = {
            let state = self.inner.state.read();
            (state.session.credentials().cloned(), state.epoch)
        };
        let Some(creds) = creds else {
            return Err(AuthFailure::new(
                AuthErrorKind::NoRefreshToken,
                "Not logged in",
            ));
        };
        let Some(refresh_token) = creds.refresh_token.clone() else {
            log::warn!("Refresh requested without a refresh token, logging out");
            self.logout();
            self.update(|state| state.last_error = Some(AuthErrorKind::NoRefreshToken));
            return Err(AuthFailure::new(
                AuthErrorKind::NoRefreshToken,
                "No refresh token available",
            ));
        };

        self.update(|state| state.session = Session::Refreshing(creds.clone()));
        log::info!("Refreshing access token");

        let result = self.inner.endpoint.refresh(&refresh_token).await;

        if self.inner.state.read().epoch != epoch {
            log::info!("Session ended while refreshing, discarding result");
            return Err(AuthFailure::new(
                AuthErrorKind::RefreshFailed,
                "Session ended during refresh",
            ));
        }

        match result {
            Ok(token) => {
                let rotated = token.refresh_token.as_deref().is_some_and(|rt| !rt.is_empty());
                let fresh = Credentials::from_response(token, creds.refresh_token);
                let persisted = self.persist_refreshed(&fresh, rotated);
                let access_token = fresh.access_token.clone();
                let expires_at = fresh.expires_at;
                self.update(|state| {
                    state.session = Session::Authenticated(fresh);
                    state.last_error = persisted.err();
                });
                self.arm_issued(expires_at);
                log::info!("Access token refreshed, valid until {}", expires_at);
                Ok(access_token)
            }
            Err(e) => {
                let failure = AuthFailure::new(classify(&e, AuthErrorKind::RefreshFailed), e.to_string());
                if failure.is_fatal() {
                    log::warn!("Refresh rejected ({}), logging out", e);
                    self.logout();
                } else {
                    log::warn!("Refresh failed, keeping session: {}", e);
                    self.update(|state| state.session = Session::Authenticated(creds));
                }
                self.update(|state| state.last_error = Some(failure.kind));
                Err(failure)
            }
        }
    }

    /// The current access token if it has not expired, otherwise the result
    /// of a refresh. `None` when no usable token can be produced.
    pub async fn get_valid_token(&self) -> Option<String> {
        let current = self
            .inner
            .state
            .read()
            .session
            .credentials()
            .filter(|creds| creds.is_fresh())
            .map(|creds| creds.access_token.clone());
        if current.is_some() {
            return current;
        }
        if !self.is_authenticated() {
            return None;
        }
        match self.refresh_access_token().await {
            Ok(token) => Some(token),
            Err(e) => {
                log::warn!("No valid token: {}", e);
                None
            }
        }
    }

    /// End the session: cancel the refresh timer, delete every persisted
    /// key (each independently) and reset to unauthenticated.
    pub fn logout(&self) {
        self.cancel_refresh_timer();
        self.inner.pending.lock().take();

        for key in store::TOKEN_KEYS {
            if let Err(e) = self.inner.store.delete(key) {
                log::warn!("Failed to delete {}: {}", key, e);
            }
        }

        self.update(|state| {
            state.session = Session::Unauthenticated;
            state.last_error = None;
            state.epoch += 1;
        });
        log::info!("Logged out");
    }

    /// Teardown: stop the proactive refresh timer.
    pub fn shutdown(&self) {
        self.cancel_refresh_timer();
    }

    /// Arm for a session loaded from storage. An expiry inside the threshold
    /// refreshes right away.
    fn arm_restored(&self, expires_at: DateTime<Utc>) {
        let delay = schedule::refresh_delay(
            Utc::now(),
            expires_at,
            self.inner.config.refresh_threshold(),
        );
        self.arm_refresh_timer(delay);
    }

    /// Arm for a token the endpoint just issued. Never zero, so a short
    /// token lifetime cannot chain refreshes back to back.
    fn arm_issued(&self, expires_at: DateTime<Utc>) {
        let delay = schedule::next_refresh_delay(
            Utc::now(),
            expires_at,
            self.inner.config.refresh_threshold(),
        );
        self.arm_refresh_timer(delay);
    }

    fn arm_refresh_timer(&self, delay: Duration) {
        log::debug!("Proactive refresh in {:?}", delay);
        // Fixed now: the countdown must not depend on when the task first runs.
        let deadline = tokio::time::Instant::now() + delay;

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = tokio::spawn(async move {
            tokio::time::sleep_until(deadline).await;
            let Some(inner) = weak.upgrade() else {
                return;
            };
            let manager = TokenManager { inner };
            // Run the refresh outside the timer task: a successful refresh
            // re-arms (and aborts) this task.
            tokio::spawn(async move {
                if let Err(e) = manager.refresh_access_token().await {
                    log::warn!("Proactive refresh failed: {}", e);
                }
            });
        });

        if let Some(previous) = self.inner.refresh_timer.lock().replace(timer) {
            previous.abort();
        }
    }

    fn cancel_refresh_timer(&self) {
        if let Some(timer) = self.inner.refresh_timer.lock().take() {
            timer.abort();
        }
    }

    fn update(&self, f: impl FnOnce(&mut SessionState)) {
        let status = {
            let mut state = self.inner.state.write();
            f(&mut state);
            let (phase, expires_at) = match &state.session {
                Session::Unauthenticated => (AuthPhase::Unauthenticated, None),
                Session::Authenticating => (AuthPhase::Authenticating, None),
                Session::Authenticated(c) => (AuthPhase::Authenticated, Some(c.expires_at)),
                Session::Refreshing(c) => (AuthPhase::Refreshing, Some(c.expires_at)),
            };
            AuthStatus {
                phase,
                expires_at,
                last_error: state.last_error,
            }
        };
        self.inner.status_tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
    }
}

/// Transport failures are recoverable; anything the server answered is not.
fn classify(error: &AppError, rejected: AuthErrorKind) -> AuthErrorKind {
    match error {
        AppError::Http(_) | AppError::Io(_) => AuthErrorKind::Network,
        _ => rejected,
    }
}
