//! Merges the polled remote playback state with the local preview player
//! into one [`PlaybackView`], and routes commands to whichever source is
//! audible.

use crate::api::player::PlaybackApi;
use crate::api::previews::PreviewResolver;
use crate::audio::player::{PlayerStatus, PreviewMetadata, PreviewPlayer, PREVIEW_DURATION_SECS};
use crate::audio::preview::PreviewSlot;
use crate::config::AppConfig;
use crate::error::AppError;
use crate::events::{EventHub, Notification};
use crate::playback::view::{NowPlaying, PlaybackView, PreviewOverlay};
use crate::session::AuthStatus;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Progress this close to the end counts as finished: play restarts the track.
const TAIL_TOLERANCE_MS: u64 = 1000;

/// A request from a track list to audition a clip.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PreviewRequest {
    pub track_id: String,
    pub title: String,
    pub artist: String,
    pub artist_id: Option<String>,
    pub artwork_url: Option<String>,
    /// Catalog preview URL, if the catalog has one.
    pub preview_url: Option<String>,
}

struct Inner {
    api: Arc<dyn PlaybackApi>,
    auth: watch::Receiver<AuthStatus>,
    preview: PreviewSlot,
    resolver: Arc<dyn PreviewResolver>,
    events: EventHub,
    poll_interval: Duration,
    backoff_max: Duration,
    view_tx: watch::Sender<PlaybackView>,
    cancel: CancellationToken,
    poll_task: Mutex<Option<JoinHandle<()>>>,
}

#[derive(Clone)]
pub struct PlaybackReconciler {
    inner: Arc<Inner>,
}

impl PlaybackReconciler {
    pub fn new(
        config: &AppConfig,
        api: Arc<dyn PlaybackApi>,
        auth: watch::Receiver<AuthStatus>,
        player: Arc<dyn PreviewPlayer>,
        resolver: Arc<dyn PreviewResolver>,
        events: EventHub,
    ) -> Self {
        let (view_tx, _) = watch::channel(PlaybackView::default());
        Self {
            inner: Arc::new(Inner {
                api,
                auth,
                preview: PreviewSlot::new(player),
                resolver,
                events,
                poll_interval: config.poll_interval(),
                backoff_max: config.poll_backoff_max(),
                view_tx,
                cancel: CancellationToken::new(),
                poll_task: Mutex::new(None),
            }),
        }
    }

    pub fn view(&self) -> PlaybackView {
        self.inner.view_tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<PlaybackView> {
        self.inner.view_tx.subscribe()
    }

    pub fn display(&self) -> Option<NowPlaying> {
        self.inner.view_tx.borrow().now_playing()
    }

    fn is_authenticated(&self) -> bool {
        self.inner.auth.borrow().is_authenticated()
    }

    fn update_view(&self, f: impl FnOnce(&mut PlaybackView)) {
        self.inner.view_tx.send_if_modified(|view| {
            let before = view.clone();
            f(view);
            *view != before
        });
    }

    /// Poll the remote endpoint once. Skipped while unauthenticated.
    pub async fn refresh(&self) {
        self.poll().await;
    }

    /// Returns false when the fetch failed. Failures reset the remote
    /// fields to idle and are never surfaced to the user.
    async fn poll(&self) -> bool {
        if !self.is_authenticated() {
            return true;
        }
        match self.inner.api.currently_playing().await {
            Ok(snapshot) => {
                self.update_view(|view| view.apply_remote(snapshot));
                true
            }
            Err(e) => {
                log::debug!("[poll] Fetch failed, treating as idle: {}", e);
                self.update_view(PlaybackView::clear_remote);
                false
            }
        }
    }

    fn backoff_delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return self.inner.poll_interval;
        }
        self.inner
            .poll_interval
            .saturating_mul(1u32 << failures.min(16))
            .min(self.inner.backoff_max)
    }

    /// Start the poll loop: one fetch right away, then one per interval
    /// while authenticated. Calling it again while running is a no-op.
    pub fn start_polling(&self) {
        let mut slot = self.inner.poll_task.lock();
        if slot.as_ref().is_some_and(|task| !task.is_finished()) {
            return;
        }
        let reconciler = self.clone();
        *slot = Some(tokio::spawn(async move { reconciler.poll_loop().await }));
        log::info!(
            "[poll] Started, interval {:?}",
            self.inner.poll_interval
        );
    }

    async fn poll_loop(self) {
        let cancel = self.inner.cancel.clone();
        let mut auth = self.inner.auth.clone();
        let mut was_authenticated = false;
        let mut failures: u32 = 0;

        loop {
            let authenticated = auth.borrow_and_update().is_authenticated();
            if was_authenticated && !authenticated {
                self.on_logged_out().await;
            }
            was_authenticated = authenticated;

            let delay = if authenticated {
                if self.poll().await {
                    failures = 0;
                } else {
                    failures = failures.saturating_add(1);
                    if failures > 1 {
                        log::debug!("[poll] {} consecutive failures", failures);
                    }
                }
                self.backoff_delay(failures)
            } else {
                failures = 0;
                self.inner.poll_interval
            };
            let deadline = Instant::now() + delay;

            // Sleep until the deadline, waking early only when the session
            // flips between authenticated and not.
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep_until(deadline) => break,
                    changed = auth.changed() => {
                        if changed.is_err() {
                            tokio::select! {
                                _ = cancel.cancelled() => return,
                                _ = tokio::time::sleep_until(deadline) => break,
                            }
                        }
                        if auth.borrow().is_authenticated() != was_authenticated {
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn on_logged_out(&self) {
        log::info!("[poll] Session ended, clearing playback");
        if let Err(e) = self.inner.preview.stop().await {
            log::warn!("[preview] Failed to stop preview on logout: {}", e);
        }
        self.update_view(|view| {
            view.clear_remote();
            view.preview = None;
        });
    }

    fn command_failed(&self, command: &str, error: AppError) {
        log::error!("[{}] Command failed: {}", command, error);
        self.inner.events.notify(Notification::error(
            "playback_command",
            format!("Could not {}: {}", command, error),
        ));
    }

    /// Start or resume remote playback. Any preview is stopped first.
    pub async fn play(&self) {
        if self.view().is_preview_playing() {
            self.stop_preview().await;
        }

        let view = self.view();
        let Some(uri) = view
            .track
            .as_ref()
            .map(|track| track.uri.clone())
            .filter(|uri| !uri.is_empty())
        else {
            self.command_failed("play", AppError::PlaybackCommand("No track to play".into()));
            return;
        };

        let finished = view.progress_ms >= view.duration_ms.saturating_sub(TAIL_TOLERANCE_MS);
        let uris = finished.then(|| vec![uri]);
        log::info!("[play] restart={}", finished);

        if let Err(e) = self.inner.api.play(uris).await {
            self.command_failed("play", e);
        }
        self.refresh().await;
    }

    pub async fn pause(&self) {
        match self.inner.api.pause().await {
            Ok(()) => self.update_view(|view| view.is_playing = false),
            Err(e) => self.command_failed("pause", e),
        }
        self.refresh().await;
    }

    pub async fn next(&self) {
        if let Err(e) = self.inner.api.next().await {
            self.command_failed("skip to next", e);
        }
        self.refresh().await;
    }

    pub async fn previous(&self) {
        if let Err(e) = self.inner.api.previous().await {
            self.command_failed("skip to previous", e);
        }
        self.refresh().await;
    }

    /// Play a clip on the local player, overlaying the remote view.
    pub async fn start_preview(&self, request: PreviewRequest) {
        let catalog_url = request.preview_url.clone().filter(|url| !url.is_empty());
        let url = match catalog_url {
            Some(url) => Some(url),
            None => {
                self.inner
                    .resolver
                    .resolve(&request.artist, &request.title)
                    .await
            }
        };

        let Some(url) = url else {
            self.preview_failed(AppError::PreviewUnavailable(format!(
                "No preview for {}",
                request.title
            )))
            .await;
            return;
        };

        let metadata = PreviewMetadata {
            id: request.track_id.clone(),
            title: request.title.clone(),
            artist: request.artist.clone(),
            artwork: request.artwork_url.clone(),
            duration_secs: PREVIEW_DURATION_SECS,
        };

        log::info!("[preview] Starting {} ({})", request.track_id, url);
        match self.inner.preview.start(&url, &metadata).await {
            Ok(()) => self.update_view(|view| {
                view.preview = Some(PreviewOverlay {
                    track_id: request.track_id,
                    title: request.title,
                    artist: request.artist,
                    artist_id: request.artist_id,
                    artwork_url: request.artwork_url,
                    is_playing: true,
                    position_ms: 0,
                    duration_ms: secs_to_ms(PREVIEW_DURATION_SECS),
                })
            }),
            Err(e) => {
                self.preview_failed(AppError::PreviewUnavailable(e.to_string()))
                    .await
            }
        }
    }

    async fn preview_failed(&self, error: AppError) {
        log::warn!("[preview] {}", error);
        if let Err(e) = self.inner.preview.stop().await {
            log::warn!("[preview] Failed to stop player: {}", e);
        }
        self.update_view(|view| view.preview = None);
        self.inner
            .events
            .notify(Notification::error(error.kind(), error.to_string()));
    }

    /// Stop the clip; the remote view shows again.
    pub async fn stop_preview(&self) {
        if let Err(e) = self.inner.preview.stop().await {
            log::error!("[preview] Error stopping preview: {}", e);
        }
        self.update_view(|view| view.preview = None);
    }

    /// Pause an audible clip, otherwise play it, from the top when it had
    /// run to the end.
    pub async fn toggle_preview(&self) {
        let Some(overlay) = self.view().preview else {
            return;
        };

        if overlay.is_playing {
            match self.inner.preview.pause().await {
                Ok(()) => self.set_preview_playing(false, None),
                Err(e) => log::error!("[preview] Pause failed: {}", e),
            }
            return;
        }

        let at_end = overlay.position_ms + TAIL_TOLERANCE_MS >= overlay.duration_ms;
        if at_end {
            if let Err(e) = self.inner.preview.seek_to(0).await {
                log::error!("[preview] Seek failed: {}", e);
                return;
            }
        }
        match self.inner.preview.resume().await {
            Ok(()) => self.set_preview_playing(true, at_end.then_some(0)),
            Err(e) => log::error!("[preview] Play failed: {}", e),
        }
    }

    fn set_preview_playing(&self, playing: bool, position_ms: Option<u64>) {
        self.update_view(|view| {
            if let Some(preview) = view.preview.as_mut() {
                preview.is_playing = playing;
                if let Some(position_ms) = position_ms {
                    preview.position_ms = position_ms;
                }
            }
        });
    }

    /// Feed from the local player. Positions arrive in seconds and are
    /// stored in milliseconds.
    pub fn on_player_status(&self, status: PlayerStatus) {
        self.update_view(|view| {
            let Some(preview) = view.preview.as_mut() else {
                return;
            };
            preview.is_playing = status.state.is_audible();
            preview.position_ms = secs_to_ms(status.position_secs);
            if status.duration_secs > 0.0 {
                preview.duration_ms = secs_to_ms(status.duration_secs);
            }
        });
    }

    /// Pull the player's status for hosts that do not push a feed.
    pub async fn sync_preview_status(&self) {
        if self.view().preview.is_none() {
            return;
        }
        match self.inner.preview.status().await {
            Ok(status) => self.on_player_status(status),
            Err(e) => log::debug!("[preview] Status read failed: {}", e),
        }
    }

    /// Stop the poll loop and unload any clip.
    pub async fn shutdown(&self) {
        self.inner.cancel.cancel();
        if let Some(task) = self.inner.poll_task.lock().take() {
            task.abort();
        }
        if let Err(e) = self.inner.preview.stop().await {
            log::warn!("[preview] Failed to stop preview on shutdown: {}", e);
        }
        log::info!("[poll] Stopped");
    }
}

fn secs_to_ms(secs: f64) -> u64 {
    if secs.is_finite() && secs > 0.0 {
        (secs * 1000.0).round() as u64
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::models::CurrentlyPlaying;
    use crate::audio::player::{MockPreviewPlayer, PlayerState};
    use crate::error::AppResult;
    use crate::session::{AuthPhase, AuthStatus};
    use async_trait::async_trait;
    use mockall::predicate::*;
    use mockall::Sequence;
    use std::sync::atomic::{AtomicBool, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    enum Call {
        Fetch,
        Play(Option<Vec<String>>),
        Pause,
        Next,
        Previous,
    }

    #[derive(Default)]
    struct FakeApi {
        calls: Mutex<Vec<Call>>,
        snapshot: Mutex<Option<serde_json::Value>>,
        fail_fetch: AtomicBool,
        fail_commands: AtomicBool,
    }

    impl FakeApi {
        fn playing(progress_ms: u64, duration_ms: u64) -> Self {
            let api = Self::default();
            *api.snapshot.lock() = Some(serde_json::json!({
                "is_playing": false,
                "progress_ms": progress_ms,
                "item": {
                    "id": "remote-1",
                    "name": "Remote Song",
                    "uri": "spotify:track:remote-1",
                    "duration_ms": duration_ms,
                    "artists": [{"id": "ra", "name": "Remote Artist"}],
                    "album": {"images": [{"url": "https://img/remote"}]}
                }
            }));
            api
        }

        fn calls(&self) -> Vec<Call> {
            self.calls.lock().clone()
        }

        fn fetches(&self) -> usize {
            self.calls().iter().filter(|c| **c == Call::Fetch).count()
        }

        fn command(&self, call: Call) -> AppResult<()> {
            self.calls.lock().push(call);
            if self.fail_commands.load(Ordering::SeqCst) {
                return Err(AppError::SpotifyApi {
                    status: 404,
                    message: "No active device found".into(),
                });
            }
            Ok(())
        }
    }

    #[async_trait]
    impl PlaybackApi for FakeApi {
        async fn currently_playing(&self) -> AppResult<Option<CurrentlyPlaying>> {
            self.calls.lock().push(Call::Fetch);
            if self.fail_fetch.load(Ordering::SeqCst) {
                return Err(AppError::SpotifyApi {
                    status: 503,
                    message: "Service unavailable".into(),
                });
            }
            let snapshot = self.snapshot.lock().clone();
            Ok(snapshot.map(|value| serde_json::from_value(value).unwrap()))
        }

        async fn play(&self, uris: Option<Vec<String>>) -> AppResult<()> {
            self.command(Call::Play(uris))
        }

        async fn pause(&self) -> AppResult<()> {
            self.command(Call::Pause)
        }

        async fn next(&self) -> AppResult<()> {
            self.command(Call::Next)
        }

        async fn previous(&self) -> AppResult<()> {
            self.command(Call::Previous)
        }
    }

    struct FixedResolver(Option<&'static str>);

    #[async_trait]
    impl PreviewResolver for FixedResolver {
        async fn resolve(&self, _artist: &str, _title: &str) -> Option<String> {
            self.0.map(String::from)
        }
    }

    fn authenticated() -> AuthStatus {
        AuthStatus {
            phase: AuthPhase::Authenticated,
            expires_at: None,
            last_error: None,
        }
    }

    struct Harness {
        reconciler: PlaybackReconciler,
        api: Arc<FakeApi>,
        auth_tx: watch::Sender<AuthStatus>,
        events: EventHub,
    }

    fn harness(api: FakeApi, player: MockPreviewPlayer, resolver: FixedResolver) -> Harness {
        let api = Arc::new(api);
        let (auth_tx, auth_rx) = watch::channel(authenticated());
        let events = EventHub::new();
        let reconciler = PlaybackReconciler::new(
            &AppConfig::default(),
            api.clone(),
            auth_rx,
            Arc::new(player),
            Arc::new(resolver),
            events.clone(),
        );
        Harness {
            reconciler,
            api,
            auth_tx,
            events,
        }
    }

    fn lenient_player() -> MockPreviewPlayer {
        let mut player = MockPreviewPlayer::new();
        player.expect_setup().returning(|| Ok(()));
        player.expect_load().returning(|_, _| Ok(()));
        player.expect_play().returning(|| Ok(()));
        player.expect_pause().returning(|| Ok(()));
        player.expect_stop().returning(|| Ok(()));
        player.expect_seek_to().returning(|_| Ok(()));
        player
    }

    fn preview(id: &str) -> PreviewRequest {
        PreviewRequest {
            track_id: id.into(),
            title: format!("Clip {}", id),
            artist: "Clip Artist".into(),
            artist_id: Some("ca".into()),
            artwork_url: Some(format!("https://img/{}", id)),
            preview_url: Some(format!("https://cdn/{}.mp3", id)),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn preview_overlays_remote_and_restores_it() {
        let h = harness(
            FakeApi::playing(10_000, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.reconciler.refresh().await;
        let remote_track = h.reconciler.view().track.clone();

        h.reconciler.start_preview(preview("p1")).await;

        let view = h.reconciler.view();
        assert!(view.is_preview_playing());
        assert_eq!(view.track, remote_track);
        let shown = h.reconciler.display().unwrap();
        assert_eq!(shown.title, "Clip p1");
        assert_eq!(shown.artwork_url.as_deref(), Some("https://img/p1"));

        h.reconciler.stop_preview().await;

        let shown = h.reconciler.display().unwrap();
        assert!(!h.reconciler.view().is_preview_playing());
        assert_eq!(shown.title, "Remote Song");
        assert_eq!(h.reconciler.view().track, remote_track);
    }

    #[tokio::test]
    async fn second_preview_stops_the_first_before_loading() {
        let mut player = MockPreviewPlayer::new();
        let mut seq = Sequence::new();
        player.expect_setup().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        player
            .expect_load()
            .with(eq("https://cdn/a.mp3"), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        player.expect_play().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        player.expect_stop().times(1).in_sequence(&mut seq).returning(|| Ok(()));
        player
            .expect_load()
            .with(eq("https://cdn/b.mp3"), always())
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        player.expect_play().times(1).in_sequence(&mut seq).returning(|| Ok(()));

        let h = harness(FakeApi::default(), player, FixedResolver(None));
        h.reconciler.start_preview(preview("a")).await;
        h.reconciler.start_preview(preview("b")).await;

        assert_eq!(h.reconciler.view().preview.unwrap().track_id, "b");
    }

    #[tokio::test]
    async fn play_near_the_end_restarts_with_uris() {
        let h = harness(
            FakeApi::playing(199_500, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.reconciler.refresh().await;

        h.reconciler.play().await;

        assert_eq!(
            h.api.calls()[1],
            Call::Play(Some(vec!["spotify:track:remote-1".to_string()]))
        );
        // Re-polled after the command.
        assert_eq!(h.api.calls()[2], Call::Fetch);
    }

    #[tokio::test]
    async fn play_mid_track_resumes_in_place() {
        let h = harness(
            FakeApi::playing(198_000, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.reconciler.refresh().await;

        h.reconciler.play().await;

        assert_eq!(h.api.calls()[1], Call::Play(None));
    }

    #[tokio::test]
    async fn play_stops_an_active_preview_first() {
        let h = harness(
            FakeApi::playing(5_000, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.reconciler.refresh().await;
        h.reconciler.start_preview(preview("p1")).await;

        h.reconciler.play().await;

        assert!(!h.reconciler.view().is_preview_playing());
        assert!(h.api.calls().contains(&Call::Play(None)));
    }

    #[tokio::test]
    async fn play_without_track_notifies_and_sends_nothing() {
        let h = harness(FakeApi::default(), lenient_player(), FixedResolver(None));
        let mut notifications = h.events.subscribe();

        h.reconciler.play().await;

        assert!(!h.api.calls().iter().any(|c| matches!(c, Call::Play(_))));
        assert_eq!(notifications.try_recv().unwrap().kind, "playback_command");
    }

    #[tokio::test]
    async fn fetch_failure_resets_to_idle() {
        let h = harness(
            FakeApi::playing(5_000, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.reconciler.refresh().await;
        assert!(h.reconciler.view().track.is_some());

        h.api.fail_fetch.store(true, Ordering::SeqCst);
        h.reconciler.refresh().await;

        assert_eq!(h.reconciler.view(), PlaybackView::default());
    }

    #[tokio::test]
    async fn command_failure_notifies_and_leaves_view_to_the_poll() {
        let h = harness(
            FakeApi::playing(5_000, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.reconciler.refresh().await;
        h.api.fail_commands.store(true, Ordering::SeqCst);
        let mut notifications = h.events.subscribe();

        h.reconciler.next().await;

        let toast = notifications.try_recv().unwrap();
        assert_eq!(toast.kind, "playback_command");
        assert!(toast.message.contains("No active device"));
        assert_eq!(h.api.calls().last(), Some(&Call::Fetch));
        assert_eq!(h.reconciler.view().track.unwrap().id, "remote-1");
    }

    #[tokio::test]
    async fn pause_flips_is_playing_before_the_repoll() {
        let api = FakeApi::playing(5_000, 200_000);
        let h = harness(api, lenient_player(), FixedResolver(None));
        h.reconciler.update_view(|view| view.is_playing = true);
        h.api.fail_fetch.store(true, Ordering::SeqCst);

        h.reconciler.pause().await;

        assert_eq!(h.api.calls()[0], Call::Pause);
        assert!(!h.reconciler.view().is_playing);
    }

    #[tokio::test]
    async fn missing_preview_url_falls_back_to_resolver() {
        let mut player = MockPreviewPlayer::new();
        player.expect_setup().returning(|| Ok(()));
        player
            .expect_load()
            .with(eq("https://deezer/preview.mp3"), always())
            .times(1)
            .returning(|_, _| Ok(()));
        player.expect_play().returning(|| Ok(()));

        let h = harness(
            FakeApi::default(),
            player,
            FixedResolver(Some("https://deezer/preview.mp3")),
        );
        h.reconciler
            .start_preview(PreviewRequest {
                preview_url: None,
                ..preview("p1")
            })
            .await;

        assert!(h.reconciler.view().is_preview_playing());
    }

    #[tokio::test]
    async fn unresolvable_preview_notifies_and_stays_off() {
        let h = harness(FakeApi::default(), MockPreviewPlayer::new(), FixedResolver(None));
        let mut notifications = h.events.subscribe();

        h.reconciler
            .start_preview(PreviewRequest {
                preview_url: None,
                ..preview("p1")
            })
            .await;

        assert!(!h.reconciler.view().is_preview_playing());
        assert_eq!(notifications.try_recv().unwrap().kind, "preview_unavailable");
    }

    #[tokio::test]
    async fn player_feed_is_converted_to_milliseconds() {
        let h = harness(FakeApi::default(), lenient_player(), FixedResolver(None));
        h.reconciler.start_preview(preview("p1")).await;

        h.reconciler.on_player_status(PlayerStatus {
            state: PlayerState::Playing,
            position_secs: 12.5,
            duration_secs: 29.8,
        });

        let shown = h.reconciler.display().unwrap();
        assert_eq!(shown.progress_ms, 12_500);
        assert_eq!(shown.duration_ms, 29_800);
        assert!(shown.is_playing);
    }

    #[tokio::test]
    async fn pulled_status_updates_the_overlay() {
        let mut player = lenient_player();
        player.expect_status().times(1).returning(|| {
            Ok(PlayerStatus {
                state: PlayerState::Paused,
                position_secs: 4.25,
                duration_secs: 30.0,
            })
        });

        let h = harness(FakeApi::default(), player, FixedResolver(None));
        // Nothing loaded: the player is not asked.
        h.reconciler.sync_preview_status().await;
        h.reconciler.start_preview(preview("p1")).await;
        h.reconciler.sync_preview_status().await;

        let overlay = h.reconciler.view().preview.unwrap();
        assert!(!overlay.is_playing);
        assert_eq!(overlay.position_ms, 4_250);
    }

    #[tokio::test]
    async fn toggle_restarts_a_finished_clip() {
        let mut player = MockPreviewPlayer::new();
        player.expect_setup().returning(|| Ok(()));
        player.expect_load().returning(|_, _| Ok(()));
        player.expect_play().times(2).returning(|| Ok(()));
        player.expect_seek_to().with(eq(0u64)).times(1).returning(|_| Ok(()));

        let h = harness(FakeApi::default(), player, FixedResolver(None));
        h.reconciler.start_preview(preview("p1")).await;
        h.reconciler.on_player_status(PlayerStatus {
            state: PlayerState::Ended,
            position_secs: 30.0,
            duration_secs: 30.0,
        });

        h.reconciler.toggle_preview().await;

        let overlay = h.reconciler.view().preview.unwrap();
        assert!(overlay.is_playing);
        assert_eq!(overlay.position_ms, 0);
    }

    #[tokio::test]
    async fn no_requests_while_unauthenticated() {
        let h = harness(
            FakeApi::playing(5_000, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.auth_tx.send_replace(AuthStatus::unauthenticated());

        h.reconciler.refresh().await;

        assert!(h.api.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn poll_loop_survives_failures_and_backs_off() {
        let api = FakeApi::playing(5_000, 200_000);
        api.fail_fetch.store(true, Ordering::SeqCst);
        let h = harness(api, lenient_player(), FixedResolver(None));

        h.reconciler.start_polling();
        settle().await;
        assert_eq!(h.api.fetches(), 1);

        // One failure doubles the 2 s interval.
        tokio::time::advance(Duration::from_millis(2_100)).await;
        settle().await;
        assert_eq!(h.api.fetches(), 1);
        tokio::time::advance(Duration::from_millis(2_000)).await;
        settle().await;
        assert_eq!(h.api.fetches(), 2);

        // Recovery restores the base interval.
        h.api.fail_fetch.store(false, Ordering::SeqCst);
        tokio::time::advance(Duration::from_millis(8_050)).await;
        settle().await;
        assert_eq!(h.api.fetches(), 3);
        assert!(h.reconciler.view().track.is_some());
        tokio::time::advance(Duration::from_millis(2_050)).await;
        settle().await;
        assert_eq!(h.api.fetches(), 4);

        h.reconciler.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn logout_stops_polling_and_clears_the_view() {
        let h = harness(
            FakeApi::playing(5_000, 200_000),
            lenient_player(),
            FixedResolver(None),
        );
        h.reconciler.start_polling();
        settle().await;
        h.reconciler.start_preview(preview("p1")).await;
        assert!(h.reconciler.view().track.is_some());

        h.auth_tx.send_replace(AuthStatus::unauthenticated());
        settle().await;

        let view = h.reconciler.view();
        assert!(view.track.is_none());
        assert!(!view.is_preview_playing());

        let fetches = h.api.fetches();
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(h.api.fetches(), fetches);

        h.reconciler.shutdown().await;
    }
}
