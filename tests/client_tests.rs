//! Request helper and playback endpoint against a mock Web API.

use spotify_remote_lib::api::auth::SpotifyAuthClient;
use spotify_remote_lib::api::client::SpotifyClient;
use spotify_remote_lib::api::player::PlaybackApi;
use spotify_remote_lib::config::AppConfig;
use spotify_remote_lib::session::store::{
    KeyValueStore, MemoryStore, ACCESS_TOKEN, REFRESH_TOKEN, TOKEN_EXPIRATION,
};
use spotify_remote_lib::session::TokenManager;
use std::sync::Arc;
use wiremock::matchers::{body_json, body_string, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config(server: &MockServer) -> AppConfig {
    AppConfig {
        client_id: "test-client".into(),
        token_endpoint: format!("{}/api/token", server.uri()),
        api_base_url: format!("{}/v1", server.uri()),
        request_timeout_secs: 2,
        ..AppConfig::default()
    }
}

async fn client_with_session(server: &MockServer) -> SpotifyClient {
    let store = Arc::new(MemoryStore::new());
    let expires = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp_millis();
    store
        .set_many(&[
            (ACCESS_TOKEN, "old-token"),
            (REFRESH_TOKEN, "refresh-token"),
            (TOKEN_EXPIRATION, &expires.to_string()),
        ])
        .unwrap();

    let config = config(server);
    let endpoint = Arc::new(SpotifyAuthClient::new(&config).unwrap());
    let tokens = TokenManager::new(&config, endpoint, store);
    tokens.restore().await;
    SpotifyClient::new(&config, tokens).unwrap()
}

async fn mount_refresh(server: &MockServer, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "new-token",
            "token_type": "Bearer",
            "expires_in": 3600
        })))
        .expect(expected_calls)
        .mount(server)
        .await;
}

fn expired_body() -> serde_json::Value {
    serde_json::json!({"error": {"status": 401, "message": "The access token expired"}})
}

fn playing_body() -> serde_json::Value {
    serde_json::json!({
        "is_playing": true,
        "progress_ms": 1234,
        "item": {
            "id": "t1",
            "name": "Song",
            "uri": "spotify:track:t1",
            "duration_ms": 200000,
            "artists": [{"id": "a1", "name": "Band"}],
            "album": {"images": [{"url": "https://img/t1", "width": 640, "height": 640}]}
        }
    })
}

mod currently_playing {
    use super::*;

    #[tokio::test]
    async fn sends_bearer_and_parses_snapshot() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .and(header("authorization", "Bearer old-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(playing_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        let snapshot = client.currently_playing().await.unwrap().unwrap();

        assert!(snapshot.is_playing);
        assert_eq!(snapshot.progress_ms, Some(1234));
        assert_eq!(snapshot.item.unwrap().name, "Song");
    }

    #[tokio::test]
    async fn no_content_means_nothing_playing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(ResponseTemplate::new(204))
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        assert!(client.currently_playing().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn logged_out_client_sends_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(playing_body()))
            .expect(0)
            .mount(&server)
            .await;

        let config = config(&server);
        let endpoint = Arc::new(SpotifyAuthClient::new(&config).unwrap());
        let tokens = TokenManager::new(&config, endpoint, Arc::new(MemoryStore::new()));
        let client = SpotifyClient::new(&config, tokens).unwrap();

        let err = client.currently_playing().await.unwrap_err();
        assert_eq!(err.kind(), "auth_required");
    }
}

mod expiry_retry {
    use super::*;

    #[tokio::test]
    async fn expired_token_refreshes_once_and_retries() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .and(header("authorization", "Bearer old-token"))
            .respond_with(ResponseTemplate::new(401).set_body_json(expired_body()))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .and(header("authorization", "Bearer new-token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(playing_body()))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        let snapshot = client.currently_playing().await.unwrap();

        assert!(snapshot.is_some());
    }

    #[tokio::test]
    async fn expiry_message_without_401_also_triggers_refresh() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/pause"))
            .and(header("authorization", "Bearer old-token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"status": 400, "message": "Access token expired"}
            })))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/pause"))
            .and(header("authorization", "Bearer new-token"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        client.pause().await.unwrap();
    }

    #[tokio::test]
    async fn second_expiry_propagates_without_another_retry() {
        let server = MockServer::start().await;
        mount_refresh(&server, 1).await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/next"))
            .respond_with(ResponseTemplate::new(401).set_body_json(expired_body()))
            .expect(2)
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        let err = client.next().await.unwrap_err();

        assert_eq!(err.kind(), "auth_required");
    }

    #[tokio::test]
    async fn unreachable_token_endpoint_surfaces_as_network_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/v1/me/player/currently-playing"))
            .respond_with(ResponseTemplate::new(401).set_body_json(expired_body()))
            .expect(1)
            .mount(&server)
            .await;

        let store = Arc::new(MemoryStore::new());
        let expires = (chrono::Utc::now() + chrono::Duration::hours(1)).timestamp_millis();
        store
            .set_many(&[
                (ACCESS_TOKEN, "old-token"),
                (REFRESH_TOKEN, "refresh-token"),
                (TOKEN_EXPIRATION, &expires.to_string()),
            ])
            .unwrap();
        // Nothing listens on the discard port.
        let config = AppConfig {
            token_endpoint: "http://127.0.0.1:9/api/token".into(),
            ..config(&server)
        };
        let endpoint = Arc::new(SpotifyAuthClient::new(&config).unwrap());
        let tokens = TokenManager::new(&config, endpoint, store);
        tokens.restore().await;
        let client = SpotifyClient::new(&config, tokens.clone()).unwrap();

        let err = client.currently_playing().await.unwrap_err();

        assert_eq!(err.kind(), "auth_network");
        assert!(tokens.is_authenticated());
    }

    #[tokio::test]
    async fn other_errors_are_not_retried() {
        let server = MockServer::start().await;
        mount_refresh(&server, 0).await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/previous"))
            .respond_with(ResponseTemplate::new(403).set_body_json(serde_json::json!({
                "error": {"status": 403, "message": "Player command failed: Premium required"}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        let err = client.previous().await.unwrap_err();

        assert_eq!(err.kind(), "spotify_api");
        assert!(err.to_string().contains("Premium required"));
    }
}

mod commands {
    use super::*;

    #[tokio::test]
    async fn restart_sends_uris_and_resume_sends_empty_body() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/play"))
            .and(body_json(serde_json::json!({"uris": ["spotify:track:t1"]})))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;
        Mock::given(method("PUT"))
            .and(path("/v1/me/player/play"))
            .and(body_string(""))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        client
            .play(Some(vec!["spotify:track:t1".to_string()]))
            .await
            .unwrap();
        client.play(None).await.unwrap();
    }

    #[tokio::test]
    async fn missing_device_is_not_found() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/me/player/next"))
            .respond_with(ResponseTemplate::new(404).set_body_json(serde_json::json!({
                "error": {"status": 404, "message": "Player command failed: No active device found"}
            })))
            .mount(&server)
            .await;

        let client = client_with_session(&server).await;
        let err = client.next().await.unwrap_err();

        assert_eq!(err.kind(), "not_found");
        assert!(err.to_string().contains("No active device"));
    }
}
