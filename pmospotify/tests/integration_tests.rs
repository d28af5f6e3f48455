//! Integration tests for pmospotify
//!
//! The Spotify accounts service and Web API are replaced by a wiremock server;
//! the HTTP surface is driven through the axum router with `tower::oneshot`.

use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::{HeaderMap, Request, StatusCode, header};
use pmospotify::{
    AuthConfig, Authorizer, ChannelSubscriber, Credential, DeliveryError, Error, PollIntervals,
    PollOutcome, SpotifyClient, SpotifyState, StreamMessage, Subscriber, SubscriberId,
    SubscriberRegistry, create_router,
};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;
use wiremock::matchers::{body_string_contains, header as header_is, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const REDIRECT_URI: &str = "http://localhost:8080/api/spotify-callback";
const BASIC_AUTH: &str = "Basic Y2xpZW50OnNlY3JldA==";
const NOW_PLAYING: &str = "/v1/me/player/currently-playing";

// ============================================================================
// Helpers
// ============================================================================

fn auth_config(server: &MockServer) -> AuthConfig {
    AuthConfig::new("client", "secret", REDIRECT_URI)
        .unwrap()
        .with_accounts_url(server.uri())
}

fn spotify_client(server: &MockServer) -> SpotifyClient {
    SpotifyClient::builder()
        .api_url(format!("{}/v1", server.uri()))
        .timeout(Duration::from_secs(5))
        .build()
        .unwrap()
}

fn state_for(server: &MockServer) -> SpotifyState {
    let client = spotify_client(server);
    let authorizer = Authorizer::new(auth_config(server), client.http_client().clone());
    SpotifyState::new(
        Arc::new(authorizer),
        Arc::new(client),
        PollIntervals::default(),
        CancellationToken::new(),
    )
}

async fn send(router: &Router, http_method: &str, uri: &str) -> (StatusCode, HeaderMap, Value) {
    let response = router
        .clone()
        .oneshot(
            Request::builder()
                .method(http_method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let status = response.status();
    let headers = response.headers().clone();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, headers, json)
}

fn state_from_location(headers: &HeaderMap) -> String {
    let location = headers
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .expect("Location header");
    url::Url::parse(location)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .expect("state parameter")
}

fn token_body(access_token: &str, refresh_token: Option<&str>) -> Value {
    let mut body = json!({
        "access_token": access_token,
        "token_type": "Bearer",
        "expires_in": 3600,
        "scope": "user-read-currently-playing user-read-playback-state"
    });
    if let Some(refresh) = refresh_token {
        body["refresh_token"] = json!(refresh);
    }
    body
}

fn playing_body(is_playing: bool, name: &str) -> Value {
    json!({
        "is_playing": is_playing,
        "timestamp": 1700000000000i64,
        "progress_ms": 42000,
        "currently_playing_type": "track",
        "item": {
            "id": "track-1",
            "name": name,
            "artists": [{"name": "Miles Davis"}, {"name": "Bill Evans"}],
            "album": {"name": "Kind of Blue"},
            "duration_ms": 545000
        }
    })
}

async fn mount_token(server: &MockServer, code: &str, access_token: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header_is("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=authorization_code"))
        .and(body_string_contains(format!("code={}", code).as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body(access_token, Some("refresh-1"))))
        .expect(expected_calls)
        .mount(server)
        .await;
}

async fn mount_now_playing(server: &MockServer, response: ResponseTemplate) {
    Mock::given(method("GET"))
        .and(path(NOW_PLAYING))
        .respond_with(response)
        .mount(server)
        .await;
}

fn credential(access_token: &str, refresh_token: Option<&str>) -> Credential {
    Credential {
        access_token: access_token.to_string(),
        token_type: "Bearer".to_string(),
        expires_at: chrono::Utc::now() + chrono::Duration::hours(1),
        refresh_token: refresh_token.map(String::from),
        scope: None,
        state: None,
    }
}

// ============================================================================
// End-to-end
// ============================================================================

#[tokio::test]
async fn test_authorize_then_query_current_track() {
    let server = MockServer::start().await;
    mount_token(&server, "the-code", "access-1", 1).await;
    Mock::given(method("GET"))
        .and(path(NOW_PLAYING))
        .and(header_is("authorization", "Bearer access-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(playing_body(true, "So What")))
        .mount(&server)
        .await;

    let router = create_router(state_for(&server));

    // Unauthenticated
    let (status, _, body) = send(&router, "GET", "/api/spotify-current-playing").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "no_token");
    assert!(body["timestamp"].is_string());

    // Redirect to the accounts service
    let (status, headers, _) = send(&router, "GET", "/").await;
    assert_eq!(status, StatusCode::FOUND);
    let location = headers.get(header::LOCATION).unwrap().to_str().unwrap();
    assert!(location.starts_with(&format!("{}/authorize?", server.uri())));
    let state = state_from_location(&headers);

    // Callback
    let (status, _, body) = send(
        &router,
        "GET",
        &format!("/api/spotify-callback?state={}&code=the-code", state),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert_eq!(body["access_token"], "access-1");
    assert_eq!(body["token_type"], "Bearer");
    assert_eq!(body["scope"], "user-read-currently-playing user-read-playback-state");
    let expires_in = body["expires_in"].as_i64().unwrap();
    assert!(expires_in > 3500 && expires_in <= 3600);

    // One-shot query
    let (status, _, body) = send(&router, "GET", "/api/spotify-current-playing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["id"], "track-1");
    assert_eq!(body["name"], "So What");
    assert_eq!(body["artists"], json!(["Miles Davis", "Bill Evans"]));
    assert_eq!(body["album"], "Kind of Blue");
    assert_eq!(body["playing"], true);
    assert!(body["time"].is_string());
}

#[tokio::test]
async fn test_authorize_then_nothing_playing() {
    let server = MockServer::start().await;
    mount_token(&server, "the-code", "access-1", 1).await;
    mount_now_playing(&server, ResponseTemplate::new(204)).await;

    let router = create_router(state_for(&server));
    let (_, headers, _) = send(&router, "GET", "/").await;
    let state = state_from_location(&headers);
    let (status, _, _) = send(
        &router,
        "GET",
        &format!("/api/spotify-callback?state={}&code=the-code", state),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _, body) = send(&router, "GET", "/api/spotify-current-playing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "error");
    assert_eq!(body["error"], "no_track_playing");
}

// ============================================================================
// Callback
// ============================================================================

#[tokio::test]
async fn test_malformed_callback_never_exchanges() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("x", None)))
        .expect(0)
        .mount(&server)
        .await;

    let router = create_router(state_for(&server));
    let (_, headers, _) = send(&router, "GET", "/").await;
    let state = state_from_location(&headers);

    for uri in [
        "/api/spotify-callback".to_string(),
        format!("/api/spotify-callback?state={}", state),
        "/api/spotify-callback?code=abc".to_string(),
        format!("/api/spotify-callback?state={}&code=", state),
        format!("/api/spotify-callback?state={}&error=access_denied", state),
    ] {
        let (status, _, body) = send(&router, "GET", &uri).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{}", uri);
        assert_eq!(body["status"], "error");
        assert_eq!(body["error"], "invalid_request");
        assert!(body["message"].is_string());
    }
}

#[tokio::test]
async fn test_callback_with_foreign_state_fails() {
    let server = MockServer::start().await;
    mount_token(&server, "abc", "access-1", 0).await;

    let router = create_router(state_for(&server));
    send(&router, "GET", "/").await;

    let (status, _, body) = send(&router, "GET", "/api/spotify-callback?state=forged&code=abc").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "token_exchange_failed");
}

#[tokio::test]
async fn test_callback_with_rejected_code() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"error": "invalid_grant", "error_description": "Invalid authorization code"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let state = state_for(&server);
    let router = create_router(state.clone());
    let (_, headers, _) = send(&router, "GET", "/").await;
    let oauth_state = state_from_location(&headers);

    let (status, _, body) = send(
        &router,
        "GET",
        &format!("/api/spotify-callback?state={}&code=bad", oauth_state),
    )
    .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "token_exchange_failed");
    assert!(body["message"].as_str().unwrap().contains("invalid_grant"));
    assert!(state.authorizer.current_credential().is_none());
}

// ============================================================================
// Authorizer
// ============================================================================

#[tokio::test]
async fn test_exchange_uses_latest_state_only() {
    let server = MockServer::start().await;
    mount_token(&server, "abc", "access-1", 1).await;

    let authorizer = Authorizer::new(auth_config(&server), reqwest::Client::new());
    let first = authorizer.authorization_url().unwrap();
    let first_state = url::Url::parse(&first)
        .unwrap()
        .query_pairs()
        .find(|(k, _)| k == "state")
        .map(|(_, v)| v.into_owned())
        .unwrap();
    authorizer.authorization_url().unwrap();
    let latest = authorizer.pending_state().unwrap();

    assert!(matches!(
        authorizer.exchange(&first_state, "abc").await,
        Err(Error::InvalidState)
    ));
    assert!(authorizer.exchange(&latest, "abc").await.is_ok());
}

#[tokio::test]
async fn test_state_is_single_use() {
    let server = MockServer::start().await;
    mount_token(&server, "abc", "access-1", 1).await;

    let authorizer = Authorizer::new(auth_config(&server), reqwest::Client::new());
    authorizer.authorization_url().unwrap();
    let state = authorizer.pending_state().unwrap();

    authorizer.exchange(&state, "abc").await.unwrap();
    assert!(matches!(
        authorizer.exchange(&state, "abc").await,
        Err(Error::InvalidState)
    ));
    assert_eq!(authorizer.current_credential().unwrap().access_token, "access-1");
}

#[tokio::test]
async fn test_exchange_replaces_credential_wholesale() {
    let server = MockServer::start().await;
    mount_token(&server, "first", "access-1", 1).await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("code=second"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "access-2",
            "token_type": "Bearer",
            "expires_in": 600
        })))
        .expect(1)
        .mount(&server)
        .await;

    let authorizer = Authorizer::new(auth_config(&server), reqwest::Client::new());

    authorizer.authorization_url().unwrap();
    let state = authorizer.pending_state().unwrap();
    authorizer.exchange(&state, "first").await.unwrap();

    authorizer.authorization_url().unwrap();
    let state = authorizer.pending_state().unwrap();
    let second = authorizer.exchange(&state, "second").await.unwrap();

    let current = authorizer.current_credential().unwrap();
    assert_eq!(current, second);
    assert_eq!(current.access_token, "access-2");
    // Nothing carried over from the first credential
    assert!(current.refresh_token.is_none());
    assert!(current.scope.is_none());
    assert_eq!(current.state.as_deref(), Some(state.as_str()));
}

#[tokio::test]
async fn test_refresh_keeps_previous_refresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(header_is("authorization", BASIC_AUTH))
        .and(body_string_contains("grant_type=refresh_token"))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("access-2", None)))
        .expect(1)
        .mount(&server)
        .await;

    let state = state_for(&server);
    let router = create_router(state.clone());

    let (status, _, body) = send(&router, "POST", "/api/spotify-refresh").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "no_token");

    state
        .authorizer
        .replace_credential(credential("access-1", Some("refresh-1")));
    let (status, _, body) = send(&router, "POST", "/api/spotify-refresh").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["access_token"], "access-2");

    let current = state.authorizer.current_credential().unwrap();
    assert_eq!(current.access_token, "access-2");
    assert_eq!(current.refresh_token.as_deref(), Some("refresh-1"));
}

#[tokio::test]
async fn test_refresh_without_refresh_token_fails() {
    let server = MockServer::start().await;
    let state = state_for(&server);
    state.authorizer.replace_credential(credential("access-1", None));

    let router = create_router(state);
    let (status, _, body) = send(&router, "POST", "/api/spotify-refresh").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "token_refresh_failed");
}

#[tokio::test]
async fn test_expired_credential_is_refreshed_before_polling() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(token_body("fresh", None)))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(NOW_PLAYING))
        .and(header_is("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let state = state_for(&server);
    let mut stale = credential("stale", Some("refresh-1"));
    stale.expires_at = chrono::Utc::now() - chrono::Duration::minutes(5);
    state.authorizer.replace_credential(stale);

    let router = create_router(state);
    let (status, _, body) = send(&router, "GET", "/api/spotify-current-playing").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["error"], "no_track_playing");
}

#[tokio::test]
async fn test_concurrent_refreshes_share_one_grant() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/token"))
        .and(body_string_contains("grant_type=refresh_token"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(token_body("fresh", None))
                .set_delay(Duration::from_millis(200)),
        )
        .expect(1)
        .mount(&server)
        .await;

    let state = state_for(&server);
    let mut stale = credential("stale", Some("refresh-1"));
    stale.expires_at = chrono::Utc::now() - chrono::Duration::minutes(5);
    state.authorizer.replace_credential(stale);

    let (first, second) = tokio::join!(
        state.authorizer.refresh_if_expired(),
        state.authorizer.refresh_if_expired()
    );
    assert_eq!(first.unwrap().access_token, "fresh");
    assert_eq!(second.unwrap().access_token, "fresh");
    assert_eq!(
        state.authorizer.current_credential().unwrap().refresh_token.as_deref(),
        Some("refresh-1")
    );
}

// ============================================================================
// Upstream classification
// ============================================================================

async fn outcome_for(response: ResponseTemplate) -> PollOutcome {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path(NOW_PLAYING))
        .and(header_is("authorization", "Bearer access-1"))
        .respond_with(response)
        .expect(1)
        .mount(&server)
        .await;

    spotify_client(&server)
        .fetch_current(&credential("access-1", None))
        .await
}

#[tokio::test]
async fn test_fetch_current_classification() {
    assert!(matches!(
        outcome_for(ResponseTemplate::new(204)).await,
        PollOutcome::NothingPlaying
    ));
    assert!(matches!(
        outcome_for(ResponseTemplate::new(200).set_body_json(playing_body(false, "So What"))).await,
        PollOutcome::NothingPlaying
    ));
    assert!(matches!(
        outcome_for(ResponseTemplate::new(200).set_body_json(playing_body(true, ""))).await,
        PollOutcome::NothingPlaying
    ));
    assert!(matches!(
        outcome_for(ResponseTemplate::new(401)).await,
        PollOutcome::Unauthorized
    ));
    assert!(matches!(
        outcome_for(ResponseTemplate::new(403)).await,
        PollOutcome::Unauthorized
    ));
    assert!(matches!(
        outcome_for(ResponseTemplate::new(429)).await,
        PollOutcome::TransientError(Error::RateLimited)
    ));
    assert!(matches!(
        outcome_for(ResponseTemplate::new(503)).await,
        PollOutcome::TransientError(Error::TransientNetworkError(_))
    ));
    assert!(matches!(
        outcome_for(ResponseTemplate::new(200).set_body_string("{not json")).await,
        PollOutcome::TransientError(Error::InvalidUpstreamResponse(_))
    ));

    match outcome_for(ResponseTemplate::new(200).set_body_json(playing_body(true, "So What"))).await {
        PollOutcome::Snapshot(track) => {
            assert_eq!(track.name, "So What");
            assert_eq!(track.artists, vec!["Miles Davis", "Bill Evans"]);
            assert_eq!(track.album, "Kind of Blue");
        }
        other => panic!("expected a snapshot, got {:?}", other),
    }
}

#[tokio::test]
async fn test_network_failure_is_transient() {
    let client = SpotifyClient::builder()
        .api_url("http://127.0.0.1:1/v1")
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap();
    assert!(matches!(
        client.fetch_current(&credential("access-1", None)).await,
        PollOutcome::TransientError(_)
    ));
}

#[tokio::test]
async fn test_current_playing_upstream_errors() {
    let server = MockServer::start().await;
    let state = state_for(&server);
    state.authorizer.replace_credential(credential("access-1", None));
    let router = create_router(state);

    mount_now_playing(&server, ResponseTemplate::new(401)).await;
    let (status, _, body) = send(&router, "GET", "/api/spotify-current-playing").await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error"], "unauthorized");

    server.reset().await;
    mount_now_playing(&server, ResponseTemplate::new(500)).await;
    let (status, _, body) = send(&router, "GET", "/api/spotify-current-playing").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "track_fetch_failed");
}

// ============================================================================
// Registry
// ============================================================================

/// Subscriber counting deliveries, optionally failing every one of them
struct CountingSubscriber {
    id: SubscriberId,
    fail: bool,
    deliveries: AtomicUsize,
}

impl CountingSubscriber {
    fn new(fail: bool) -> Arc<Self> {
        Arc::new(Self {
            id: SubscriberId::new(),
            fail,
            deliveries: AtomicUsize::new(0),
        })
    }

    fn count(&self) -> usize {
        self.deliveries.load(Ordering::SeqCst)
    }
}

impl Subscriber for CountingSubscriber {
    fn id(&self) -> SubscriberId {
        self.id
    }

    fn deliver(&self, _message: &StreamMessage) -> Result<(), DeliveryError> {
        self.deliveries.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            Err(DeliveryError::Closed)
        } else {
            Ok(())
        }
    }
}

fn marker() -> StreamMessage {
    StreamMessage::nothing_playing(chrono::Utc::now())
}

#[test]
fn test_one_failing_subscriber_is_detached() {
    let registry = SubscriberRegistry::new();
    let a = CountingSubscriber::new(false);
    let b = CountingSubscriber::new(true);
    let c = CountingSubscriber::new(false);
    for subscriber in [&a, &b, &c] {
        assert!(registry.attach(subscriber.clone()));
    }

    assert_eq!(registry.broadcast(&marker()), 2);
    assert_eq!(registry.len(), 2);
    assert!(!registry.contains(b.id()));
    assert_eq!(a.count(), 1);
    assert_eq!(c.count(), 1);

    // The detached subscriber is not tried again
    registry.broadcast(&marker());
    assert_eq!(b.count(), 1);
    assert_eq!(a.count(), 2);
}

#[test]
fn test_no_delivery_after_detach() {
    let registry = SubscriberRegistry::new();
    let a = CountingSubscriber::new(false);
    let b = CountingSubscriber::new(false);
    registry.attach(a.clone());
    registry.attach(b.clone());

    registry.detach(a.id());
    assert_eq!(registry.broadcast(&marker()), 1);
    assert_eq!(a.count(), 0);
    assert_eq!(b.count(), 1);
}

#[test]
fn test_concurrent_attach_detach_broadcast() {
    let registry = SubscriberRegistry::new();
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let registry = registry.clone();
            std::thread::spawn(move || {
                for _ in 0..200 {
                    let subscriber = CountingSubscriber::new(false);
                    registry.attach(subscriber.clone());
                    registry.broadcast(&marker());
                    registry.detach(subscriber.id());
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert!(registry.is_empty());
}

// ============================================================================
// Streaming
// ============================================================================

#[tokio::test]
async fn test_subscriber_receives_track_change_from_upstream() {
    let server = MockServer::start().await;
    mount_now_playing(
        &server,
        ResponseTemplate::new(200).set_body_json(playing_body(true, "Blue in Green")),
    )
    .await;

    let state = state_for(&server);
    state.authorizer.replace_credential(credential("access-1", None));

    let (id, mut rx) = state.hub.subscribe(8);
    assert!(state.hub.is_streaming());

    let message = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .expect("a message within the first poll")
        .expect("subscriber still attached");
    let value = serde_json::to_value(&message).unwrap();
    assert_eq!(value["event"], "track_change");
    assert_eq!(value["track"], "Blue in Green");
    assert_eq!(value["artists"], json!(["Miles Davis", "Bill Evans"]));
    assert_eq!(value["album"], "Kind of Blue");
    assert!(value["time"].is_i64());

    let router = create_router(state.clone());
    let (_, _, status) = send(&router, "GET", "/api/spotify-status").await;
    assert_eq!(status["authenticated"], true);
    assert_eq!(status["subscribers"], 1);
    assert_eq!(status["streaming"], true);

    state.hub.unsubscribe(id);
    assert!(!state.hub.is_streaming());
    let (_, _, status) = send(&router, "GET", "/api/spotify-status").await;
    assert_eq!(status["subscribers"], 0);
    assert_eq!(status["streaming"], false);
}

#[tokio::test]
async fn test_slow_subscriber_does_not_block_others() {
    let registry = SubscriberRegistry::new();
    let (slow, _slow_rx) = ChannelSubscriber::channel(1);
    let (fast, mut fast_rx) = ChannelSubscriber::channel(8);
    registry.attach(slow.clone());
    registry.attach(fast.clone());

    for _ in 0..3 {
        registry.broadcast(&marker());
    }

    assert!(!registry.contains(slow.id()));
    assert!(registry.contains(fast.id()));
    let mut received = 0;
    while fast_rx.try_recv().is_ok() {
        received += 1;
    }
    assert_eq!(received, 3);
}

// ============================================================================
// WebSocket route
// ============================================================================

async fn serve(state: SpotifyState) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = create_router(state);
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("ws://{}/api/ws/spotify-current-playing", addr)
}

async fn wait_until(condition: impl Fn() -> bool) -> bool {
    for _ in 0..250 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    condition()
}

#[tokio::test]
async fn test_websocket_client_close_stops_streaming() {
    let server = MockServer::start().await;
    mount_now_playing(&server, ResponseTemplate::new(204)).await;

    let state = state_for(&server);
    state.authorizer.replace_credential(credential("access-1", None));
    let url = serve(state.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("a message within the first poll")
        .expect("socket open")
        .unwrap();
    let WsMessage::Text(text) = frame else {
        panic!("expected a text frame, got {:?}", frame);
    };
    let value: Value = serde_json::from_str(text.as_str()).unwrap();
    assert_eq!(value["event"], "nothing_playing");
    assert_eq!(value["track"], Value::Null);

    assert_eq!(state.hub.subscriber_count(), 1);
    assert!(state.hub.is_streaming());

    ws.close(None).await.unwrap();
    assert!(wait_until(|| state.hub.subscriber_count() == 0).await);
    assert!(!state.hub.is_streaming());
}

#[tokio::test]
async fn test_websocket_closed_on_shutdown() {
    let server = MockServer::start().await;
    mount_now_playing(&server, ResponseTemplate::new(204)).await;

    let state = state_for(&server);
    state.authorizer.replace_credential(credential("access-1", None));
    let url = serve(state.clone()).await;

    let (mut ws, _) = tokio_tungstenite::connect_async(url).await.unwrap();
    assert!(wait_until(|| state.hub.subscriber_count() == 1).await);

    state.hub.shutdown_token().cancel();

    let closed = tokio::time::timeout(Duration::from_secs(5), async {
        while let Some(frame) = ws.next().await {
            match frame {
                Ok(WsMessage::Close(_)) | Err(_) => return true,
                Ok(_) => {}
            }
        }
        true
    })
    .await
    .expect("socket closed after shutdown");
    assert!(closed);
    assert!(wait_until(|| state.hub.subscriber_count() == 0).await);
    assert!(!state.hub.is_streaming());
}
