//! Endpoints HTTP pour l'overlay Spotify
//!
//! | Route                                  | Rôle                                   |
//! |----------------------------------------|----------------------------------------|
//! | `GET /`                                | redirection vers l'autorisation OAuth  |
//! | `GET /api/spotify-callback`            | échange du code contre un credential   |
//! | `GET /api/spotify-current-playing`     | interrogation ponctuelle               |
//! | `GET /api/ws/spotify-current-playing`  | flux WebSocket des changements         |
//! | `POST /api/spotify-refresh`            | rafraîchissement du credential         |
//! | `GET /api/spotify-status`              | état de l'authentification et du flux  |
//!
//! Toutes les erreurs utilisent l'enveloppe
//! `{status:"error", error, message, timestamp}`.

use crate::error::Error;
use crate::models::{ApiResponse, PollOutcome, StatusResponse, TrackSnapshot};
use crate::pmoserver_ext::SpotifyState;
use axum::{
    Json, Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tracing::{debug, error, info, warn};

/// Capacité de la file de chaque abonné WebSocket
const WS_QUEUE_CAPACITY: usize = 16;

// ============ Gestion des erreurs ============

/// Erreur HTTP rendue avec l'enveloppe commune
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ApiResponse::error(self.code, self.message))).into_response()
    }
}

/// Crée le router pour l'API Spotify
pub fn create_router(state: SpotifyState) -> Router {
    Router::new()
        .route("/", get(authorize))
        .route("/api/spotify-callback", get(callback))
        .route("/api/spotify-current-playing", get(current_playing))
        .route("/api/ws/spotify-current-playing", get(current_playing_ws))
        .route("/api/spotify-refresh", post(refresh))
        .route("/api/spotify-status", get(status))
        .with_state(state)
}

// ============================================================================
// Autorisation
// ============================================================================

/// Redirige vers la page d'autorisation Spotify
#[utoipa::path(
    get,
    path = "/",
    responses(
        (status = 302, description = "Redirect to the Spotify authorization page"),
        (status = 500, description = "Authorization URL could not be built", body = ApiResponse)
    ),
    tag = "spotify"
)]
pub async fn authorize(State(state): State<SpotifyState>) -> Result<Response, AppError> {
    let url = state.authorizer.authorization_url().map_err(|e| {
        error!("Cannot build authorization URL: {}", e);
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "authorization_url_failed",
            e.to_string(),
        )
    })?;

    debug!("Redirecting to Spotify authorization");
    Ok((StatusCode::FOUND, [(header::LOCATION, url)]).into_response())
}

/// Paramètres renvoyés par Spotify au callback
#[derive(Debug, Deserialize, utoipa::IntoParams)]
#[into_params(parameter_in = Query)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Présent quand l'utilisateur refuse l'autorisation
    pub error: Option<String>,
}

/// Échange le code d'autorisation contre un access token
#[utoipa::path(
    get,
    path = "/api/spotify-callback",
    params(CallbackParams),
    responses(
        (status = 200, description = "Authorization succeeded", body = ApiResponse),
        (status = 400, description = "Missing state or code", body = ApiResponse),
        (status = 500, description = "Token exchange failed", body = ApiResponse)
    ),
    tag = "spotify"
)]
pub async fn callback(
    State(state): State<SpotifyState>,
    Query(params): Query<CallbackParams>,
) -> Result<Json<ApiResponse>, AppError> {
    let (Some(oauth_state), Some(code)) = (
        params.state.filter(|s| !s.is_empty()),
        params.code.filter(|c| !c.is_empty()),
    ) else {
        let message = match params.error {
            Some(reason) => format!("Authorization denied: {}", reason),
            None => "Missing state or code parameter".to_string(),
        };
        warn!("Invalid callback request: {}", message);
        return Err(AppError::new(
            StatusCode::BAD_REQUEST,
            "invalid_request",
            message,
        ));
    };

    let credential = state
        .authorizer
        .exchange(&oauth_state, &code)
        .await
        .map_err(|e| {
            warn!("Token exchange failed: {}", e);
            AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "token_exchange_failed",
                e.to_string(),
            )
        })?;

    // Les abonnés déjà connectés reprennent avec le nouveau credential
    if state.hub.ensure_running() {
        info!("Streaming resumed after authorization");
    }

    Ok(Json(ApiResponse::token(&credential)))
}

/// Rafraîchit le credential avec le refresh token
#[utoipa::path(
    post,
    path = "/api/spotify-refresh",
    responses(
        (status = 200, description = "Credential refreshed", body = ApiResponse),
        (status = 401, description = "Not authenticated", body = ApiResponse),
        (status = 500, description = "Refresh failed", body = ApiResponse)
    ),
    tag = "spotify"
)]
pub async fn refresh(State(state): State<SpotifyState>) -> Result<Json<ApiResponse>, AppError> {
    if state.authorizer.current_credential().is_none() {
        return Err(no_token());
    }

    let credential = state.authorizer.refresh().await.map_err(|e| {
        warn!("Token refresh failed: {}", e);
        AppError::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "token_refresh_failed",
            e.to_string(),
        )
    })?;

    state.hub.ensure_running();
    Ok(Json(ApiResponse::token(&credential)))
}

// ============================================================================
// Lecture en cours
// ============================================================================

/// Interroge Spotify une fois
#[utoipa::path(
    get,
    path = "/api/spotify-current-playing",
    responses(
        (status = 200, description = "Current track, or `no_track_playing` envelope", body = TrackSnapshot),
        (status = 401, description = "Not authenticated or token rejected", body = ApiResponse),
        (status = 500, description = "Upstream failure", body = ApiResponse)
    ),
    tag = "spotify"
)]
pub async fn current_playing(State(state): State<SpotifyState>) -> Result<Response, AppError> {
    let credential = state
        .authorizer
        .refresh_if_expired()
        .await
        .ok_or_else(no_token)?;

    match state.source.fetch_current(&credential).await {
        PollOutcome::Snapshot(track) => Ok(Json(track).into_response()),
        PollOutcome::NothingPlaying => Ok((
            StatusCode::OK,
            Json(ApiResponse::error("no_track_playing", "No track currently playing")),
        )
            .into_response()),
        PollOutcome::Unauthorized => Err(AppError::new(
            StatusCode::UNAUTHORIZED,
            "unauthorized",
            Error::Unauthorized.to_string(),
        )),
        PollOutcome::TransientError(e) => {
            warn!("Track fetch failed: {}", e);
            Err(AppError::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "track_fetch_failed",
                e.to_string(),
            ))
        }
    }
}

/// Ouvre le flux WebSocket des changements de piste
///
/// Chaque itération de polling pousse un message JSON
/// (`track_change`, `nothing_playing`, `unavailable` ou `authorization_lost`).
#[utoipa::path(
    get,
    path = "/api/ws/spotify-current-playing",
    responses(
        (status = 101, description = "Switching to the WebSocket protocol")
    ),
    tag = "spotify"
)]
pub async fn current_playing_ws(
    ws: WebSocketUpgrade,
    State(state): State<SpotifyState>,
) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SpotifyState) {
    let (mut sender, mut receiver) = socket.split();
    let (id, mut rx) = state.hub.subscribe(WS_QUEUE_CAPACITY);
    let shutdown = state.hub.shutdown_token();
    info!("🔌 WebSocket subscriber {} connected", id);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = sender.send(Message::Close(None)).await;
                break;
            }
            message = rx.recv() => {
                // None: détaché par le registre (file pleine)
                let Some(message) = message else { break };
                let text = match message.to_json() {
                    Ok(text) => text,
                    Err(e) => {
                        error!("Cannot encode message: {}", e);
                        continue;
                    }
                };
                if sender.send(Message::Text(text.into())).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.unsubscribe(id);
    info!("🔌 WebSocket subscriber {} disconnected", id);
}

/// État de l'authentification et du streaming
#[utoipa::path(
    get,
    path = "/api/spotify-status",
    responses(
        (status = 200, description = "Service status", body = StatusResponse)
    ),
    tag = "spotify"
)]
pub async fn status(State(state): State<SpotifyState>) -> Json<StatusResponse> {
    let credential = state.authorizer.current_credential();
    Json(StatusResponse {
        authenticated: credential.is_some(),
        expires_in: credential.map(|c| c.expires_in().num_seconds().max(0)),
        subscribers: state.hub.subscriber_count(),
        streaming: state.hub.is_streaming(),
    })
}

fn no_token() -> AppError {
    AppError::new(
        StatusCode::UNAUTHORIZED,
        "no_token",
        "No access token available, authorize first",
    )
}

/// Documentation OpenAPI de l'API Spotify
#[derive(utoipa::OpenApi)]
#[openapi(
    paths(authorize, callback, refresh, current_playing, current_playing_ws, status),
    components(schemas(ApiResponse, TrackSnapshot, StatusResponse)),
    tags((name = "spotify", description = "Spotify now-playing overlay"))
)]
pub struct SpotifyApiDoc;
