//! Data models: upstream payloads, projected snapshots and outgoing messages
//!
//! The Spotify "currently playing" payload is large; only the fields the
//! overlay needs are deserialized; everything else is ignored.

use crate::error::Error;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Upstream payloads
// ============================================================================

/// Projection of `GET /me/player/currently-playing`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CurrentlyPlaying {
    #[serde(default)]
    pub is_playing: bool,
    /// Unix timestamp (ms) of the upstream observation
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(default)]
    pub progress_ms: Option<u64>,
    /// "track", "episode", "ad" or "unknown"
    #[serde(default)]
    pub currently_playing_type: Option<String>,
    #[serde(default)]
    pub item: Option<PlayingItem>,
}

/// The track (or episode) being played
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlayingItem {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    #[serde(default)]
    pub album: Option<AlbumRef>,
    #[serde(default)]
    pub duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtistRef {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AlbumRef {
    #[serde(default)]
    pub name: String,
}

impl CurrentlyPlaying {
    /// Artist names in upstream order
    pub fn artist_names(&self) -> Vec<String> {
        self.item
            .as_ref()
            .map(|item| item.artists.iter().map(|a| a.name.clone()).collect())
            .unwrap_or_default()
    }

    /// Name of the current item, empty when there is none
    pub fn track_name(&self) -> &str {
        self.item.as_ref().map(|i| i.name.as_str()).unwrap_or("")
    }
}

/// Response of the token endpoint (`POST /api/token`)
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default = "default_token_type")]
    pub token_type: String,
    #[serde(default)]
    pub expires_in: Option<i64>,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub scope: Option<String>,
}

fn default_token_type() -> String {
    "Bearer".to_string()
}

// ============================================================================
// Snapshot & poll outcome
// ============================================================================

/// Point-in-time view of what is playing
///
/// Serialized as the one-shot endpoint payload:
/// `{id, name, artists[], album, playing, time}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
pub struct TrackSnapshot {
    pub id: String,
    pub name: String,
    pub artists: Vec<String>,
    pub album: String,
    pub playing: bool,
    pub time: DateTime<Utc>,
}

impl TrackSnapshot {
    /// Builds a snapshot from an upstream payload
    ///
    /// Returns `None` when nothing is playing: paused playback, missing item,
    /// or an item without a name (ads, some local files).
    pub fn from_currently_playing(
        current: &CurrentlyPlaying,
        observed_at: DateTime<Utc>,
    ) -> Option<Self> {
        if !current.is_playing {
            return None;
        }
        let item = current.item.as_ref()?;
        if item.name.trim().is_empty() {
            return None;
        }

        Some(Self {
            id: item.id.clone().unwrap_or_default(),
            name: item.name.clone(),
            artists: current.artist_names(),
            album: item.album.as_ref().map(|a| a.name.clone()).unwrap_or_default(),
            playing: current.is_playing,
            time: observed_at,
        })
    }
}

/// Classified result of one upstream call
#[derive(Debug)]
pub enum PollOutcome {
    Snapshot(TrackSnapshot),
    NothingPlaying,
    Unauthorized,
    TransientError(Error),
}

// ============================================================================
// Live messages
// ============================================================================

/// Message pushed to live subscribers, one per poll iteration
///
/// ```json
/// {"event":"track_change","track":"So What","artists":["Miles Davis"],"album":"Kind of Blue","time":1700000000}
/// {"event":"nothing_playing","track":null,"time":1700000000}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamMessage {
    TrackChange {
        track: String,
        artists: Vec<String>,
        album: String,
        time: i64,
    },
    NothingPlaying { track: Option<String>, time: i64 },
    /// Transient upstream failure; subscribers keep their connection
    Unavailable { track: Option<String>, time: i64 },
    /// The credential is gone or rejected; polling stops
    AuthorizationLost { track: Option<String>, time: i64 },
}

impl StreamMessage {
    pub fn track_change(snapshot: &TrackSnapshot) -> Self {
        Self::TrackChange {
            track: snapshot.name.clone(),
            artists: snapshot.artists.clone(),
            album: snapshot.album.clone(),
            time: snapshot.time.timestamp(),
        }
    }

    pub fn nothing_playing(at: DateTime<Utc>) -> Self {
        Self::NothingPlaying {
            track: None,
            time: at.timestamp(),
        }
    }

    pub fn unavailable(at: DateTime<Utc>) -> Self {
        Self::Unavailable {
            track: None,
            time: at.timestamp(),
        }
    }

    pub fn authorization_lost(at: DateTime<Utc>) -> Self {
        Self::AuthorizationLost {
            track: None,
            time: at.timestamp(),
        }
    }

    /// Message to broadcast for a poll outcome
    pub fn from_outcome(outcome: &PollOutcome, at: DateTime<Utc>) -> Self {
        match outcome {
            PollOutcome::Snapshot(snapshot) => Self::track_change(snapshot),
            PollOutcome::NothingPlaying => Self::nothing_playing(at),
            PollOutcome::Unauthorized => Self::authorization_lost(at),
            PollOutcome::TransientError(_) => Self::unavailable(at),
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ============================================================================
// HTTP envelope
// ============================================================================

/// Envelope shared by every authorization / error response
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct ApiResponse {
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ApiResponse {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status: "error".to_string(),
            access_token: None,
            token_type: None,
            expires_in: None,
            scope: None,
            error: Some(code.into()),
            message: Some(message.into()),
            timestamp: Utc::now(),
        }
    }

    pub fn token(credential: &crate::credential::Credential) -> Self {
        Self {
            status: "success".to_string(),
            access_token: Some(credential.access_token.clone()),
            token_type: Some(credential.token_type.clone()),
            expires_in: Some(credential.expires_in().num_seconds().max(0)),
            scope: Some(credential.scope.clone().unwrap_or_default()),
            error: None,
            message: None,
            timestamp: Utc::now(),
        }
    }
}

/// Body of `GET /api/spotify-status`
#[derive(Debug, Clone, Serialize, Deserialize, utoipa::ToSchema)]
pub struct StatusResponse {
    pub authenticated: bool,
    pub expires_in: Option<i64>,
    pub subscribers: usize,
    pub streaming: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn playing_payload() -> CurrentlyPlaying {
        serde_json::from_value(json!({
            "is_playing": true,
            "timestamp": 1700000000000i64,
            "progress_ms": 1234,
            "currently_playing_type": "track",
            "device": {"id": "abc", "name": "Kitchen"},
            "item": {
                "id": "4uLU6hMCjMI75M1A2tKUQC",
                "name": "So What",
                "artists": [{"name": "Miles Davis", "id": "x"}, {"name": "John Coltrane"}],
                "album": {"name": "Kind of Blue", "images": []},
                "duration_ms": 545000
            }
        }))
        .unwrap()
    }

    #[test]
    fn test_snapshot_projection() {
        let now = Utc::now();
        let snapshot = TrackSnapshot::from_currently_playing(&playing_payload(), now).unwrap();

        assert_eq!(snapshot.id, "4uLU6hMCjMI75M1A2tKUQC");
        assert_eq!(snapshot.name, "So What");
        assert_eq!(snapshot.artists, vec!["Miles Davis", "John Coltrane"]);
        assert_eq!(snapshot.album, "Kind of Blue");
        assert!(snapshot.playing);
        assert_eq!(snapshot.time, now);
    }

    #[test]
    fn test_no_snapshot_when_paused_or_empty() {
        let mut paused = playing_payload();
        paused.is_playing = false;
        assert!(TrackSnapshot::from_currently_playing(&paused, Utc::now()).is_none());

        let mut unnamed = playing_payload();
        unnamed.item.as_mut().unwrap().name = String::new();
        assert!(TrackSnapshot::from_currently_playing(&unnamed, Utc::now()).is_none());

        let ad: CurrentlyPlaying = serde_json::from_value(json!({
            "is_playing": true,
            "currently_playing_type": "ad",
            "item": null
        }))
        .unwrap();
        assert!(TrackSnapshot::from_currently_playing(&ad, Utc::now()).is_none());
    }

    #[test]
    fn test_track_change_message_shape() {
        let snapshot =
            TrackSnapshot::from_currently_playing(&playing_payload(), Utc::now()).unwrap();
        let value: serde_json::Value =
            serde_json::to_value(StreamMessage::track_change(&snapshot)).unwrap();

        assert_eq!(value["event"], "track_change");
        assert_eq!(value["track"], "So What");
        assert_eq!(value["artists"], json!(["Miles Davis", "John Coltrane"]));
        assert_eq!(value["album"], "Kind of Blue");
        assert_eq!(value["time"], snapshot.time.timestamp());
    }

    #[test]
    fn test_marker_messages_carry_null_track() {
        let now = Utc::now();
        let cases = [
            (PollOutcome::NothingPlaying, "nothing_playing"),
            (PollOutcome::Unauthorized, "authorization_lost"),
            (
                PollOutcome::TransientError(Error::RateLimited),
                "unavailable",
            ),
        ];

        for (outcome, event) in cases {
            let value = serde_json::to_value(StreamMessage::from_outcome(&outcome, now)).unwrap();
            assert_eq!(value["event"], event);
            assert!(value["track"].is_null());
            assert_eq!(value["time"], now.timestamp());
        }
    }

    #[test]
    fn test_error_envelope_skips_token_fields() {
        let value = serde_json::to_value(ApiResponse::error("no_token", "No access token")).unwrap();
        assert_eq!(value["status"], "error");
        assert_eq!(value["error"], "no_token");
        assert_eq!(value["message"], "No access token");
        assert!(value.get("access_token").is_none());
        assert!(value.get("timestamp").is_some());
    }

    #[test]
    fn test_token_response_defaults() {
        let token: TokenResponse =
            serde_json::from_value(json!({"access_token": "abc"})).unwrap();
        assert_eq!(token.token_type, "Bearer");
        assert!(token.refresh_token.is_none());
        assert!(token.expires_in.is_none());
    }
}
