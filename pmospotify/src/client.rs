//! HTTP client for the Spotify Web API "currently playing" endpoint
//!
//! # Example
//!
//! ```no_run
//! use pmospotify::{SpotifyClient, Credential, PollOutcome};
//!
//! # async fn demo(credential: Credential) -> Result<(), Box<dyn std::error::Error>> {
//! let client = SpotifyClient::new()?;
//! match client.fetch_current(&credential).await {
//!     PollOutcome::Snapshot(track) => println!("{} - {}", track.artists.join(", "), track.name),
//!     PollOutcome::NothingPlaying => println!("Nothing playing"),
//!     PollOutcome::Unauthorized => println!("Authorization lost"),
//!     PollOutcome::TransientError(e) => println!("Try again later: {}", e),
//! }
//! # Ok(())
//! # }
//! ```

use crate::credential::Credential;
use crate::error::{Error, Result};
use crate::models::{CurrentlyPlaying, PollOutcome, TrackSnapshot};
use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode, header};
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Default Spotify Web API base URL
pub const DEFAULT_API_URL: &str = "https://api.spotify.com/v1";

/// Default timeout for HTTP requests (10 seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 10;

/// Default User-Agent
pub const DEFAULT_USER_AGENT: &str = "PMOOverlay/0.1.0 (pmospotify)";

/// Anything able to tell what is playing for a credential
///
/// The streaming loop only depends on this trait, so it can be driven by a
/// scripted source in tests.
#[async_trait]
pub trait NowPlayingSource: Send + Sync {
    /// Performs one upstream call and classifies its result
    async fn fetch_current(&self, credential: &Credential) -> PollOutcome;
}

/// Spotify Web API client
///
/// Stateless: the credential is passed on each call.
#[derive(Debug, Clone)]
pub struct SpotifyClient {
    client: Client,
    api_url: String,
}

impl SpotifyClient {
    /// Create a new client with default settings
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Create a builder for configuring the client
    pub fn builder() -> ClientBuilder {
        ClientBuilder::default()
    }

    /// Create a client with a custom reqwest::Client
    pub fn with_client(client: Client) -> Self {
        Self {
            client,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    pub fn http_client(&self) -> &Client {
        &self.client
    }

    /// Fetches and classifies the current playback state
    ///
    /// | Upstream                              | Outcome          |
    /// |---------------------------------------|------------------|
    /// | 204, or 2xx with nothing playing      | `NothingPlaying` |
    /// | 2xx with a playing, named item        | `Snapshot`       |
    /// | 401 / 403                             | `Unauthorized`   |
    /// | 429, other status, network, bad JSON  | `TransientError` |
    pub async fn fetch_current(&self, credential: &Credential) -> PollOutcome {
        match self.currently_playing(credential).await {
            Ok(Some(current)) => match TrackSnapshot::from_currently_playing(&current, Utc::now()) {
                Some(snapshot) => PollOutcome::Snapshot(snapshot),
                None => PollOutcome::NothingPlaying,
            },
            Ok(None) => PollOutcome::NothingPlaying,
            Err(Error::Unauthorized) => PollOutcome::Unauthorized,
            Err(e) => PollOutcome::TransientError(e),
        }
    }

    /// Raw call to `GET /me/player/currently-playing`
    ///
    /// Returns `Ok(None)` when the API answers 204 No Content.
    pub async fn currently_playing(&self, credential: &Credential) -> Result<Option<CurrentlyPlaying>> {
        let url = format!(
            "{}/me/player/currently-playing",
            self.api_url.trim_end_matches('/')
        );
        trace!("GET {}", url);

        let response = self
            .client
            .get(&url)
            .header(header::AUTHORIZATION, credential.bearer())
            .send()
            .await
            .map_err(|e| Error::TransientNetworkError(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::NO_CONTENT {
            debug!("Nothing playing (204)");
            return Ok(None);
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let err = Error::from_status_code(status.as_u16(), body);
            if err.is_auth_error() {
                warn!("Spotify rejected the access token ({})", status);
            }
            return Err(err);
        }

        let body = response
            .text()
            .await
            .map_err(|e| Error::TransientNetworkError(e.to_string()))?;

        // Some clients answer 200 with an empty body instead of 204
        if body.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&body)
            .map(Some)
            .map_err(|e| Error::InvalidUpstreamResponse(e.to_string()))
    }
}

#[async_trait]
impl NowPlayingSource for SpotifyClient {
    async fn fetch_current(&self, credential: &Credential) -> PollOutcome {
        SpotifyClient::fetch_current(self, credential).await
    }
}

/// Builder for SpotifyClient
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    client: Option<Client>,
    api_url: String,
    timeout: Duration,
    user_agent: String,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            client: None,
            api_url: DEFAULT_API_URL.to_string(),
            timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_string(),
        }
    }
}

impl ClientBuilder {
    /// Use a custom reqwest client (timeout and user agent are then ignored)
    pub fn client(mut self, client: Client) -> Self {
        self.client = Some(client);
        self
    }

    /// Set the API base URL (useful for testing)
    pub fn api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into();
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> Result<SpotifyClient> {
        let client = match self.client {
            Some(client) => client,
            None => Client::builder()
                .user_agent(&self.user_agent)
                .timeout(self.timeout)
                .build()?,
        };

        Ok(SpotifyClient {
            client,
            api_url: self.api_url,
        })
    }
}
