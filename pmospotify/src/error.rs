//! Error types for the Spotify now-playing service

/// Result type alias for pmospotify operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while authorizing against or polling Spotify
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required configuration (client id, secret, ...) is missing
    #[error("Missing OAuth configuration: {0}")]
    MissingConfig(String),

    /// The `state` returned to the callback does not match the issued one
    #[error("Invalid OAuth state")]
    InvalidState,

    /// The authorization-code (or refresh) exchange was rejected or failed
    #[error("Token exchange failed: {0}")]
    TokenExchangeFailed(String),

    /// A refresh was requested but the credential has no refresh token
    #[error("No refresh token available")]
    NoRefreshToken,

    /// The upstream API rejected the access token (401/403)
    #[error("Unauthorized: invalid or expired token")]
    Unauthorized,

    /// The upstream API answered 429
    #[error("Rate limit exceeded")]
    RateLimited,

    /// The upstream answered 2xx with a body we could not read
    #[error("Invalid API response: {0}")]
    InvalidUpstreamResponse(String),

    /// Network failure or unexpected upstream status
    #[error("Transient network error: {0}")]
    TransientNetworkError(String),

    /// HTTP client error
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON parsing failed
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid URL
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

impl Error {
    /// Maps a non-success upstream status to an error
    pub fn from_status_code(code: u16, message: impl Into<String>) -> Self {
        match code {
            401 | 403 => Self::Unauthorized,
            429 => Self::RateLimited,
            _ => Self::TransientNetworkError(format!("API error ({}): {}", code, message.into())),
        }
    }

    /// Whether the error means the credential is no longer usable
    pub fn is_auth_error(&self) -> bool {
        matches!(self, Error::Unauthorized)
    }
}
