//! Credential storage
//!
//! A [`Credential`] is immutable once issued. The [`CredentialStore`] holds the
//! current one behind an `Arc` and swaps it atomically: readers either see the
//! previous credential or the new one, never a mix.

use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, PoisonError, RwLock};

use crate::models::TokenResponse;

/// Margin under which a credential is treated as expired
const EXPIRY_MARGIN_SECS: i64 = 30;

/// Default lifetime when the token endpoint omits `expires_in`
const DEFAULT_LIFETIME_SECS: i64 = 3600;

/// An access token issued by the Spotify accounts service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: DateTime<Utc>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    /// OAuth `state` of the authorization that produced this credential
    pub state: Option<String>,
}

impl Credential {
    /// Builds a credential from a token endpoint response received at `now`
    pub fn from_token_response(
        token: TokenResponse,
        state: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        let lifetime = token.expires_in.unwrap_or(DEFAULT_LIFETIME_SECS);
        Self {
            access_token: token.access_token,
            token_type: token.token_type,
            expires_at: now + Duration::seconds(lifetime),
            refresh_token: token.refresh_token.filter(|t| !t.is_empty()),
            scope: token.scope,
            state,
        }
    }

    /// Time left before expiry (negative once expired)
    pub fn expires_in(&self) -> Duration {
        self.expires_at - Utc::now()
    }

    /// Whether the credential is expired, or about to be
    pub fn is_expired(&self) -> bool {
        self.expires_in() <= Duration::seconds(EXPIRY_MARGIN_SECS)
    }

    /// `Authorization` header value
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.access_token)
    }
}

/// Shared holder of the current credential
///
/// Cloning the store shares the underlying slot.
#[derive(Debug, Clone, Default)]
pub struct CredentialStore {
    inner: Arc<RwLock<Option<Arc<Credential>>>>,
}

impl CredentialStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current credential, if any
    pub fn current(&self) -> Option<Arc<Credential>> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the credential and returns the previous one
    pub fn replace(&self, credential: impl Into<Arc<Credential>>) -> Option<Arc<Credential>> {
        let mut slot = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        slot.replace(credential.into())
    }
}
