//! OAuth 2.0 authorization-code flow against the Spotify accounts service
//!
//! The [`Authorizer`] issues the authorization URL (with a fresh `state`),
//! exchanges the code returned to the callback, and refreshes the credential
//! it holds in its [`CredentialStore`].
//!
//! Only one authorization is pending at a time: building a new URL replaces
//! the previous `state`, and the first exchange presenting the matching
//! `state` consumes it.

use crate::credential::{Credential, CredentialStore};
use crate::error::{Error, Result};
use crate::models::TokenResponse;
use chrono::Utc;
use rand::{Rng, distr::Alphanumeric};
use reqwest::Client;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info, warn};
use url::Url;

/// Default Spotify accounts service
pub const DEFAULT_ACCOUNTS_URL: &str = "https://accounts.spotify.com";

/// Scopes needed to read the playback state
pub const DEFAULT_SCOPES: &[&str] = &["user-read-currently-playing", "user-read-playback-state"];

const STATE_LENGTH: usize = 32;

/// OAuth client settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub accounts_url: String,
}

impl AuthConfig {
    /// Creates a configuration with the default scopes and accounts URL
    ///
    /// # Errors
    ///
    /// * `Error::MissingConfig` if any of the three values is empty
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        redirect_uri: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            redirect_uri: redirect_uri.into(),
            scopes: DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
            accounts_url: DEFAULT_ACCOUNTS_URL.to_string(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn with_scopes(mut self, scopes: Vec<String>) -> Self {
        if !scopes.is_empty() {
            self.scopes = scopes;
        }
        self
    }

    pub fn with_accounts_url(mut self, url: impl Into<String>) -> Self {
        self.accounts_url = url.into();
        self
    }

    pub fn validate(&self) -> Result<()> {
        let required = [
            ("client_id", &self.client_id),
            ("client_secret", &self.client_secret),
            ("redirect_uri", &self.redirect_uri),
        ];
        for (name, value) in required {
            if value.trim().is_empty() {
                return Err(Error::MissingConfig(name.to_string()));
            }
        }
        Ok(())
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.accounts_url.trim_end_matches('/'), path)
    }
}

/// Authorization flow and credential owner
#[derive(Debug)]
pub struct Authorizer {
    client: Client,
    config: AuthConfig,
    pending_state: Mutex<Option<String>>,
    store: CredentialStore,
    /// Un seul échange `refresh_token` à la fois
    refresh_lock: tokio::sync::Mutex<()>,
}

impl Authorizer {
    pub fn new(config: AuthConfig, client: Client) -> Self {
        Self::with_store(config, client, CredentialStore::new())
    }

    pub fn with_store(config: AuthConfig, client: Client, store: CredentialStore) -> Self {
        Self {
            client,
            config,
            pending_state: Mutex::new(None),
            store,
            refresh_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub fn store(&self) -> &CredentialStore {
        &self.store
    }

    /// Builds the URL the user agent is redirected to
    ///
    /// A new random `state` is generated and recorded; any previously
    /// pending state is discarded.
    pub fn authorization_url(&self) -> Result<String> {
        let state = generate_state();

        let mut url = Url::parse(&self.config.endpoint("/authorize"))?;
        url.query_pairs_mut()
            .append_pair("client_id", &self.config.client_id)
            .append_pair("response_type", "code")
            .append_pair("redirect_uri", &self.config.redirect_uri)
            .append_pair("scope", &self.config.scopes.join(" "))
            .append_pair("state", &state);

        let replaced = self
            .pending_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(state);
        if replaced.is_some() {
            debug!("Replacing pending OAuth state");
        }

        Ok(url.into())
    }

    /// Currently pending `state`, if an authorization URL was issued
    pub fn pending_state(&self) -> Option<String> {
        self.pending_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Exchanges an authorization code for a credential
    ///
    /// # Errors
    ///
    /// * `Error::InvalidState` - no URL was issued or `state` does not match;
    ///   nothing is sent upstream
    /// * `Error::TokenExchangeFailed` - the accounts service rejected the code
    ///   or could not be reached
    pub async fn exchange(&self, state: &str, code: &str) -> Result<Arc<Credential>> {
        self.consume_state(state)?;

        let params = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];
        let token = self.request_token(&params).await?;

        let credential = Credential::from_token_response(token, Some(state.to_string()), Utc::now());
        info!(
            "Spotify authorization granted (expires in {}s)",
            credential.expires_in().num_seconds()
        );
        Ok(self.install(credential))
    }

    /// Refreshes the current credential with its refresh token
    ///
    /// The previous refresh token is kept when the response omits one.
    ///
    /// # Errors
    ///
    /// * `Error::NoRefreshToken` - no credential, or no refresh token
    /// * `Error::TokenExchangeFailed` - the refresh was rejected
    pub async fn refresh(&self) -> Result<Arc<Credential>> {
        let _guard = self.refresh_lock.lock().await;
        self.refresh_locked().await
    }

    async fn refresh_locked(&self) -> Result<Arc<Credential>> {
        let current = self.store.current().ok_or(Error::NoRefreshToken)?;
        let refresh_token = current.refresh_token.clone().ok_or(Error::NoRefreshToken)?;

        let params = [
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token.as_str()),
        ];
        let token = self.request_token(&params).await?;

        let mut credential =
            Credential::from_token_response(token, current.state.clone(), Utc::now());
        if credential.refresh_token.is_none() {
            credential.refresh_token = Some(refresh_token);
        }
        if credential.scope.is_none() {
            credential.scope = current.scope.clone();
        }

        info!("Spotify credential refreshed");
        Ok(self.install(credential))
    }

    /// Refreshes the credential when it is expired and refreshable
    ///
    /// Returns the credential to use, `None` if there is none. A failed
    /// refresh is logged and the stale credential returned. Concurrent
    /// callers share a single refresh.
    pub async fn refresh_if_expired(&self) -> Option<Arc<Credential>> {
        let current = self.store.current()?;
        if !needs_refresh(&current) {
            return Some(current);
        }

        let _guard = self.refresh_lock.lock().await;
        // Un autre appelant a pu rafraîchir pendant l'attente du verrou
        let current = self.store.current()?;
        if !needs_refresh(&current) {
            return Some(current);
        }

        match self.refresh_locked().await {
            Ok(credential) => Some(credential),
            Err(e) => {
                warn!("Proactive refresh failed: {}", e);
                Some(current)
            }
        }
    }

    pub fn current_credential(&self) -> Option<Arc<Credential>> {
        self.store.current()
    }

    pub fn replace_credential(&self, credential: Credential) -> Arc<Credential> {
        self.install(credential)
    }

    fn install(&self, credential: Credential) -> Arc<Credential> {
        let credential = Arc::new(credential);
        self.store.replace(credential.clone());
        credential
    }

    fn consume_state(&self, state: &str) -> Result<()> {
        let mut pending = self
            .pending_state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);

        match pending.as_deref() {
            Some(expected) if expected == state => {
                pending.take();
                Ok(())
            }
            Some(_) => {
                warn!("OAuth callback with mismatching state");
                Err(Error::InvalidState)
            }
            None => {
                warn!("OAuth callback without pending authorization");
                Err(Error::InvalidState)
            }
        }
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse> {
        let url = self.config.endpoint("/api/token");
        debug!("POST {}", url);

        let response = self
            .client
            .post(&url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(params)
            .send()
            .await
            .map_err(|e| Error::TokenExchangeFailed(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::TokenExchangeFailed(format!(
                "status {}: {}",
                status.as_u16(),
                body
            )));
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| Error::TokenExchangeFailed(format!("invalid token response: {}", e)))
    }
}

fn needs_refresh(credential: &Credential) -> bool {
    credential.is_expired() && credential.refresh_token.is_some()
}

fn generate_state() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(STATE_LENGTH)
        .map(char::from)
        .collect()
}
