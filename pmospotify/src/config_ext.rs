//! Extension pour intégrer la configuration Spotify dans pmoconfig
//!
//! Les paramètres vivent sous `accounts.spotify` :
//!
//! ```yaml
//! accounts:
//!   spotify:
//!     client_id: "..."
//!     client_secret: "..."
//!     redirect_uri: http://localhost:8080/api/spotify-callback
//!     scopes: [user-read-currently-playing, user-read-playback-state]
//!     playing_interval_ms: 1000
//!     idle_interval_ms: 10000
//! ```
//!
//! Chaque clé peut être surchargée par l'environnement, par exemple
//! `PMOOVERLAY_CONFIG__ACCOUNTS__SPOTIFY__CLIENT_SECRET`.

use crate::auth::{AuthConfig, DEFAULT_ACCOUNTS_URL, DEFAULT_SCOPES};
use crate::client::DEFAULT_API_URL;
use crate::error::{Error, Result};
use crate::streaming::{DEFAULT_IDLE_INTERVAL, DEFAULT_PLAYING_INTERVAL, PollIntervals};
use pmoconfig::Config;
use serde_yaml::Value;
use std::time::Duration;

const SECTION: [&str; 2] = ["accounts", "spotify"];

/// Redirect URI par défaut (serveur local)
pub const DEFAULT_REDIRECT_URI: &str = "http://localhost:8080/api/spotify-callback";

fn key(name: &str) -> [&str; 3] {
    [SECTION[0], SECTION[1], name]
}

/// Trait d'extension pour gérer la configuration Spotify dans pmoconfig
///
/// # Exemple
///
/// ```rust,ignore
/// use pmoconfig::get_config;
/// use pmospotify::SpotifyConfigExt;
///
/// let auth = get_config().get_spotify_auth_config()?;
/// println!("Spotify client: {}", auth.client_id);
/// ```
pub trait SpotifyConfigExt {
    /// Client ID de l'application Spotify
    ///
    /// # Errors
    ///
    /// `Error::MissingConfig` si la valeur est absente ou vide
    fn get_spotify_client_id(&self) -> Result<String>;
    fn set_spotify_client_id(&self, client_id: &str) -> anyhow::Result<()>;

    /// Client secret de l'application Spotify
    fn get_spotify_client_secret(&self) -> Result<String>;
    fn set_spotify_client_secret(&self, client_secret: &str) -> anyhow::Result<()>;

    fn get_spotify_redirect_uri(&self) -> String;
    fn set_spotify_redirect_uri(&self, uri: &str) -> anyhow::Result<()>;

    /// Scopes OAuth demandés (liste YAML ou chaîne séparée par des espaces)
    fn get_spotify_scopes(&self) -> Vec<String>;

    fn get_spotify_accounts_url(&self) -> String;
    fn get_spotify_api_url(&self) -> String;

    /// Intervalles de polling (lecture en cours / inactif)
    fn get_spotify_poll_intervals(&self) -> PollIntervals;
    fn set_spotify_poll_intervals(&self, intervals: PollIntervals) -> anyhow::Result<()>;

    /// Assemble la configuration OAuth complète
    ///
    /// # Errors
    ///
    /// `Error::MissingConfig` si le client id ou le secret manque : le
    /// serveur ne peut pas démarrer sans eux.
    fn get_spotify_auth_config(&self) -> Result<AuthConfig>;
}

impl SpotifyConfigExt for Config {
    fn get_spotify_client_id(&self) -> Result<String> {
        self.get_string(&key("client_id"))
            .ok_or_else(|| Error::MissingConfig("accounts.spotify.client_id".to_string()))
    }

    fn set_spotify_client_id(&self, client_id: &str) -> anyhow::Result<()> {
        self.set_value(&key("client_id"), Value::String(client_id.to_string()))
    }

    fn get_spotify_client_secret(&self) -> Result<String> {
        self.get_string(&key("client_secret"))
            .ok_or_else(|| Error::MissingConfig("accounts.spotify.client_secret".to_string()))
    }

    fn set_spotify_client_secret(&self, client_secret: &str) -> anyhow::Result<()> {
        self.set_value(&key("client_secret"), Value::String(client_secret.to_string()))
    }

    fn get_spotify_redirect_uri(&self) -> String {
        self.get_string(&key("redirect_uri"))
            .unwrap_or_else(|| DEFAULT_REDIRECT_URI.to_string())
    }

    fn set_spotify_redirect_uri(&self, uri: &str) -> anyhow::Result<()> {
        self.set_value(&key("redirect_uri"), Value::String(uri.to_string()))
    }

    fn get_spotify_scopes(&self) -> Vec<String> {
        let scopes: Vec<String> = match self.get_value(&key("scopes")) {
            Ok(Value::Sequence(seq)) => seq
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.trim().to_string()))
                .filter(|s| !s.is_empty())
                .collect(),
            Ok(Value::String(s)) => s.split_whitespace().map(String::from).collect(),
            _ => Vec::new(),
        };

        if scopes.is_empty() {
            DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            scopes
        }
    }

    fn get_spotify_accounts_url(&self) -> String {
        self.get_string(&key("accounts_url"))
            .unwrap_or_else(|| DEFAULT_ACCOUNTS_URL.to_string())
    }

    fn get_spotify_api_url(&self) -> String {
        self.get_string(&key("api_url"))
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
    }

    fn get_spotify_poll_intervals(&self) -> PollIntervals {
        PollIntervals::new(
            millis(self, "playing_interval_ms").unwrap_or(DEFAULT_PLAYING_INTERVAL),
            millis(self, "idle_interval_ms").unwrap_or(DEFAULT_IDLE_INTERVAL),
        )
    }

    fn set_spotify_poll_intervals(&self, intervals: PollIntervals) -> anyhow::Result<()> {
        self.set_value(
            &key("playing_interval_ms"),
            Value::Number((intervals.playing.as_millis() as u64).into()),
        )?;
        self.set_value(
            &key("idle_interval_ms"),
            Value::Number((intervals.idle.as_millis() as u64).into()),
        )
    }

    fn get_spotify_auth_config(&self) -> Result<AuthConfig> {
        let config = AuthConfig::new(
            self.get_spotify_client_id()?,
            self.get_spotify_client_secret()?,
            self.get_spotify_redirect_uri(),
        )?;

        Ok(config
            .with_scopes(self.get_spotify_scopes())
            .with_accounts_url(self.get_spotify_accounts_url()))
    }
}

// Un intervalle nul ferait tourner la boucle à vide
fn millis(config: &Config, name: &str) -> Option<Duration> {
    let ms = match config.get_value(&key(name)).ok()? {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse().ok()?,
        _ => return None,
    };
    (ms > 0).then(|| Duration::from_millis(ms))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> (TempDir, Config) {
        let dir = TempDir::new().unwrap();
        let config = Config::load_config(dir.path().to_str().unwrap()).unwrap();
        (dir, config)
    }

    #[test]
    fn test_missing_credentials() {
        let (_dir, config) = config();
        config.set_spotify_client_id("").unwrap();
        assert!(matches!(
            config.get_spotify_auth_config(),
            Err(Error::MissingConfig(_))
        ));

        config.set_spotify_client_id("client").unwrap();
        config.set_spotify_client_secret("").unwrap();
        assert!(matches!(
            config.get_spotify_auth_config(),
            Err(Error::MissingConfig(key)) if key.ends_with("client_secret")
        ));
    }

    #[test]
    fn test_auth_config_from_values() {
        let (_dir, config) = config();
        config.set_spotify_client_id("client").unwrap();
        config.set_spotify_client_secret("secret").unwrap();
        config
            .set_spotify_redirect_uri("http://overlay.local/api/spotify-callback")
            .unwrap();

        let auth = config.get_spotify_auth_config().unwrap();
        assert_eq!(auth.client_id, "client");
        assert_eq!(auth.client_secret, "secret");
        assert_eq!(auth.redirect_uri, "http://overlay.local/api/spotify-callback");
        assert_eq!(auth.accounts_url, DEFAULT_ACCOUNTS_URL);
        assert_eq!(
            auth.scopes,
            vec!["user-read-currently-playing", "user-read-playback-state"]
        );
    }

    #[test]
    fn test_scopes_as_string() {
        let (_dir, config) = config();
        config
            .set_value(&key("scopes"), Value::String("a b  c".into()))
            .unwrap();
        assert_eq!(config.get_spotify_scopes(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_poll_intervals() {
        let (_dir, config) = config();
        assert_eq!(config.get_spotify_poll_intervals(), PollIntervals::default());

        config
            .set_spotify_poll_intervals(PollIntervals::new(
                Duration::from_millis(500),
                Duration::from_secs(30),
            ))
            .unwrap();
        let intervals = config.get_spotify_poll_intervals();
        assert_eq!(intervals.playing, Duration::from_millis(500));
        assert_eq!(intervals.idle, Duration::from_secs(30));

        config
            .set_value(&key("idle_interval_ms"), Value::Number(0.into()))
            .unwrap();
        assert_eq!(config.get_spotify_poll_intervals().idle, DEFAULT_IDLE_INTERVAL);
    }
}
