//! Extension pmoserver pour Spotify
//!
//! Ce module fournit un trait d'extension pour ajouter l'overlay Spotify
//! (autorisation OAuth, lecture en cours, flux WebSocket) à un serveur
//! pmoserver.

use crate::auth::{AuthConfig, Authorizer};
use crate::client::{NowPlayingSource, SpotifyClient};
use crate::registry::SubscriberRegistry;
use crate::streaming::{PollIntervals, StreamHub, StreamingLoop};
use anyhow::Result;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// État partagé pour les handlers Spotify
#[derive(Clone)]
pub struct SpotifyState {
    pub authorizer: Arc<Authorizer>,
    pub source: Arc<dyn NowPlayingSource>,
    pub hub: Arc<StreamHub>,
}

impl SpotifyState {
    /// Assemble l'autorisation, la source et la boucle partagée
    ///
    /// `shutdown` arrête la boucle et ferme les WebSockets.
    pub fn new(
        authorizer: Arc<Authorizer>,
        source: Arc<dyn NowPlayingSource>,
        intervals: PollIntervals,
        shutdown: CancellationToken,
    ) -> Self {
        let streaming = StreamingLoop::new(
            authorizer.clone(),
            source.clone(),
            SubscriberRegistry::new(),
            intervals,
        );

        Self {
            authorizer,
            source,
            hub: Arc::new(StreamHub::new(streaming, shutdown)),
        }
    }
}

/// Trait pour étendre pmoserver avec l'overlay Spotify
///
/// `pmoserver` reste générique ; `pmospotify` ajoute ses routes via ce trait.
///
/// # Exemple
///
/// ```rust,no_run
/// use pmospotify::SpotifyExt;
/// use pmoserver::ServerBuilder;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let mut server = ServerBuilder::new_configured().build();
///     server.init_spotify().await?;
///
///     server.start().await;
///     server.wait().await;
///     Ok(())
/// }
/// ```
pub trait SpotifyExt {
    /// Initialise l'overlay Spotify depuis la configuration
    ///
    /// # Routes enregistrées
    ///
    /// - `GET /` - redirection vers l'autorisation Spotify
    /// - `GET /api/spotify-callback` - callback OAuth
    /// - `GET /api/spotify-current-playing` - lecture en cours
    /// - `GET /api/ws/spotify-current-playing` - flux WebSocket
    /// - `POST /api/spotify-refresh` - rafraîchissement du token
    /// - `GET /api/spotify-status` - état du service
    ///
    /// # Errors
    ///
    /// Échoue si `accounts.spotify.client_id` ou `client_secret` manque.
    async fn init_spotify(&mut self) -> Result<SpotifyState>;

    /// Initialise l'overlay avec une configuration et un client fournis
    async fn init_spotify_with(
        &mut self,
        auth_config: AuthConfig,
        client: SpotifyClient,
        intervals: PollIntervals,
    ) -> Result<SpotifyState>;
}

// L'implémentation du trait est dans pmoserver_impl.rs
