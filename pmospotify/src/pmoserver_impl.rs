//! Implémentation du trait SpotifyExt pour pmoserver::Server

use crate::api_rest::{SpotifyApiDoc, create_router};
use crate::auth::{AuthConfig, Authorizer};
use crate::client::SpotifyClient;
use crate::config_ext::SpotifyConfigExt;
use crate::pmoserver_ext::{SpotifyExt, SpotifyState};
use crate::streaming::PollIntervals;
use anyhow::{Context, Result};
use pmoserver::Server;
use std::sync::Arc;
use tracing::info;
use utoipa::OpenApi;

impl SpotifyExt for Server {
    async fn init_spotify(&mut self) -> Result<SpotifyState> {
        info!("Initializing Spotify overlay...");

        let config = pmoconfig::get_config();
        let auth_config = config
            .get_spotify_auth_config()
            .context("Spotify OAuth is not configured")?;

        let client = SpotifyClient::builder()
            .api_url(config.get_spotify_api_url())
            .build()
            .context("Failed to create Spotify client")?;

        self.init_spotify_with(auth_config, client, config.get_spotify_poll_intervals())
            .await
    }

    async fn init_spotify_with(
        &mut self,
        auth_config: AuthConfig,
        client: SpotifyClient,
        intervals: PollIntervals,
    ) -> Result<SpotifyState> {
        auth_config.validate()?;

        // Même pool de connexions pour l'API et le service de comptes
        let authorizer = Authorizer::new(auth_config, client.http_client().clone());
        let state = SpotifyState::new(
            Arc::new(authorizer),
            Arc::new(client),
            intervals,
            self.shutdown_token(),
        );

        self.add_openapi(create_router(state.clone()), SpotifyApiDoc::openapi(), "spotify")
            .await;

        info!(
            "Spotify overlay initialized (polling every {:?} while playing, {:?} when idle)",
            intervals.playing, intervals.idle
        );
        info!("Open / in a browser to authorize");

        Ok(state)
    }
}
