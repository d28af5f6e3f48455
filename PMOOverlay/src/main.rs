use anyhow::Context;
use pmoserver::{LoggingOptions, ServerBuilder};
use pmospotify::SpotifyExt;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ========== PHASE 1 : Infrastructure ==========

    let mut server = ServerBuilder::new_configured().build();
    server.init_logging(LoggingOptions::from_config()).await;

    let info = server.info();
    server
        .add_route("/api/info", move || {
            let info = info.clone();
            async move {
                serde_json::json!({
                    "name": info.name,
                    "version": env!("CARGO_PKG_VERSION"),
                })
            }
        })
        .await;

    // ========== PHASE 2 : Overlay Spotify ==========

    info!("🎧 Initializing Spotify overlay...");
    if let Err(e) = server.init_spotify().await {
        // Sans client id / secret le serveur ne peut rien servir
        error!("❌ {:#}", e);
        return Err(e).context("Cannot start without Spotify credentials");
    }

    // ========== PHASE 3 : Démarrage du serveur ==========

    info!("🌐 Starting HTTP server...");
    server.start().await;

    let info = server.info();
    info!("✅ PMOOverlay is ready!");
    info!("   Authorize at  http://{}:{}/", info.base_url, info.http_port);
    info!(
        "   Live updates  ws://{}:{}/api/ws/spotify-current-playing",
        info.base_url, info.http_port
    );
    info!("Press Ctrl+C to stop...");
    server.wait().await;

    info!("👋 PMOOverlay stopped");
    Ok(())
}
