//! Spotify now-playing overlay for PMOMusic-style servers
//!
//! This crate authorizes against a Spotify account (OAuth 2.0
//! authorization-code flow), polls the "currently playing" endpoint on the
//! user's behalf and republishes the result to any number of WebSocket
//! subscribers.
//!
//! # Components
//!
//! - [`Authorizer`]: authorization URL, code exchange, refresh; owns the
//!   current [`Credential`] through a [`CredentialStore`]
//! - [`SpotifyClient`]: one call per poll, classified into a [`PollOutcome`]
//! - [`SubscriberRegistry`]: live subscribers, snapshot broadcast
//! - [`StreamingLoop`] / [`StreamHub`]: the shared poll-and-broadcast loop,
//!   1 s cadence while a track plays and 10 s otherwise
//! - [`SpotifyExt`]: registers the HTTP routes on a `pmoserver::Server`
//!
//! # Example
//!
//! ```no_run
//! use pmoserver::ServerBuilder;
//! use pmospotify::SpotifyExt;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let mut server = ServerBuilder::new_configured().build();
//!     server.init_spotify().await?;
//!     server.start().await;
//!     server.wait().await;
//!     Ok(())
//! }
//! ```
//!
//! # Configuration
//!
//! Credentials are read from `accounts.spotify` in the pmoconfig file (see
//! [`SpotifyConfigExt`]). The server refuses to start without a client id and
//! secret.

pub mod api_rest;
pub mod auth;
pub mod client;
pub mod config_ext;
pub mod credential;
pub mod error;
pub mod models;
pub mod pmoserver_ext;
pub mod registry;
pub mod streaming;

mod pmoserver_impl;

// Re-exports
pub use api_rest::{SpotifyApiDoc, create_router};
pub use auth::{AuthConfig, Authorizer};
pub use client::{ClientBuilder, NowPlayingSource, SpotifyClient};
pub use config_ext::SpotifyConfigExt;
pub use credential::{Credential, CredentialStore};
pub use error::{Error, Result};
pub use models::{
    ApiResponse, CurrentlyPlaying, PollOutcome, StatusResponse, StreamMessage, TokenResponse,
    TrackSnapshot,
};
pub use pmoserver_ext::{SpotifyExt, SpotifyState};
pub use registry::{
    ChannelSubscriber, DeliveryError, Subscriber, SubscriberId, SubscriberRegistry,
};
pub use streaming::{LoopExit, PollIntervals, StreamHub, StreamingLoop};
