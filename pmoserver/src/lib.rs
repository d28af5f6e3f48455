//! # pmoserver - Serveur web haut niveau basé sur Axum
//!
//! Cette crate fournit une abstraction simple pour créer des serveurs HTTP
//! avec Axum : composition de routers, documentation OpenAPI, initialisation
//! du tracing et arrêt gracieux partagé avec les tâches de fond.
//!
//! ## Architecture
//!
//! - [`server`] : Implémentation du serveur principal et du builder
//! - [`logs`] : Initialisation du tracing et API de réglage du niveau de log
//!
//! Les crates de service (ex: `pmospotify`) ajoutent leurs routes via des
//! traits d'extension implémentés sur [`Server`], sans que `pmoserver` les
//! connaisse.
//!
//! ## Exemple d'utilisation
//!
//! ```rust,no_run
//! use pmoserver::{ServerBuilder, logs::LoggingOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let mut server = ServerBuilder::new("MyServer", "localhost", 8080).build();
//!     server.init_logging(LoggingOptions::default()).await;
//!
//!     server.add_route("/api/status", || async {
//!         serde_json::json!({"status": "ok"})
//!     }).await;
//!
//!     server.start().await;
//!     server.wait().await;
//! }
//! ```

pub mod logs;
pub mod server;

pub use logs::{LogState, LoggingOptions};
pub use server::{Server, ServerBuilder, ServerInfo};
