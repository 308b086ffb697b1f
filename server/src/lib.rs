//! Session coordinator for real-time collaborative jigsaw rooms.
//!
//! Clients connect over a WebSocket, join a room by key, and jointly
//! manipulate puzzle pieces. The server owns the authoritative room state,
//! arbitrates drag ownership, reconciles late joiners with full snapshots,
//! and fans accepted mutations out to the rest of the room.

pub mod error;
pub mod locks;
pub mod palette;
pub mod registry;
pub mod room;
pub mod ws;

use crate::registry::RoomRegistry;
use crate::ws::WsState;
use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use std::time::Duration;

pub use error::ServerError;

/// Default listen port, overridable via the `PORT` environment variable.
const DEFAULT_PORT: u16 = 3000;

/// How long a room may sit empty before it is evicted.
const EMPTY_ROOM_GRACE: Duration = Duration::from_secs(5 * 60);

/// Configuration for the server.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind the HTTP/WebSocket server.
    pub http_addr: String,
    /// Empty-room grace period before eviction.
    pub empty_room_grace: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: format!("0.0.0.0:{DEFAULT_PORT}"),
            empty_room_grace: EMPTY_ROOM_GRACE,
        }
    }
}

impl ServerConfig {
    /// Default config with the listen port taken from `PORT` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(port) = std::env::var("PORT") {
            match port.parse::<u16>() {
                Ok(port) => config.http_addr = format!("0.0.0.0:{port}"),
                Err(_) => {
                    tracing::warn!(%port, "invalid PORT value, using default {DEFAULT_PORT}")
                }
            }
        }
        config
    }
}

/// The coordinator server.
pub struct Server {
    config: ServerConfig,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self { config }
    }

    /// Run until the listener shuts down.
    pub async fn run(self) -> Result<(), ServerError> {
        tracing::info!(addr = %self.config.http_addr, "server starting");

        let registry = RoomRegistry::new(self.config.empty_room_grace);
        let state = web::Data::new(WsState { registry });

        HttpServer::new(move || {
            // Browser clients come from arbitrary origins, as the original
            // deployment allowed.
            let cors = Cors::permissive();
            App::new()
                .wrap(cors)
                .app_data(state.clone())
                .route("/ws", web::get().to(ws::connect))
        })
        .bind(&self.config.http_addr)?
        .run()
        .await
        .map_err(|e| ServerError::Http(e.to_string()))
    }
}
