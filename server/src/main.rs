//! Collaborative jigsaw puzzle coordinator.
//!
//! Run with: cargo run --bin puzzleroom-server

use puzzleroom_server::{Server, ServerConfig, ServerError};

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::from_env();
    println!("Puzzle server listening on http://{}", config.http_addr);
    println!("  WS: ws://{}/ws", config.http_addr);

    Server::new(config).run().await
}
