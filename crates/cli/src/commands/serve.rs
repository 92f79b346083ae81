//! `datascope serve` — Start the WebSocket/REST gateway.

use std::path::PathBuf;
use std::sync::Arc;

use datascope_engine::ConversationRegistry;
use datascope_gateway::{GatewayState, build_router};
use tracing::info;

pub async fn run(
    port_override: Option<u16>,
    config_path: Option<PathBuf>,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = super::load_config(config_path)?;
    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    let factory = super::build_engine_factory(&config).await?;
    let registry = Arc::new(ConversationRegistry::new(factory));
    let router = build_router(Arc::new(GatewayState { registry }));

    let listener =
        tokio::net::TcpListener::bind((config.gateway.host.as_str(), config.gateway.port)).await?;
    info!("datascope gateway listening on {}", listener.local_addr()?);

    axum::serve(listener, router).await?;
    Ok(())
}
