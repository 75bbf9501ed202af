//! SOS Controller - Main Entry Point

use sos_controller::{SosConfig, SosController};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("SOS Controller v{}", env!("CARGO_PKG_VERSION"));

    // Load config
    let config_path = std::env::var("SOS_CONFIG")
        .unwrap_or_else(|_| "/etc/sos/controller.json".into());

    let config = SosConfig::load(&config_path).unwrap_or_else(|e| {
        tracing::warn!("Config {} not usable ({}), using defaults", config_path, e);
        SosConfig::default()
    });

    let controller = SosController::new(config)?;
    for agent in controller.agents.all() {
        tracing::info!("Agent {} health at {}", agent.ip, agent.health_url());
    }

    tokio::select! {
        result = controller.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutting down with {} active connections", controller.connections.len());
        }
    }

    Ok(())
}
