//! # Replicant Sync Agent
//!
//! Mirrors the replicants of one or more bundles and logs every change.
//!
//! ## Architecture
//!
//! The agent wires three pieces together:
//! 1. **Transport**: a Socket.IO connection with automatic reconnect
//! 2. **Session**: declaration, patching and gap repair of every topic
//! 3. **Runtime**: reports session events until Ctrl+C

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting replicant sync agent"
    );

    let config = AgentConfig::from_env()?;
    tracing::info!(
        host = config.connection.host.as_deref().unwrap_or_default(),
        port = config.connection.port.as_deref().unwrap_or_default(),
        topics = config.registry.len(),
        "Configuration loaded"
    );

    Agent::new(config).run().await
}
