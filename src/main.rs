//! VoIP CRM core
//!
//! Multi-tenant call-center coordination service: call sessions across
//! VoIP providers, live tenant events over WebSocket, and AI query routing.

mod models;
mod server;

use server::config::Config;

fn main() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "voip_crm_core=info,tower_http=info".into()),
        )
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => {
            tracing::error!("Failed to start Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    let config = Config::from_env();
    tracing::info!("Starting VoIP CRM core on {}", config.bind_addr());

    if let Err(e) = runtime.block_on(server::run_server(config)) {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
