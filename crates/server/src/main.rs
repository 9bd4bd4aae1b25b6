mod bootstrap;
mod chat;
mod health;

use anyhow::Result;
use concierge_core::config::{AppConfig, LoadOptions};

fn init_logging(config: &AppConfig) {
    use concierge_core::config::LogFormat::*;
    use tracing::Level;

    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_max_level(log_level).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    // Load config and initialize logging before any other operations.
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let health_state = health::HealthState::new(
        app.config.registry.dir.clone(),
        app.orchestrator.provider_ids(),
    );
    let router = chat::router(app.orchestrator.clone()).merge(health::router(health_state));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "concierge-server listening"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "concierge-server stopping"
    );
    Ok(())
}

async fn wait_for_shutdown() {
    let _ = tokio::signal::ctrl_c().await;
}
