//! docrelay relay
//!
//! Serves the change event API and publishes envelopes to the configured bus.

use std::sync::Arc;

use anyhow::{Context, Result};
use docrelay_id::RelayId;
use docrelay_relay::{
    bus::{LogBus, MessageBus, PubSubHttpBus},
    config::{self, BusConfig},
    normalizer::Normalizer,
    pipeline::PublishPipeline,
    registry::WatchRegistry,
    relay::Relay,
    server,
    state::AppState,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::Config::from_env()?;

    // Prefer RUST_LOG, fall back to RELAY_LOG_LEVEL
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let relay_id = RelayId::new();
    info!(relay_id = %relay_id, "Starting docrelay relay");
    info!(
        listen_addr = %config.listen_addr,
        topic = %config.topic,
        registrations_file = %config.registrations_file.display(),
        "Configuration loaded"
    );

    let registry = WatchRegistry::new();
    let count = config::load_registrations(&config.registrations_file, &registry)?;
    info!(count, "Registrations loaded");

    let bus: Arc<dyn MessageBus> = match config.bus.clone() {
        BusConfig::Log => Arc::new(LogBus::new()),
        BusConfig::PubSub(pubsub) => Arc::new(PubSubHttpBus::new(pubsub)?),
    };
    info!(bus = bus.name(), "Message bus ready");

    let relay = Arc::new(Relay::new(
        Arc::new(registry),
        Normalizer::new(config.topic.clone(), relay_id),
        PublishPipeline::new(bus, config.retry.clone()),
    ));

    let state = AppState::new(relay);

    let listener = tokio::net::TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    info!(addr = %config.listen_addr, "Listening");

    if let Err(e) = server::serve(listener, state, config.shutdown_grace, shutdown_signal()).await {
        error!(error = %e, "Server error");
    }
    info!("Relay stopped");

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
