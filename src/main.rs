use std::sync::Arc;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;

use ara_realtime_dispatch::api::dispatch_registry;
use ara_realtime_dispatch::config::Settings;
use ara_realtime_dispatch::server::{connection_manager_for, create_app, AppState};
use ara_realtime_dispatch::tasks::ChannelKeepalive;
use ara_realtime_dispatch::telemetry::init_tracing;
use ara_realtime_dispatch::transport::{create_transport, LocalTransport, RedisRelay};

#[tokio::main]
async fn main() -> Result<()> {
    let settings = Settings::new()?;
    init_tracing(&settings.logging);
    tracing::info!("Configuration loaded");

    let registry = dispatch_registry();
    if settings.dispatch.validate_on_startup {
        registry.validate()?;
        tracing::info!(handlers = registry.len(), "Dispatch registry validated");
    }

    let connection_manager = connection_manager_for(&settings);
    let transport = create_transport(&settings.transport, connection_manager.clone()).await?;
    tracing::info!(transport = transport.name(), "Transport ready");

    let state = AppState::new(settings.clone(), connection_manager.clone(), registry, transport);
    tracing::info!("Application state initialized");

    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let keepalive = ChannelKeepalive::new(
        settings.websocket.clone(),
        connection_manager.clone(),
        shutdown_tx.subscribe(),
    );
    let keepalive_handle = tokio::spawn(keepalive.run());

    // Events published by any node reach this node's subscribers through the relay
    let relay_handle = (settings.transport.backend == "redis").then(|| {
        let relay = RedisRelay::new(
            settings.transport.redis.clone(),
            Arc::new(LocalTransport::new(connection_manager.clone())),
            shutdown_tx.subscribe(),
        );
        tokio::spawn(relay.run())
    });

    let app = create_app(state);

    let addr = settings.server_addr();
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal_handler(shutdown_tx))
        .await?;

    tracing::info!("Waiting for background tasks to finish...");
    let _ = keepalive_handle.await;
    if let Some(handle) = relay_handle {
        let _ = handle.await;
    }

    tracing::info!("Server shutdown complete");
    Ok(())
}

async fn shutdown_signal_handler(shutdown_tx: broadcast::Sender<()>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }

    let _ = shutdown_tx.send(());
}
