//! Meeting relay
//!
//! WebSocket signaling server for multi-party video meetings.
//!
//! # Servers
//!
//! - HTTP server for `/ws` and `/api/*` (default: 0.0.0.0:3000)
//! - HTTP server for `/health`, `/ready` and `/metrics` (default: 0.0.0.0:8081)
//!
//! # Startup Flow
//!
//! 1. Initialize tracing
//! 2. Load configuration from environment
//! 3. Install the Prometheus metrics recorder
//! 4. Spawn the relay actor
//! 5. Bind and start the health server
//! 6. Bind and start the signaling server, then mark ready
//! 7. Wait for shutdown signal, drain sockets

#![warn(clippy::pedantic)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context};
use axum::Router;
use relay_service::actors::{ActorMetrics, RelayActorHandle};
use relay_service::config::{Config, LogFormat};
use relay_service::observability::{health_router, init_metrics_recorder, HealthState};
use relay_service::relay::RelaySettings;
use relay_service::routes::{build_routes, AppState};
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Time given to open sockets to flush close frames.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "relay_service=info,tower_http=info".into());
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }

    info!(
        relay_id = %config.relay_id,
        bind_address = %config.bind_address,
        health_bind_address = %config.health_bind_address,
        max_meetings = config.limits.max_meetings,
        max_participants = config.limits.max_participants_per_meeting,
        host_disconnect_policy = ?config.host_disconnect_policy,
        "Configuration loaded successfully"
    );

    let prometheus_handle = init_metrics_recorder().map_err(|e| anyhow!(e))?;
    let health_state = Arc::new(HealthState::new());

    let actor_metrics = ActorMetrics::new();
    let relay = RelayActorHandle::new(
        config.relay_id.clone(),
        RelaySettings {
            limits: config.limits,
            transport: config.transport.clone(),
            host_disconnect_policy: config.host_disconnect_policy,
            heartbeat_timeout: config.heartbeat_timeout,
        },
        config.health_check_interval,
        Arc::clone(&actor_metrics),
    );
    let shutdown_token = relay.child_token();

    // Health server
    let health_addr: SocketAddr = config
        .health_bind_address
        .parse()
        .with_context(|| format!("Invalid health bind address {}", config.health_bind_address))?;
    let metrics_router = Router::new().route(
        "/metrics",
        axum::routing::get(move || {
            let handle = prometheus_handle.clone();
            async move { handle.render() }
        }),
    );
    let health_app = health_router(Arc::clone(&health_state)).merge(metrics_router);

    let health_listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .with_context(|| format!("Failed to bind health server to {health_addr}"))?;
    let health_token = shutdown_token.child_token();
    tokio::spawn(async move {
        info!(addr = %health_addr, "Health server starting");
        let server = axum::serve(health_listener, health_app).with_graceful_shutdown(async move {
            health_token.cancelled().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Signaling server
    let addr: SocketAddr = config
        .bind_address
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.bind_address))?;
    let app = build_routes(Arc::new(AppState {
        relay: relay.clone(),
        metrics: Arc::clone(&actor_metrics),
        transport: config.transport.clone(),
    }));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind signaling server to {addr}"))?;
    let server_token = shutdown_token.child_token();
    let server = tokio::spawn(async move {
        info!(addr = %addr, "Signaling server starting");
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            server_token.cancelled().await;
        });
        if let Err(e) = server.await {
            error!(error = %e, "Signaling server failed");
        }
    });

    health_state.set_ready();
    info!("Relay running - press Ctrl+C to shutdown");
    shutdown_signal().await;

    info!("Shutdown signal received, draining sockets");
    health_state.set_not_ready();
    if let Err(e) = relay.shutdown().await {
        warn!(error = %e, "Relay shutdown error");
    }
    tokio::time::sleep(DRAIN_GRACE).await;

    relay.cancel();
    let _ = server.await;

    info!("Relay shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM. A signal handler that cannot be installed
/// resolves immediately so the process still exits cleanly.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
