//! # Agent Call Gateway - Main Application Entry Point
//!
//! Actix-web server bridging telephony dialers to conversational-AI agents.
//!
//! ## Application Architecture:
//! - **config**: configuration from TOML files + environment variables
//! - **state**: shared application state and process metrics
//! - **audio**: G.711 mu-law codec and rate conversion
//! - **dialer**: vendor adapter bundles and the adapter registry
//! - **agent**: agent-platform connection and message codec
//! - **bridge**: the per-call duplex relay state machine
//! - **session**: call sessions, admission control, monitoring
//! - **handlers**: call-control webhooks and the monitoring API
//! - **health / middleware / error**: the usual service plumbing

mod agent;
mod audio;
mod bridge;
mod config;
mod dialer;
mod error;
mod handlers;
mod health;
mod middleware;
mod session;
mod state;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use dialer::registry::AdapterRegistry;
use session::SessionRegistry;
use state::AppState;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Global shutdown signal set by the signal handlers.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting agent-call-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Configuration loaded: {}:{} ({})",
        config.server.host, config.server.port, config.server.environment
    );

    // Vendor adapters are registered once, before the registry is shared.
    let mut adapters = AdapterRegistry::new();
    adapters.register(dialer::twilio::adapter());
    info!("Registered dialers: {}", adapters.list().join(", "));

    let sessions = Arc::new(SessionRegistry::new(
        config.bridge.max_concurrent_sessions,
        Duration::from_secs(config.bridge.ended_retention_secs),
    ));

    let app_state = AppState::new(config.clone(), adapters, sessions.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    setup_signal_handlers();
    spawn_retention_sweeper(sessions);

    info!("Starting HTTP server on {}", bind_addr);

    let development = config.is_development();
    let server = HttpServer::new(move || {
        let cors = if development {
            Cors::default()
                .allow_any_origin()
                .allow_any_method()
                .allow_any_header()
                .max_age(3600)
        } else {
            Cors::default()
        };

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            // Monitoring surface
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics))
                    .route("/sessions", web::get().to(handlers::list_sessions))
                    .route("/sessions/count", web::get().to(handlers::session_count))
                    .route(
                        "/sessions/{id}",
                        web::delete().to(handlers::terminate_session),
                    ),
            )
            // Root-level health check for load balancers
            .route("/health", web::get().to(health::health_check))
            // Vendor-agnostic call control and media streaming
            .route(
                "/{vendor}/outbound-call",
                web::post().to(handlers::outbound_call),
            )
            .route(
                "/{vendor}/incoming-call",
                web::post().to(handlers::incoming_call),
            )
            .route("/{vendor}/media-stream", web::get().to(bridge::media_stream))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(server_result) => {
                    if let Err(e) = server_result {
                        error!("Server error: {}", e);
                    }
                }
                Err(e) => {
                    error!("Server task error: {}", e);
                }
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// Initialize the tracing (logging) system.
///
/// `RUST_LOG` controls the filter; the default keeps the gateway chatty and
/// the framework quiet.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "agent_call_gateway=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

/// Periodically remove ended sessions whose retention window has expired.
fn spawn_retention_sweeper(sessions: Arc<SessionRegistry>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            let removed = sessions.sweep_expired();
            if removed > 0 {
                info!("Retention sweep removed {} ended sessions", removed);
            }
        }
    });
}

/// Install SIGTERM/SIGINT handlers that set the shutdown flag.
fn setup_signal_handlers() {
    tokio::spawn(async {
        let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
            .expect("Failed to install SIGINT handler");

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

/// Poll the shutdown flag without busy-waiting.
async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
}
