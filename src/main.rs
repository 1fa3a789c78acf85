#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! # sshmux
//!
//! Multiplexing proxy that exposes long-lived SSH interactive shell sessions
//! to multiple simultaneous browser clients over WebSocket, managed through a
//! small REST control plane and an SSE change feed.
//!
//! ## API surface
//!
//! | Method | Path                        | Description                          |
//! |--------|-----------------------------|--------------------------------------|
//! | GET    | `/healthz`                  | Liveness probe                       |
//! | POST   | `/connections`              | Create an SSH session                |
//! | GET    | `/connections`              | Snapshot of all sessions             |
//! | DELETE | `/connections/{id}`         | Terminate a session                  |
//! | POST   | `/connections/{id}/resize`  | Change PTY dimensions                |
//! | GET    | `/connections/stream`       | SSE change-notification feed         |
//! | GET    | `/ws/{id}`                  | WebSocket attach (`?readOnly=1`)     |
//!
//! All paths are prefixed by `BASE_PATH` when configured.
//!
//! ## Architecture
//!
//! ```text
//! main.rs          — entry point, clap CLI, router setup, sweep task, graceful shutdown
//! config.rs        — TOML + env-var configuration
//! error.rs         — error kinds and HTTP status mapping
//! notify.rs        — versioned change-notification bus
//! ssh.rs           — SSH transport + PTY shell adapter (russh)
//! sessions/
//!   session.rs     — session record, state machine, peer handles
//!   mod.rs         — SessionManager (registry, admission, fan-out pump, sweep)
//! routes/
//!   health.rs      — GET /healthz
//!   connections.rs — REST control plane
//!   events.rs      — SSE change feed
//! ws/
//!   mod.rs         — WebSocket upgrade, control-frame protocol, peer loop
//! ```

mod config;
mod error;
mod notify;
mod routes;
mod sessions;
mod ssh;
mod util;
mod ws;

use std::sync::Arc;
use std::time::Duration;

use axum::extract::Request;
use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{delete, get, post};
use axum::Router;
use clap::{Parser, Subcommand};
use tokio::net::TcpListener;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

use config::Config;
use sessions::SessionManager;

/// Multiplexing SSH-over-WebSocket proxy.
#[derive(Parser)]
#[command(name = "sshmux", version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP/WS server (default when no subcommand given).
    Serve {
        /// Path to TOML config file.
        #[arg(long)]
        config: Option<String>,
    },
}

/// Shared application state passed to every handler via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    /// Immutable configuration loaded at startup.
    pub config: Arc<Config>,
    /// Registry, fan-out engine, and notification bus.
    pub manager: SessionManager,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let config_path = match cli.command {
        Some(Commands::Serve { config }) => config,
        None => None,
    };
    run_server(config_path.as_deref()).await;
}

/// OPTIONS on any path answers 204. Runs outside the CORS layer, so the
/// rewritten response keeps the CORS headers the layer attached.
async fn options_no_content(request: Request, next: Next) -> Response {
    let is_options = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if is_options {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

/// CORS: echo the request origin when it is allow-listed (or the list holds
/// `*`), permit the control-plane methods and headers, allow credentials.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let origins = allowed_origins.to_vec();
    let wildcard = origins.iter().any(|o| o == "*");
    CorsLayer::new()
        .allow_origin(AllowOrigin::predicate(
            move |origin: &HeaderValue, _request| {
                wildcard
                    || origins
                        .iter()
                        .any(|allowed| allowed.as_bytes() == origin.as_bytes())
            },
        ))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .allow_credentials(true)
}

async fn run_server(config_path: Option<&str>) {
    let config = Arc::new(Config::load(config_path));

    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| config.logging.level.clone());
    tracing_subscriber::fmt().with_env_filter(log_filter).init();

    info!("sshmux v{} starting", env!("CARGO_PKG_VERSION"));
    if !config.server.base_path.is_empty() {
        info!("Base path: {}", config.server.base_path);
    }

    let manager = SessionManager::new(Arc::clone(&config));
    let state = AppState {
        config: Arc::clone(&config),
        manager,
    };

    let api = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route(
            "/connections",
            post(routes::connections::create).get(routes::connections::list),
        )
        .route("/connections/stream", get(routes::events::stream))
        .route("/connections/{id}", delete(routes::connections::remove))
        .route(
            "/connections/{id}/resize",
            post(routes::connections::resize),
        )
        .route("/ws/{id}", get(ws::ws_upgrade));

    let app = if config.server.base_path.is_empty() {
        api
    } else {
        Router::new().nest(&config.server.base_path, api)
    }
    .layer(cors_layer(&config.server.allowed_origins))
    .layer(middleware::from_fn(options_no_content))
    .layer(TraceLayer::new_for_http())
    .with_state(state.clone());

    let addr = format!("0.0.0.0:{}", config.server.port);
    let listener = TcpListener::bind(&addr).await.expect("Failed to bind");
    info!("Listening on {addr}");

    // Periodic sweep: reap sessions with no open peers past their idle budget.
    let sweep_manager = state.manager.clone();
    let sweep_interval = Duration::from_millis(config.server.sweep_interval_ms);
    let sweep_task = tokio::spawn(async move {
        let mut interval = tokio::time::interval(sweep_interval);
        loop {
            interval.tick().await;
            sweep_manager.sweep().await;
        }
    });

    // Graceful shutdown
    let shutdown = async {
        let ctrl_c = tokio::signal::ctrl_c();
        #[cfg(unix)]
        {
            let mut sigterm =
                tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                    .expect("Failed to register SIGTERM");
            tokio::select! {
                _ = ctrl_c => info!("Received SIGINT"),
                _ = sigterm.recv() => info!("Received SIGTERM"),
            }
        }
        #[cfg(not(unix))]
        {
            ctrl_c.await.ok();
            info!("Received SIGINT");
        }
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
        .expect("Server error");

    info!("Shutting down...");
    sweep_task.abort();
    state.manager.shutdown().await;
    info!("Goodbye");
}
