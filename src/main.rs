//! Watchpost - detection correlation and incident lifecycle engine.
//!
//! # API Endpoints
//!
//! - `POST /detections` - Submit a detection event (dedup + correlation)
//! - `GET /incidents` - List incidents
//! - `GET /incidents/{id}` - Incident detail with audit trail
//! - `PUT /incidents/{id}` - Update incident status/assignment/notes
//! - `DELETE /users/{id}` - Administrative user deletion with cascade
//! - `POST /live` / `GET /live` - Publish/read the live detection snapshot
//! - `GET /health` - Health check

use std::env;
use std::net::SocketAddr;

use axum::{
    Router,
    routing::{delete, get, post, put},
};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use watchpost::api::{
    AppState, delete_user, get_incident, get_live, health_check, list_incidents, post_detection,
    post_live, put_incident,
};
use watchpost::engine::Engine;
use watchpost::live::LiveFeed;
use watchpost::storage::Storage;

/// Default port if not specified via environment variable.
const DEFAULT_PORT: u16 = 3000;

/// Default database path if not specified via environment variable.
const DEFAULT_DB_PATH: &str = "sqlite:watchpost.db?mode=rwc";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("watchpost=info".parse()?))
        .init();

    // Load configuration from environment
    let port: u16 = env::var("WATCHPOST_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);

    let db_url = env::var("WATCHPOST_DATABASE_URL").unwrap_or_else(|_| DEFAULT_DB_PATH.to_string());

    info!(port, db_url = %db_url, "Starting Watchpost server");

    // Initialize storage and the engine
    let storage = Storage::new(&db_url).await?;
    info!("Database initialized");

    let state = AppState {
        engine: Engine::new(storage),
        live: LiveFeed::new(),
    };

    // Build router
    let app = Router::new()
        .route("/detections", post(post_detection))
        .route("/incidents", get(list_incidents))
        .route("/incidents/:id", get(get_incident))
        .route("/incidents/:id", put(put_incident))
        .route("/users/:id", delete(delete_user))
        .route("/live", post(post_live))
        .route("/live", get(get_live))
        .route("/health", get(health_check))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(%addr, "Watchpost is listening");

    axum::serve(listener, app).await?;

    Ok(())
}
