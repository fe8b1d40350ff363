//! Documentation of a feedback collection backend.
//!
//!
//!
//! # General Infrastructure
//! - Embedded forms post submissions to `POST /api/feedback`
//! - Form owners manage forms through `/api/forms`, including pausing and setting a `feedbackLimit`
//! - Several server instances may run against one Redis; no correctness relies on in-process state
//!
//!
//!
//! # Feedback Limits
//!
//! **Goal**: A form with `feedbackLimit = L` never stores more than `L` admitted entries, no matter how many
//! submissions race for the last slot.
//!
//! - On startup the store is probed once for multi-key transactions
//! - If supported, each submission re-reads the form, checks it and writes the entry plus the counter bump in
//!   one `WATCH`/`MULTI`/`EXEC` unit, retried a few times on conflicts
//! - Otherwise the entry is written first, then a single-key Lua script bumps the counter only while below the
//!   limit; on a lost race the entry is deleted again
//! - A rollback delete that fails leaves an orphan; it is logged, recorded in `feedback:orphans` and hidden
//!   from listings until the `reconcile` binary removes it
//!
//!
//!
//! # Notes
//!
//! ## Redis Cluster
//! The atomic path needs the form hash and the entry key in one transaction. Those keys hash to different
//! slots, so a cluster rejects the unit with `CROSSSLOT`. The probe catches this at startup and the
//! compensating path takes over. A `CROSSSLOT` seen later downgrades the writer for the rest of the process.
//!
//!
//!
//! # Setup
//!
//! Run against a local Redis.
//! ```sh
//! REDIS_URL=redis://127.0.0.1:6379 RUST_LOG=info cargo run -p server
//! ```
//!
//! Run without Redis.
//! ```sh
//! STORE_BACKEND=memory LOCATION_LOOKUPS=false cargo run -p server
//! ```
//!
//! Hammer a limited form.
//! ```sh
//! cargo run -p tester -- --create-limit 5 --count 50
//! ```
//!
//! Sweep orphans.
//! ```sh
//! cargo run -p process --bin reconcile -- --dry-run
//! ```
use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{
    Router,
    http::{Method, header::CONTENT_TYPE},
    routing::{get, post},
};

use signal::{
    ctrl_c,
    unix::{SignalKind, signal},
};
use tokio::{net::TcpListener, signal};
use tower_http::cors::CorsLayer;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

pub mod admission;
pub mod cache;
pub mod config;
pub mod database;
pub mod error;
pub mod location;
pub mod routes;
pub mod state;
pub mod store;
pub mod submission;
pub mod utils;

use config::Config;
use routes::{
    create_form_handler, delete_form_handler, get_form_handler, health_handler,
    list_feedback_handler, list_forms_handler, submit_handler, update_form_handler,
};
use state::AppState;

pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([CONTENT_TYPE])
        .max_age(Duration::from_secs(60 * 60));

    Router::new()
        .route("/health", get(health_handler))
        .route("/api/feedback", post(submit_handler).get(list_feedback_handler))
        .route("/api/forms", post(create_form_handler).get(list_forms_handler))
        .route(
            "/api/forms/{id}",
            get(get_form_handler)
                .patch(update_form_handler)
                .delete(delete_form_handler),
        )
        .layer(cors)
        .with_state(state)
}

pub async fn start_server() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();

    info!("Loading config...");
    let config = Config::load()?;
    let port = config.port;

    info!("Initializing state...");
    let state = AppState::new(config).await?;
    info!(path = ?state.writer.path(), "Submission path selected");

    info!("Starting server...");
    let app = build_router(state);

    let address = format!("0.0.0.0:{port}");
    info!("Binding to {address}");

    let listener = TcpListener::bind(&address).await?;
    info!("Server running on {address}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    info!("Server shutting down...");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        match ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => {
                error!("Failed to install Ctrl+C handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received terminate signal, shutting down");
            }
            Err(e) => {
                error!("Failed to install signal handler: {e}");
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
