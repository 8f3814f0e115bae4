//! Public HTTP Surface
//!
//! Serves the browser client and the three ways of reading quotes.
//!
//! # Endpoints
//!
//! - `GET /` - index page (loaded once at startup)
//! - `GET /static/*` - static assets
//! - `GET /data` - poll: fetch and aggregate a fresh snapshot on demand
//! - `GET /ws` - WebSocket push
//! - `GET /events` - Server-Sent Events push
//! - `GET /favicon.ico` - empty 204
//! - `GET /health`, `/healthz`, `/readyz`, `/metrics` - operational endpoints

mod health;
mod push;

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

pub use health::{HealthResponse, HealthStatus};

use crate::application::services::{QuoteFetcher, SchedulerStatus};
use crate::domain::quote::Symbol;
use crate::domain::snapshot::{POLL_ROUND_ID, Snapshot};
use crate::infrastructure::broadcast::SharedBroadcaster;

/// Constant message returned alongside poll snapshots.
pub const WELCOME_MESSAGE: &str = "Welcome to the Stock Data API";

// =============================================================================
// State
// =============================================================================

/// Push connection timing.
#[derive(Debug, Clone, Copy)]
pub struct PushTiming {
    /// WebSocket ping / SSE keep-alive period.
    pub keepalive_interval: Duration,
    /// Bound on one socket send.
    pub send_timeout: Duration,
}

impl Default for PushTiming {
    fn default() -> Self {
        Self {
            keepalive_interval: Duration::from_secs(15),
            send_timeout: Duration::from_secs(5),
        }
    }
}

/// Shared state for the HTTP handlers.
pub struct AppState {
    fetcher: QuoteFetcher,
    symbols: Arc<[Symbol]>,
    broadcaster: SharedBroadcaster,
    scheduler_status: Arc<SchedulerStatus>,
    push: PushTiming,
    index_html: String,
    shutdown: CancellationToken,
    version: String,
    started_at: Instant,
}

impl AppState {
    /// Create handler state.
    #[must_use]
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        fetcher: QuoteFetcher,
        symbols: impl Into<Arc<[Symbol]>>,
        broadcaster: SharedBroadcaster,
        scheduler_status: Arc<SchedulerStatus>,
        push: PushTiming,
        index_html: String,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            fetcher,
            symbols: symbols.into(),
            broadcaster,
            scheduler_status,
            push,
            index_html,
            shutdown,
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: Instant::now(),
        }
    }
}

/// Read `index.html` from the static directory.
///
/// # Errors
///
/// Returns `ServerError::MissingIndex` if the file cannot be read.
pub fn load_index(static_dir: &Path) -> Result<String, ServerError> {
    let path = static_dir.join("index.html");
    std::fs::read_to_string(&path).map_err(|e| ServerError::MissingIndex {
        path,
        reason: e.to_string(),
    })
}

/// Build the application router.
pub fn router(state: Arc<AppState>, static_dir: &Path) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/data", get(data_handler))
        .route("/ws", get(push::ws_handler))
        .route("/events", get(push::sse_handler))
        .route("/favicon.ico", get(favicon_handler))
        .route("/health", get(health::health_handler))
        .route("/healthz", get(health::liveness_handler))
        .route("/readyz", get(health::readiness_handler))
        .route("/metrics", get(health::metrics_handler))
        .nest_service("/static", ServeDir::new(static_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server for the public surface.
pub struct QuoteServer {
    port: u16,
    static_dir: PathBuf,
    state: Arc<AppState>,
    cancel: CancellationToken,
}

impl QuoteServer {
    /// Create a new server.
    #[must_use]
    pub const fn new(
        port: u16,
        static_dir: PathBuf,
        state: Arc<AppState>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            port,
            static_dir,
            state,
            cancel,
        }
    }

    /// Bind the configured port and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError` if binding fails or the server fails while
    /// running.
    pub async fn run(self) -> Result<(), ServerError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ServerError::BindFailed(self.port, e.to_string()))?;
        self.serve(listener).await
    }

    /// Serve on an already-bound listener until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::ServerFailed` if the server fails while running.
    pub async fn serve(self, listener: TcpListener) -> Result<(), ServerError> {
        let app = router(self.state, &self.static_dir);

        if let Ok(addr) = listener.local_addr() {
            tracing::info!(%addr, "HTTP server listening");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(|e| ServerError::ServerFailed(e.to_string()))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// =============================================================================
// Handlers
// =============================================================================

/// Poll response body.
#[derive(Debug, Serialize)]
pub struct PollResponse {
    /// Constant welcome message.
    pub message: &'static str,
    /// Freshly fetched snapshot.
    pub stock_data: Snapshot,
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Html<String> {
    Html(state.index_html.clone())
}

async fn data_handler(State(state): State<Arc<AppState>>) -> Json<PollResponse> {
    let results = state.fetcher.fetch_all(&state.symbols).await;
    let snapshot = Snapshot::aggregate(results, POLL_ROUND_ID);
    tracing::debug!(symbols = snapshot.len(), "Poll snapshot served");

    Json(PollResponse {
        message: WELCOME_MESSAGE,
        stock_data: snapshot,
    })
}

async fn favicon_handler() -> impl IntoResponse {
    StatusCode::NO_CONTENT
}

// =============================================================================
// Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Index page is missing; startup cannot continue.
    #[error("index page {} unavailable: {reason}", .path.display())]
    MissingIndex {
        /// Expected location.
        path: PathBuf,
        /// Underlying I/O error.
        reason: String,
    },

    /// Failed to bind to port.
    #[error("failed to bind to port {0}: {1}")]
    BindFailed(u16, String),

    /// Server error.
    #[error("server error: {0}")]
    ServerFailed(String),
}
