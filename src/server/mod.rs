//! HTTP server
//!
//! Serves cached audio to clients and exposes a manual refresh trigger.
//! Every lookup goes straight to the cache store, so the server keeps
//! answering while a refresh is rewriting it.
//!
//! # Endpoints
//!
//! - `GET /` - Version and refresh schedule
//! - `GET /poll/:type/:id` - Whether an asset is cached
//! - `GET /download/:type/:id` - Cached asset bytes
//! - `GET /refresh` - Run a refresh and wait for it
//!
//! `/poll` and `/download` never answer with an HTTP error: malformed input
//! and missing assets both produce `{"invalid": true}`.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use gd_audio_cache::config::Config;
//! use gd_audio_cache::refresh::Refresher;
//! use gd_audio_cache::server::Server;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = Config::default();
//! let refresher = Arc::new(Refresher::from_config(&config));
//! Server::from_config(&config, refresher).start().await?;
//! # Ok(())
//! # }
//! ```

use anyhow::Result;
use axum::{
    extract::{Path, State},
    http::header,
    response::{IntoResponse, Json, Redirect, Response},
    routing::get,
    Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::audio::AudioKind;
use crate::config::Config;
use crate::refresh::{run_in_task, RefreshTrigger, Refresher};

/// Where unknown paths are sent.
pub const NOT_FOUND_REDIRECT: &str = "https://http.cat/404";

/// Server state shared across handlers.
pub struct AppState {
    pub refresher: Arc<Refresher>,
    /// Schedule expression reported by `GET /`.
    pub refresh_interval: String,
}

/// API server configuration.
pub struct Server {
    bind_address: String,
    port: u16,
    refresh_interval: String,
    refresher: Arc<Refresher>,
}

impl Server {
    /// Create a server bound to 0.0.0.0:3000.
    pub fn new(refresher: Arc<Refresher>) -> Self {
        let defaults = Config::default();
        Self {
            bind_address: defaults.ip,
            port: defaults.port,
            refresh_interval: defaults.refresh_interval,
            refresher,
        }
    }

    pub fn from_config(config: &Config, refresher: Arc<Refresher>) -> Self {
        Self::new(refresher)
            .with_bind_address(config.ip.clone())
            .with_port(config.port)
            .with_refresh_interval(config.refresh_interval.clone())
    }

    pub fn with_bind_address(mut self, addr: impl Into<String>) -> Self {
        self.bind_address = addr.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_refresh_interval(mut self, expr: impl Into<String>) -> Self {
        self.refresh_interval = expr.into();
        self
    }

    /// Build the router with all routes.
    pub fn build_router(&self) -> Router {
        let state = Arc::new(AppState {
            refresher: Arc::clone(&self.refresher),
            refresh_interval: self.refresh_interval.clone(),
        });

        Router::new()
            .route("/", get(info_handler))
            .route("/poll/:type/:id", get(poll_handler))
            .route("/download/:type/:id", get(download_handler))
            .route("/refresh", get(refresh_handler))
            .fallback(not_found_handler)
            .layer(TraceLayer::new_for_http())
            .with_state(state)
    }

    /// Start the server with graceful shutdown.
    pub async fn start(&self) -> Result<()> {
        let router = self.build_router();
        let addr = format!("{}:{}", self.bind_address, self.port);

        let listener = tokio::net::TcpListener::bind(&addr).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                anyhow::anyhow!(
                    "Port {} is already in use. Stop the other instance or set a different port in config.json or PORT",
                    self.port
                )
            } else {
                anyhow::anyhow!("Failed to bind to {}: {}", addr, e)
            }
        })?;

        tracing::info!(
            "Server started at {}, set to update {}",
            addr,
            self.refresh_interval
        );

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        Ok(())
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

// =============================================================================
// Request/Response Types
// =============================================================================

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct InfoResponse {
    version: String,
    refresh_interval: String,
}

#[derive(Serialize)]
struct PollResponse {
    invalid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
}

impl PollResponse {
    fn invalid() -> Self {
        Self {
            invalid: true,
            exists: None,
        }
    }
}

#[derive(Serialize)]
struct RefreshResponse {
    success: bool,
}

/// A `/poll` or `/download` path that passed validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// A non-negative id that may be cached.
    Asset(AudioKind, u64),
    /// A well-formed but negative id; nothing is ever cached under it.
    NeverCached,
}

/// Validate `type` and `id` path segments. `None` means invalid input.
fn parse_target(kind: &str, id: &str) -> Option<Target> {
    let kind: AudioKind = kind.parse().ok()?;
    if let Ok(id) = id.parse::<u64>() {
        return Some(Target::Asset(kind, id));
    }
    id.parse::<i64>().ok().map(|_| Target::NeverCached)
}

// =============================================================================
// Handlers
// =============================================================================

async fn info_handler(State(state): State<Arc<AppState>>) -> Json<InfoResponse> {
    Json(InfoResponse {
        version: format!("v{}", env!("CARGO_PKG_VERSION")),
        refresh_interval: state.refresh_interval.clone(),
    })
}

async fn poll_handler(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Json<PollResponse> {
    tracing::debug!(kind = %kind, id = %id, "Polling asset");

    let exists = match parse_target(&kind, &id) {
        None => return Json(PollResponse::invalid()),
        Some(Target::NeverCached) => false,
        Some(Target::Asset(kind, id)) => state.refresher.store().exists(kind, id).await,
    };

    Json(PollResponse {
        invalid: false,
        exists: Some(exists),
    })
}

async fn download_handler(
    State(state): State<Arc<AppState>>,
    Path((kind, id)): Path<(String, String)>,
) -> Response {
    tracing::debug!(kind = %kind, id = %id, "Serving asset");

    let Some(Target::Asset(kind, id)) = parse_target(&kind, &id) else {
        return Json(PollResponse::invalid()).into_response();
    };

    match state.refresher.store().read_bytes(kind, id).await {
        Ok(Some(bytes)) => ([(header::CONTENT_TYPE, kind.content_type())], bytes).into_response(),
        Ok(None) => Json(PollResponse::invalid()).into_response(),
        Err(e) => {
            tracing::warn!(asset_id = id, %kind, "Failed to read cached asset: {}", e);
            Json(PollResponse::invalid()).into_response()
        }
    }
}

/// Runs a full refresh and answers once it has finished.
async fn refresh_handler(State(state): State<Arc<AppState>>) -> Json<RefreshResponse> {
    tracing::info!("Manual refresh requested");
    let outcome = run_in_task(Arc::clone(&state.refresher), RefreshTrigger::Manual).await;
    Json(RefreshResponse {
        success: outcome.is_some(),
    })
}

async fn not_found_handler() -> Redirect {
    Redirect::temporary(NOT_FOUND_REDIRECT)
}

/// Graceful shutdown signal handler.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (
            signal(SignalKind::terminate()),
            signal(SignalKind::interrupt()),
        ) {
            (Ok(term), Ok(int)) => (term, int),
            _ => {
                tracing::error!("Failed to install signal handlers, graceful shutdown disabled");
                std::future::pending::<()>().await;
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => {
                tracing::info!("Received SIGTERM, initiating graceful shutdown...");
            }
            _ = sigint.recv() => {
                tracing::info!("Received SIGINT (Ctrl+C), initiating graceful shutdown...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        tracing::info!("Received Ctrl+C, initiating graceful shutdown...");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_target() {
        assert_eq!(parse_target("song", "10"), Some(Target::Asset(AudioKind::Song, 10)));
        assert_eq!(parse_target("sfx", "30"), Some(Target::Asset(AudioKind::Sfx, 30)));
        assert_eq!(parse_target("sfx", "-4"), Some(Target::NeverCached));
        assert_eq!(parse_target("songs", "10"), None);
        assert_eq!(parse_target("song", "ten"), None);
        assert_eq!(parse_target("song", "12abc"), None);
    }

    #[test]
    fn test_server_from_config() {
        let config = Config {
            port: 8080,
            ..Config::default()
        };
        let refresher = Arc::new(Refresher::from_config(&config));
        let server = Server::from_config(&config, refresher);
        assert_eq!(server.port(), 8080);
        assert_eq!(server.refresh_interval, "0 */2 * * *");
    }
}
