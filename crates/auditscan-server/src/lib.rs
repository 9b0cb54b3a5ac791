//! HTTP scan worker for auditscan
//!
//! `POST /scan` scans one object and returns the matches either streamed as
//! NDJSON batches or collected into a single response.

mod error;
mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use auditscan_scan::ScanPipeline;
use auditscan_source::{Compression, ObjectStore};

pub use error::ApiError;
pub use handlers::{DeliveryMode, ScanRequest};

pub const DEFAULT_LISTEN: &str = "0.0.0.0:17654";

/// `[server]` section of the config file
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub listen: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: DEFAULT_LISTEN.to_string(),
        }
    }
}

/// Shared state for request handlers
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<ObjectStore>,
    pub pipeline: ScanPipeline,
    pub compression: Compression,
    pub track_durations: bool,
    /// Cancelled on shutdown; every scan runs under a child of it
    pub shutdown: CancellationToken,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/scan", post(handlers::scan))
        .with_state(state)
}

/// Serve until `state.shutdown` is cancelled
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    let shutdown = state.shutdown.clone();
    info!("Listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
}
