//! Health and status endpoints

use std::sync::Arc;
use std::sync::atomic::Ordering;

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::StatusState;

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// Capture and session counters
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub buffered_bytes: usize,
    pub buffered_ms: u64,
    pub datagrams: u64,
    pub sessions: u64,
    /// Seconds since the last datagram; absent before the first one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity_secs_ago: Option<u64>,
}

/// Liveness probe - is the service running?
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Current capture buffer state
async fn status(State(state): State<Arc<StatusState>>) -> Json<StatusResponse> {
    Json(state.snapshot())
}

impl StatusState {
    /// Build a status response from the latest published capture state
    #[must_use]
    pub fn snapshot(&self) -> StatusResponse {
        let capture = *self.capture.borrow();
        let now = tokio::time::Instant::now().into_std();

        StatusResponse {
            buffered_bytes: capture.buffered_bytes,
            buffered_ms: capture.buffered_ms(),
            datagrams: capture.datagrams,
            sessions: self.sessions.load(Ordering::Relaxed),
            last_activity_secs_ago: capture
                .last_activity
                .map(|at| now.saturating_duration_since(at).as_secs()),
        }
    }
}

/// Build health router (liveness only, no state needed)
pub fn router() -> Router {
    Router::new().route("/health", get(health))
}

/// Build status router
pub fn status_router(state: Arc<StatusState>) -> Router {
    Router::new().route("/status", get(status)).with_state(state)
}
