//! HTTP status server for the voice bridge
//!
//! Read-only: the capture task publishes its state on a watch channel and
//! the handlers only look at the latest value.

pub mod health;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::Result;
use crate::voice::CaptureStatus;

pub use health::{HealthResponse, StatusResponse};

/// Shared state for status handlers
#[derive(Debug)]
pub struct StatusState {
    capture: watch::Receiver<CaptureStatus>,
    sessions: Arc<AtomicU64>,
}

impl StatusState {
    /// Create status state from the capture watch and the session counter
    #[must_use]
    pub const fn new(capture: watch::Receiver<CaptureStatus>, sessions: Arc<AtomicU64>) -> Self {
        Self { capture, sessions }
    }
}

/// Status HTTP server
pub struct StatusServer {
    listener: TcpListener,
    state: Arc<StatusState>,
}

impl StatusServer {
    /// Bind the status server
    ///
    /// # Errors
    ///
    /// Returns error if the address cannot be bound
    pub async fn bind(addr: SocketAddr, state: StatusState) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| crate::Error::Config(format!("failed to bind status server: {e}")))?;

        Ok(Self {
            listener,
            state: Arc::new(state),
        })
    }

    /// Address the server is listening on
    ///
    /// # Errors
    ///
    /// Returns error if the socket has no local address
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Build the router
    pub fn router(&self) -> Router {
        router(Arc::clone(&self.state))
    }

    /// Serve until `shutdown` resolves
    ///
    /// # Errors
    ///
    /// Returns error if the server fails
    pub async fn run(self, shutdown: impl Future<Output = ()> + Send + 'static) -> Result<()> {
        let addr = self.local_addr()?;
        tracing::info!(addr = %addr, "status server listening");

        let router = self.router();
        axum::serve(self.listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| crate::Error::Config(format!("status server error: {e}")))?;

        Ok(())
    }
}

/// Full status router with request tracing
pub fn router(state: Arc<StatusState>) -> Router {
    health::router()
        .merge(health::status_router(state))
        .layer(TraceLayer::new_for_http())
}
