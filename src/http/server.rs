//! HTTP server wiring the rate limiter in front of the application routes.

use std::net::SocketAddr;

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{error, info};

use super::middleware::{rate_limit, RateLimitState};
use crate::error::{QuotaGateError, Result};

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    rules: usize,
    counters: usize,
}

async fn health(State(state): State<RateLimitState>) -> Json<HealthResponse> {
    let stats = state.limiter().stats();
    Json(HealthResponse {
        status: "ok",
        rules: stats.rules,
        counters: stats.counters,
    })
}

async fn fallback() -> (StatusCode, &'static str) {
    (StatusCode::OK, "ok")
}

/// Build the application router with rate limiting applied to every route.
pub fn router(state: RateLimitState) -> Router {
    Router::new()
        .route("/health", get(health))
        .fallback(fallback)
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .with_state(state)
}

/// HTTP server for the rate limited application.
pub struct HttpServer {
    /// Address to bind to
    addr: SocketAddr,
    state: RateLimitState,
}

impl HttpServer {
    pub fn new(addr: SocketAddr, state: RateLimitState) -> Self {
        Self { addr, state }
    }

    /// Start the server with graceful shutdown.
    ///
    /// The server will shut down when the provided signal resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            QuotaGateError::Io(e)
        })?;

        info!(addr = %self.addr, "Starting HTTP server with graceful shutdown");

        axum::serve(
            listener,
            router(self.state).into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(signal)
        .await
        .map_err(|e| {
            error!(error = %e, "HTTP server failed");
            QuotaGateError::Io(e)
        })
    }
}
